//! Error types for agency-renderer.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while rendering a delegation brief.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Template parse or render failure (embedded or override).
    #[error("brief template error: {0}")]
    Tera(#[from] tera::Error),

    /// The delegation could not be turned into a tera context.
    #[error("brief context serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error while loading template overrides.
    #[error("cannot read template override at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
