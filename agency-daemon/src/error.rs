use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the coordinator, its socket protocol and workers.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] agency_core::ConfigError),

    #[error(transparent)]
    Sched(#[from] agency_sched::SchedError),

    #[error("journal error: {0}")]
    Journal(#[from] agency_sched::JournalError),

    #[error("render error: {0}")]
    Render(#[from] agency_renderer::RenderError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    /// A well-formed request the coordinator cannot act on.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The coordinator answered with an error response.
    #[error("{0}")]
    Rejected(String),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },

    /// Another process holds the run's write lock.
    #[error("run '{agency}' is in use by another process (lock held: {path})")]
    RunLocked { agency: String, path: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
