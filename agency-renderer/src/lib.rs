//! # agency-renderer
//!
//! Tera-based renderer that turns a [`TaskDelegation`](agency_core::types::TaskDelegation)
//! into the Markdown brief handed to a role.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use agency_renderer::BriefRenderer;
//! use agency_core::types::TaskDelegation;
//!
//! fn print_brief(delegation: &TaskDelegation) {
//!     if let Ok(renderer) = BriefRenderer::new() {
//!         if let Ok(brief) = renderer.render(delegation, None) {
//!             println!("{brief}");
//!         }
//!     }
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::BriefContext;
pub use engine::{brief_file_name, BriefRenderer, BRIEF_TEMPLATE};
pub use error::RenderError;
