//! Agency core library: domain types, ownership, dependency graph, config.
//!
//! - [`types`] — newtypes and serializable domain structs
//! - [`ownership`] — path patterns and the [`RoleRegistry`]
//! - [`graph`] — the acyclic [`DependencyGraph`]
//! - [`config`] — load / save / validate an [`Agency`]
//! - [`error`] — [`RegistryError`], [`GraphError`], [`ConfigError`]

pub mod config;
pub mod error;
pub mod graph;
pub mod ownership;
pub mod types;

pub use config::Agency;
pub use error::{ConfigError, GraphError, RegistryError};
pub use graph::DependencyGraph;
pub use ownership::{PathPattern, RoleRegistry, WriteRejection};
pub use types::{
    AgencyConfig, Boundaries, CompletionReport, EdgeSpec, ReportStatus, RoleName, RoleSpec,
    RuntimeSettings, TaskDelegation, TaskStatus, ToolSource,
};
