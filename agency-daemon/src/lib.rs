//! Coordinator daemon: one process per agency owning the scheduler and its
//! journal, serving a newline-delimited JSON socket and running workers.

pub mod coordinator;
mod error;
mod lock;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod worker;

pub use coordinator::{command_from_request, Command, Coordinator, Reply};
pub use error::DaemonError;
pub use protocol::{
    request, request_status, request_stop, send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{init_tracing, run, start_blocking, DaemonOptions};
pub use worker::{parse_report, run_worker, WorkerLaunch};
