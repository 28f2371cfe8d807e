//! State layout under `~/.agency`.
//!
//! ```text
//! ~/.agency/
//!   runs/<agency>/
//!     daemon.sock
//!     run.lock
//!     journal.jsonl
//!     briefs/<role>.md
//! ```

use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET: &str = "daemon.sock";
pub const JOURNAL_FILE: &str = "journal.jsonl";
/// Held exclusively by whichever process is writing the run.
pub const RUN_LOCK: &str = "run.lock";

/// Environment variable selecting the log format (`json` or the default text).
pub const LOG_FORMAT_ENV: &str = "AGENCY_LOG_FORMAT";

pub fn agency_root(home: &Path) -> PathBuf {
    home.join(".agency")
}

pub fn runs_root(home: &Path) -> PathBuf {
    agency_root(home).join("runs")
}

pub fn run_dir(home: &Path, agency: &str) -> PathBuf {
    runs_root(home).join(agency)
}

pub fn socket_path(home: &Path, agency: &str) -> PathBuf {
    run_dir(home, agency).join(DAEMON_SOCKET)
}

pub fn lock_path(home: &Path, agency: &str) -> PathBuf {
    run_dir(home, agency).join(RUN_LOCK)
}

pub fn journal_path(home: &Path, agency: &str) -> PathBuf {
    run_dir(home, agency).join(JOURNAL_FILE)
}

pub fn briefs_dir(home: &Path, agency: &str) -> PathBuf {
    run_dir(home, agency).join("briefs")
}
