//! Delegation record — the append-only audit trail of a run.
//!
//! Every scheduler transition is described by one [`DelegationRecord`]. Records
//! are chained: each carries the SHA-256 of its own body concatenated with the
//! previous record's digest, so a reordered, edited or truncated-in-the-middle
//! trail fails [`verify_chain`].
//!
//! When a journal file is attached, each record is written as one JSON line and
//! flushed *before* it becomes visible in memory. A failed write therefore
//! leaves both the log and the scheduler state untouched.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use agency_core::ownership::WriteRejection;
use agency_core::types::{CompletionReport, RoleName, TaskDelegation};

use crate::error::{io_err, JournalError};

/// `prev_digest` of the first record.
pub const GENESIS_DIGEST: &str = "0000000000000000000000000000000000000000000000000000000000000000";

// ---------------------------------------------------------------------------
// Record types
// ---------------------------------------------------------------------------

/// One artifact refused by the ownership check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub path: PathBuf,
    pub rejection: WriteRejection,
}

/// Why a role ended up `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The role itself reported failure.
    Reported { message: String },
    /// The completion report listed artifacts owned by someone else.
    OwnershipViolation { violations: Vec<Violation> },
    /// The caller cancelled the role.
    Cancelled {
        #[serde(default)]
        note: Option<String>,
    },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Reported { message } => write!(f, "{message}"),
            FailureReason::OwnershipViolation { violations } => {
                write!(f, "ownership violation ({} artifact(s))", violations.len())
            }
            FailureReason::Cancelled { note: Some(note) } => write!(f, "cancelled: {note}"),
            FailureReason::Cancelled { note: None } => write!(f, "cancelled"),
        }
    }
}

/// The transition a record describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RecordEvent {
    Dispatched { delegation: TaskDelegation },
    Completed { report: CompletionReport },
    Failed { reason: FailureReason },
    Retried,
    Cancelled {
        #[serde(default)]
        note: Option<String>,
    },
}

impl RecordEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RecordEvent::Dispatched { .. } => "dispatched",
            RecordEvent::Completed { .. } => "completed",
            RecordEvent::Failed { .. } => "failed",
            RecordEvent::Retried => "retried",
            RecordEvent::Cancelled { .. } => "cancelled",
        }
    }
}

/// One immutable entry of the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationRecord {
    /// 0-based position in the trail.
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub role: RoleName,
    pub attempt: u32,
    #[serde(flatten)]
    pub event: RecordEvent,
    pub prev_digest: String,
    pub digest: String,
}

/// Hashed portion of a record.
#[derive(Serialize)]
struct RecordBody<'a> {
    seq: u64,
    at: &'a DateTime<Utc>,
    role: &'a RoleName,
    attempt: u32,
    #[serde(flatten)]
    event: &'a RecordEvent,
}

impl DelegationRecord {
    fn body(&self) -> RecordBody<'_> {
        RecordBody {
            seq: self.seq,
            at: &self.at,
            role: &self.role,
            attempt: self.attempt,
            event: &self.event,
        }
    }

    /// Recompute this record's digest from its body and `prev_digest`.
    pub fn compute_digest(&self) -> Result<String, JournalError> {
        let body = serde_json::to_vec(&self.body())?;
        let mut hasher = Sha256::new();
        hasher.update(self.prev_digest.as_bytes());
        hasher.update(&body);
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Check sequence numbers and the digest chain of `records`.
pub fn verify_chain(records: &[DelegationRecord]) -> Result<(), JournalError> {
    let mut prev = GENESIS_DIGEST;
    for (index, record) in records.iter().enumerate() {
        if record.seq != index as u64 {
            return Err(JournalError::Tampered {
                seq: record.seq,
                reason: format!("expected sequence number {index}"),
            });
        }
        if record.prev_digest != prev {
            return Err(JournalError::Tampered {
                seq: record.seq,
                reason: "previous digest does not match".into(),
            });
        }
        if record.compute_digest()? != record.digest {
            return Err(JournalError::Tampered {
                seq: record.seq,
                reason: "record digest does not match its contents".into(),
            });
        }
        prev = &record.digest;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Journal file
// ---------------------------------------------------------------------------

/// Read and verify a JSON-lines journal. A missing file is an empty journal.
///
/// A final line without a terminating newline is a write torn by a crash; it
/// is skipped with a warning. Any other malformed line is an error.
pub fn load_journal(path: &Path) -> Result<Vec<DelegationRecord>, JournalError> {
    let (records, tail) = read_journal(path)?;
    if let Tail::Torn { valid_len } = tail {
        tracing::warn!(
            path = %path.display(),
            valid_len,
            "ignoring torn final journal line"
        );
    }
    Ok(records)
}

/// How the journal file ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    Clean,
    /// The last record parsed but its newline never made it to disk.
    Unterminated,
    /// The last line is a partial record; `valid_len` bytes precede it.
    Torn { valid_len: u64 },
}

fn read_journal(path: &Path) -> Result<(Vec<DelegationRecord>, Tail), JournalError> {
    if !path.exists() {
        return Ok((Vec::new(), Tail::Clean));
    }
    let contents = std::fs::read(path).map_err(|e| io_err(path, e))?;
    let mut records = Vec::new();
    let mut tail = Tail::Clean;
    let mut offset = 0usize;
    for (index, line) in contents.split_inclusive(|b| *b == b'\n').enumerate() {
        let start = offset;
        offset += line.len();
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let terminated = line.ends_with(b"\n");
        match serde_json::from_slice(line) {
            Ok(record) => {
                records.push(record);
                if !terminated {
                    tail = Tail::Unterminated;
                }
            }
            Err(_) if !terminated => {
                tail = Tail::Torn {
                    valid_len: start as u64,
                }
            }
            Err(e) => {
                return Err(JournalError::Parse {
                    path: path.to_path_buf(),
                    line: index + 1,
                    source: e,
                })
            }
        }
    }
    verify_chain(&records)?;
    Ok((records, tail))
}

#[derive(Debug)]
struct JournalSink {
    path: PathBuf,
    file: File,
}

impl JournalSink {
    fn open(path: &Path) -> Result<Self, JournalError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| io_err(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    fn terminate_line(&mut self) -> Result<(), JournalError> {
        self.file
            .write_all(b"\n")
            .and_then(|()| self.file.flush())
            .map_err(|e| io_err(&self.path, e))
    }

    fn write(&mut self, record: &DelegationRecord) -> Result<(), JournalError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .and_then(|()| self.file.flush())
            .map_err(|e| io_err(&self.path, e))
    }
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

/// Ordered, append-only trail of delegation records.
#[derive(Debug, Default)]
pub struct AuditLog {
    records: Vec<DelegationRecord>,
    sink: Option<JournalSink>,
    /// Appends left before every write fails.
    #[cfg(test)]
    write_budget: Option<usize>,
}

impl AuditLog {
    /// An in-memory log with no journal file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or create) the journal at `path`, loading and verifying any
    /// records it already holds. New records are appended to the same file.
    ///
    /// A torn final line is cut off the file so the next record starts on a
    /// fresh line.
    pub fn open(path: &Path) -> Result<Self, JournalError> {
        let (records, tail) = read_journal(path)?;
        if let Tail::Torn { valid_len } = tail {
            tracing::warn!(
                path = %path.display(),
                valid_len,
                "truncating torn final journal line"
            );
            OpenOptions::new()
                .write(true)
                .open(path)
                .and_then(|file| file.set_len(valid_len))
                .map_err(|e| io_err(path, e))?;
        }
        let mut sink = JournalSink::open(path)?;
        if tail == Tail::Unterminated {
            sink.terminate_line()?;
        }
        tracing::debug!(path = %path.display(), records = records.len(), "opened journal");
        Ok(Self {
            records,
            sink: Some(sink),
            ..Self::default()
        })
    }

    /// Wrap already-verified records without a journal file.
    pub fn from_records(records: Vec<DelegationRecord>) -> Result<Self, JournalError> {
        verify_chain(&records)?;
        Ok(Self {
            records,
            ..Self::default()
        })
    }

    /// Path of the attached journal, if any.
    pub fn journal_path(&self) -> Option<&Path> {
        self.sink.as_ref().map(|s| s.path.as_path())
    }

    /// Seal and append a record. The journal line is written first; on error
    /// nothing is appended.
    pub fn append(
        &mut self,
        role: RoleName,
        attempt: u32,
        event: RecordEvent,
    ) -> Result<&DelegationRecord, JournalError> {
        let prev_digest = self
            .records
            .last()
            .map(|r| r.digest.clone())
            .unwrap_or_else(|| GENESIS_DIGEST.to_string());
        let mut record = DelegationRecord {
            seq: self.records.len() as u64,
            at: Utc::now(),
            role,
            attempt,
            event,
            prev_digest,
            digest: String::new(),
        };
        record.digest = record.compute_digest()?;

        #[cfg(test)]
        if let Some(budget) = self.write_budget.as_mut() {
            if *budget == 0 {
                return Err(io_err(
                    "<test journal>",
                    std::io::Error::new(std::io::ErrorKind::Other, "journal write refused"),
                ));
            }
            *budget -= 1;
        }

        if let Some(sink) = self.sink.as_mut() {
            sink.write(&record)?;
        }
        self.records.push(record);
        Ok(&self.records[self.records.len() - 1])
    }

    pub fn records(&self) -> &[DelegationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Lazily iterate the records of `role`, oldest first.
    ///
    /// The iterator is `Clone`, so a consumer can restart from the beginning
    /// at any point without touching the log.
    pub fn history_for<'a>(&'a self, role: &'a str) -> History<'a> {
        History {
            records: self.records.iter(),
            role,
        }
    }

    pub fn verify(&self) -> Result<(), JournalError> {
        verify_chain(&self.records)
    }

    #[cfg(test)]
    pub(crate) fn fail_writes_after(&mut self, appends: usize) {
        self.write_budget = Some(appends);
    }
}

/// Iterator returned by [`AuditLog::history_for`].
#[derive(Debug, Clone)]
pub struct History<'a> {
    records: std::slice::Iter<'a, DelegationRecord>,
    role: &'a str,
}

impl<'a> Iterator for History<'a> {
    type Item = &'a DelegationRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let role = self.role;
        self.records.find(|r| r.role.as_str() == role)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.records.size_hint().1)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
