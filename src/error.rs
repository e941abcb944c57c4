//! Structured errors for the upload engine. Orchestration code wraps these in
//! `anyhow::Error` with per-file context; callers that need to branch
//! (exit codes, summaries, tests) downcast back to `CopyError`.
use crate::retry::RetryError;
use crate::store::StoreError;

/// One chunk that could not be stored.
#[derive(Debug, Clone)]
pub struct PartFailure {
    pub part_number: i32,
    pub error: String,
}

#[derive(Debug, Clone)]
pub enum CopyError {
    /// 远端调用重试耗尽 (retries of a remote call ran out of time).
    RetryExhausted { what: String, attempts: u32, last: StoreError },
    /// A remote call failed with a non-retriable error.
    Store { what: String, error: StoreError },
    /// One or more chunks failed; the upload session is left open for resume.
    PartsFailed { key: String, failures: Vec<PartFailure> },
    /// Collected part numbers do not form a dense `1..=N` sequence.
    InconsistentManifest(String),
    /// The file needs more chunks than the service accepts.
    TooManyParts { key: String, parts: u64, limit: u64 },
    /// The directory walker reported errors; the listed paths were skipped.
    Enumeration(Vec<String>),
    Cancelled(String),
    LocalIo { path: String, message: String },
    InvalidArgs(String),
}

impl std::fmt::Display for CopyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use CopyError::*;
        match self {
            RetryExhausted { what, attempts, last } => {
                write!(f, "{} gave up after {} attempts: {}", what, attempts, last)
            }
            Store { what, error } => write!(f, "{} failed: {}", what, error),
            PartsFailed { key, failures } => {
                let numbers: Vec<String> =
                    failures.iter().map(|p| p.part_number.to_string()).collect();
                write!(
                    f,
                    "{} part(s) of {} failed (parts {}); session left open for resume",
                    failures.len(),
                    key,
                    numbers.join(",")
                )
            }
            InconsistentManifest(msg) => write!(f, "inconsistent part manifest: {}", msg),
            TooManyParts { key, parts, limit } => {
                write!(f, "{} needs {} parts, more than the limit of {}", key, parts, limit)
            }
            Enumeration(errs) => {
                write!(f, "{} path(s) could not be enumerated", errs.len())?;
                if let Some(first) = errs.first() {
                    write!(f, " (first: {})", first)?;
                }
                Ok(())
            }
            Cancelled(what) => write!(f, "cancelled: {}", what),
            LocalIo { path, message } => write!(f, "local I/O error on {}: {}", path, message),
            InvalidArgs(msg) => write!(f, "invalid arguments: {}", msg),
        }
    }
}

impl std::error::Error for CopyError {}

impl CopyError {
    pub fn local_io(path: &std::path::Path, err: &std::io::Error) -> Self {
        CopyError::LocalIo { path: path.display().to_string(), message: err.to_string() }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CopyError::Cancelled(_))
    }
}

impl From<RetryError<StoreError>> for CopyError {
    fn from(err: RetryError<StoreError>) -> Self {
        match err {
            RetryError::Permanent(error) => {
                CopyError::Store { what: "remote call".to_string(), error }
            }
            RetryError::Exhausted { what, attempts, last } => {
                CopyError::RetryExhausted { what, attempts, last }
            }
            RetryError::Cancelled { what } => CopyError::Cancelled(what),
        }
    }
}

/// Build a `CopyError` from a retry outcome, keeping the operation label on
/// permanent failures.
pub fn from_retry(what: &str, err: RetryError<StoreError>) -> CopyError {
    match err {
        RetryError::Permanent(error) => CopyError::Store { what: what.to_string(), error },
        other => other.into(),
    }
}
