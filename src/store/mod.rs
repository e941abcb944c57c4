//! Remote object-storage protocol used by the upload engine.
//!
//! The trait mirrors S3 multipart semantics closely but stays synchronous:
//! the engine runs on plain worker threads and an implementation decides how
//! to drive its own I/O. Listing calls return a single page; following the
//! truncation markers is the caller's job (see `transfer::session`).
use bytes::Bytes;

pub mod memory;
pub mod s3;

pub use memory::MemoryStore;
pub use s3::{S3Options, S3Store};

/// Metadata of a stored object, as reported by HEAD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub size: u64,
    pub etag: String,
}

/// One in-progress multipart upload found while listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub key: String,
    pub upload_id: String,
}

/// Continuation point for session listing (S3 key + upload-id markers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMarker {
    pub key_marker: String,
    pub upload_id_marker: String,
}

/// A part already stored under an upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePart {
    pub part_number: i32,
    pub size: u64,
    pub etag: String,
}

/// Entry of the completion manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

/// One page of a listing. `next` is set only when the backend reported truncation.
#[derive(Debug, Clone)]
pub struct Page<T, M> {
    pub items: Vec<T>,
    pub next: Option<M>,
}

impl<T, M> Page<T, M> {
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }
}

/// Object attributes applied on single PUTs and on session creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOptions {
    pub acl: Option<String>,
    pub content_type: String,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self { acl: None, content_type: "application/octet-stream".to_string() }
    }
}

pub trait ObjectStore: Send + Sync {
    fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectMeta>;

    fn list_sessions(
        &self,
        bucket: &str,
        prefix: &str,
        marker: Option<&SessionMarker>,
    ) -> StoreResult<Page<SessionSummary, SessionMarker>>;

    fn create_session(&self, bucket: &str, key: &str, opts: &PutOptions) -> StoreResult<String>;

    fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        marker: Option<&str>,
    ) -> StoreResult<Page<RemotePart, String>>;

    /// Upload one part and return the ETag the backend assigned to it.
    fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StoreResult<String>;

    fn complete_session(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StoreResult<()>;

    fn put_object(&self, bucket: &str, key: &str, body: Bytes, opts: &PutOptions)
    -> StoreResult<()>;

    fn backend_name(&self) -> &'static str;
}

/// Errors reported by an `ObjectStore`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The object, bucket or upload session does not exist.
    NotFound(String),
    /// The service answered with an error status.
    Service { status: Option<u16>, code: Option<String>, message: String },
    /// The request never produced a usable response (dispatch, timeout, body).
    Transport(String),
    /// The response was missing a field the protocol requires.
    InvalidResponse(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(what) => write!(f, "not found: {}", what),
            StoreError::Service { status, code, message } => {
                write!(f, "service error")?;
                if let Some(s) = status {
                    write!(f, " (HTTP {})", s)?;
                }
                if let Some(c) = code {
                    write!(f, " {}", c)?;
                }
                write!(f, ": {}", message)
            }
            StoreError::Transport(msg) => write!(f, "transport error: {}", msg),
            StoreError::InvalidResponse(msg) => write!(f, "invalid response: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl StoreError {
    /// Whether retrying cannot help: missing objects and client errors other
    /// than request timeout / throttling. Everything else is transient.
    pub fn is_permanent(&self) -> bool {
        match self {
            StoreError::NotFound(_) => true,
            StoreError::Service { status: Some(s), .. } => {
                (400..500).contains(s) && *s != 408 && *s != 429
            }
            StoreError::Service { status: None, .. }
            | StoreError::Transport(_)
            | StoreError::InvalidResponse(_) => false,
        }
    }
}

/// Strip the quotes S3 puts around ETags and lowercase the hex.
pub fn normalize_etag(etag: &str) -> String {
    etag.trim().trim_matches('"').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_classification() {
        assert!(StoreError::NotFound("k".into()).is_permanent());
        let forbidden =
            StoreError::Service { status: Some(403), code: None, message: "denied".into() };
        assert!(forbidden.is_permanent());
        let throttled =
            StoreError::Service { status: Some(429), code: None, message: "slow down".into() };
        assert!(!throttled.is_permanent());
        let internal =
            StoreError::Service { status: Some(500), code: None, message: "oops".into() };
        assert!(!internal.is_permanent());
        assert!(!StoreError::Transport("reset".into()).is_permanent());
    }

    #[test]
    fn etag_normalization() {
        assert_eq!(normalize_etag("\"ABCDEF\""), "abcdef");
        assert_eq!(normalize_etag("abc-3"), "abc-3");
    }
}
