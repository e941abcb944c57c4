//! Decide whether the remote object already holds the local file's bytes.
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::error::CopyError;
use crate::store::{StoreError, normalize_etag};

use super::workers::RemoteCtx;

const READ_BUF: usize = 1024 * 1024;

/// MD5 of a whole file plus the MD5 of each `part_size` slice, gathered in a
/// single read so both single-PUT and multipart ETags can be checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDigest {
    pub md5: [u8; 16],
    pub part_md5s: Vec<[u8; 16]>,
}

impl LocalDigest {
    pub fn compute(path: &Path, part_size: u64) -> io::Result<Self> {
        let f = File::open(path)?;
        Self::from_reader(f, part_size)
    }

    pub fn from_reader<R: Read>(mut r: R, part_size: u64) -> io::Result<Self> {
        let part_size = part_size.max(1);
        let mut whole = md5::Context::new();
        let mut part = md5::Context::new();
        let mut in_part: u64 = 0;
        let mut part_md5s = Vec::new();
        let mut buf = vec![0u8; READ_BUF];
        loop {
            let n = r.read(&mut buf)?;
            if n == 0 {
                break;
            }
            whole.consume(&buf[..n]);
            let mut chunk = &buf[..n];
            while !chunk.is_empty() {
                let room = (part_size - in_part) as usize;
                let take = room.min(chunk.len());
                part.consume(&chunk[..take]);
                in_part += take as u64;
                chunk = &chunk[take..];
                if in_part == part_size {
                    let done = std::mem::replace(&mut part, md5::Context::new());
                    part_md5s.push(done.compute().0);
                    in_part = 0;
                }
            }
        }
        if in_part > 0 || part_md5s.is_empty() {
            part_md5s.push(part.compute().0);
        }
        Ok(Self { md5: whole.compute().0, part_md5s })
    }

    pub fn md5_hex(&self) -> String {
        hex(&self.md5)
    }

    /// ETag S3 assigns to a multipart object built from these parts.
    pub fn multipart_etag(&self) -> String {
        let joined: Vec<u8> = self.part_md5s.iter().flat_map(|d| d.iter().copied()).collect();
        format!("{}-{}", hex(&md5::compute(&joined).0), self.part_md5s.len())
    }

    /// Whether a remote ETag (quoted or not) describes these bytes.
    pub fn matches_etag(&self, etag: &str) -> bool {
        let etag = normalize_etag(etag);
        if etag.contains('-') { etag == self.multipart_etag() } else { etag == self.md5_hex() }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// What the enabled checks expect to find remotely. `None` disables a check.
#[derive(Debug, Clone, Default)]
pub struct Expectation {
    pub size: Option<u64>,
    pub digest: Option<LocalDigest>,
}

#[derive(Debug, Clone)]
pub enum Comparison {
    Match,
    NotExists,
    SizeMismatch { remote: u64, local: u64 },
    HashMismatch { remote: String, local: String },
    /// The remote state could not be determined.
    Failed(CopyError),
}

impl std::fmt::Display for Comparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Comparison::Match => write!(f, "identical"),
            Comparison::NotExists => write!(f, "not present"),
            Comparison::SizeMismatch { remote, local } => {
                write!(f, "size differs (remote {} / local {})", remote, local)
            }
            Comparison::HashMismatch { remote, local } => {
                write!(f, "content differs (remote {} / local {})", remote, local)
            }
            Comparison::Failed(e) => write!(f, "comparison failed: {}", e),
        }
    }
}

/// HEAD the destination and apply every enabled check.
pub fn compare(ctx: &RemoteCtx, key: &str, expect: &Expectation) -> Comparison {
    let what = format!("head {}", key);
    let meta = match ctx.call(&what, |s, b| s.head_object(b, key)) {
        Ok(m) => m,
        Err(CopyError::Store { error: StoreError::NotFound(_), .. }) => {
            return Comparison::NotExists;
        }
        Err(e) => return Comparison::Failed(e),
    };
    if let Some(local) = expect.size
        && meta.size != local
    {
        return Comparison::SizeMismatch { remote: meta.size, local };
    }
    if let Some(digest) = &expect.digest
        && !digest.matches_etag(&meta.etag)
    {
        let local = if normalize_etag(&meta.etag).contains('-') {
            digest.multipart_etag()
        } else {
            digest.md5_hex()
        };
        return Comparison::HashMismatch { remote: normalize_etag(&meta.etag), local };
    }
    Comparison::Match
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn digest_of_empty_input_has_one_part() {
        let d = LocalDigest::from_reader(Cursor::new(Vec::new()), 4).expect("digest");
        assert_eq!(d.md5_hex(), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(d.part_md5s.len(), 1);
    }

    #[test]
    fn part_digests_follow_part_boundaries() {
        let data = b"aaaabbbbcc".to_vec();
        let d = LocalDigest::from_reader(Cursor::new(data), 4).expect("digest");
        assert_eq!(d.part_md5s.len(), 3);
        assert_eq!(d.part_md5s[0], md5::compute(b"aaaa").0);
        assert_eq!(d.part_md5s[2], md5::compute(b"cc").0);
        assert_eq!(d.md5, md5::compute(b"aaaabbbbcc").0);
    }

    #[test]
    fn etag_matching_handles_both_forms() {
        let d = LocalDigest::from_reader(Cursor::new(b"aaaabbbb".to_vec()), 4).expect("digest");
        assert!(d.matches_etag(&format!("\"{}\"", d.md5_hex())));
        assert!(d.matches_etag(&d.multipart_etag().to_uppercase()));
        assert!(d.multipart_etag().ends_with("-2"));
        assert!(!d.matches_etag("\"0123\""));
    }

    #[test]
    fn compare_distinguishes_missing_size_and_content() {
        use crate::signal::Done;
        use crate::store::{MemoryStore, ObjectStore, PutOptions};
        use std::sync::Arc;

        let store = Arc::new(MemoryStore::new());
        store
            .put_object("bk", "k", bytes::Bytes::from_static(b"aaaa"), &PutOptions::default())
            .expect("seed");
        let ctx = crate::transfer::workers::test_ctx(store, Done::never());
        let digest =
            |data: &[u8]| LocalDigest::from_reader(Cursor::new(data.to_vec()), 4).expect("digest");

        let size_only = Expectation { size: Some(4), digest: None };
        assert!(matches!(compare(&ctx, "missing", &size_only), Comparison::NotExists));
        assert!(matches!(compare(&ctx, "k", &size_only), Comparison::Match));

        let longer = Expectation { size: Some(5), digest: None };
        assert!(matches!(
            compare(&ctx, "k", &longer),
            Comparison::SizeMismatch { remote: 4, local: 5 }
        ));

        let other_bytes = Expectation { size: Some(4), digest: Some(digest(b"bbbb")) };
        match compare(&ctx, "k", &other_bytes) {
            Comparison::HashMismatch { remote, local } => {
                assert_eq!(remote, format!("{:x}", md5::compute(b"aaaa")));
                assert_eq!(local, format!("{:x}", md5::compute(b"bbbb")));
            }
            other => panic!("expected hash mismatch, got {}", other),
        }

        let same_bytes = Expectation { size: Some(4), digest: Some(digest(b"aaaa")) };
        assert!(matches!(compare(&ctx, "k", &same_bytes), Comparison::Match));
    }
}
