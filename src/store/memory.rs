//! In-process `ObjectStore` with S3-like ETags, small-page listings,
//! per-operation call counters and fault injection.
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;

use super::{
    CompletedPart, ObjectMeta, ObjectStore, Page, PutOptions, RemotePart, SessionMarker,
    SessionSummary, StoreError, StoreResult,
};

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub etag: String,
    pub opts: PutOptions,
}

#[derive(Debug, Clone)]
struct StoredPart {
    data: Vec<u8>,
    etag: String,
}

#[derive(Debug, Clone)]
struct Session {
    bucket: String,
    key: String,
    upload_id: String,
    opts: PutOptions,
    parts: BTreeMap<i32, StoredPart>,
}

#[derive(Default)]
struct State {
    objects: HashMap<(String, String), StoredObject>,
    // creation order, which is also listing order per key
    sessions: Vec<Session>,
    next_upload_id: u64,
    part_faults: HashMap<i32, usize>,
    transient_faults: usize,
}

/// Call counters, one per protocol operation.
#[derive(Default, Debug)]
pub struct CallCounts {
    pub head: AtomicUsize,
    pub list_sessions: AtomicUsize,
    pub create_session: AtomicUsize,
    pub list_parts: AtomicUsize,
    pub upload_part: AtomicUsize,
    pub complete_session: AtomicUsize,
    pub put_object: AtomicUsize,
}

pub struct MemoryStore {
    state: Mutex<State>,
    page_size: usize,
    pub calls: CallCounts,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn quoted_md5(data: &[u8]) -> String {
    format!("\"{:x}\"", md5::compute(data))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(1000)
    }

    /// Listings return at most `page_size` items per call.
    pub fn with_page_size(page_size: usize) -> Self {
        Self { state: Mutex::new(State::default()), page_size: page_size.max(1), calls: CallCounts::default() }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Make the next `times` uploads of `part_number` fail with a 500.
    pub fn fail_part(&self, part_number: i32, times: usize) {
        self.lock().part_faults.insert(part_number, times);
    }

    /// Make the next `times` calls of any operation fail with a transport error.
    pub fn fail_next_calls(&self, times: usize) {
        self.lock().transient_faults = times;
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.lock().objects.get(&(bucket.to_string(), key.to_string())).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    /// Upload ids of sessions still open for `key`, oldest first.
    pub fn open_sessions(&self, bucket: &str, key: &str) -> Vec<String> {
        self.lock()
            .sessions
            .iter()
            .filter(|s| s.bucket == bucket && s.key == key)
            .map(|s| s.upload_id.clone())
            .collect()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn take_transient_fault(state: &mut State, op: &str) -> StoreResult<()> {
        if state.transient_faults > 0 {
            state.transient_faults -= 1;
            return Err(StoreError::Transport(format!("injected failure in {}", op)));
        }
        Ok(())
    }

    fn find_session<'a>(
        state: &'a mut State,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StoreResult<&'a mut Session> {
        state
            .sessions
            .iter_mut()
            .find(|s| s.bucket == bucket && s.key == key && s.upload_id == upload_id)
            .ok_or_else(|| StoreError::NotFound(format!("upload {} for {}", upload_id, key)))
    }
}

impl ObjectStore for MemoryStore {
    fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectMeta> {
        self.calls.head.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        Self::take_transient_fault(&mut state, "head_object")?;
        state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| ObjectMeta { size: o.data.len() as u64, etag: o.etag.clone() })
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn list_sessions(
        &self,
        bucket: &str,
        prefix: &str,
        marker: Option<&SessionMarker>,
    ) -> StoreResult<Page<SessionSummary, SessionMarker>> {
        self.calls.list_sessions.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        Self::take_transient_fault(&mut state, "list_sessions")?;
        // S3 orders by key, then by initiation; delimiter "/" hides deeper keys
        let mut matching: Vec<&Session> = state
            .sessions
            .iter()
            .filter(|s| s.bucket == bucket && s.key.starts_with(prefix))
            .filter(|s| !s.key[prefix.len()..].contains('/'))
            .collect();
        matching.sort_by(|a, b| a.key.cmp(&b.key));
        let start = match marker {
            Some(m) => matching
                .iter()
                .position(|s| s.key == m.key_marker && s.upload_id == m.upload_id_marker)
                .map(|i| i + 1)
                .unwrap_or(matching.len()),
            None => 0,
        };
        let rest = &matching[start..];
        let take = rest.len().min(self.page_size);
        let items: Vec<SessionSummary> = rest[..take]
            .iter()
            .map(|s| SessionSummary { key: s.key.clone(), upload_id: s.upload_id.clone() })
            .collect();
        let next = if take < rest.len() {
            items.last().map(|last| SessionMarker {
                key_marker: last.key.clone(),
                upload_id_marker: last.upload_id.clone(),
            })
        } else {
            None
        };
        Ok(Page { items, next })
    }

    fn create_session(&self, bucket: &str, key: &str, opts: &PutOptions) -> StoreResult<String> {
        self.calls.create_session.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        Self::take_transient_fault(&mut state, "create_session")?;
        state.next_upload_id += 1;
        let upload_id = format!("upload-{:06}", state.next_upload_id);
        state.sessions.push(Session {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.clone(),
            opts: opts.clone(),
            parts: BTreeMap::new(),
        });
        Ok(upload_id)
    }

    fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        marker: Option<&str>,
    ) -> StoreResult<Page<RemotePart, String>> {
        self.calls.list_parts.fetch_add(1, Ordering::SeqCst);
        let page_size = self.page_size;
        let mut state = self.lock();
        Self::take_transient_fault(&mut state, "list_parts")?;
        let session = Self::find_session(&mut state, bucket, key, upload_id)?;
        let after: i32 = match marker {
            Some(m) => m
                .parse()
                .map_err(|_| StoreError::InvalidResponse(format!("bad part marker {}", m)))?,
            None => 0,
        };
        let mut remaining = session.parts.range(after + 1..);
        let items: Vec<RemotePart> = remaining
            .by_ref()
            .take(page_size)
            .map(|(n, p)| RemotePart { part_number: *n, size: p.data.len() as u64, etag: p.etag.clone() })
            .collect();
        let next = if remaining.next().is_some() {
            items.last().map(|p| p.part_number.to_string())
        } else {
            None
        };
        Ok(Page { items, next })
    }

    fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StoreResult<String> {
        self.calls.upload_part.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        Self::take_transient_fault(&mut state, "upload_part")?;
        if let Some(left) = state.part_faults.get_mut(&part_number)
            && *left > 0
        {
            *left -= 1;
            return Err(StoreError::Service {
                status: Some(500),
                code: Some("InternalError".to_string()),
                message: format!("injected failure for part {}", part_number),
            });
        }
        if !(1..=10_000).contains(&part_number) {
            return Err(StoreError::Service {
                status: Some(400),
                code: Some("InvalidArgument".to_string()),
                message: format!("part number {} out of range", part_number),
            });
        }
        let session = Self::find_session(&mut state, bucket, key, upload_id)?;
        let etag = quoted_md5(&body);
        session.parts.insert(part_number, StoredPart { data: body.to_vec(), etag: etag.clone() });
        Ok(etag)
    }

    fn complete_session(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StoreResult<()> {
        self.calls.complete_session.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        Self::take_transient_fault(&mut state, "complete_session")?;
        let session = Self::find_session(&mut state, bucket, key, upload_id)?.clone();
        if parts.is_empty() {
            return Err(StoreError::Service {
                status: Some(400),
                code: Some("MalformedXML".to_string()),
                message: "completion requires at least one part".to_string(),
            });
        }
        let mut data = Vec::new();
        let mut digests = Vec::with_capacity(parts.len() * 16);
        let mut previous = 0;
        for p in parts {
            if p.part_number <= previous {
                return Err(StoreError::Service {
                    status: Some(400),
                    code: Some("InvalidPartOrder".to_string()),
                    message: format!("part {} after {}", p.part_number, previous),
                });
            }
            previous = p.part_number;
            let stored = session.parts.get(&p.part_number).ok_or_else(|| StoreError::Service {
                status: Some(400),
                code: Some("InvalidPart".to_string()),
                message: format!("part {} was never uploaded", p.part_number),
            })?;
            if super::normalize_etag(&stored.etag) != super::normalize_etag(&p.etag) {
                return Err(StoreError::Service {
                    status: Some(400),
                    code: Some("InvalidPart".to_string()),
                    message: format!("etag mismatch for part {}", p.part_number),
                });
            }
            data.extend_from_slice(&stored.data);
            digests.extend_from_slice(&md5::compute(&stored.data).0);
        }
        let etag = format!("\"{:x}-{}\"", md5::compute(&digests), parts.len());
        state.sessions.retain(|s| s.upload_id != upload_id);
        state
            .objects
            .insert((bucket.to_string(), key.to_string()), StoredObject { data, etag, opts: session.opts });
        Ok(())
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        opts: &PutOptions,
    ) -> StoreResult<()> {
        self.calls.put_object.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        Self::take_transient_fault(&mut state, "put_object")?;
        let etag = quoted_md5(&body);
        state.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject { data: body.to_vec(), etag, opts: opts.clone() },
        );
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
