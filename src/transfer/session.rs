//! Find or open the multipart upload session for a destination key and
//! collect the parts already stored under it.
use std::collections::BTreeMap;

use crate::error::CopyError;
use crate::store::{PutOptions, RemotePart, SessionMarker};

use super::workers::RemoteCtx;

#[derive(Debug, Clone)]
pub struct UploadSession {
    pub key: String,
    pub upload_id: String,
    pub parts: BTreeMap<i32, RemotePart>,
    /// True when an in-progress session was adopted rather than created.
    pub resumed: bool,
}

fn check_cancel(ctx: &RemoteCtx, what: &str) -> Result<(), CopyError> {
    if ctx.done.is_done() {
        return Err(CopyError::Cancelled(what.to_string()));
    }
    Ok(())
}

/// First in-progress session whose key equals `key`, following listing markers to the end.
pub fn find_session(ctx: &RemoteCtx, key: &str) -> Result<Option<String>, CopyError> {
    let what = format!("list uploads {}", key);
    let mut marker: Option<SessionMarker> = None;
    loop {
        check_cancel(ctx, &what)?;
        let page = ctx.call(&what, |s, b| s.list_sessions(b, key, marker.as_ref()))?;
        if let Some(hit) = page.items.into_iter().find(|s| s.key == key) {
            return Ok(Some(hit.upload_id));
        }
        match page.next {
            Some(next) => marker = Some(next),
            None => return Ok(None),
        }
    }
}

/// All parts stored under `upload_id`, keyed by part number.
pub fn list_all_parts(
    ctx: &RemoteCtx,
    key: &str,
    upload_id: &str,
) -> Result<BTreeMap<i32, RemotePart>, CopyError> {
    let what = format!("list parts {}", key);
    let mut parts = BTreeMap::new();
    let mut marker: Option<String> = None;
    loop {
        check_cancel(ctx, &what)?;
        let page = ctx.call(&what, |s, b| s.list_parts(b, key, upload_id, marker.as_deref()))?;
        for p in page.items {
            parts.insert(p.part_number, p);
        }
        match page.next {
            Some(next) => marker = Some(next),
            None => return Ok(parts),
        }
    }
}

pub fn resolve_session(
    ctx: &RemoteCtx,
    key: &str,
    opts: &PutOptions,
) -> Result<UploadSession, CopyError> {
    let (upload_id, resumed) = match find_session(ctx, key)? {
        Some(id) => {
            tracing::info!("[s3cp][session] resuming upload of {} (upload_id={})", key, id);
            (id, true)
        }
        None => {
            let what = format!("create upload {}", key);
            check_cancel(ctx, &what)?;
            let id = ctx.call(&what, |s, b| s.create_session(b, key, opts))?;
            tracing::debug!("[s3cp][session] created upload for {} (upload_id={})", key, id);
            (id, false)
        }
    };
    let parts = list_all_parts(ctx, key, &upload_id)?;
    if resumed {
        tracing::debug!("[s3cp][session] {} has {} stored part(s)", key, parts.len());
    }
    Ok(UploadSession { key: key.to_string(), upload_id, parts, resumed })
}
