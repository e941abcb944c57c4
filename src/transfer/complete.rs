//! Drain part outcomes, validate the manifest and close the session.
use crossbeam_channel::Receiver;

use crate::error::{CopyError, PartFailure};
use crate::store::CompletedPart;

use super::session::UploadSession;
use super::workers::RemoteCtx;
use super::workers::upload::PartOutcome;

#[derive(Debug, Default)]
pub struct Collected {
    pub completed: Vec<CompletedPart>,
    pub failures: Vec<PartFailure>,
    pub reused: usize,
    pub uploaded: usize,
    /// Parts stopped by cancellation; kept apart from real failures.
    pub cancelled: usize,
    /// Numbers of the parts that were matched instead of sent.
    pub reused_numbers: Vec<i32>,
}

/// Read outcomes until every worker has exited. Failures do not stop the drain.
pub fn collect_outcomes(rx: &Receiver<PartOutcome>) -> Collected {
    let mut c = Collected::default();
    for outcome in rx.iter() {
        match outcome {
            PartOutcome::AlreadyPresent(p) => {
                c.reused += 1;
                c.reused_numbers.push(p.part_number);
                c.completed.push(p);
            }
            PartOutcome::Uploaded(p) => {
                c.uploaded += 1;
                c.completed.push(p);
            }
            PartOutcome::Failed { part_number, error } => {
                c.failures.push(PartFailure { part_number, error: format!("{:#}", error) });
            }
            PartOutcome::Cancelled { .. } => c.cancelled += 1,
        }
    }
    c.failures.sort_by_key(|f| f.part_number);
    c
}

/// Place parts into a dense `1..=part_count` array; any gap, duplicate or
/// out-of-range number is an error.
pub fn build_manifest(
    completed: Vec<CompletedPart>,
    part_count: usize,
) -> Result<Vec<CompletedPart>, CopyError> {
    let mut slots: Vec<Option<CompletedPart>> = vec![None; part_count];
    for part in completed {
        let n = part.part_number;
        if n <= 0 || n as usize > part_count {
            return Err(CopyError::InconsistentManifest(format!(
                "part number {} outside 1..={}",
                n, part_count
            )));
        }
        let slot = &mut slots[(n - 1) as usize];
        if slot.is_some() {
            return Err(CopyError::InconsistentManifest(format!("part {} reported twice", n)));
        }
        *slot = Some(part);
    }
    let mut manifest = Vec::with_capacity(part_count);
    for (i, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(p) => manifest.push(p),
            None => {
                return Err(CopyError::InconsistentManifest(format!("part {} missing", i + 1)));
            }
        }
    }
    Ok(manifest)
}

/// Turn drained outcomes into a completed object, or an error that leaves the
/// session open for the next run.
pub fn finish_session(
    ctx: &RemoteCtx,
    session: &UploadSession,
    collected: Collected,
    part_count: usize,
) -> Result<(), CopyError> {
    if !collected.failures.is_empty() {
        return Err(CopyError::PartsFailed {
            key: session.key.clone(),
            failures: collected.failures,
        });
    }
    if ctx.done.is_done() || collected.cancelled > 0 {
        return Err(CopyError::Cancelled(format!("upload of {}", session.key)));
    }
    let manifest = build_manifest(collected.completed, part_count)?;
    let what = format!("complete upload {}", session.key);
    ctx.call(&what, |s, b| s.complete_session(b, &session.key, &session.upload_id, &manifest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(n: i32) -> CompletedPart {
        CompletedPart { part_number: n, etag: format!("\"e{}\"", n) }
    }

    #[test]
    fn manifest_is_ordered_by_number() {
        let m = build_manifest(vec![part(3), part(1), part(2)], 3).expect("dense");
        assert_eq!(m.iter().map(|p| p.part_number).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn manifest_rejects_gaps_duplicates_and_range() {
        assert!(build_manifest(vec![part(1), part(3)], 3).is_err());
        assert!(build_manifest(vec![part(1), part(1)], 2).is_err());
        assert!(build_manifest(vec![part(0)], 1).is_err());
        assert!(build_manifest(vec![part(1), part(2)], 1).is_err());
    }

    #[test]
    fn failures_are_collected_without_stopping() {
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(PartOutcome::Failed { part_number: 2, error: anyhow::anyhow!("boom") })
            .expect("send");
        tx.send(PartOutcome::Uploaded(part(1))).expect("send");
        tx.send(PartOutcome::AlreadyPresent(part(3))).expect("send");
        drop(tx);
        let c = collect_outcomes(&rx);
        assert_eq!((c.uploaded, c.reused, c.failures.len()), (1, 1, 1));
        assert_eq!(c.failures[0].part_number, 2);
    }

    #[test]
    fn cancelled_parts_finish_as_cancelled_not_failed() {
        use crate::signal::done_signal;
        use crate::store::MemoryStore;
        use std::collections::BTreeMap;
        use std::sync::Arc;

        let store = Arc::new(MemoryStore::new());
        let (canceller, done) = done_signal();
        let ctx = crate::transfer::workers::test_ctx(store.clone(), done);
        let session = UploadSession {
            key: "k".into(),
            upload_id: "upload-1".into(),
            parts: BTreeMap::new(),
            resumed: false,
        };
        canceller.cancel();

        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(PartOutcome::Uploaded(part(1))).expect("send");
        tx.send(PartOutcome::Cancelled { part_number: 2 }).expect("send");
        drop(tx);
        let c = collect_outcomes(&rx);
        assert!(c.failures.is_empty());
        assert_eq!(c.cancelled, 1);

        let err = finish_session(&ctx, &session, c, 2).expect_err("cancelled");
        assert!(err.is_cancelled(), "{}", err);
        assert_eq!(MemoryStore::count(&store.calls.complete_session), 0);
    }
}
