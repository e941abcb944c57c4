pub(crate) mod section;
pub(crate) mod upload;

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, bounded, select};
use indicatif::ProgressBar;

use crate::error::{CopyError, from_retry};
use crate::retry::{BackoffPolicy, retry_with};
use crate::signal::Done;
use crate::store::{ObjectStore, StoreError, StoreResult};

/// Everything a remote call needs: the backend, the bucket, the retry policy
/// and the run's cancellation signal. Cloned into every worker thread.
#[derive(Clone)]
pub struct RemoteCtx {
    pub store: Arc<dyn ObjectStore>,
    pub bucket: String,
    pub policy: BackoffPolicy,
    pub done: Done,
    pub progress: ProgressBar,
    /// Caps request bodies held in memory across every file of the run.
    pub slots: BodySlots,
}

impl RemoteCtx {
    /// Run one remote operation through the retry executor. Errors the store
    /// classifies as permanent are returned at once; cancellation is checked
    /// before every attempt.
    pub fn call<T, F>(&self, what: &str, mut op: F) -> Result<T, CopyError>
    where
        F: FnMut(&dyn ObjectStore, &str) -> StoreResult<T>,
    {
        let store = self.store.as_ref();
        let bucket = self.bucket.as_str();
        retry_with(&self.policy, what, &self.done, StoreError::is_permanent, || op(store, bucket))
            .map_err(|e| from_retry(what, e))
    }
}

/// Counting semaphore over a pre-filled token channel. A body (part or
/// small object) is read into memory only while its holder owns a slot, so
/// the file pool and the per-file part pools together never buffer more
/// than `n` bodies.
#[derive(Clone)]
pub struct BodySlots {
    tx: Sender<()>,
    rx: Receiver<()>,
}

/// Returns its slot on drop.
pub struct SlotGuard {
    tx: Sender<()>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let _ = self.tx.try_send(());
    }
}

impl BodySlots {
    pub fn new(n: usize) -> Self {
        let n = n.max(1);
        let (tx, rx) = bounded::<()>(n);
        for _ in 0..n {
            let _ = tx.try_send(());
        }
        Self { tx, rx }
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.rx.len()
    }

    /// Wait for a free slot, or fail once `done` fires.
    pub fn acquire(&self, done: &Done, what: &str) -> Result<SlotGuard, CopyError> {
        if done.is_done() {
            return Err(CopyError::Cancelled(what.to_string()));
        }
        select! {
            recv(self.rx) -> token => match token {
                Ok(()) => Ok(SlotGuard { tx: self.tx.clone() }),
                Err(_) => Err(CopyError::Cancelled(what.to_string())),
            },
            recv(done.receiver()) -> _ => Err(CopyError::Cancelled(what.to_string())),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_ctx(store: Arc<dyn ObjectStore>, done: Done) -> RemoteCtx {
    RemoteCtx {
        store,
        bucket: "bk".to_string(),
        policy: BackoffPolicy {
            initial_interval: std::time::Duration::from_millis(1),
            randomization_factor: 0.0,
            max_elapsed_time: std::time::Duration::from_millis(20),
            ..BackoffPolicy::default()
        },
        done,
        progress: ProgressBar::hidden(),
        slots: BodySlots::new(2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::done_signal;

    #[test]
    fn slots_are_returned_on_drop() {
        let slots = BodySlots::new(2);
        let done = Done::never();
        let a = slots.acquire(&done, "a").expect("first");
        let _b = slots.acquire(&done, "b").expect("second");
        assert_eq!(slots.available(), 0);
        drop(a);
        assert_eq!(slots.available(), 1);
        let _c = slots.acquire(&done, "c").expect("freed slot");
    }

    #[test]
    fn waiting_for_a_slot_stops_on_cancel() {
        let slots = BodySlots::new(1);
        let _held = slots.acquire(&Done::never(), "held").expect("slot");
        let (canceller, done) = done_signal();
        let waiter = {
            let slots = slots.clone();
            std::thread::spawn(move || slots.acquire(&done, "waiter").map(|_| ()))
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        canceller.cancel();
        let res = waiter.join().expect("join");
        assert!(matches!(res, Err(CopyError::Cancelled(_))));
    }
}
