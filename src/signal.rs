// Broadcast cancellation shared by every queue wait in a run.
//
// The signal is a crossbeam channel that never carries a message: cancelling
// drops the only sender, which disconnects every cloned receiver at once. That
// makes it usable inside `select!` next to ordinary queue operations.
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Owner side of the signal. Cancels exactly once, on `cancel()` or on drop.
pub struct Canceller {
    tx: Mutex<Option<Sender<()>>>,
}

/// Receiver side, cheap to clone into every worker.
#[derive(Clone)]
pub struct Done {
    rx: Receiver<()>,
    // keeps `Done::never()` from ever disconnecting
    _pin: Option<Arc<Sender<()>>>,
}

pub fn done_signal() -> (Canceller, Done) {
    let (tx, rx) = bounded::<()>(0);
    (Canceller { tx: Mutex::new(Some(tx)) }, Done { rx, _pin: None })
}

impl Canceller {
    pub fn cancel(&self) {
        let taken = match self.tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if taken.is_some() {
            tracing::debug!("[s3cp][signal] cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self.tx.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

impl Drop for Canceller {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl Done {
    /// A signal that never fires; for callers without a cancellation scope.
    pub fn never() -> Self {
        let (tx, rx) = bounded::<()>(0);
        Done { rx, _pin: Some(Arc::new(tx)) }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep for `d` unless cancelled first. Returns false if cancelled.
    pub fn sleep(&self, d: Duration) -> bool {
        !matches!(self.rx.recv_timeout(d), Err(RecvTimeoutError::Disconnected))
    }

    /// The raw receiver, for use in `crossbeam_channel::select!`.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn cancel_is_visible_to_all_clones() {
        let (canceller, done) = done_signal();
        let other = done.clone();
        assert!(!done.is_done());
        canceller.cancel();
        assert!(done.is_done());
        assert!(other.is_done());
        assert!(canceller.is_cancelled());
        // second cancel is a no-op
        canceller.cancel();
    }

    #[test]
    fn drop_cancels() {
        let (canceller, done) = done_signal();
        drop(canceller);
        assert!(done.is_done());
    }

    #[test]
    fn sleep_returns_early_on_cancel() {
        let (canceller, done) = done_signal();
        let waiter = std::thread::spawn(move || {
            let start = Instant::now();
            let completed = done.sleep(Duration::from_secs(30));
            (completed, start.elapsed())
        });
        std::thread::sleep(Duration::from_millis(20));
        canceller.cancel();
        let (completed, elapsed) = waiter.join().expect("join");
        assert!(!completed);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn never_does_not_fire() {
        let done = Done::never();
        assert!(!done.is_done());
        assert!(done.sleep(Duration::from_millis(1)));
    }
}
