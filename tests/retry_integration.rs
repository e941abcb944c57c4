use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use s3cp::config::Config;
use s3cp::error::CopyError;
use s3cp::retry::{BackoffPolicy, RetryError, retry_operation};
use s3cp::signal::{Done, done_signal};
use s3cp::store::{MemoryStore, StoreError};
use s3cp::transfer::{CopyContext, CopyOutcome, copy_file};

// Retry behaviour seen from the outside: real sleeps, injected store faults.

fn temp_file(tag: &str, len: usize) -> std::path::PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!(
        "s3cp_retry_{}_{}_{}",
        tag,
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    std::fs::write(&p, vec![7u8; len]).expect("write temp file");
    p
}

#[test]
fn two_failures_then_success_waits_for_both_delays() {
    let policy = BackoffPolicy {
        initial_interval: Duration::from_millis(500),
        multiplier: 1.5,
        randomization_factor: 0.0,
        max_interval: Duration::from_secs(60),
        max_elapsed_time: Duration::ZERO,
    };
    let attempts = AtomicUsize::new(0);
    let start = Instant::now();
    let res: Result<&str, RetryError<String>> =
        retry_operation(&policy, "flaky", &Done::never(), || {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("boom".to_string())
            } else {
                Ok("ok")
            }
        });
    assert_eq!(res.expect("third attempt succeeds"), "ok");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    // 500ms + 750ms
    assert!(start.elapsed() >= Duration::from_millis(1250), "{:?}", start.elapsed());
}

#[test]
fn transient_store_faults_are_absorbed() {
    let store = Arc::new(MemoryStore::new());
    store.fail_next_calls(2);
    let mut cfg = Config::new("unused", "bk", "unused");
    cfg.backoff = BackoffPolicy {
        initial_interval: Duration::from_millis(2),
        randomization_factor: 0.0,
        max_elapsed_time: Duration::from_secs(5),
        ..BackoffPolicy::default()
    };
    let ctx = CopyContext::new(cfg, store.clone(), Done::never());
    let path = temp_file("transient", 64);

    let out = copy_file(&ctx, &path, "t.bin").expect("upload after retries");
    assert_eq!(out, CopyOutcome::Uploaded { bytes: 64, parts: 1, reused_parts: 0 });
    assert_eq!(MemoryStore::count(&store.calls.head), 3);
    assert_eq!(MemoryStore::count(&store.calls.put_object), 1);
    let _ = std::fs::remove_file(path);
}

#[test]
fn persistent_faults_exhaust_the_deadline() {
    let store = Arc::new(MemoryStore::new());
    store.fail_next_calls(usize::MAX);
    let mut cfg = Config::new("unused", "bk", "unused");
    cfg.backoff = BackoffPolicy {
        initial_interval: Duration::from_millis(1),
        randomization_factor: 0.0,
        max_interval: Duration::from_millis(5),
        max_elapsed_time: Duration::from_millis(30),
        ..BackoffPolicy::default()
    };
    let ctx = CopyContext::new(cfg, store.clone(), Done::never());
    let path = temp_file("exhaust", 16);

    let err = copy_file(&ctx, &path, "x.bin").expect_err("store never recovers");
    match err.downcast_ref::<CopyError>() {
        Some(CopyError::RetryExhausted { attempts, last, .. }) => {
            assert!(*attempts > 1);
            assert!(matches!(last, StoreError::Transport(_)));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(store.object("bk", "x.bin").is_none());
    let _ = std::fs::remove_file(path);
}

#[test]
fn cancellation_interrupts_a_long_backoff() {
    let policy = BackoffPolicy {
        initial_interval: Duration::from_secs(30),
        randomization_factor: 0.0,
        max_elapsed_time: Duration::ZERO,
        ..BackoffPolicy::default()
    };
    let (canceller, done) = done_signal();
    let t = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        canceller.cancel();
    });
    let start = Instant::now();
    let res: Result<(), RetryError<String>> =
        retry_operation(&policy, "slow", &done, || Err("down".to_string()));
    assert!(matches!(res, Err(RetryError::Cancelled { .. })));
    assert!(start.elapsed() < Duration::from_secs(5));
    t.join().expect("canceller thread");
}
