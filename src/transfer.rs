// transfer module: per-file upload state machine and tree copy orchestration
pub mod compare;
pub mod complete;
pub mod enumeration;
pub mod helpers;
pub mod plan;
pub mod session;
pub mod workers;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bytes::Bytes;
use indicatif::ProgressBar;
use serde::Serialize;

use crate::config::Config;
use crate::error::CopyError;
use crate::pipeline::{Task, TaskResult, TaskSender, TaskSource, run_pipeline};
use crate::signal::Done;
use crate::store::ObjectStore;

use self::compare::{Comparison, Expectation, LocalDigest, compare};
use self::complete::{collect_outcomes, finish_session};
use self::enumeration::walk_files;
pub use self::helpers::{normalize_path, single_file_key, tree_key};
use self::helpers::display_path;
use self::plan::{MAX_PARTS, part_count, plan_parts};
use self::session::resolve_session;
use self::workers::{BodySlots, RemoteCtx};
use self::workers::upload::{PartJob, run_part_pool};

/// Steps of a single file's upload, used for error context and debug logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Compare,
    SmallUpload,
    ResolveSession,
    Plan,
    UploadParts,
    Complete,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Compare => "compare",
            Phase::SmallUpload => "put",
            Phase::ResolveSession => "resolve session",
            Phase::Plan => "plan",
            Phase::UploadParts => "upload parts",
            Phase::Complete => "complete",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CopyOutcome {
    Skipped,
    /// `bytes` counts only what was sent; reused parts are excluded.
    Uploaded { bytes: u64, parts: usize, reused_parts: usize },
}

/// Shared by every file of one run.
#[derive(Clone)]
pub struct CopyContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn ObjectStore>,
    pub progress: ProgressBar,
    pub done: Done,
    slots: BodySlots,
}

impl CopyContext {
    pub fn new(config: Config, store: Arc<dyn ObjectStore>, done: Done) -> Self {
        let slots = BodySlots::new(config.workers);
        Self { config: Arc::new(config), store, progress: ProgressBar::hidden(), done, slots }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    fn remote(&self) -> RemoteCtx {
        RemoteCtx {
            store: self.store.clone(),
            bucket: self.config.bucket.clone(),
            policy: self.config.backoff,
            done: self.done.clone(),
            progress: self.progress.clone(),
            slots: self.slots.clone(),
        }
    }
}

fn trace_phase(key: &str, phase: Phase) {
    tracing::debug!("[s3cp][copy] key={} phase={}", key, phase);
}

/// Upload one local file to `key`, skipping it if the remote copy already matches.
pub fn copy_file(ctx: &CopyContext, path: &Path, key: &str) -> Result<CopyOutcome> {
    let cfg = &ctx.config;
    let remote = ctx.remote();
    let size = std::fs::metadata(path)
        .map_err(|e| CopyError::local_io(path, &e))
        .with_context(|| format!("stat {}", display_path(path)))?
        .len();

    trace_phase(key, Phase::Compare);
    let expect = Expectation {
        size: cfg.check_size.then_some(size),
        digest: if cfg.check_md5 {
            Some(
                LocalDigest::compute(path, cfg.part_size)
                    .map_err(|e| CopyError::local_io(path, &e))
                    .with_context(|| format!("{} {}", Phase::Compare, key))?,
            )
        } else {
            None
        },
    };
    match compare(&remote, key, &expect) {
        Comparison::Match => {
            tracing::info!("[s3cp][copy] skip {} (remote copy identical)", key);
            ctx.progress.inc(size);
            return Ok(CopyOutcome::Skipped);
        }
        Comparison::Failed(e) if e.is_cancelled() => {
            return Err(anyhow::Error::new(e).context(format!("{} {}", Phase::Compare, key)));
        }
        Comparison::Failed(e) => {
            // 比较失败按不存在处理: HEAD may be denied without ListBucket
            tracing::warn!("[s3cp][copy] cannot compare {}: {}; uploading", key, e);
        }
        other => tracing::debug!("[s3cp][copy] {} {}", key, other),
    }

    if size <= cfg.part_size {
        trace_phase(key, Phase::SmallUpload);
        let _slot = remote
            .slots
            .acquire(&ctx.done, &format!("put {}", key))
            .with_context(|| format!("{} {}", Phase::SmallUpload, key))?;
        let body = std::fs::read(path)
            .map(Bytes::from)
            .map_err(|e| CopyError::local_io(path, &e))
            .with_context(|| format!("{} {}", Phase::SmallUpload, key))?;
        let what = format!("put {}", key);
        remote
            .call(&what, |s, b| s.put_object(b, key, body.clone(), &cfg.put))
            .with_context(|| format!("{} {}", Phase::SmallUpload, key))?;
        ctx.progress.inc(size);
        tracing::info!("[s3cp][copy] uploaded {} ({} bytes)", key, size);
        return Ok(CopyOutcome::Uploaded { bytes: size, parts: 1, reused_parts: 0 });
    }

    copy_chunked(ctx, remote, path, key, size)
}

fn copy_chunked(
    ctx: &CopyContext,
    remote: RemoteCtx,
    path: &Path,
    key: &str,
    size: u64,
) -> Result<CopyOutcome> {
    let cfg = &ctx.config;
    let count = part_count(size, cfg.part_size);
    if count > MAX_PARTS {
        return Err(CopyError::TooManyParts { key: key.to_string(), parts: count, limit: MAX_PARTS })
            .with_context(|| format!("{} {}", Phase::Plan, key));
    }

    trace_phase(key, Phase::ResolveSession);
    let session = resolve_session(&remote, key, &cfg.put)
        .with_context(|| format!("{} {}", Phase::ResolveSession, key))?;

    trace_phase(key, Phase::Plan);
    let plans = plan_parts(size, cfg.part_size, &session.parts);
    let lens: Vec<u64> = plans.iter().map(|p| p.len).collect();

    trace_phase(key, Phase::UploadParts);
    let file = File::open(path)
        .map_err(|e| CopyError::local_io(path, &e))
        .with_context(|| format!("{} {}", Phase::UploadParts, key))?;
    let job = PartJob {
        ctx: remote.clone(),
        file: Arc::new(file),
        key: key.to_string(),
        upload_id: session.upload_id.clone(),
    };
    let outcomes = run_part_pool(job, plans, cfg.workers);
    let collected = collect_outcomes(&outcomes);
    let (uploaded, reused) = (collected.uploaded, collected.reused);
    let reused_bytes: u64 = collected
        .reused_numbers
        .iter()
        .filter_map(|n| lens.get((*n as usize).wrapping_sub(1)))
        .sum();

    trace_phase(key, Phase::Complete);
    finish_session(&remote, &session, collected, count as usize)
        .with_context(|| format!("{} {}", Phase::Complete, key))?;

    tracing::info!(
        "[s3cp][copy] uploaded {} ({} bytes, {} part(s), {} reused{})",
        key,
        size,
        uploaded + reused,
        reused,
        if session.resumed { ", resumed" } else { "" }
    );
    let sent = size.saturating_sub(reused_bytes);
    Ok(CopyOutcome::Uploaded { bytes: sent, parts: uploaded + reused, reused_parts: reused })
}

/// Totals for one invocation.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunSummary {
    pub files: u64,
    pub uploaded: u64,
    pub skipped: u64,
    pub failed: u64,
    pub bytes: u64,
    pub enumeration_errors: u64,
    /// Files queued or started but stopped by cancellation.
    pub cancelled: u64,
    /// The run's cancellation signal fired.
    pub interrupted: bool,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl RunSummary {
    fn record(&mut self, result: &Result<CopyOutcome>) {
        self.files += 1;
        match result {
            Ok(CopyOutcome::Skipped) => self.skipped += 1,
            Ok(CopyOutcome::Uploaded { bytes, .. }) => {
                self.uploaded += 1;
                self.bytes += bytes;
            }
            Err(e) if e.downcast_ref::<CopyError>().is_some_and(CopyError::is_cancelled) => {
                self.cancelled += 1
            }
            Err(_) => self.failed += 1,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.enumeration_errors == 0 && self.cancelled == 0 && !self.interrupted
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }
}

/// One file of a tree copy.
pub struct FileTask {
    ctx: CopyContext,
    path: PathBuf,
    key: String,
}

pub struct FileResult {
    pub path: PathBuf,
    pub key: String,
    pub result: Result<CopyOutcome>,
}

impl TaskResult for FileResult {
    fn message(&self) -> String {
        match &self.result {
            Ok(CopyOutcome::Skipped) => format!("{} skipped", self.key),
            Ok(CopyOutcome::Uploaded { bytes, .. }) => format!("{} uploaded ({} bytes)", self.key, bytes),
            Err(e) => format!("{} failed: {:#}", self.key, e),
        }
    }

    fn error(&self) -> Option<&anyhow::Error> {
        self.result.as_ref().err()
    }
}

impl Task for FileTask {
    type Output = FileResult;

    fn work(self, _done: &Done) -> FileResult {
        let result = copy_file(&self.ctx, &self.path, &self.key);
        FileResult { path: self.path, key: self.key, result }
    }
}

struct TreeSource {
    ctx: CopyContext,
    root: PathBuf,
    queued: Arc<AtomicU64>,
}

impl TaskSource for TreeSource {
    type Task = FileTask;

    fn make_tasks(self, done: &Done, tx: &TaskSender<FileTask>) -> Result<()> {
        let dest = self.ctx.config.dest.clone();
        walk_files(&self.root, done, |entry| {
            self.ctx.progress.inc_length(entry.size);
            tx.send(FileTask {
                ctx: self.ctx.clone(),
                key: tree_key(&dest, &entry.rel),
                path: entry.path,
            })?;
            self.queued.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })?;
        Ok(())
    }
}

/// Copy every regular file under `root`. Per-file failures are logged and
/// counted; enumeration errors are reported after all found files are done.
pub fn copy_tree(ctx: &CopyContext, root: &Path) -> Result<RunSummary> {
    let start = Instant::now();
    let mut summary = RunSummary::default();
    let queued = Arc::new(AtomicU64::new(0));
    let source = TreeSource { ctx: ctx.clone(), root: root.to_path_buf(), queued: queued.clone() };
    let (results, errc) = run_pipeline(&ctx.done, source, ctx.config.workers);
    for res in results.iter() {
        if let Err(e) = &res.result {
            tracing::error!("[s3cp][copy] {} -> {}: {:#}", display_path(&res.path), res.key, e);
        }
        summary.record(&res.result);
    }
    match errc.recv() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => match e.downcast_ref::<CopyError>() {
            Some(CopyError::Cancelled(_)) => {
                tracing::warn!("[s3cp][enum] walk stopped: {:#}", e);
            }
            Some(CopyError::Enumeration(errs)) => {
                summary.enumeration_errors = errs.len() as u64;
                tracing::error!("[s3cp][enum] {:#}", e);
            }
            _ => {
                summary.enumeration_errors = 1;
                tracing::error!("[s3cp][enum] {:#}", e);
            }
        },
        Err(_) => summary.enumeration_errors = 1,
    }
    // queued files whose worker stopped before picking them up
    let queued = queued.load(Ordering::SeqCst);
    if queued > summary.files {
        summary.cancelled += queued - summary.files;
    }
    summary.interrupted = ctx.done.is_done();
    summary.elapsed = start.elapsed();
    Ok(summary)
}

/// Copy a single file to the key derived from `config.dest`.
pub fn copy_single(ctx: &CopyContext, path: &Path) -> Result<RunSummary> {
    let start = Instant::now();
    let key = single_file_key(path, &ctx.config.dest);
    let mut summary = RunSummary::default();
    let result = copy_file(ctx, path, &key);
    if let Err(e) = &result {
        tracing::error!("[s3cp][copy] {} -> {}: {:#}", display_path(path), key, e);
    }
    summary.record(&result);
    summary.interrupted = ctx.done.is_done();
    summary.elapsed = start.elapsed();
    Ok(summary)
}

/// Entry point for one invocation: validate the source and dispatch to a
/// single-file or tree copy.
pub fn handle_cp(ctx: &CopyContext) -> Result<RunSummary> {
    let cfg = &ctx.config;
    cfg.validate()?;
    let source = PathBuf::from(normalize_path(&cfg.source.to_string_lossy(), false));
    let md = std::fs::metadata(&source)
        .map_err(|e| CopyError::local_io(&source, &e))
        .with_context(|| format!("source {}", display_path(&source)))?;
    tracing::debug!(
        "[s3cp][copy] backend={} bucket={} dest={} workers={} part_size={}",
        ctx.store.backend_name(),
        cfg.bucket,
        cfg.dest,
        cfg.workers,
        cfg.part_size
    );
    if md.is_dir() {
        if !cfg.recursive {
            return Err(CopyError::InvalidArgs(format!(
                "{} is a directory (use -r)",
                display_path(&source)
            ))
            .into());
        }
        copy_tree(ctx, &source)
    } else {
        ctx.progress.set_length(md.len());
        copy_single(ctx, &source)
    }
}
