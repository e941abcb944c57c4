use std::fs::File;
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::Receiver;

use super::RemoteCtx;
use super::section::SectionReader;
use crate::error::CopyError;
use crate::pipeline::{Task, TaskResult, TaskSender, TaskSource, run_pipeline};
use crate::signal::Done;
use crate::store::{CompletedPart, normalize_etag};
use crate::transfer::plan::PartPlan;

/// Shared by every part of one file.
pub struct PartJob {
    pub ctx: RemoteCtx,
    pub file: Arc<File>,
    pub key: String,
    pub upload_id: String,
}

pub struct PartTask {
    job: Arc<PartJob>,
    plan: PartPlan,
}

#[derive(Debug)]
pub enum PartOutcome {
    /// A stored part with the same size and MD5 was reused.
    AlreadyPresent(CompletedPart),
    Uploaded(CompletedPart),
    Failed { part_number: i32, error: anyhow::Error },
    /// Cancellation fired before or during the part; not a part failure.
    Cancelled { part_number: i32 },
}

impl TaskResult for PartOutcome {
    fn message(&self) -> String {
        match self {
            PartOutcome::AlreadyPresent(p) => format!("part {} already present", p.part_number),
            PartOutcome::Uploaded(p) => format!("part {} uploaded", p.part_number),
            PartOutcome::Failed { part_number, error } => {
                format!("part {} failed: {:#}", part_number, error)
            }
            PartOutcome::Cancelled { part_number } => format!("part {} cancelled", part_number),
        }
    }

    fn error(&self) -> Option<&anyhow::Error> {
        match self {
            PartOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl PartTask {
    fn run(&self, done: &Done) -> Result<PartOutcome, CopyError> {
        let job = &self.job;
        let plan = &self.plan;
        let label = format!("part {} of {}", plan.number, job.key);
        // held until the part is matched or stored
        let _slot = job.ctx.slots.acquire(done, &label)?;
        let section = SectionReader::new(job.file.clone(), plan.offset, plan.len);
        let body = section.read_all().map_err(|e| CopyError::LocalIo {
            path: format!("{} part {}", job.key, plan.number),
            message: e.to_string(),
        })?;
        let local_md5 = format!("{:x}", md5::compute(&body));

        if let Some(existing) = &plan.existing
            && existing.size == plan.len
            && normalize_etag(&existing.etag) == local_md5
        {
            job.ctx.progress.inc(plan.len);
            return Ok(PartOutcome::AlreadyPresent(CompletedPart {
                part_number: plan.number,
                etag: existing.etag.clone(),
            }));
        }

        let body = Bytes::from(body);
        let what = format!("upload {}", label);
        let etag = job.ctx.call(&what, |s, b| {
            s.upload_part(b, &job.key, &job.upload_id, plan.number, body.clone())
        })?;
        if normalize_etag(&etag) != local_md5 {
            // SSE-KMS and some gateways return non-MD5 ETags; the manifest uses theirs.
            tracing::debug!(
                "[s3cp][upload] part {} of {} etag {} differs from local md5 {}",
                plan.number,
                job.key,
                etag,
                local_md5
            );
        }
        job.ctx.progress.inc(plan.len);
        Ok(PartOutcome::Uploaded(CompletedPart { part_number: plan.number, etag }))
    }
}

impl Task for PartTask {
    type Output = PartOutcome;

    fn work(self, done: &Done) -> PartOutcome {
        match self.run(done) {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => {
                tracing::debug!(
                    "[s3cp][upload] part {} of {} stopped: {}",
                    self.plan.number,
                    self.job.key,
                    e
                );
                PartOutcome::Cancelled { part_number: self.plan.number }
            }
            Err(e) => {
                tracing::warn!(
                    "[s3cp][upload] part {} of {} failed: {}",
                    self.plan.number,
                    self.job.key,
                    e
                );
                PartOutcome::Failed { part_number: self.plan.number, error: e.into() }
            }
        }
    }
}

struct PartSource {
    job: Arc<PartJob>,
    plans: Vec<PartPlan>,
}

impl TaskSource for PartSource {
    type Task = PartTask;

    fn make_tasks(self, _done: &Done, tx: &TaskSender<PartTask>) -> anyhow::Result<()> {
        for plan in self.plans {
            tx.send(PartTask { job: self.job.clone(), plan })?;
        }
        Ok(())
    }
}

/// Start `workers` threads over the plans. Outcomes arrive in completion
/// order; the stream closes once every worker has exited.
pub fn run_part_pool(job: PartJob, plans: Vec<PartPlan>, workers: usize) -> Receiver<PartOutcome> {
    let done = job.ctx.done.clone();
    tracing::debug!(
        "[s3cp][upload] key={} upload_id={} parts={} workers={}",
        job.key,
        job.upload_id,
        plans.len(),
        workers
    );
    let source = PartSource { job: Arc::new(job), plans };
    let (outcomes, _errc) = run_pipeline(&done, source, workers);
    outcomes
}
