//! Generic bounded producer / worker-pool pipeline.
//!
//! A generator thread feeds tasks into a bounded channel, `n` worker threads
//! turn each task into a result, and a coordinator thread closes the result
//! channel once every worker has exited. Task sends and receives also watch
//! the shared `Done` signal, so after cancellation no new task starts. A task
//! that already ran always delivers its result; callers must drain the
//! result stream to the end.
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded, select};

use crate::error::CopyError;
use crate::signal::Done;

pub trait TaskResult: Send + 'static {
    /// One-line description for logs.
    fn message(&self) -> String;
    fn error(&self) -> Option<&anyhow::Error>;
}

pub trait Task: Send + 'static {
    type Output: TaskResult;
    fn work(self, done: &Done) -> Self::Output;
}

/// Something that can enumerate tasks, e.g. a directory walk or a part plan.
pub trait TaskSource: Send + 'static {
    type Task: Task;
    fn make_tasks(self, done: &Done, tx: &TaskSender<Self::Task>) -> anyhow::Result<()>;
}

/// Producer handle handed to a `TaskSource`.
pub struct TaskSender<T> {
    tx: Sender<T>,
    done: Done,
}

impl<T> TaskSender<T> {
    /// Blocks until the task is queued; fails once cancellation fires or
    /// every worker has gone away.
    pub fn send(&self, task: T) -> Result<(), CopyError> {
        select! {
            send(self.tx, task) -> res => res.map_err(|_| CopyError::Cancelled("task queue closed".to_string())),
            recv(self.done.receiver()) -> _ => Err(CopyError::Cancelled("task generation".to_string())),
        }
    }
}

/// Start the generator thread. Returns the task stream and a one-slot error
/// channel that receives the generator's outcome after the stream has closed.
pub fn generate_tasks<S: TaskSource>(
    done: &Done,
    source: S,
    capacity: usize,
) -> (Receiver<S::Task>, Receiver<anyhow::Result<()>>) {
    let (tx, rx) = bounded::<S::Task>(capacity.max(1));
    let (errc_tx, errc_rx) = bounded::<anyhow::Result<()>>(1);
    let done = done.clone();
    std::thread::spawn(move || {
        let sender = TaskSender { tx, done: done.clone() };
        let res = source.make_tasks(&done, &sender);
        // close the task stream before reporting
        drop(sender);
        let _ = errc_tx.send(res);
    });
    (rx, errc_rx)
}

/// Run `n` workers over `tasks`. The returned stream closes after all workers exit.
pub fn run_workers<T: Task>(
    n: usize,
    done: &Done,
    tasks: Receiver<T>,
    capacity: usize,
) -> Receiver<T::Output> {
    let (out_tx, out_rx) = bounded::<T::Output>(capacity.max(1));
    let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(n.max(1));
    for worker_id in 0..n.max(1) {
        let tasks = tasks.clone();
        let out_tx = out_tx.clone();
        let done = done.clone();
        handles.push(std::thread::spawn(move || worker_loop(worker_id, &done, tasks, out_tx)));
    }
    drop(tasks);
    std::thread::spawn(move || {
        for (i, h) in handles.into_iter().enumerate() {
            if h.join().is_err() {
                tracing::error!("[s3cp][pipeline] worker_id={} panicked", i);
            }
        }
        drop(out_tx);
    });
    out_rx
}

fn worker_loop<T: Task>(worker_id: usize, done: &Done, tasks: Receiver<T>, out: Sender<T::Output>) {
    loop {
        let task = select! {
            recv(tasks) -> msg => match msg {
                Ok(t) => t,
                Err(_) => break,
            },
            recv(done.receiver()) -> _ => break,
        };
        // select! picks at random when both are ready
        if done.is_done() {
            break;
        }
        let result = task.work(done);
        if let Some(e) = result.error() {
            tracing::debug!("[s3cp][pipeline] worker_id={} task failed: {:#}", worker_id, e);
        } else {
            tracing::trace!("[s3cp][pipeline] worker_id={} {}", worker_id, result.message());
        }
        // finished work is always reported; consumers drain until the stream closes
        if out.send(result).is_err() {
            break;
        }
    }
    tracing::trace!("[s3cp][pipeline] worker_id={} exit", worker_id);
}

/// `generate_tasks` followed by `run_workers`, with a queue depth of twice the worker count.
pub fn run_pipeline<S: TaskSource>(
    done: &Done,
    source: S,
    workers: usize,
) -> (Receiver<<S::Task as Task>::Output>, Receiver<anyhow::Result<()>>) {
    let depth = workers.max(1) * 2;
    let (tasks, errc) = generate_tasks(done, source, depth);
    (run_workers(workers, done, tasks, depth), errc)
}
