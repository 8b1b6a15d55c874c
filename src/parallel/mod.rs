//! Bounded-queue worker pools for per-taxon fan-out.
//!
//! A [`Job`] describes one kind of work. [`run_parallel`] feeds its tasks to
//! a pool of threads or worker processes and yields one result per task, in
//! completion order. Failures (errors and panics) come back as [`TaskError`]s
//! and never stop the pool.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::{ParallelConfig, WorkerMode};
use crate::error::{RangeError, Result, TaskError};

pub mod process;
pub mod thread;

pub use process::{serve_worker, ProcessExecutor};
pub use thread::ThreadExecutor;

/// Result half or error half of one task.
pub type TaskResult<T> = std::result::Result<T, TaskError>;

/// A unit of parallel work.
///
/// The context is everything a worker process needs to rebuild the job; it is
/// sent once per worker, ahead of the tasks.
pub trait Job: Send + Sync + Sized + 'static {
    /// Name a worker process is started with.
    const NAME: &'static str;
    type Context: Serialize + DeserializeOwned;
    type Task: Serialize + DeserializeOwned + Send + 'static;
    type Output: Serialize + DeserializeOwned + Send + 'static;

    fn context(&self) -> Self::Context;
    fn from_context(context: Self::Context) -> Result<Self>;
    /// Workload-identifying label carried by errors.
    fn label(task: &Self::Task) -> String;
    fn run(&self, task: Self::Task) -> Result<Self::Output>;
}

/// A running pool.
pub trait Executor<J: Job>: Send {
    /// Queues a task, blocking while the queue is full.
    fn submit(&mut self, task: J::Task) -> TaskResult<()>;
    /// Blocks for the next completed task. `None` once every worker has exited.
    fn next_result(&mut self) -> Option<TaskResult<J::Output>>;
    /// Pushes one sentinel per worker. No tasks may follow.
    fn finish(&mut self);
}

/// Runs one task, turning errors and panics into a [`TaskError`].
pub(crate) fn run_task<J: Job>(job: &J, task: J::Task) -> TaskResult<J::Output> {
    let label = J::label(&task);
    match catch_unwind(AssertUnwindSafe(|| job.run(task))) {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => {
            log::debug!("{} task {label} failed: {e}", J::NAME);
            Err(TaskError::new(label, e.to_string()))
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            log::error!("{} task {label} panicked: {message}", J::NAME);
            Err(TaskError::new(label, format!("panicked: {message}")))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Starts the executor selected by `config`.
pub fn executor<J: Job>(job: J, config: &ParallelConfig) -> Result<Box<dyn Executor<J>>> {
    let workers = config.worker_count();
    match config.mode {
        WorkerMode::Threads => Ok(Box::new(ThreadExecutor::spawn(Arc::new(job), workers)?)),
        WorkerMode::Processes => {
            let program = config.worker_program.as_ref().ok_or_else(|| {
                RangeError::Config("processes mode needs a worker_program".to_string())
            })?;
            Ok(Box::new(ProcessExecutor::spawn(&job, program, workers)?))
        }
    }
}

/// Lazily runs `tasks` on a worker pool.
///
/// Yields exactly one item per task, in completion order. Up to `workers`
/// tasks are queued ahead; after that one result is drained per task
/// submitted. Dropping the iterator early stops feeding new tasks but lets
/// already queued ones finish.
pub fn run_parallel<J, I>(job: J, tasks: I, config: &ParallelConfig) -> Result<ParallelRun<J, I::IntoIter>>
where
    J: Job,
    I: IntoIterator<Item = J::Task>,
{
    let workers = config.worker_count();
    let executor = executor(job, config)?;
    log::debug!("Started {workers} {:?} workers for {}", config.mode, J::NAME);
    Ok(ParallelRun {
        executor,
        tasks: tasks.into_iter(),
        workers,
        submitted: 0,
        received: 0,
        rejected: VecDeque::new(),
        finished: false,
    })
}

pub struct ParallelRun<J: Job, I> {
    executor: Box<dyn Executor<J>>,
    tasks: I,
    workers: usize,
    submitted: usize,
    received: usize,
    rejected: VecDeque<TaskError>,
    finished: bool,
}

impl<J: Job, I> ParallelRun<J, I> {
    fn drain_one(&mut self) -> Option<TaskResult<J::Output>> {
        if let Some(error) = self.rejected.pop_front() {
            self.received += 1;
            return Some(Err(error));
        }
        if self.received >= self.submitted {
            return None;
        }
        self.received += 1;
        Some(self.executor.next_result().unwrap_or_else(|| {
            Err(TaskError::new(J::NAME, "worker pool exited before returning a result"))
        }))
    }
}

impl<J, I> Iterator for ParallelRun<J, I>
where
    J: Job,
    I: Iterator<Item = J::Task>,
{
    type Item = TaskResult<J::Output>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            match self.tasks.next() {
                Some(task) => {
                    if let Err(error) = self.executor.submit(task) {
                        self.rejected.push_back(error);
                    }
                    self.submitted += 1;
                    if self.submitted > self.workers {
                        return self.drain_one();
                    }
                }
                None => {
                    self.executor.finish();
                    self.finished = true;
                }
            }
        }
        self.drain_one()
    }
}

impl<J: Job, I> Drop for ParallelRun<J, I> {
    fn drop(&mut self) {
        if !self.finished {
            self.executor.finish();
        }
    }
}

#[cfg(test)]
mod tests;
