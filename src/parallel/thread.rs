use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use super::{run_task, Executor, Job, TaskResult};
use crate::error::{RangeError, Result, TaskError};

/// In-process pool sharing one job instance across threads.
pub struct ThreadExecutor<J: Job> {
    tasks: Option<SyncSender<Option<J::Task>>>,
    results: Receiver<TaskResult<J::Output>>,
    workers: Vec<JoinHandle<()>>,
}

impl<J: Job> ThreadExecutor<J> {
    pub fn spawn(job: Arc<J>, workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let (task_tx, task_rx) = mpsc::sync_channel::<Option<J::Task>>(workers);
        let task_rx = Arc::new(Mutex::new(task_rx));
        let (result_tx, result_rx) = mpsc::channel();

        let handles = (0..workers)
            .map(|i| {
                let job = Arc::clone(&job);
                let queue = Arc::clone(&task_rx);
                let results: Sender<TaskResult<J::Output>> = result_tx.clone();
                thread::Builder::new()
                    .name(format!("{}-{i}", J::NAME))
                    .spawn(move || loop {
                        let message = queue.lock().recv();
                        match message {
                            Ok(Some(task)) => {
                                if results.send(run_task(job.as_ref(), task)).is_err() {
                                    return;
                                }
                            }
                            Ok(None) | Err(_) => return,
                        }
                    })
                    .map_err(|e| RangeError::Worker(format!("cannot spawn worker thread: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            tasks: Some(task_tx),
            results: result_rx,
            workers: handles,
        })
    }
}

impl<J: Job> Executor<J> for ThreadExecutor<J> {
    fn submit(&mut self, task: J::Task) -> TaskResult<()> {
        let label = J::label(&task);
        let sender = self
            .tasks
            .as_ref()
            .ok_or_else(|| TaskError::new(&label, "pool already finished"))?;
        sender
            .send(Some(task))
            .map_err(|_| TaskError::new(label, "every worker thread has exited"))
    }

    fn next_result(&mut self) -> Option<TaskResult<J::Output>> {
        self.results.recv().ok()
    }

    fn finish(&mut self) {
        if let Some(sender) = self.tasks.take() {
            for _ in 0..self.workers.len() {
                if sender.send(None).is_err() {
                    break;
                }
            }
        }
    }
}

impl<J: Job> Drop for ThreadExecutor<J> {
    fn drop(&mut self) {
        self.tasks.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
