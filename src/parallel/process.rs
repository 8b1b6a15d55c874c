//! Out-of-process workers speaking JSON lines over stdin/stdout.
//!
//! The first line a worker reads is the job context, then one task per line.
//! It answers each task with one line holding `{"Ok": output}` or
//! `{"Err": message}`. Closing its stdin is the shutdown sentinel.

use std::io::{self, BufRead, BufReader, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use super::{run_task, Executor, Job, TaskResult};
use crate::error::{RangeError, Result, TaskError};

type Response<T> = std::result::Result<T, String>;

struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl WorkerProcess {
    fn start(program: &Path, name: &str, context: &str) -> io::Result<Self> {
        let mut child = Command::new(program)
            .arg(name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(io::Error::other("worker pipes unavailable"));
        };
        let mut worker = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        };
        worker.send_line(context)?;
        Ok(worker)
    }

    fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.stdin.write_all(line.as_bytes())?;
        self.stdin.write_all(b"\n")?;
        self.stdin.flush()
    }

    fn call(&mut self, request: &str) -> io::Result<String> {
        self.send_line(request)?;
        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "worker process exited"));
        }
        Ok(line)
    }

    fn close(self) {
        let Self { mut child, stdin, .. } = self;
        drop(stdin);
        let _ = child.wait();
    }

    fn kill(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Pool of worker processes, each driven by one feeder thread.
///
/// A worker that dies mid-task is replaced; the task it held is reported as
/// failed.
pub struct ProcessExecutor<J: Job> {
    tasks: Option<SyncSender<Option<J::Task>>>,
    results: Receiver<TaskResult<J::Output>>,
    feeders: Vec<JoinHandle<()>>,
    _job: PhantomData<fn() -> J>,
}

impl<J: Job> ProcessExecutor<J> {
    /// Starts `workers` copies of `program`. Failing to start any is fatal.
    pub fn spawn(job: &J, program: &Path, workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let context = serde_json::to_string(&job.context())?;
        let (task_tx, task_rx) = mpsc::sync_channel::<Option<J::Task>>(workers);
        let task_rx = Arc::new(Mutex::new(task_rx));
        let (result_tx, result_rx) = mpsc::channel();

        let mut feeders = Vec::with_capacity(workers);
        for i in 0..workers {
            let process = WorkerProcess::start(program, J::NAME, &context).map_err(|e| {
                RangeError::Worker(format!("cannot start worker {}: {e}", program.display()))
            })?;
            let feeder = Feeder::<J> {
                program: program.to_path_buf(),
                context: context.clone(),
                process: Some(process),
                _job: PhantomData,
            };
            let queue = Arc::clone(&task_rx);
            let results = result_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-feeder-{i}", J::NAME))
                .spawn(move || feeder.run(&queue, &results))
                .map_err(|e| RangeError::Worker(format!("cannot spawn feeder thread: {e}")))?;
            feeders.push(handle);
        }

        Ok(Self {
            tasks: Some(task_tx),
            results: result_rx,
            feeders,
            _job: PhantomData,
        })
    }
}

struct Feeder<J: Job> {
    program: PathBuf,
    context: String,
    process: Option<WorkerProcess>,
    _job: PhantomData<fn() -> J>,
}

impl<J: Job> Feeder<J> {
    fn run(
        mut self,
        queue: &Mutex<Receiver<Option<J::Task>>>,
        results: &mpsc::Sender<TaskResult<J::Output>>,
    ) {
        loop {
            let message = queue.lock().recv();
            let task = match message {
                Ok(Some(task)) => task,
                Ok(None) | Err(_) => break,
            };
            if results.send(self.dispatch(task)).is_err() {
                break;
            }
        }
        if let Some(process) = self.process.take() {
            process.close();
        }
    }

    fn dispatch(&mut self, task: J::Task) -> TaskResult<J::Output> {
        let label = J::label(&task);
        let request = serde_json::to_string(&task)
            .map_err(|e| TaskError::new(&label, format!("cannot encode task: {e}")))?;

        if self.process.is_none() {
            log::info!("Restarting {} worker process", J::NAME);
            let process = WorkerProcess::start(&self.program, J::NAME, &self.context)
                .map_err(|e| TaskError::new(&label, format!("cannot start worker process: {e}")))?;
            self.process = Some(process);
        }
        let Some(process) = self.process.as_mut() else {
            return Err(TaskError::new(label, "no worker process"));
        };

        match process.call(&request) {
            Ok(line) => match serde_json::from_str::<Response<J::Output>>(&line) {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(message)) => Err(TaskError::new(label, message)),
                Err(e) => Err(TaskError::new(label, format!("malformed worker response: {e}"))),
            },
            Err(e) => {
                log::warn!("{} worker died while running task {label}: {e}", J::NAME);
                if let Some(process) = self.process.take() {
                    process.kill();
                }
                Err(TaskError::new(label, format!("worker process failed: {e}")))
            }
        }
    }
}

impl<J: Job> Executor<J> for ProcessExecutor<J> {
    fn submit(&mut self, task: J::Task) -> TaskResult<()> {
        let label = J::label(&task);
        let sender = self
            .tasks
            .as_ref()
            .ok_or_else(|| TaskError::new(&label, "pool already finished"))?;
        sender
            .send(Some(task))
            .map_err(|_| TaskError::new(label, "every worker feeder has exited"))
    }

    fn next_result(&mut self) -> Option<TaskResult<J::Output>> {
        self.results.recv().ok()
    }

    fn finish(&mut self) {
        if let Some(sender) = self.tasks.take() {
            for _ in 0..self.feeders.len() {
                if sender.send(None).is_err() {
                    break;
                }
            }
        }
    }
}

impl<J: Job> Drop for ProcessExecutor<J> {
    fn drop(&mut self) {
        self.tasks.take();
        for handle in self.feeders.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Worker side of the protocol: reads the context and then tasks from
/// `input`, writing one response line per task to `output`.
///
/// Returns when `input` is exhausted.
pub fn serve_worker<J: Job>(input: impl BufRead, mut output: impl Write) -> Result<()> {
    let mut lines = input.lines();
    let Some(first) = lines.next() else {
        return Ok(());
    };
    let context: J::Context = serde_json::from_str(&first?)?;
    let job = J::from_context(context)?;
    log::debug!("{} worker ready", J::NAME);

    let mut served = 0usize;
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response: Response<J::Output> = match serde_json::from_str::<J::Task>(&line) {
            Ok(task) => run_task(&job, task).map_err(|e| e.message),
            Err(e) => Err(format!("malformed task: {e}")),
        };
        serde_json::to_writer(&mut output, &response)?;
        output.write_all(b"\n")?;
        output.flush()?;
        served += 1;
    }
    log::debug!("{} worker exiting after {served} tasks", J::NAME);
    Ok(())
}
