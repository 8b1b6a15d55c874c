use super::*;
use crate::config::ParallelConfig;
use std::io::Cursor;

/// Squares numbers; fails on 13 and panics on 7.
struct Square {
    offset: u64,
}

impl Job for Square {
    const NAME: &'static str = "square";
    type Context = u64;
    type Task = u64;
    type Output = (u64, u64);

    fn context(&self) -> u64 {
        self.offset
    }

    fn from_context(offset: u64) -> Result<Self> {
        Ok(Self { offset })
    }

    fn label(task: &u64) -> String {
        format!("n{task}")
    }

    fn run(&self, task: u64) -> Result<(u64, u64)> {
        match task {
            13 => Err(RangeError::DataIntegrity("unlucky".to_string())),
            7 => panic!("seven"),
            n => Ok((n, n * n + self.offset)),
        }
    }
}

#[test]
fn test_yields_one_result_per_task() {
    for workers in [1, 2, 4, 16] {
        let results: Vec<_> = run_parallel(Square { offset: 0 }, 0..20u64, &ParallelConfig::threads(workers))
            .unwrap()
            .collect();
        assert_eq!(results.len(), 20, "workers = {workers}");

        let mut ok: Vec<(u64, u64)> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
        ok.sort();
        assert_eq!(ok.len(), 18);
        assert!(ok.iter().all(|(n, sq)| *sq == n * n));
    }
}

#[test]
fn test_failures_are_reported_per_task() {
    let mut errors: Vec<TaskError> = run_parallel(Square { offset: 0 }, vec![1, 7, 13, 2], &ParallelConfig::threads(2))
        .unwrap()
        .filter_map(|r| r.err())
        .collect();
    errors.sort_by(|a, b| a.task.cmp(&b.task));

    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].task, "n13");
    assert!(errors[0].message.contains("unlucky"));
    assert_eq!(errors[1].task, "n7");
    assert!(errors[1].message.contains("seven"));
}

#[test]
fn test_empty_task_list() {
    let mut run = run_parallel(Square { offset: 0 }, Vec::new(), &ParallelConfig::threads(3)).unwrap();
    assert!(run.next().is_none());
    assert!(run.next().is_none());
}

#[test]
fn test_early_drop_does_not_hang() {
    let mut run = run_parallel(Square { offset: 0 }, 0..1000u64, &ParallelConfig::threads(2)).unwrap();
    assert!(run.next().is_some());
    drop(run);
}

#[test]
fn test_processes_mode_requires_a_program() {
    let config = ParallelConfig {
        workers: Some(2),
        mode: WorkerMode::Processes,
        worker_program: None,
    };
    assert!(matches!(
        run_parallel(Square { offset: 0 }, 0..3u64, &config),
        Err(RangeError::Config(_))
    ));
}

#[test]
fn test_missing_worker_program_is_fatal() {
    let config = ParallelConfig::processes(1, "/nonexistent/range_worker");
    assert!(matches!(
        run_parallel(Square { offset: 0 }, 0..3u64, &config),
        Err(RangeError::Worker(_))
    ));
}

#[test]
fn test_serve_worker_protocol() {
    let input = "5\n2\n\n13\nnot json\n7\n";
    let mut output = Vec::new();
    serve_worker::<Square>(Cursor::new(input), &mut output).unwrap();

    let lines: Vec<serde_json::Value> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], serde_json::json!({"Ok": [2, 9]}));
    assert!(lines[1]["Err"].as_str().unwrap().contains("unlucky"));
    assert!(lines[2]["Err"].as_str().unwrap().contains("malformed task"));
    assert!(lines[3]["Err"].as_str().unwrap().contains("panicked"));
}

#[test]
fn test_serve_worker_without_input() {
    let mut output = Vec::new();
    serve_worker::<Square>(Cursor::new(""), &mut output).unwrap();
    assert!(output.is_empty());
}
