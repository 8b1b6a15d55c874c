use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RangeError {
    #[error("Topology error: {0}")]
    TopologyError(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Triangulation failed: {0}")]
    TriangulationError(String),

    #[error("Data integrity: {0}")]
    DataIntegrity(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Projection error: {0}")]
    Projection(String),

    #[error("Worker failure: {0}")]
    Worker(String),

    #[error("Error rate {failed}/{total} exceeds threshold {threshold}")]
    ErrorRateExceeded {
        failed: usize,
        total: usize,
        threshold: f64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),
}

pub type Result<T> = std::result::Result<T, RangeError>;

/// Failure of a single parallel task.
///
/// `task` is the label the job gave the task (usually a taxon id), so the
/// caller can reconcile errors that arrive in completion order.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("task {task} failed: {message}")]
pub struct TaskError {
    pub task: String,
    pub message: String,
}

impl TaskError {
    pub fn new(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            message: message.into(),
        }
    }
}
