//! Error types for background task operations.

use thiserror::Error;

/// Result type for task operations.
pub type TaskResult<T> = Result<T, TaskError>;

/// Errors returned when handing work to [`BackgroundTasks`](crate::BackgroundTasks).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    /// The manager was closed for shutdown and accepts no more work.
    #[error("background tasks are closed, rejected task `{name}`")]
    Closed {
        /// Name of the rejected task.
        name: String,
    },
}

impl TaskError {
    /// Create a closed error for the named task.
    pub fn closed(name: impl Into<String>) -> Self {
        Self::Closed { name: name.into() }
    }
}
