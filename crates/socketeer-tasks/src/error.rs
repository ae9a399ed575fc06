//! Error types for cooperative task operations.

use thiserror::Error;

use crate::task::TaskId;

/// Result type for task operations.
pub type TaskResult<T> = Result<T, TaskError>;

/// Errors that can occur when collecting a task's outcome.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    /// The task has not terminated yet.
    #[error("task {0} has not terminated")]
    NotFinished(TaskId),

    /// The task panicked while it was being resumed.
    #[error("task {task} panicked: {message}")]
    Panicked {
        /// The task that panicked.
        task: TaskId,
        /// The panic payload, if it was a string.
        message: String,
    },

    /// The result was already taken from the handle.
    #[error("result of task {0} was already taken")]
    AlreadyTaken(TaskId),
}

impl TaskError {
    /// Create a panicked error.
    pub fn panicked(task: TaskId, message: impl Into<String>) -> Self {
        Self::Panicked {
            task,
            message: message.into(),
        }
    }

    /// Check if polling the handle again later may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotFinished(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_recoverable() {
        let id = TaskId::new();
        assert!(TaskError::NotFinished(id).is_recoverable());
        assert!(!TaskError::panicked(id, "boom").is_recoverable());
        assert!(!TaskError::AlreadyTaken(id).is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let id = TaskId::new();
        let err = TaskError::panicked(id, "index out of bounds");
        assert!(err.to_string().contains("index out of bounds"));
        assert!(err.to_string().contains(&id.to_string()));
    }
}
