//! Task identity, state and statistics types.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

use crate::error::{TaskError, TaskResult};

/// Unique identifier for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a new unique task ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a task.
///
/// ```text
/// Created ──► Running ──► Suspended ⇄ Running ──► Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Task has been built but not resumed yet.
    Created,
    /// Task is executing right now.
    Running,
    /// Task reached a suspension point and waits for the next cycle.
    Suspended,
    /// Task returned (or panicked) and will never run again.
    Terminated,
}

impl TaskState {
    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Check if the task is suspended.
    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Suspended => write!(f, "suspended"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Where a task's return value lives once it terminates.
#[derive(Debug)]
pub(crate) enum Outcome<T> {
    Pending,
    Ready(T),
    Panicked(String),
    Taken,
}

/// A handle to a spawned task.
///
/// The handle observes the task's state and collects its return value once
/// it has terminated. Dropping the handle does not stop the task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: TaskId,
    name: Rc<str>,
    state: Rc<Cell<TaskState>>,
    outcome: Rc<RefCell<Outcome<T>>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(
        id: TaskId,
        name: Rc<str>,
        state: Rc<Cell<TaskState>>,
        outcome: Rc<RefCell<Outcome<T>>>,
    ) -> Self {
        Self {
            id,
            name,
            state,
            outcome,
        }
    }

    /// Get the task ID.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Get the task name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    /// Check if the task has terminated.
    pub fn is_finished(&self) -> bool {
        self.state.get().is_terminal()
    }

    /// Take the task's return value.
    ///
    /// Fails if the task is still running, panicked, or the value was
    /// already taken.
    pub fn take_result(&self) -> TaskResult<T> {
        let mut outcome = self.outcome.borrow_mut();
        match std::mem::replace(&mut *outcome, Outcome::Taken) {
            Outcome::Ready(value) => Ok(value),
            Outcome::Pending => {
                *outcome = Outcome::Pending;
                Err(TaskError::NotFinished(self.id))
            }
            Outcome::Panicked(message) => {
                *outcome = Outcome::Panicked(message.clone());
                Err(TaskError::panicked(self.id, message))
            }
            Outcome::Taken => Err(TaskError::AlreadyTaken(self.id)),
        }
    }
}

/// Scheduler execution statistics.
#[derive(Debug, Default)]
pub struct TaskStats {
    /// Total tasks spawned.
    pub spawned: AtomicU64,
    /// Tasks that returned normally.
    pub completed: AtomicU64,
    /// Tasks that panicked.
    pub panicked: AtomicU64,
    /// Total resumes across all tasks.
    pub resumes: AtomicU64,
    /// Scheduler cycles run.
    pub cycles: AtomicU64,
}

impl TaskStats {
    /// Create new empty stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a task spawn.
    pub fn record_spawn(&self) {
        self.spawned.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a normal task completion.
    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task panic.
    pub fn record_panicked(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a single resume.
    pub fn record_resume(&self) {
        self.resumes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a full scheduler cycle.
    pub fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total spawned count.
    pub fn total_spawned(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }

    /// Get completed count.
    pub fn total_completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Get panicked count.
    pub fn total_panicked(&self) -> u64 {
        self.panicked.load(Ordering::Relaxed)
    }

    /// Get total resumes.
    pub fn total_resumes(&self) -> u64 {
        self.resumes.load(Ordering::Relaxed)
    }

    /// Get cycle count.
    pub fn total_cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }
}
