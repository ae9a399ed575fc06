//! Cooperative round-robin scheduler.
//!
//! Tasks are futures that never rely on wakers: every suspended task is
//! resumed once per cycle, in spawn order. A task suspends by awaiting
//! [`yield_point`](crate::yield_point) (or any future that returns
//! `Pending`), and resumes exactly there on the next cycle.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures_util::task::noop_waker_ref;
use tracing::{debug, error, trace};

use crate::task::{Outcome, TaskHandle, TaskId, TaskState, TaskStats};

type LocalFuture = Pin<Box<dyn Future<Output = ()>>>;

/// A spawned task owned by the scheduler.
struct Task {
    id: TaskId,
    name: Rc<str>,
    state: Rc<Cell<TaskState>>,
    future: LocalFuture,
    /// Fires the completion callback; `None` when no callback was registered.
    on_complete: Option<Box<dyn FnOnce()>>,
    /// Records a panic into the handle's outcome slot.
    on_panic: Box<dyn Fn(String)>,
}

impl Task {
    /// Resume the task until its next suspension point.
    ///
    /// Returns `Ready(Err(message))` if the task panicked.
    fn resume(&mut self, stats: &TaskStats) -> Poll<Result<(), String>> {
        self.state.set(TaskState::Running);
        stats.record_resume();

        let mut cx = Context::from_waker(noop_waker_ref());
        let polled = catch_unwind(AssertUnwindSafe(|| self.future.as_mut().poll(&mut cx)));

        match polled {
            Ok(Poll::Pending) => {
                self.state.set(TaskState::Suspended);
                Poll::Pending
            }
            Ok(Poll::Ready(())) => {
                self.state.set(TaskState::Terminated);
                Poll::Ready(Ok(()))
            }
            Err(payload) => {
                self.state.set(TaskState::Terminated);
                Poll::Ready(Err(panic_message(payload.as_ref())))
            }
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[derive(Debug, Default)]
struct Inner {
    pending: RefCell<VecDeque<Task>>,
    stats: TaskStats,
}

/// Single-thread cooperative scheduler.
///
/// The scheduler is a cheap, clonable handle so tasks can spawn further
/// tasks. It is `!Send`: exactly one task executes at any
/// instant and shared state between tasks needs no locking.
///
/// # Example
///
/// ```
/// use socketeer_tasks::{yield_point, Scheduler};
///
/// let scheduler = Scheduler::new();
/// let handle = scheduler.spawn("answer", async {
///     yield_point().await;
///     42
/// });
/// assert!(!handle.is_finished());
///
/// scheduler.run();
/// assert_eq!(handle.take_result().unwrap(), 42);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    inner: Rc<Inner>,
}

impl Scheduler {
    /// Create a new, empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task and start it immediately.
    ///
    /// The task runs until its first suspension point before `spawn`
    /// returns. If it finishes without suspending it never enters the
    /// pending set.
    pub fn spawn<F, T>(&self, name: impl Into<String>, future: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + 'static,
        T: 'static,
    {
        self.spawn_inner(name.into(), future, None)
    }

    /// Spawn a task with a completion callback.
    ///
    /// The callback receives the task's return value exactly once, right
    /// after the task terminates. It does not fire if the task panics. A
    /// panicking callback is logged and counted like a panicking task.
    pub fn spawn_with_callback<F, T, C>(
        &self,
        name: impl Into<String>,
        future: F,
        on_complete: C,
    ) -> TaskHandle<T>
    where
        F: Future<Output = T> + 'static,
        T: 'static,
        C: FnOnce(&T) + 'static,
    {
        self.spawn_inner(name.into(), future, Some(Box::new(on_complete)))
    }

    fn spawn_inner<F, T>(
        &self,
        name: String,
        future: F,
        callback: Option<Box<dyn FnOnce(&T)>>,
    ) -> TaskHandle<T>
    where
        F: Future<Output = T> + 'static,
        T: 'static,
    {
        let id = TaskId::new();
        let name: Rc<str> = Rc::from(name);
        let state = Rc::new(Cell::new(TaskState::Created));
        let outcome = Rc::new(RefCell::new(Outcome::Pending));

        let slot = Rc::clone(&outcome);
        let wrapped = async move {
            let value = future.await;
            *slot.borrow_mut() = Outcome::Ready(value);
        };

        let on_complete = callback.map(|callback| {
            let slot = Rc::clone(&outcome);
            Box::new(move || {
                if let Outcome::Ready(value) = &*slot.borrow() {
                    callback(value);
                }
            }) as Box<dyn FnOnce()>
        });

        let panic_slot = Rc::clone(&outcome);
        let mut task = Task {
            id,
            name: Rc::clone(&name),
            state: Rc::clone(&state),
            future: Box::pin(wrapped),
            on_complete,
            on_panic: Box::new(move |message| {
                *panic_slot.borrow_mut() = Outcome::Panicked(message);
            }),
        };

        self.inner.stats.record_spawn();
        debug!(task_id = %id, task = %name, "Spawning task");

        match task.resume(&self.inner.stats) {
            Poll::Pending => self.inner.pending.borrow_mut().push_back(task),
            Poll::Ready(result) => self.finish(task, result),
        }

        TaskHandle::new(id, name, state, outcome)
    }

    fn finish(&self, task: Task, result: Result<(), String>) {
        match result {
            Ok(()) => {
                self.inner.stats.record_completed();
                trace!(task_id = %task.id, task = %task.name, "Task terminated");
                let Some(on_complete) = task.on_complete else {
                    return;
                };
                if let Err(payload) = catch_unwind(AssertUnwindSafe(on_complete)) {
                    self.inner.stats.record_panicked();
                    error!(
                        task_id = %task.id,
                        task = %task.name,
                        panic = %panic_message(payload.as_ref()),
                        "Completion callback panicked"
                    );
                }
            }
            Err(message) => {
                self.inner.stats.record_panicked();
                error!(task_id = %task.id, task = %task.name, panic = %message, "Task panicked");
                (task.on_panic)(message);
            }
        }
    }

    /// Run one scheduling cycle.
    ///
    /// Every task that was pending when the cycle started is resumed once,
    /// in order. Tasks spawned during the cycle already ran up to their
    /// first suspension point and join the back of the queue.
    ///
    /// Returns the number of tasks still pending afterwards.
    pub fn run_cycle(&self) -> usize {
        let mut batch = std::mem::take(&mut *self.inner.pending.borrow_mut());
        let mut survivors = VecDeque::with_capacity(batch.len());

        while let Some(mut task) = batch.pop_front() {
            match task.resume(&self.inner.stats) {
                Poll::Pending => survivors.push_back(task),
                Poll::Ready(result) => self.finish(task, result),
            }
        }

        let mut pending = self.inner.pending.borrow_mut();
        survivors.extend(pending.drain(..));
        *pending = survivors;
        self.inner.stats.record_cycle();
        pending.len()
    }

    /// Drive cycles on the current thread until no task is pending.
    ///
    /// Between cycles the OS thread is yielded. Servers spawn loops that
    /// never terminate, so for them this never returns.
    pub fn run(&self) {
        while self.run_cycle() > 0 {
            std::thread::yield_now();
        }
    }

    /// Drive cycles from inside a host async event loop.
    ///
    /// After each cycle the driver suspends itself, handing control back to
    /// the host runtime before the next cycle begins.
    pub async fn drive(&self) {
        while self.run_cycle() > 0 {
            tokio::task::yield_now().await;
        }
    }

    /// Number of suspended tasks waiting for the next cycle.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.borrow().len()
    }

    /// Check if no task is pending.
    pub fn is_idle(&self) -> bool {
        self.pending_count() == 0
    }

    /// Get scheduler statistics.
    pub fn stats(&self) -> &TaskStats {
        &self.inner.stats
    }
}
