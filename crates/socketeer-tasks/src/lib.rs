//! # Socketeer Tasks
//!
//! A cooperative, single-thread task runtime for the Socketeer engine.
//!
//! Tasks are ordinary futures. The [`Scheduler`] never relies on wakers:
//! it keeps every suspended task in a pending set and resumes each one
//! once per cycle, round-robin. A task suspends only at explicit points
//! ([`yield_point`], [`sleep`]), so at most one task executes at any
//! instant and there is no preemption.
//!
//! ```rust
//! use socketeer_tasks::{yield_point, Scheduler};
//!
//! let scheduler = Scheduler::new();
//!
//! scheduler.spawn_with_callback(
//!     "count",
//!     async {
//!         let mut total = 0;
//!         for i in 0..3 {
//!             total += i;
//!             yield_point().await;
//!         }
//!         total
//!     },
//!     |total| println!("counted to {total}"),
//! );
//!
//! // Drive until every task has terminated.
//! scheduler.run();
//! ```
//!
//! Inside a host async runtime use [`Scheduler::drive`] instead, which
//! hands control back to the host loop between cycles.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod error;
mod scheduler;
mod task;
mod yield_now;

pub use error::{TaskError, TaskResult};
pub use scheduler::Scheduler;
pub use task::{TaskHandle, TaskId, TaskState, TaskStats};
pub use yield_now::{sleep, yield_point, YieldPoint};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{TaskError, TaskResult};
    pub use crate::scheduler::Scheduler;
    pub use crate::task::{TaskHandle, TaskId, TaskState};
    pub use crate::yield_now::{sleep, yield_point};
}
