//! Explicit suspension points.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// Future returned by [`yield_point`].
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct YieldPoint {
    yielded: bool,
}

impl Future for YieldPoint {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Suspend the current task until the next scheduler cycle.
///
/// Control returns to the scheduler, which resumes the task at exactly
/// this point on its next scan of the pending set.
pub fn yield_point() -> YieldPoint {
    YieldPoint { yielded: false }
}

/// Cooperatively wait for `duration`.
///
/// The deadline is checked each time the task is resumed; the task yields
/// until it has passed. The wait is therefore at least `duration`, and
/// can overshoot by up to one scheduler cycle.
pub async fn sleep(duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        yield_point().await;
    }
}
