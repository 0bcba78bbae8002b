//! Poll-with-deadline primitive used by the lock and table fetch loops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Monotonic time source the polling loops measure against.
pub trait Clock {
    /// Time elapsed since an arbitrary fixed origin. Never goes backwards.
    fn elapsed(&self) -> Duration;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// [`Clock`] backed by [`Instant`] and [`thread::sleep`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Shared cancellation flag, checked at every poll boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a previous cancellation so the owning session can scan again.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Poll spacing and the budget after which a poll loop gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut,
    Cancelled,
}

/// Call `attempt` until it yields a value, the budget runs out or `cancel` fires.
///
/// The first attempt runs immediately. After each miss the loop gives up once
/// `policy.timeout` has elapsed since the first attempt, otherwise it sleeps
/// `policy.interval` and tries again. With a 2000 ms budget and 100 ms spacing
/// that is at most 21 attempts. Errors from `attempt` end the loop at once.
pub fn poll_until<C, T, E, F>(
    clock: &C,
    policy: &PollPolicy,
    cancel: &CancelToken,
    mut attempt: F,
) -> Result<PollOutcome<T>, E>
where
    C: Clock + ?Sized,
    F: FnMut() -> Result<Option<T>, E>,
{
    let start = clock.elapsed();
    loop {
        if cancel.is_cancelled() {
            return Ok(PollOutcome::Cancelled);
        }
        if let Some(value) = attempt()? {
            return Ok(PollOutcome::Ready(value));
        }
        if clock.elapsed().saturating_sub(start) >= policy.timeout {
            return Ok(PollOutcome::TimedOut);
        }
        clock.sleep(policy.interval);
    }
}
