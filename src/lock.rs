//! Tune and wait for the frontend to lock.

use log::{debug, info};

use crate::config::ScanConfig;
use crate::device::{Frontend, LockStatus};
use crate::error::{Error, Result};
use crate::poll::{CancelToken, Clock, PollOutcome, poll_until};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Locked(LockStatus),
    Failed,
}

impl LockOutcome {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockOutcome::Locked(_))
    }
}

/// Tune to `frequency`/`bandwidth` and poll for lock.
///
/// The frontend first gets `settle_time` (half the lock budget) to stabilize,
/// then lock status is polled every `poll_interval` for up to `lock_timeout`.
/// A carrier that never locks therefore costs 1.5 times the lock budget.
/// Status read errors are returned as they are.
pub fn acquire_lock<F, C>(
    frontend: &mut F,
    clock: &C,
    config: &ScanConfig,
    cancel: &CancelToken,
    frequency: u32,
    bandwidth: u32,
) -> Result<LockOutcome>
where
    F: Frontend + ?Sized,
    C: Clock + ?Sized,
{
    debug!("Tuning to {frequency} kHz / {bandwidth} MHz");
    frontend.tune(frequency, bandwidth)?;

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    clock.sleep(config.settle_time());

    let started = clock.elapsed();
    let outcome = poll_until(clock, &config.lock_policy(), cancel, || {
        let status = frontend.lock_status()?;
        Ok::<_, Error>(status.is_locked().then_some(status))
    })?;

    match outcome {
        PollOutcome::Ready(status) => {
            info!(
                "Frontend locked after {}ms (strength={}, quality={})",
                (config.settle_time() + clock.elapsed().saturating_sub(started)).as_millis(),
                status.signal_strength,
                status.signal_quality
            );
            Ok(LockOutcome::Locked(status))
        }
        PollOutcome::TimedOut => {
            info!(
                "No lock on {frequency} kHz within {}ms",
                (config.settle_time() + config.lock_timeout).as_millis()
            );
            Ok(LockOutcome::Failed)
        }
        PollOutcome::Cancelled => Err(Error::Cancelled),
    }
}
