use std::time::Duration;

use crate::poll::PollPolicy;

/// Lock and table fetch budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Pause between two polls of the same query.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// PLP upper bound used when the device cannot (or will not sensibly) report one.
pub const DEFAULT_MAX_PLP: u32 = 255;

/// Timing and breadth settings for one scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    /// Lock polling budget. The frontend is also left to settle for half of it
    /// before the first poll.
    pub lock_timeout: Duration,
    pub table_timeout: Duration,
    pub poll_interval: Duration,
    pub default_max_plp: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            lock_timeout: DEFAULT_TIMEOUT,
            table_timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            default_max_plp: DEFAULT_MAX_PLP,
        }
    }
}

impl ScanConfig {
    pub fn settle_time(&self) -> Duration {
        self.lock_timeout / 2
    }

    pub fn lock_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: self.poll_interval,
            timeout: self.lock_timeout,
        }
    }

    pub fn table_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: self.poll_interval,
            timeout: self.table_timeout,
        }
    }
}
