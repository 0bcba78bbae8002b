//! PLP scan loop over one DVB-T2 carrier.

use std::fmt;

use log::{debug, info, warn};

use crate::capability::{self, PlpCapability};
use crate::channel::Multiplex;
use crate::config::ScanConfig;
use crate::correlate::{PassOutcome, correlate};
use crate::device::{self, Control, Frontend, LockStatus};
use crate::error::{Error, Result};
use crate::lock::{LockOutcome, acquire_lock};
use crate::poll::{CancelToken, Clock, MonotonicClock};
use crate::tables::{Fetch, SignalTables, TableFetcher};

/// Why a scan stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStop {
    /// PLP selection unsupported: the single pass ran to the end.
    SinglePass,
    /// Every PLP index up to the maximum was scanned.
    Exhausted,
    LockFailed { plp: Option<u32> },
    ServicesUnavailable { plp: Option<u32> },
    /// Channels of this PLP were kept without PIDs.
    ProgramsUnavailable { plp: Option<u32> },
    DeviceError { plp: Option<u32> },
    Cancelled,
}

impl fmt::Display for ScanStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plp = |plp: &Option<u32>| match plp {
            Some(index) => format!("PLP {index}"),
            None => "carrier".to_string(),
        };
        match self {
            ScanStop::SinglePass => write!(f, "single pass complete"),
            ScanStop::Exhausted => write!(f, "all PLPs scanned"),
            ScanStop::LockFailed { plp: p } => write!(f, "no lock on {}", plp(p)),
            ScanStop::ServicesUnavailable { plp: p } => write!(f, "no SDT on {}", plp(p)),
            ScanStop::ProgramsUnavailable { plp: p } => write!(f, "no PAT on {}", plp(p)),
            ScanStop::DeviceError { plp: p } => write!(f, "device error on {}", plp(p)),
            ScanStop::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanReport {
    pub multiplex: Multiplex,
    pub stop: ScanStop,
    /// PLP passes started, including the one that stopped the scan.
    pub plps_attempted: u32,
    pub capability: PlpCapability,
}

/// A scan session owning one frontend and its table source.
///
/// Only one tune can be outstanding per device, so every operation takes
/// `&mut self`.
pub struct Scanner<F, T, C = MonotonicClock> {
    frontend: F,
    tables: T,
    clock: C,
    config: ScanConfig,
    cancel: CancelToken,
}

impl<F, T> Scanner<F, T>
where
    F: Frontend,
    T: SignalTables,
{
    pub fn new(frontend: F, tables: T) -> Self {
        Self::with_clock(frontend, tables, MonotonicClock::new())
    }
}

impl<F, T, C> Scanner<F, T, C>
where
    F: Frontend,
    T: SignalTables,
    C: Clock,
{
    pub fn with_clock(frontend: F, tables: T, clock: C) -> Self {
        Scanner {
            frontend,
            tables,
            clock,
            config: ScanConfig::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `cancel` instead of the session's own token.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Token that aborts a running scan or lock at the next poll boundary.
    ///
    /// A cancellation is cleared once the scan or lock it stopped has
    /// returned, so the session stays usable afterwards.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn frontend(&self) -> &F {
        &self.frontend
    }

    #[cfg(test)]
    pub(crate) fn tables(&self) -> &T {
        &self.tables
    }

    #[cfg(test)]
    pub(crate) fn clock(&self) -> &C {
        &self.clock
    }

    /// Scan every reachable PLP of the carrier and return what was found.
    pub fn scan(&mut self, frequency: u32, bandwidth: u32) -> Result<Multiplex> {
        self.scan_report(frequency, bandwidth).map(|report| report.multiplex)
    }

    /// Like [`Scanner::scan`], also reporting why the scan stopped.
    ///
    /// Only invalid tune parameters are returned as errors. The first PLP that
    /// fails to lock or to deliver its tables ends the scan; whatever was
    /// collected until then is kept.
    pub fn scan_report(&mut self, frequency: u32, bandwidth: u32) -> Result<ScanReport> {
        device::validate_tune(frequency, bandwidth)?;

        let mut multiplex = Multiplex::new(frequency, bandwidth);
        let capability = capability::probe(&mut self.frontend);
        let max_plp =
            capability::max_plp_count(&mut self.frontend, capability, self.config.default_max_plp);
        let passes = if capability.can_set { max_plp } else { 1 };
        info!("Scanning {frequency} kHz / {bandwidth} MHz, up to {passes} PLP pass(es)");

        let mut stop = if capability.can_set {
            ScanStop::Exhausted
        } else {
            ScanStop::SinglePass
        };
        let mut plps_attempted = 0;

        for index in 0..passes {
            let plp = capability.can_set.then_some(index);
            if self.cancel.is_cancelled() {
                stop = ScanStop::Cancelled;
                break;
            }
            plps_attempted += 1;

            let outcome = match self.scan_pass(&multiplex, plp) {
                Ok(outcome) => outcome,
                Err(Error::Cancelled) => {
                    stop = ScanStop::Cancelled;
                    break;
                }
                Err(e) => {
                    warn!("PLP pass {plp:?} aborted: {e}");
                    stop = ScanStop::DeviceError { plp };
                    break;
                }
            };

            match outcome {
                None => {
                    stop = ScanStop::LockFailed { plp };
                    break;
                }
                Some(PassOutcome::ServicesUnavailable) => {
                    stop = ScanStop::ServicesUnavailable { plp };
                    break;
                }
                Some(PassOutcome::ProgramsUnavailable(channels)) => {
                    debug!("Keeping {} channel(s) without PIDs", channels.len());
                    multiplex.extend(channels);
                    stop = ScanStop::ProgramsUnavailable { plp };
                    break;
                }
                Some(PassOutcome::Complete(channels)) => {
                    info!("PLP {plp:?}: {} channel(s)", channels.len());
                    multiplex.extend(channels);
                }
            }
        }

        if stop == ScanStop::Cancelled {
            self.cancel.reset();
        }
        info!(
            "Scan of {frequency} kHz finished ({stop}): {} channel(s)",
            multiplex.channels().len()
        );
        Ok(ScanReport {
            multiplex,
            stop,
            plps_attempted,
            capability,
        })
    }

    /// One PLP: select, lock, fetch tables, correlate. `None` means no lock.
    fn scan_pass(&mut self, multiplex: &Multiplex, plp: Option<u32>) -> Result<Option<PassOutcome>> {
        if let Some(index) = plp {
            let value = i32::try_from(index)
                .map_err(|_| Error::DeviceQueryFailed(format!("PLP index {index} out of range")))?;
            self.frontend.set_control(Control::PlpNumber, value)?;
        }

        let lock = acquire_lock(
            &mut self.frontend,
            &self.clock,
            &self.config,
            &self.cancel,
            multiplex.frequency,
            multiplex.bandwidth,
        )?;
        if !lock.is_locked() {
            return Ok(None);
        }

        self.tables.reset();
        let mut fetcher = TableFetcher::new(
            &mut self.tables,
            &self.clock,
            self.config.table_policy(),
            &self.cancel,
        );
        let services = fetcher.fetch_service_table()?;
        let programs = if services.is_available() {
            fetcher.fetch_program_table()?
        } else {
            Fetch::Unavailable
        };
        correlate(multiplex, plp, services, programs, |program| {
            fetcher.fetch_program_streams(program)
        })
        .map(Some)
    }

    /// Tune and wait for lock without scanning.
    pub fn lock(&mut self, frequency: u32, bandwidth: u32) -> Result<LockOutcome> {
        let outcome = acquire_lock(
            &mut self.frontend,
            &self.clock,
            &self.config,
            &self.cancel,
            frequency,
            bandwidth,
        );
        if matches!(outcome, Err(Error::Cancelled)) {
            self.cancel.reset();
        }
        outcome
    }

    /// Current signal level and lock state.
    pub fn lock_status(&mut self) -> Result<LockStatus> {
        self.frontend.lock_status()
    }
}
