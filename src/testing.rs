//! Test doubles for the device facade, the table source and the clock.

use std::cell::Cell;
use std::time::Duration;

use crate::device::{Control, Frontend, LockStatus, Support};
use crate::error::{Error, Result};
use crate::poll::{CancelToken, Clock};
use crate::tables::{ProgramRecord, ProgramStreamRecord, ServiceRecord, SignalTables};

/// Virtual clock: `sleep` advances time instantly.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for ManualClock {
    fn elapsed(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Tune(u32, u32),
    LockStatus,
    QuerySupport,
    GetControl,
    SetControl(i32),
}

/// Scripted frontend. Tune number `n` (0-based) locks after `lock_after[n]`
/// status polls; tunes past the end of the script never lock.
#[derive(Debug, Default)]
pub struct MockFrontend {
    pub support: Support,
    pub support_fails: bool,
    /// `None` makes `get_control` fail.
    pub max_plp: Option<i32>,
    pub lock_after: Vec<Option<u32>>,
    pub status_fails: bool,
    pub set_fails: bool,
    /// Cancel the token once this many polls followed the last tune.
    pub cancel_on_poll: Option<(u32, CancelToken)>,
    pub calls: Vec<Call>,
    tunes: usize,
    polls_since_tune: u32,
}

impl MockFrontend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tune_count(&self) -> usize {
        self.tunes
    }

    pub fn lock_polls(&self) -> usize {
        self.calls.iter().filter(|c| **c == Call::LockStatus).count()
    }

    pub fn selected_plps(&self) -> Vec<i32> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::SetControl(v) => Some(*v),
                _ => None,
            })
            .collect()
    }
}

impl Frontend for MockFrontend {
    fn tune(&mut self, frequency: u32, bandwidth: u32) -> Result<()> {
        self.calls.push(Call::Tune(frequency, bandwidth));
        crate::device::validate_tune(frequency, bandwidth)?;
        self.tunes += 1;
        self.polls_since_tune = 0;
        Ok(())
    }

    fn lock_status(&mut self) -> Result<LockStatus> {
        self.calls.push(Call::LockStatus);
        if self.status_fails {
            return Err(Error::DeviceQueryFailed("status unavailable".to_string()));
        }
        let locks_after = self
            .tunes
            .checked_sub(1)
            .and_then(|i| self.lock_after.get(i).copied())
            .flatten();
        let locked = matches!(locks_after, Some(n) if self.polls_since_tune >= n);
        self.polls_since_tune += 1;
        if let Some((polls, token)) = &self.cancel_on_poll {
            if self.polls_since_tune >= *polls {
                token.cancel();
            }
        }
        Ok(LockStatus {
            signal_strength: if locked { 80 } else { 10 },
            signal_quality: if locked { 90 } else { 0 },
            signal_present: locked,
            signal_locked: locked,
        })
    }

    fn query_support(&mut self, _control: Control) -> Result<Support> {
        self.calls.push(Call::QuerySupport);
        if self.support_fails {
            return Err(Error::DeviceQueryFailed("property set missing".to_string()));
        }
        Ok(self.support)
    }

    fn get_control(&mut self, control: Control) -> Result<i32> {
        self.calls.push(Call::GetControl);
        self.max_plp.ok_or(Error::Unsupported(control))
    }

    fn set_control(&mut self, _control: Control, value: i32) -> Result<()> {
        self.calls.push(Call::SetControl(value));
        if self.set_fails {
            return Err(Error::DeviceQueryFailed("set rejected".to_string()));
        }
        Ok(())
    }
}

/// Tables served during one pass (between two `reset` calls).
#[derive(Debug, Clone, Default)]
pub struct TablePass {
    pub services: Option<Vec<ServiceRecord>>,
    pub programs: Option<Vec<ProgramRecord>>,
    pub streams: Vec<ProgramStreamRecord>,
    /// Number of misses before the SDT shows up.
    pub services_after: u32,
    pub programs_after: u32,
    pub fail_services: bool,
    /// Cancelled on the first SDT query; the SDT then never arrives.
    pub cancel: Option<CancelToken>,
}

#[derive(Debug, Default)]
pub struct MockTables {
    passes: Vec<TablePass>,
    pub resets: usize,
    pub service_queries: u32,
    pub program_queries: u32,
    pub stream_queries: u32,
}

impl MockTables {
    pub fn new(passes: Vec<TablePass>) -> Self {
        MockTables {
            passes,
            ..Default::default()
        }
    }

    fn current(&self) -> Option<&TablePass> {
        self.passes.get(self.resets.saturating_sub(1))
    }
}

impl SignalTables for MockTables {
    fn reset(&mut self) {
        self.resets += 1;
        self.service_queries = 0;
        self.program_queries = 0;
        self.stream_queries = 0;
    }

    fn service_table(&mut self) -> Result<Option<Vec<ServiceRecord>>> {
        self.service_queries += 1;
        let queries = self.service_queries;
        let Some(pass) = self.current() else {
            return Ok(None);
        };
        if pass.fail_services {
            return Err(Error::DeviceQueryFailed("demux read failed".to_string()));
        }
        if let Some(token) = &pass.cancel {
            token.cancel();
            return Ok(None);
        }
        if queries <= pass.services_after {
            return Ok(None);
        }
        Ok(pass.services.clone())
    }

    fn program_table(&mut self) -> Result<Option<Vec<ProgramRecord>>> {
        self.program_queries += 1;
        let queries = self.program_queries;
        let Some(pass) = self.current() else {
            return Ok(None);
        };
        if queries <= pass.programs_after {
            return Ok(None);
        }
        Ok(pass.programs.clone())
    }

    fn program_streams(
        &mut self,
        service_id: u16,
        program_map_pid: u16,
    ) -> Result<Option<ProgramStreamRecord>> {
        self.stream_queries += 1;
        Ok(self.current().and_then(|pass| {
            pass.streams
                .iter()
                .find(|s| s.service_id == service_id && s.program_map_pid == program_map_pid)
                .cloned()
        }))
    }
}
