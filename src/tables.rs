//! Signaling tables and the timed fetches that wait for them after a lock.

use log::{debug, warn};

use crate::channel::StreamBinding;
use crate::error::{Error, Result};
use crate::poll::{CancelToken, Clock, PollOutcome, PollPolicy, poll_until};

/// One SDT entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub service_id: u16,
    pub transport_stream_id: u16,
    pub scrambled: bool,
    pub service_type: u8,
    pub name: String,
    pub provider_name: String,
}

/// One PAT entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramRecord {
    pub service_id: u16,
    pub program_map_pid: u16,
}

/// Elementary streams listed in one program's PMT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramStreamRecord {
    pub service_id: u16,
    pub program_map_pid: u16,
    pub streams: Vec<StreamBinding>,
}

/// Source of already-decoded signaling tables for the currently tuned stream.
///
/// Each query answers `Ok(None)` while the table has not been received yet.
pub trait SignalTables {
    /// Forget everything collected for a previous tune.
    fn reset(&mut self) {}

    fn service_table(&mut self) -> Result<Option<Vec<ServiceRecord>>>;

    fn program_table(&mut self) -> Result<Option<Vec<ProgramRecord>>>;

    fn program_streams(
        &mut self,
        service_id: u16,
        program_map_pid: u16,
    ) -> Result<Option<ProgramStreamRecord>>;
}

impl<T: SignalTables + ?Sized> SignalTables for &mut T {
    fn reset(&mut self) {
        (**self).reset()
    }

    fn service_table(&mut self) -> Result<Option<Vec<ServiceRecord>>> {
        (**self).service_table()
    }

    fn program_table(&mut self) -> Result<Option<Vec<ProgramRecord>>> {
        (**self).program_table()
    }

    fn program_streams(
        &mut self,
        service_id: u16,
        program_map_pid: u16,
    ) -> Result<Option<ProgramStreamRecord>> {
        (**self).program_streams(service_id, program_map_pid)
    }
}

/// Result of a timed table fetch. `Unavailable` is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetch<T> {
    Available(T),
    Unavailable,
}

impl<T> Fetch<T> {
    pub fn is_available(&self) -> bool {
        matches!(self, Fetch::Available(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Fetch::Available(value) => Some(value),
            Fetch::Unavailable => None,
        }
    }
}

/// Polls a [`SignalTables`] source until a table shows up or the budget runs out.
///
/// Unlike the lock loop there is no settle phase: the first poll is immediate.
pub struct TableFetcher<'a, T: ?Sized, C: ?Sized> {
    tables: &'a mut T,
    clock: &'a C,
    policy: PollPolicy,
    cancel: &'a CancelToken,
}

impl<'a, T, C> TableFetcher<'a, T, C>
where
    T: SignalTables + ?Sized,
    C: Clock + ?Sized,
{
    pub fn new(tables: &'a mut T, clock: &'a C, policy: PollPolicy, cancel: &'a CancelToken) -> Self {
        TableFetcher {
            tables,
            clock,
            policy,
            cancel,
        }
    }

    pub fn fetch_service_table(&mut self) -> Result<Fetch<Vec<ServiceRecord>>> {
        self.fetch("SDT", |tables| tables.service_table())
    }

    pub fn fetch_program_table(&mut self) -> Result<Fetch<Vec<ProgramRecord>>> {
        self.fetch("PAT", |tables| tables.program_table())
    }

    pub fn fetch_program_streams(
        &mut self,
        program: &ProgramRecord,
    ) -> Result<Fetch<ProgramStreamRecord>> {
        let (sid, pid) = (program.service_id, program.program_map_pid);
        self.fetch("PMT", |tables| tables.program_streams(sid, pid))
    }

    fn fetch<R>(
        &mut self,
        table: &str,
        mut query: impl FnMut(&mut T) -> Result<Option<R>>,
    ) -> Result<Fetch<R>> {
        let TableFetcher {
            tables,
            clock,
            policy,
            cancel,
        } = self;
        let started = clock.elapsed();
        match poll_until(*clock, policy, *cancel, || query(&mut **tables))? {
            PollOutcome::Ready(value) => {
                debug!(
                    "{table} received after {}ms",
                    clock.elapsed().saturating_sub(started).as_millis()
                );
                Ok(Fetch::Available(value))
            }
            PollOutcome::TimedOut => {
                warn!("{table} not received within {}ms", policy.timeout.as_millis());
                Ok(Fetch::Unavailable)
            }
            PollOutcome::Cancelled => Err(Error::Cancelled),
        }
    }
}
