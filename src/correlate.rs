//! Merge SDT, PAT and PMT records of one PLP into channels.

use log::debug;

use crate::channel::{Channel, Multiplex};
use crate::error::Result;
use crate::tables::{Fetch, ProgramRecord, ProgramStreamRecord, ServiceRecord};

/// What one correlation pass produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// No SDT: nothing was built.
    ServicesUnavailable,
    /// SDT but no PAT: channels carry service data only.
    ProgramsUnavailable(Vec<Channel>),
    Complete(Vec<Channel>),
}

impl PassOutcome {
    pub fn channels(&self) -> &[Channel] {
        match self {
            PassOutcome::ServicesUnavailable => &[],
            PassOutcome::ProgramsUnavailable(channels) | PassOutcome::Complete(channels) => {
                channels
            }
        }
    }

    pub fn into_channels(self) -> Vec<Channel> {
        match self {
            PassOutcome::ServicesUnavailable => Vec::new(),
            PassOutcome::ProgramsUnavailable(channels) | PassOutcome::Complete(channels) => {
                channels
            }
        }
    }
}

/// Build the channels of one PLP.
///
/// One channel is created per SDT entry. PAT entries without a matching
/// service are ignored. For every matched entry the PMT is looked up and its
/// streams merged into the channel; a PMT that never arrives leaves that
/// channel without stream bindings.
/// Every channel is tagged with `plp`.
///
/// Channels are not added to `multiplex`; the caller decides what to keep.
pub fn correlate<L>(
    multiplex: &Multiplex,
    plp: Option<u32>,
    services: Fetch<Vec<ServiceRecord>>,
    programs: Fetch<Vec<ProgramRecord>>,
    mut program_streams: L,
) -> Result<PassOutcome>
where
    L: FnMut(&ProgramRecord) -> Result<Fetch<ProgramStreamRecord>>,
{
    let Fetch::Available(services) = services else {
        return Ok(PassOutcome::ServicesUnavailable);
    };

    let mut channels: Vec<Channel> = Vec::with_capacity(services.len());
    for record in &services {
        // service ids are unique within one transport stream
        if channels.iter().any(|c| c.service_id == record.service_id) {
            debug!("Duplicate SDT entry for service {} ignored", record.service_id);
            continue;
        }
        let mut channel = multiplex.create_channel(record.service_id);
        channel.apply_service(record);
        channel.plp = plp;
        channels.push(channel);
    }

    let Fetch::Available(programs) = programs else {
        return Ok(PassOutcome::ProgramsUnavailable(channels));
    };

    for program in &programs {
        let Some(channel) = channels
            .iter_mut()
            .find(|c| c.service_id == program.service_id)
        else {
            debug!("PAT entry for unknown service {} ignored", program.service_id);
            continue;
        };
        channel.apply_program(program);
        match program_streams(program)? {
            Fetch::Available(record) => {
                channel.apply_program_streams(&record);
            }
            Fetch::Unavailable => {
                debug!("No PMT for service {}", program.service_id);
            }
        }
    }

    Ok(PassOutcome::Complete(channels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelType, StreamBinding};
    use crate::error::Error;

    fn service(service_id: u16, service_type: u8, name: &str) -> ServiceRecord {
        ServiceRecord {
            service_id,
            transport_stream_id: 0x10,
            scrambled: false,
            service_type,
            name: name.to_string(),
            provider_name: "Provider".to_string(),
        }
    }

    fn program(service_id: u16, program_map_pid: u16) -> ProgramRecord {
        ProgramRecord {
            service_id,
            program_map_pid,
        }
    }

    #[test]
    fn test_correlate_end_to_end() {
        let mux = Multiplex::new(506_000, 8);
        let outcome = correlate(
            &mux,
            Some(0),
            Fetch::Available(vec![service(1, 1, "Ch1")]),
            Fetch::Available(vec![program(1, 100)]),
            |p| {
                Ok(Fetch::Available(ProgramStreamRecord {
                    service_id: p.service_id,
                    program_map_pid: p.program_map_pid,
                    streams: vec![
                        StreamBinding {
                            stream_type: 0x1B,
                            pid: 200,
                        },
                        StreamBinding {
                            stream_type: 0x03,
                            pid: 201,
                        },
                    ],
                }))
            },
        )
        .unwrap();

        let PassOutcome::Complete(channels) = outcome else {
            panic!("expected a complete pass");
        };
        assert_eq!(channels.len(), 1);
        let ch = &channels[0];
        assert_eq!(ch.service_id, 1);
        assert_eq!(ch.name, "Ch1");
        assert_eq!(ch.channel_type, ChannelType::Tv);
        assert_eq!(ch.program_map_pid, 100);
        assert_eq!(ch.video_pid(), Some(200));
        assert_eq!(ch.audio_pid(), Some(201));
        assert_eq!(ch.plp, Some(0));
        assert_eq!(ch.frequency(), 506_000);
        assert!(mux.channels().is_empty());
    }

    #[test]
    fn test_correlate_services_unavailable() {
        let mux = Multiplex::new(506_000, 8);
        let outcome = correlate(
            &mux,
            None,
            Fetch::Unavailable,
            Fetch::Available(vec![program(1, 0x100)]),
            |_| panic!("PMT must not be requested without an SDT"),
        )
        .unwrap();
        assert_eq!(outcome, PassOutcome::ServicesUnavailable);
        assert!(outcome.channels().is_empty());
    }

    #[test]
    fn test_correlate_programs_unavailable_keeps_service_channels() {
        let mux = Multiplex::new(506_000, 8);
        let outcome = correlate(
            &mux,
            None,
            Fetch::Available(vec![service(1, 1, "A"), service(2, 2, "B")]),
            Fetch::Unavailable,
            |_| panic!("PMT must not be requested without a PAT"),
        )
        .unwrap();
        let PassOutcome::ProgramsUnavailable(channels) = outcome else {
            panic!("expected partial channels");
        };
        assert_eq!(channels.len(), 2);
        assert!(channels.iter().all(|c| c.program_map_pid == 0));
        assert!(channels.iter().all(|c| c.streams().is_empty()));
        assert_eq!(channels[1].channel_type, ChannelType::Radio);
        assert_eq!(channels[0].plp, None);
    }

    #[test]
    fn test_correlate_ignores_unmatched_programs() {
        let mux = Multiplex::new(506_000, 8);
        let mut looked_up = Vec::new();
        let outcome = correlate(
            &mux,
            Some(2),
            Fetch::Available(vec![service(1, 1, "A")]),
            Fetch::Available(vec![program(7, 0x700), program(1, 0x100)]),
            |p| {
                looked_up.push(p.service_id);
                Ok(Fetch::Unavailable)
            },
        )
        .unwrap();
        assert_eq!(looked_up, vec![1]);
        let channels = outcome.into_channels();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].program_map_pid, 0x100);
        assert!(channels[0].streams().is_empty());
    }

    #[test]
    fn test_correlate_service_without_pat_entry() {
        let mux = Multiplex::new(506_000, 8);
        let outcome = correlate(
            &mux,
            None,
            Fetch::Available(vec![service(1, 1, "A"), service(2, 1, "B")]),
            Fetch::Available(vec![program(2, 0x200)]),
            |_| Ok(Fetch::Unavailable),
        )
        .unwrap();
        let channels = outcome.into_channels();
        assert_eq!(channels[0].program_map_pid, 0);
        assert_eq!(channels[1].program_map_pid, 0x200);
    }

    #[test]
    fn test_correlate_lookup_error_propagates() {
        let mux = Multiplex::new(506_000, 8);
        let result = correlate(
            &mux,
            None,
            Fetch::Available(vec![service(1, 1, "A")]),
            Fetch::Available(vec![program(1, 0x100)]),
            |_| Err(Error::DeviceQueryFailed("demux gone".to_string())),
        );
        assert!(matches!(result, Err(Error::DeviceQueryFailed(_))));
    }

    #[test]
    fn test_correlate_duplicate_sdt_entry_kept_once() {
        let mux = Multiplex::new(506_000, 8);
        let outcome = correlate(
            &mux,
            None,
            Fetch::Available(vec![service(1, 1, "A"), service(1, 1, "A again")]),
            Fetch::Unavailable,
            |_| Ok(Fetch::Unavailable),
        )
        .unwrap();
        assert_eq!(outcome.channels().len(), 1);
        assert_eq!(outcome.channels()[0].name, "A");
    }

    #[test]
    fn test_correlate_keeps_sdt_order() {
        let mux = Multiplex::new(506_000, 8);
        let outcome = correlate(
            &mux,
            None,
            Fetch::Available(vec![service(3, 1, "C"), service(1, 1, "A"), service(2, 1, "B")]),
            Fetch::Available(vec![program(1, 0x100), program(2, 0x200), program(3, 0x300)]),
            |_| Ok(Fetch::Unavailable),
        )
        .unwrap();
        let ids: Vec<u16> = outcome.channels().iter().map(|c| c.service_id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }
}
