//! Serializable channel list schema.
//!
//! Encoding is up to the caller; these types only fix the field layout.

use serde::{Deserialize, Serialize};

use crate::channel::{Channel, ChannelType, Multiplex, StreamBinding};

/// Sub-stream id stored for channels found without PLP selection.
pub const NO_SUB_STREAM: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMultiplex {
    pub frequency: u32,
    pub bandwidth: u32,
    #[serde(default)]
    pub channels: Vec<StoredChannel>,
}

/// Ids and PIDs are stored as signed 16-bit values; ids above 0x7FFF come out
/// negative and read back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredChannel {
    pub name: String,
    pub provider_name: String,
    pub service_id: i16,
    pub transport_stream_id: i16,
    pub program_map_pid: i16,
    pub scrambled: bool,
    pub sub_stream_id: i32,
    pub channel_type: ChannelType,
    #[serde(default)]
    pub stream_bindings: Vec<StoredStream>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredStream {
    pub stream_type: u8,
    pub pid: i16,
}

impl From<&Channel> for StoredChannel {
    fn from(channel: &Channel) -> Self {
        StoredChannel {
            name: channel.name.clone(),
            provider_name: channel.provider_name.clone(),
            service_id: channel.service_id as i16,
            transport_stream_id: channel.transport_stream_id as i16,
            program_map_pid: channel.program_map_pid as i16,
            scrambled: channel.scrambled,
            sub_stream_id: channel
                .plp
                .map_or(NO_SUB_STREAM, |plp| i32::try_from(plp).unwrap_or(i32::MAX)),
            channel_type: channel.channel_type,
            stream_bindings: channel
                .streams()
                .iter()
                .map(|s| StoredStream {
                    stream_type: s.stream_type,
                    pid: s.pid as i16,
                })
                .collect(),
        }
    }
}

impl From<&Multiplex> for StoredMultiplex {
    fn from(multiplex: &Multiplex) -> Self {
        StoredMultiplex {
            frequency: multiplex.frequency,
            bandwidth: multiplex.bandwidth,
            channels: multiplex.channels().iter().map(StoredChannel::from).collect(),
        }
    }
}

impl From<&StoredMultiplex> for Multiplex {
    fn from(stored: &StoredMultiplex) -> Self {
        let mut multiplex = Multiplex::new(stored.frequency, stored.bandwidth);
        for entry in &stored.channels {
            let mut channel = multiplex.create_channel(entry.service_id as u16);
            channel.name = entry.name.clone();
            channel.provider_name = entry.provider_name.clone();
            channel.transport_stream_id = entry.transport_stream_id as u16;
            channel.program_map_pid = entry.program_map_pid as u16;
            channel.scrambled = entry.scrambled;
            // any negative id means no PLP selection
            channel.plp = u32::try_from(entry.sub_stream_id).ok();
            channel.channel_type = entry.channel_type;
            for stream in &entry.stream_bindings {
                channel.upsert_stream(StreamBinding {
                    stream_type: stream.stream_type,
                    pid: stream.pid as u16,
                });
            }
            multiplex.push(channel);
        }
        multiplex
    }
}
