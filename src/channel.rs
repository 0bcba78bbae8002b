//! Multiplex and channel model built up by a scan.

use serde::{Deserialize, Serialize};

use crate::tables::{ProgramRecord, ProgramStreamRecord, ServiceRecord};

/// H.264 video stream type.
pub const STREAM_TYPE_H264: u8 = 0x1B;
/// MPEG-1 audio stream type.
pub const STREAM_TYPE_MPEG_AUDIO: u8 = 0x03;
/// Private PES data, used for teletext.
pub const STREAM_TYPE_TELETEXT: u8 = 0x06;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelType {
    #[default]
    Unknown,
    #[serde(rename = "TV")]
    Tv,
    Radio,
}

impl ChannelType {
    /// Map an SDT service_type code to a channel type.
    pub fn from_service_type(code: u8) -> Self {
        match code {
            1 | 22 => ChannelType::Tv,
            2 => ChannelType::Radio,
            _ => ChannelType::Unknown,
        }
    }
}

/// One elementary stream of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamBinding {
    pub stream_type: u8,
    pub pid: u16,
}

/// Frequency (kHz) and bandwidth (MHz) of a tuned carrier.
///
/// Channels carry a copy of their multiplex's carrier instead of a pointer to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Carrier {
    pub frequency: u32,
    pub bandwidth: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub service_id: u16,
    pub transport_stream_id: u16,
    pub program_map_pid: u16,
    pub scrambled: bool,
    pub channel_type: ChannelType,
    /// PLP the channel was found on, `None` when the device cannot select PLPs.
    pub plp: Option<u32>,
    pub name: String,
    pub provider_name: String,
    streams: Vec<StreamBinding>,
    carrier: Carrier,
}

impl Channel {
    fn new(carrier: Carrier, service_id: u16) -> Self {
        Channel {
            service_id,
            transport_stream_id: 0,
            program_map_pid: 0,
            scrambled: false,
            channel_type: ChannelType::Unknown,
            plp: None,
            name: String::new(),
            provider_name: String::new(),
            streams: Vec::new(),
            carrier,
        }
    }

    pub fn carrier(&self) -> Carrier {
        self.carrier
    }

    pub fn frequency(&self) -> u32 {
        self.carrier.frequency
    }

    pub fn bandwidth(&self) -> u32 {
        self.carrier.bandwidth
    }

    /// Stream bindings in first-seen order, at most one per stream type.
    pub fn streams(&self) -> &[StreamBinding] {
        &self.streams
    }

    pub fn stream(&self, stream_type: u8) -> Option<&StreamBinding> {
        self.streams.iter().find(|s| s.stream_type == stream_type)
    }

    pub fn video_pid(&self) -> Option<u16> {
        self.stream(STREAM_TYPE_H264).map(|s| s.pid)
    }

    pub fn audio_pid(&self) -> Option<u16> {
        self.stream(STREAM_TYPE_MPEG_AUDIO).map(|s| s.pid)
    }

    pub fn teletext_pid(&self) -> Option<u16> {
        self.stream(STREAM_TYPE_TELETEXT).map(|s| s.pid)
    }

    /// Insert `binding`, replacing the PID of an existing binding of the same type.
    pub fn upsert_stream(&mut self, binding: StreamBinding) {
        match self
            .streams
            .iter_mut()
            .find(|s| s.stream_type == binding.stream_type)
        {
            Some(existing) => existing.pid = binding.pid,
            None => self.streams.push(binding),
        }
    }

    /// Copy SDT fields onto the channel. Returns false, leaving the channel
    /// untouched, when the record belongs to another service.
    pub fn apply_service(&mut self, record: &ServiceRecord) -> bool {
        if record.service_id != self.service_id {
            return false;
        }
        self.transport_stream_id = record.transport_stream_id;
        self.scrambled = record.scrambled;
        self.name = record.name.clone();
        self.provider_name = record.provider_name.clone();
        self.channel_type = ChannelType::from_service_type(record.service_type);
        true
    }

    /// Set the program map PID from a PAT entry of the same service.
    pub fn apply_program(&mut self, record: &ProgramRecord) -> bool {
        if record.service_id != self.service_id {
            return false;
        }
        self.program_map_pid = record.program_map_pid;
        true
    }

    /// Merge the elementary streams of a PMT of the same service.
    pub fn apply_program_streams(&mut self, record: &ProgramStreamRecord) -> bool {
        if record.service_id != self.service_id {
            return false;
        }
        self.program_map_pid = record.program_map_pid;
        for binding in &record.streams {
            self.upsert_stream(*binding);
        }
        true
    }
}

/// All channels found on one carrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Multiplex {
    pub frequency: u32,
    pub bandwidth: u32,
    channels: Vec<Channel>,
}

impl Multiplex {
    pub fn new(frequency: u32, bandwidth: u32) -> Self {
        Multiplex {
            frequency,
            bandwidth,
            channels: Vec::new(),
        }
    }

    pub fn carrier(&self) -> Carrier {
        Carrier {
            frequency: self.frequency,
            bandwidth: self.bandwidth,
        }
    }

    /// Create a detached channel belonging to this multiplex. It is only listed
    /// once passed to [`Multiplex::push`].
    pub fn create_channel(&self, service_id: u16) -> Channel {
        Channel::new(self.carrier(), service_id)
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn push(&mut self, channel: Channel) {
        self.channels.push(channel);
    }

    pub fn extend(&mut self, channels: impl IntoIterator<Item = Channel>) {
        self.channels.extend(channels);
    }

    pub fn into_channels(self) -> Vec<Channel> {
        self.channels
    }
}
