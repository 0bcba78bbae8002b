use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;

use log::debug;

use crate::device::{self, Control, Frontend, LockStatus, Support};
use crate::error::{Error, Result};

// DVB v5 API property command IDs
const DTV_TUNE: u32 = 1;
const DTV_CLEAR: u32 = 2;
const DTV_FREQUENCY: u32 = 3;
const DTV_MODULATION: u32 = 4;
const DTV_BANDWIDTH_HZ: u32 = 5;
const DTV_INVERSION: u32 = 6;
const DTV_DELIVERY_SYSTEM: u32 = 17;
const DTV_CODE_RATE_HP: u32 = 36;
const DTV_CODE_RATE_LP: u32 = 37;
const DTV_GUARD_INTERVAL: u32 = 38;
const DTV_TRANSMISSION_MODE: u32 = 39;
const DTV_HIERARCHY: u32 = 40;
const DTV_STREAM_ID: u32 = 42;

const SYS_DVBT2: u32 = 16;

// "let the demodulator find out" values
const QAM_AUTO: u32 = 6;
const FEC_AUTO: u32 = 9;
const INVERSION_AUTO: u32 = 2;
const TRANSMISSION_MODE_AUTO: u32 = 2;
const GUARD_INTERVAL_AUTO: u32 = 4;
const HIERARCHY_NONE: u32 = 0;
const NO_STREAM_ID_FILTER: u32 = !0;

// Frontend status flags
const FE_HAS_SIGNAL: u32 = 0x01;
const FE_HAS_LOCK: u32 = 0x10;

// Frontend capability flags
const FE_CAN_MULTISTREAM: u32 = 0x0400_0000;

// Kernel struct: dtv_property (76 bytes, packed)
//   cmd: u32, reserved: [u32; 3], u: union(56 bytes), result: i32
#[repr(C, packed)]
struct DtvProperty {
    cmd: u32,
    reserved: [u32; 3],
    data: u32,
    _padding: [u8; 52],
    result: i32,
}

// Kernel struct: dtv_properties (16 bytes on 64-bit)
#[repr(C)]
struct DtvProperties {
    num: u32,
    props: *mut DtvProperty,
}

// Kernel struct: dvb_frontend_info (168 bytes)
#[allow(dead_code)]
#[repr(C)]
struct DvbFrontendInfo {
    name: [u8; 128],
    fe_type: u32,
    frequency_min: u32,
    frequency_max: u32,
    frequency_stepsize: u32,
    frequency_tolerance: u32,
    symbol_rate_min: u32,
    symbol_rate_max: u32,
    symbol_rate_tolerance: u32,
    notifier_delay: u32,
    caps: u32,
}

nix::ioctl_read!(fe_get_info, b'o', 61, DvbFrontendInfo);
nix::ioctl_read!(fe_read_status, b'o', 69, u32);
nix::ioctl_read!(fe_read_signal_strength, b'o', 71, u16);
nix::ioctl_read!(fe_read_snr, b'o', 72, u16);
nix::ioctl_write_ptr!(fe_set_property, b'o', 82, DtvProperties);

impl DtvProperty {
    fn new(cmd: u32, data: u32) -> Self {
        DtvProperty {
            cmd,
            reserved: [0; 3],
            data,
            _padding: [0; 52],
            result: 0,
        }
    }
}

/// Build the DVB-T2 property list for one tune request. Frequency is in kHz,
/// bandwidth in MHz; the kernel wants both in Hz.
fn tune_properties(frequency: u32, bandwidth: u32, stream_id: Option<u32>) -> Vec<DtvProperty> {
    vec![
        DtvProperty::new(DTV_DELIVERY_SYSTEM, SYS_DVBT2),
        DtvProperty::new(DTV_FREQUENCY, frequency.saturating_mul(1_000)),
        DtvProperty::new(DTV_BANDWIDTH_HZ, bandwidth.saturating_mul(1_000_000)),
        DtvProperty::new(DTV_MODULATION, QAM_AUTO),
        DtvProperty::new(DTV_CODE_RATE_HP, FEC_AUTO),
        DtvProperty::new(DTV_CODE_RATE_LP, FEC_AUTO),
        DtvProperty::new(DTV_INVERSION, INVERSION_AUTO),
        DtvProperty::new(DTV_TRANSMISSION_MODE, TRANSMISSION_MODE_AUTO),
        DtvProperty::new(DTV_GUARD_INTERVAL, GUARD_INTERVAL_AUTO),
        DtvProperty::new(DTV_HIERARCHY, HIERARCHY_NONE),
        DtvProperty::new(DTV_STREAM_ID, stream_id.unwrap_or(NO_STREAM_ID_FILTER)),
        DtvProperty::new(DTV_TUNE, 0),
    ]
}

/// Scale a 16-bit driver statistic to 0..=100.
fn percent(raw: u16) -> i32 {
    (raw as i32 * 100) / u16::MAX as i32
}

/// DVB-T2 frontend behind `/dev/dvb/adapterN/frontend0`.
///
/// The selected PLP is sent as `DTV_STREAM_ID` with the next tune, since the
/// kernel applies stream selection only as part of a tune request.
pub struct DvbFrontend {
    fe_file: File,
    stream_id: Option<u32>,
}

impl DvbFrontend {
    pub fn open(adapter: u32) -> Result<Self> {
        let path = format!("/dev/dvb/adapter{adapter}/frontend0");
        let fe_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| Error::Open { path, source })?;
        Ok(DvbFrontend {
            fe_file,
            stream_id: None,
        })
    }

    fn info(&self) -> Result<DvbFrontendInfo> {
        let fd = self.fe_file.as_raw_fd();
        // SAFETY: all-zero bytes are a valid DvbFrontendInfo
        let mut info: DvbFrontendInfo = unsafe { std::mem::zeroed() };
        unsafe {
            fe_get_info(fd, &mut info)
                .map_err(|e| Error::DeviceQueryFailed(format!("FE_GET_INFO failed: {e}")))?;
        }
        Ok(info)
    }

    /// Driver-reported frontend name.
    pub fn name(&self) -> Result<String> {
        let info = self.info()?;
        let len = info.name.iter().position(|&b| b == 0).unwrap_or(info.name.len());
        Ok(String::from_utf8_lossy(&info.name[..len]).into_owned())
    }

    fn set_properties(&self, props: &mut [DtvProperty], what: &str) -> Result<()> {
        let mut dtv_props = DtvProperties {
            num: props.len() as u32,
            props: props.as_mut_ptr(),
        };
        unsafe {
            fe_set_property(self.fe_file.as_raw_fd(), &mut dtv_props)
                .map_err(|e| Error::DeviceQueryFailed(format!("{what} failed: {e}")))?;
        }
        Ok(())
    }
}

impl Frontend for DvbFrontend {
    fn tune(&mut self, frequency: u32, bandwidth: u32) -> Result<()> {
        device::validate_tune(frequency, bandwidth)?;

        self.set_properties(&mut [DtvProperty::new(DTV_CLEAR, 0)], "DTV_CLEAR")?;

        let mut props = tune_properties(frequency, bandwidth, self.stream_id);
        self.set_properties(&mut props, "FE_SET_PROPERTY")?;
        debug!(
            "Tune request sent: {frequency} kHz, {bandwidth} MHz, stream_id={:?}",
            self.stream_id
        );
        Ok(())
    }

    fn lock_status(&mut self) -> Result<LockStatus> {
        let fd = self.fe_file.as_raw_fd();
        let mut status: u32 = 0;
        unsafe {
            fe_read_status(fd, &mut status)
                .map_err(|e| Error::DeviceQueryFailed(format!("FE_READ_STATUS failed: {e}")))?;
        }

        // Not every driver implements the legacy statistics calls
        let mut strength: u16 = 0;
        let mut snr: u16 = 0;
        unsafe {
            if fe_read_signal_strength(fd, &mut strength).is_err() {
                strength = 0;
            }
            if fe_read_snr(fd, &mut snr).is_err() {
                snr = 0;
            }
        }

        Ok(LockStatus {
            signal_strength: percent(strength),
            signal_quality: percent(snr),
            signal_present: status & FE_HAS_SIGNAL != 0,
            signal_locked: status & FE_HAS_LOCK != 0,
        })
    }

    fn query_support(&mut self, control: Control) -> Result<Support> {
        match control {
            Control::PlpNumber => {
                let info = self.info()?;
                // The v5 API can select a stream but has no PLP count to read back
                Ok(Support {
                    get: false,
                    set: info.caps & FE_CAN_MULTISTREAM != 0,
                })
            }
        }
    }

    fn get_control(&mut self, control: Control) -> Result<i32> {
        Err(Error::Unsupported(control))
    }

    fn set_control(&mut self, control: Control, value: i32) -> Result<()> {
        match control {
            Control::PlpNumber => {
                self.stream_id = u32::try_from(value).ok();
                Ok(())
            }
        }
    }
}
