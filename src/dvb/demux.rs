use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsFd, AsRawFd};

use log::{debug, warn};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use crate::dvb::psi::{self, PAT_PID, SDT_PID, TABLE_PAT, TABLE_PMT, TABLE_SDT_ACTUAL};
use crate::error::{Error, Result};
use crate::tables::{ProgramRecord, ProgramStreamRecord, ServiceRecord, SignalTables};

const DMX_FILTER_SIZE: usize = 16;
const DMX_CHECK_CRC: u32 = 1;
const DMX_IMMEDIATE_START: u32 = 4;

#[repr(C)]
struct DmxFilter {
    filter: [u8; DMX_FILTER_SIZE],
    mask: [u8; DMX_FILTER_SIZE],
    mode: [u8; DMX_FILTER_SIZE],
}

#[repr(C)]
struct DmxSctFilterParams {
    pid: u16,
    filter: DmxFilter,
    timeout: u32,
    flags: u32,
}

nix::ioctl_write_ptr!(dmx_set_filter, b'o', 43, DmxSctFilterParams);

/// Kernel filter matching `table_id` and, when given, the table id
/// extension. Filter byte 0 is the table id; bytes 1 and 2 match section
/// bytes 3 and 4 since the kernel skips the length field.
fn filter_params(pid: u16, table_id: u8, extension: Option<u16>) -> DmxSctFilterParams {
    let mut filter = DmxFilter {
        filter: [0u8; DMX_FILTER_SIZE],
        mask: [0u8; DMX_FILTER_SIZE],
        mode: [0u8; DMX_FILTER_SIZE],
    };
    filter.filter[0] = table_id;
    filter.mask[0] = 0xFF;
    if let Some(ext) = extension {
        let [hi, lo] = ext.to_be_bytes();
        filter.filter[1] = hi;
        filter.filter[2] = lo;
        filter.mask[1] = 0xFF;
        filter.mask[2] = 0xFF;
    }
    DmxSctFilterParams {
        pid,
        filter,
        timeout: 0,
        flags: DMX_CHECK_CRC | DMX_IMMEDIATE_START,
    }
}

/// Sections of one table collected until `0..=last_section_number` are all
/// present. A version change starts over.
#[derive(Debug, Default)]
struct SectionSet {
    table_id: u8,
    extension: Option<u16>,
    version: Option<u8>,
    last_section_number: u8,
    sections: BTreeMap<u8, Vec<u8>>,
}

impl SectionSet {
    fn new(table_id: u8, extension: Option<u16>) -> Self {
        SectionSet {
            table_id,
            extension,
            ..Default::default()
        }
    }

    fn insert(&mut self, data: &[u8]) {
        let Some(header) = psi::parse_section_header(data) else {
            return;
        };
        if header.table_id != self.table_id {
            return;
        }
        if self.extension.is_some_and(|ext| ext != header.table_id_extension) {
            return;
        }
        if self.version != Some(header.version) {
            if self.version.is_some() {
                debug!(
                    "Table 0x{:02X} changed to version {}, restarting",
                    self.table_id, header.version
                );
            }
            self.sections.clear();
            self.version = Some(header.version);
        }
        self.last_section_number = header.last_section_number;
        self.sections
            .entry(header.section_number)
            .or_insert_with(|| data.to_vec());
    }

    fn is_complete(&self) -> bool {
        self.version.is_some()
            && (0..=self.last_section_number).all(|n| self.sections.contains_key(&n))
    }

    fn into_sections(self) -> Vec<Vec<u8>> {
        self.sections.into_values().collect()
    }
}

/// One open demux section filter.
struct SectionFilter {
    file: File,
    set: SectionSet,
}

impl SectionFilter {
    fn open(adapter: u32, pid: u16, table_id: u8, extension: Option<u16>) -> Result<Self> {
        let path = format!("/dev/dvb/adapter{adapter}/demux0");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
            .map_err(|source| Error::Open { path, source })?;

        let params = filter_params(pid, table_id, extension);
        unsafe {
            dmx_set_filter(file.as_raw_fd(), &params)
                .map_err(|e| Error::DeviceQueryFailed(format!("DMX_SET_FILTER failed: {e}")))?;
        }
        debug!("Section filter on PID 0x{pid:04X} table 0x{table_id:02X} started");

        Ok(SectionFilter {
            file,
            set: SectionSet::new(table_id, extension),
        })
    }

    /// Drain whatever the kernel has buffered without blocking.
    fn drain(&mut self) -> Result<()> {
        let mut buf = [0u8; 4096];
        loop {
            let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
            let ready = poll(&mut fds, PollTimeout::ZERO)
                .map_err(|e| Error::DeviceQueryFailed(format!("poll failed: {e}")))?;
            if ready == 0 {
                return Ok(());
            }

            match self.file.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => self.set.insert(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.raw_os_error() == Some(libc::EOVERFLOW) => {
                    warn!("Demux buffer overflow, sections dropped");
                }
                Err(e) => {
                    return Err(Error::DeviceQueryFailed(format!("demux read failed: {e}")));
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FilterKey {
    pid: u16,
    table_id: u8,
    extension: Option<u16>,
}

/// SDT, PAT and PMT access through `/dev/dvb/adapterN/demux0`.
///
/// Each table gets its own section filter, opened on the first query and
/// closed once the table is complete or on `reset`.
pub struct DemuxTables {
    adapter: u32,
    filters: HashMap<FilterKey, SectionFilter>,
}

impl DemuxTables {
    pub fn new(adapter: u32) -> Self {
        DemuxTables {
            adapter,
            filters: HashMap::new(),
        }
    }

    fn collect(&mut self, key: FilterKey) -> Result<Option<Vec<Vec<u8>>>> {
        let filter = match self.filters.entry(key) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => e.insert(SectionFilter::open(
                self.adapter,
                key.pid,
                key.table_id,
                key.extension,
            )?),
        };
        filter.drain()?;
        if !filter.set.is_complete() {
            return Ok(None);
        }
        Ok(self.filters.remove(&key).map(|f| f.set.into_sections()))
    }
}

impl SignalTables for DemuxTables {
    fn reset(&mut self) {
        self.filters.clear();
    }

    fn service_table(&mut self) -> Result<Option<Vec<ServiceRecord>>> {
        let key = FilterKey {
            pid: SDT_PID,
            table_id: TABLE_SDT_ACTUAL,
            extension: None,
        };
        Ok(self.collect(key)?.map(|s| psi::parse_sdt_sections(&s)))
    }

    fn program_table(&mut self) -> Result<Option<Vec<ProgramRecord>>> {
        let key = FilterKey {
            pid: PAT_PID,
            table_id: TABLE_PAT,
            extension: None,
        };
        Ok(self.collect(key)?.map(|s| psi::parse_pat_sections(&s)))
    }

    fn program_streams(
        &mut self,
        service_id: u16,
        program_map_pid: u16,
    ) -> Result<Option<ProgramStreamRecord>> {
        let key = FilterKey {
            pid: program_map_pid,
            table_id: TABLE_PMT,
            extension: Some(service_id),
        };
        let Some(sections) = self.collect(key)? else {
            return Ok(None);
        };
        let Some(section) = sections.first() else {
            return Ok(None);
        };
        match psi::parse_pmt(section, program_map_pid) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("PMT for service {service_id} on PID 0x{program_map_pid:04X}: {e}");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal long-form section: header, no payload, dummy CRC.
    fn section(table_id: u8, extension: u16, version: u8, number: u8, last: u8) -> Vec<u8> {
        let [hi, lo] = extension.to_be_bytes();
        vec![
            table_id,
            0xB0,
            9,
            hi,
            lo,
            0xC1 | (version << 1),
            number,
            last,
            0,
            0,
            0,
            0,
        ]
    }

    #[test]
    fn test_filter_params_table_only() {
        let params = filter_params(SDT_PID, TABLE_SDT_ACTUAL, None);
        assert_eq!(params.pid, 0x11);
        assert_eq!(params.filter.filter[0], 0x42);
        assert_eq!(params.filter.mask[0], 0xFF);
        assert_eq!(params.filter.mask[1], 0);
        assert_eq!(params.flags, DMX_CHECK_CRC | DMX_IMMEDIATE_START);
    }

    #[test]
    fn test_filter_params_with_program_number() {
        let params = filter_params(0x100, TABLE_PMT, Some(0x1234));
        assert_eq!(params.filter.filter[..3], [0x02, 0x12, 0x34]);
        assert_eq!(params.filter.mask[..3], [0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_section_set_complete_out_of_order() {
        let mut set = SectionSet::new(TABLE_SDT_ACTUAL, None);
        assert!(!set.is_complete());
        set.insert(&section(0x42, 1, 0, 1, 1));
        assert!(!set.is_complete());
        set.insert(&section(0x42, 1, 0, 0, 1));
        assert!(set.is_complete());
        let sections = set.into_sections();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0][6], 0);
    }

    #[test]
    fn test_section_set_ignores_other_tables() {
        let mut set = SectionSet::new(TABLE_PMT, Some(5));
        set.insert(&section(0x42, 5, 0, 0, 0));
        set.insert(&section(0x02, 6, 0, 0, 0));
        set.insert(&[0x02, 0x00]);
        assert!(!set.is_complete());
        set.insert(&section(0x02, 5, 0, 0, 0));
        assert!(set.is_complete());
    }

    #[test]
    fn test_section_set_version_change_restarts() {
        let mut set = SectionSet::new(TABLE_PAT, None);
        set.insert(&section(0x00, 1, 3, 0, 1));
        set.insert(&section(0x00, 1, 4, 1, 1));
        assert!(!set.is_complete());
        set.insert(&section(0x00, 1, 4, 0, 1));
        assert!(set.is_complete());
    }

    #[test]
    fn test_open_missing_demux() {
        let mut tables = DemuxTables::new(999);
        assert!(matches!(tables.service_table(), Err(Error::Open { .. })));
    }
}
