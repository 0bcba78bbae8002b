//! PAT, SDT and PMT section decoding.

use encoding_rs::{EUC_KR, Encoding, GBK, UTF_16BE};

use crate::channel::StreamBinding;
use crate::tables::{ProgramRecord, ProgramStreamRecord, ServiceRecord};

pub const PAT_PID: u16 = 0x0000;
pub const SDT_PID: u16 = 0x0011;

pub const TABLE_PAT: u8 = 0x00;
pub const TABLE_PMT: u8 = 0x02;
pub const TABLE_SDT_ACTUAL: u8 = 0x42;

const SERVICE_DESCRIPTOR: u8 = 0x48;

/// Fields shared by every long-form PSI/SI section header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    pub table_id: u8,
    /// transport_stream_id (PAT, SDT) or program_number (PMT).
    pub table_id_extension: u16,
    pub version: u8,
    pub section_number: u8,
    pub last_section_number: u8,
    /// Offset one past the last payload byte, before the CRC.
    pub payload_end: usize,
}

pub fn parse_section_header(data: &[u8]) -> Option<SectionHeader> {
    if data.len() < 12 {
        return None;
    }
    let section_length = (((data[1] & 0x0F) as usize) << 8) | data[2] as usize;
    let section_end = 3 + section_length;
    if section_length < 9 || data.len() < section_end {
        return None;
    }
    Some(SectionHeader {
        table_id: data[0],
        table_id_extension: u16::from_be_bytes([data[3], data[4]]),
        version: (data[5] >> 1) & 0x1F,
        section_number: data[6],
        last_section_number: data[7],
        payload_end: section_end - 4,
    })
}

fn pid_at(data: &[u8], pos: usize) -> u16 {
    ((data[pos] & 0x1F) as u16) << 8 | data[pos + 1] as u16
}

fn length_at(data: &[u8], pos: usize) -> usize {
    (((data[pos] & 0x0F) as usize) << 8) | data[pos + 1] as usize
}

/// Decode PAT sections. The network PID entry (program 0) and entries
/// pointing at PID 0 are dropped.
pub fn parse_pat_sections(sections: &[Vec<u8>]) -> Vec<ProgramRecord> {
    let mut programs = Vec::new();

    for data in sections {
        let Some(header) = parse_section_header(data) else {
            continue;
        };
        let mut pos = 8;
        while pos + 4 <= header.payload_end {
            let program_number = u16::from_be_bytes([data[pos], data[pos + 1]]);
            let pid = pid_at(data, pos + 2);
            if program_number != 0 && pid != 0 {
                programs.push(ProgramRecord {
                    service_id: program_number,
                    program_map_pid: pid,
                });
            }
            pos += 4;
        }
    }

    programs
}

/// Decode SDT sections into service records.
pub fn parse_sdt_sections(sections: &[Vec<u8>]) -> Vec<ServiceRecord> {
    let mut services = Vec::new();

    for data in sections {
        let Some(header) = parse_section_header(data) else {
            continue;
        };
        let entries_end = header.payload_end;
        // 8-byte header + original_network_id(2) + reserved(1)
        let mut pos = 11;

        while pos + 5 <= entries_end {
            let service_id = u16::from_be_bytes([data[pos], data[pos + 1]]);
            let scrambled = data[pos + 3] & 0x10 != 0;
            let desc_loop_length = length_at(data, pos + 3);
            pos += 5;

            if pos + desc_loop_length > entries_end {
                break;
            }
            let desc_end = pos + desc_loop_length;

            let mut record = ServiceRecord {
                service_id,
                transport_stream_id: header.table_id_extension,
                scrambled,
                service_type: 0,
                name: String::new(),
                provider_name: String::new(),
            };

            let mut dpos = pos;
            while dpos + 2 <= desc_end {
                let tag = data[dpos];
                let len = data[dpos + 1] as usize;
                if dpos + 2 + len > desc_end {
                    break;
                }
                if tag == SERVICE_DESCRIPTOR {
                    apply_service_descriptor(&mut record, &data[dpos + 2..dpos + 2 + len]);
                }
                dpos += 2 + len;
            }

            services.push(record);
            pos = desc_end;
        }
    }

    services
}

/// service_descriptor: service_type, provider name, service name.
fn apply_service_descriptor(record: &mut ServiceRecord, desc: &[u8]) {
    if desc.len() < 2 {
        return;
    }
    record.service_type = desc[0];
    let provider_len = desc[1] as usize;
    let Some(provider) = desc.get(2..2 + provider_len) else {
        return;
    };
    record.provider_name = decode_dvb_text(provider);

    let Some(&name_len) = desc.get(2 + provider_len) else {
        return;
    };
    let name_start = 3 + provider_len;
    if let Some(name) = desc.get(name_start..name_start + name_len as usize) {
        record.name = decode_dvb_text(name);
    }
}

/// Decode one PMT section into the program's elementary streams.
pub fn parse_pmt(data: &[u8], program_map_pid: u16) -> Result<ProgramStreamRecord, String> {
    if data.len() < 16 {
        return Err("PMT too short".to_string());
    }
    let header = parse_section_header(data).ok_or_else(|| "PMT truncated".to_string())?;
    if header.table_id != TABLE_PMT {
        return Err(format!("Not a PMT section: table_id=0x{:02X}", header.table_id));
    }

    let program_info_length = length_at(data, 10);
    let mut pos = 12 + program_info_length;
    let mut streams = Vec::new();

    while pos + 5 <= header.payload_end {
        let stream_type = data[pos];
        let pid = pid_at(data, pos + 1);
        let es_info_length = length_at(data, pos + 3);
        streams.push(StreamBinding { stream_type, pid });
        pos += 5 + es_info_length;
    }

    Ok(ProgramStreamRecord {
        service_id: header.table_id_extension,
        program_map_pid,
        streams,
    })
}

/// ISO/IEC 8859 part `part`. Parts 9 and 11 come from their Windows supersets.
fn iso_8859(part: u8) -> Option<&'static Encoding> {
    Some(match part {
        2 => encoding_rs::ISO_8859_2,
        3 => encoding_rs::ISO_8859_3,
        4 => encoding_rs::ISO_8859_4,
        5 => encoding_rs::ISO_8859_5,
        6 => encoding_rs::ISO_8859_6,
        7 => encoding_rs::ISO_8859_7,
        8 => encoding_rs::ISO_8859_8,
        9 => encoding_rs::WINDOWS_1254,
        10 => encoding_rs::ISO_8859_10,
        11 => encoding_rs::WINDOWS_874,
        13 => encoding_rs::ISO_8859_13,
        14 => encoding_rs::ISO_8859_14,
        15 => encoding_rs::ISO_8859_15,
        16 => encoding_rs::ISO_8859_16,
        _ => return None,
    })
}

fn decode_with(encoding: &'static Encoding, bytes: &[u8]) -> String {
    encoding.decode_without_bom_handling(bytes).0.into_owned()
}

/// C1 control bytes are dropped before decoding: the Windows supersets map
/// them to printable characters.
fn decode_single_byte(part: u8, bytes: &[u8]) -> String {
    let bytes: Vec<u8> = bytes
        .iter()
        .copied()
        .filter(|b| !(0x80..=0x9F).contains(b))
        .collect();
    match iso_8859(part) {
        Some(encoding) => decode_with(encoding, &bytes),
        // Latin-1, also standing in for the default table
        None => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Decode a DVB string (EN 300 468 annex A) and strip its control codes.
pub fn decode_dvb_text(data: &[u8]) -> String {
    let Some(&selector) = data.first() else {
        return String::new();
    };
    let mut text = match selector {
        // 0x01 is ISO 8859-5, 0x0B is ISO 8859-15
        0x01..=0x0B => decode_single_byte(selector + 4, &data[1..]),
        0x10 => match data.get(1..3) {
            Some(&[0x00, part]) => decode_single_byte(part, &data[3..]),
            _ => String::new(),
        },
        // ISO/IEC 10646 BMP and its Big5 subset
        0x11 | 0x14 => decode_with(UTF_16BE, &data[1..]),
        0x12 => decode_with(EUC_KR, &data[1..]),
        0x13 => decode_with(GBK, &data[1..]),
        0x15 => String::from_utf8_lossy(&data[1..]).into_owned(),
        // encoding_type_id we cannot resolve: keep what reads as UTF-8
        0x1F => String::from_utf8_lossy(data.get(2..).unwrap_or_default()).into_owned(),
        0x20..=0xFF => decode_single_byte(1, data),
        _ => String::from_utf8_lossy(&data[1..]).into_owned(),
    };
    // C0/C1 controls (emphasis on/off 0x86/0x87, CR/LF 0x8A) and their
    // private use area mappings
    text.retain(|c| {
        let cp = c as u32;
        !(cp <= 0x1F || cp == 0x7F || (0x80..=0x9F).contains(&cp) || (0xE080..=0xE09F).contains(&cp))
    });
    text
}
