//! PSI system section builders (PAT, PMT, SIT, NULL).
//!
//! Each builder produces the complete table byte array carried by a system
//! stream: `pointer_field`, the section itself, CRC-32, and 0xFF padding up
//! to a whole number of 184-byte transport packet payloads.

use bitio::mpeg2_crc32;

use crate::descriptor::Descriptor;
use crate::packet::{TP_HEADER_SIZE, TP_SIZE};
use crate::stream_type::StreamCodingType;
use crate::{Result, TsError};

/// Table bytes are padded to fill whole TP payloads of this size.
const TP_PAYLOAD_SIZE: usize = TP_SIZE - TP_HEADER_SIZE;

/// Rounds a section (plus pointer field) up to whole TP payloads.
fn table_data_length(section_length: usize) -> usize {
    (section_length + 4).div_ceil(TP_PAYLOAD_SIZE) * TP_PAYLOAD_SIZE
}

/// Computes the CRC over `[table_id .. CRC_32)` and appends it, then pads
/// with 0xFF to `total_len`. The table must hold the pointer field plus the
/// whole section up to (excluding) the CRC field.
fn finish_section(mut table: Vec<u8>, total_len: usize) -> Vec<u8> {
    // Byte 0 is the pointer_field; CRC covers table_id up to the CRC field.
    let crc = mpeg2_crc32(&table[1..]);
    table.extend_from_slice(&crc.to_be_bytes());
    table.resize(total_len, 0xFF);
    table
}

/// One PAT program entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatProgram {
    /// `program_number` (0 declares a `network_PID`).
    pub program_number: u16,
    /// `program_map_PID` / `network_PID`.
    pub pid: u16,
}

/// Program Association Table parameters.
#[derive(Debug, Clone, Default)]
pub struct PatParams {
    /// `transport_stream_id`.
    pub transport_stream_id: u16,
    /// 5-bit `version_number`.
    pub version: u8,
    /// `current_next_indicator`.
    pub current_next: bool,
    /// Program entries.
    pub programs: Vec<PatProgram>,
}

impl PatParams {
    /// `section_length` field value: 9 + 4·N.
    pub fn section_length(&self) -> usize {
        9 + 4 * self.programs.len()
    }

    /// Builds the full table byte array.
    pub fn build(&self) -> Result<Vec<u8>> {
        let section_length = self.section_length();
        if section_length > 1021 {
            return Err(TsError::SectionTooLong {
                table: "PAT",
                length: section_length,
                max: 1021,
            });
        }
        let total_len = table_data_length(section_length);

        let mut table = Vec::with_capacity(total_len);
        /* [u8 pointer_field] // 0x00 = start directly */
        table.push(0x00);
        /* [u8 table_id] // 0x00 = program_association_section */
        table.push(0x00);
        /* [b1 section_syntax_indicator] [b1 '0'] [v2 reserved]
        [u12 section_length] */
        table.push(((section_length >> 8) as u8 & 0x0F) | 0xB0);
        table.push(section_length as u8);
        /* [u16 transport_stream_id] */
        table.extend_from_slice(&self.transport_stream_id.to_be_bytes());
        /* [v2 reserved] [u5 version_number] [b1 current_next_indicator] */
        table.push(0xC0 | ((self.version & 0x1F) << 1) | self.current_next as u8);
        /* [u8 section_number] [u8 last_section_number] */
        table.push(0x00);
        table.push(0x00);

        for program in &self.programs {
            /* [u16 program_number] */
            table.extend_from_slice(&program.program_number.to_be_bytes());
            /* [v3 reserved] [u13 network_PID/program_map_PID] */
            table.push(((program.pid >> 8) as u8) | 0xE0);
            table.push(program.pid as u8);
        }

        Ok(finish_section(table, total_len))
    }
}

/// One PMT program element.
#[derive(Debug, Clone)]
pub struct PmtElement {
    /// `stream_type`.
    pub stream_type: StreamCodingType,
    /// `elementary_PID`.
    pub pid: u16,
    /// `ES_info` descriptors.
    pub descriptors: Vec<Descriptor>,
}

/// Program Map Table parameters.
#[derive(Debug, Clone, Default)]
pub struct PmtParams {
    /// `program_number`.
    pub program_number: u16,
    /// `PCR_PID`.
    pub pcr_pid: u16,
    /// Program-level descriptors.
    pub descriptors: Vec<Descriptor>,
    /// Program elements, one per elementary stream.
    pub elements: Vec<PmtElement>,
}

impl PmtParams {
    fn program_info_length(&self) -> usize {
        self.descriptors.iter().map(Descriptor::size).sum()
    }

    /// `section_length` field value.
    pub fn section_length(&self) -> usize {
        13 + self.program_info_length()
            + self
                .elements
                .iter()
                .map(|elem| 5 + elem.descriptors.iter().map(Descriptor::size).sum::<usize>())
                .sum::<usize>()
    }

    /// Builds the full table byte array.
    pub fn build(&self) -> Result<Vec<u8>> {
        let section_length = self.section_length();
        if section_length > 1021 {
            return Err(TsError::SectionTooLong {
                table: "PMT",
                length: section_length,
                max: 1021,
            });
        }
        let program_info_length = self.program_info_length();
        if program_info_length > 0xFFF {
            return Err(TsError::InfoLengthTooLong {
                field: "program_info_length",
                length: program_info_length,
            });
        }
        let total_len = table_data_length(section_length);

        let mut table = Vec::with_capacity(total_len);
        /* [u8 pointer_field] */
        table.push(0x00);
        /* [u8 table_id] // 0x02 = TS_program_map_section */
        table.push(0x02);
        /* [b1 section_syntax_indicator] [b1 '0'] [v2 reserved]
        [u12 section_length] */
        table.push(((section_length >> 8) as u8 & 0x0F) | 0xB0);
        table.push(section_length as u8);
        /* [u16 program_number] */
        table.extend_from_slice(&self.program_number.to_be_bytes());
        /* [v2 reserved] [u5 version_number] [b1 current_next_indicator] */
        table.push(0xC1);
        /* [u8 section_number] [u8 last_section_number] */
        table.push(0x00);
        table.push(0x00);
        /* [v3 reserved] [u13 PCR_PID] */
        table.push(((self.pcr_pid >> 8) as u8) | 0xE0);
        table.push(self.pcr_pid as u8);
        /* [v4 reserved] [u12 program_info_length] */
        table.push(((program_info_length >> 8) as u8) | 0xF0);
        table.push(program_info_length as u8);

        for desc in &self.descriptors {
            desc.encode(&mut table)?;
        }

        for elem in &self.elements {
            let es_info_length: usize = elem.descriptors.iter().map(Descriptor::size).sum();
            if es_info_length > 0x3FF {
                return Err(TsError::InfoLengthTooLong {
                    field: "ES_info_length",
                    length: es_info_length,
                });
            }
            /* [u8 stream_type] */
            table.push(elem.stream_type as u8);
            /* [v3 reserved] [u13 elementary_PID] */
            table.push(((elem.pid >> 8) as u8) | 0xE0);
            table.push(elem.pid as u8);
            /* [v4 reserved] [u12 ES_info_length] */
            table.push(((es_info_length >> 8) as u8) | 0xF0);
            table.push(es_info_length as u8);
            for desc in &elem.descriptors {
                desc.encode(&mut table)?;
            }
        }

        Ok(finish_section(table, total_len))
    }
}

/// One SIT service entry.
#[derive(Debug, Clone, Default)]
pub struct SitService {
    /// `service_id` (the program number).
    pub service_id: u16,
    /// 3-bit `running_status` (0 = undefined).
    pub running_status: u8,
    /// Service-loop descriptors.
    pub descriptors: Vec<Descriptor>,
}

/// Selection Information Table parameters.
#[derive(Debug, Clone, Default)]
pub struct SitParams {
    /// Transmission-info-loop descriptors.
    pub descriptors: Vec<Descriptor>,
    /// Service entries.
    pub services: Vec<SitService>,
}

impl SitParams {
    fn transmission_info_loop_length(&self) -> usize {
        self.descriptors.iter().map(Descriptor::size).sum()
    }

    /// `section_length` field value.
    pub fn section_length(&self) -> usize {
        11 + self.transmission_info_loop_length()
            + self
                .services
                .iter()
                .map(|svc| 4 + svc.descriptors.iter().map(Descriptor::size).sum::<usize>())
                .sum::<usize>()
    }

    /// Builds the full table byte array.
    pub fn build(&self) -> Result<Vec<u8>> {
        let section_length = self.section_length();
        if section_length > 4093 {
            return Err(TsError::SectionTooLong {
                table: "SIT",
                length: section_length,
                max: 4093,
            });
        }
        let total_len = table_data_length(section_length);

        let mut table = Vec::with_capacity(total_len);
        /* [u8 pointer_field] */
        table.push(0x00);
        /* [u8 table_id] // 0x7F = selection_information_section */
        table.push(0x7F);
        /* [b1 section_syntax_indicator] [b1 private_indicator '1']
        [v2 reserved] [u12 section_length] */
        table.push(((section_length >> 8) as u8 & 0x0F) | 0xF0);
        table.push(section_length as u8);
        /* [v16 DVB_reserved_future_use] */
        table.push(0xFF);
        table.push(0xFF);
        /* [v2 ISO_reserved] [u5 version_number] [b1 current_next_indicator] */
        table.push(0xC1);
        /* [u8 section_number] [u8 last_section_number] */
        table.push(0x00);
        table.push(0x00);

        let info_loop_length = self.transmission_info_loop_length();
        /* [v4 dvb_reserved] [u12 transmission_info_loop_length] */
        table.push(((info_loop_length >> 8) as u8) | 0xF0);
        table.push(info_loop_length as u8);
        for desc in &self.descriptors {
            desc.encode(&mut table)?;
        }

        for service in &self.services {
            /* [u16 service_id] */
            table.extend_from_slice(&service.service_id.to_be_bytes());
            let loop_length: usize = service.descriptors.iter().map(Descriptor::size).sum();
            /* [v1 dvb_reserved] [u3 running_status] [u12 service_loop_length] */
            table.push(
                0x80 | ((service.running_status & 0x07) << 4) | ((loop_length >> 8) as u8 & 0x0F),
            );
            table.push(loop_length as u8);
            for desc in &service.descriptors {
                desc.encode(&mut table)?;
            }
        }

        Ok(finish_section(table, total_len))
    }
}

/// Builds the NULL stream pseudo-table: one TP payload of 0xFF.
pub fn build_null_table() -> Vec<u8> {
    vec![0xFF; TP_PAYLOAD_SIZE]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{PartialTsDescriptor, RegistrationDescriptor, REG_FMT_ID_HDMV};

    fn crc_of_section(table: &[u8], section_length: usize) -> bool {
        // CRC over [table_id .. CRC_32] inclusive must be zero.
        mpeg2_crc32(&table[1..1 + 3 + section_length]) == 0
    }

    fn bdav_pat() -> PatParams {
        PatParams {
            transport_stream_id: 0x0000,
            version: 0,
            current_next: true,
            programs: vec![
                PatProgram {
                    program_number: 0x0000,
                    pid: 0x001F,
                },
                PatProgram {
                    program_number: 0x0001,
                    pid: 0x0100,
                },
            ],
        }
    }

    #[test]
    fn test_pat_layout_and_crc() {
        let table = bdav_pat().build().unwrap();
        assert_eq!(table.len(), 184);
        assert_eq!(table[0], 0x00); // pointer_field
        assert_eq!(table[1], 0x00); // table_id
        let section_length = (((table[2] & 0x0F) as usize) << 8) | table[3] as usize;
        assert_eq!(section_length, 9 + 4 * 2);
        assert_eq!(table[2] & 0xF0, 0xB0);
        // First program: SIT.
        assert_eq!(&table[9..13], &[0x00, 0x00, 0xE0, 0x1F]);
        // Second program: content on PMT PID 0x0100.
        assert_eq!(&table[13..17], &[0x00, 0x01, 0xE1, 0x00]);
        assert!(crc_of_section(&table, section_length));
        // Padding.
        assert!(table[4 + section_length..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_pat_too_many_programs() {
        let mut pat = bdav_pat();
        pat.programs = (0..254)
            .map(|i| PatProgram {
                program_number: i,
                pid: 0x0100 + i,
            })
            .collect();
        assert!(matches!(
            pat.build(),
            Err(TsError::SectionTooLong { table: "PAT", .. })
        ));
    }

    #[test]
    fn test_pmt_layout_and_crc() {
        let pmt = PmtParams {
            program_number: 0x0001,
            pcr_pid: 0x1001,
            descriptors: vec![Descriptor::Registration(RegistrationDescriptor {
                format_identifier: REG_FMT_ID_HDMV,
                additional_info: vec![],
            })],
            elements: vec![PmtElement {
                stream_type: StreamCodingType::H262,
                pid: 0x1011,
                descriptors: vec![Descriptor::Registration(RegistrationDescriptor {
                    format_identifier: REG_FMT_ID_HDMV,
                    additional_info: vec![0xFF, 0x02, 0x43, 0x3F],
                })],
            }],
        };
        let table = pmt.build().unwrap();
        assert_eq!(table.len(), 184);
        assert_eq!(table[1], 0x02);
        let section_length = (((table[2] & 0x0F) as usize) << 8) | table[3] as usize;
        assert_eq!(section_length, 13 + 6 + 5 + 10);
        // PCR PID.
        assert_eq!(table[9] & 0x1F, 0x10);
        assert_eq!(table[10], 0x01);
        // program_info_length = 6 (registration descriptor).
        assert_eq!((((table[11] & 0x0F) as usize) << 8) | table[12] as usize, 6);
        // Element: stream_type H262 on PID 0x1011.
        assert_eq!(table[19], 0x02);
        assert_eq!(table[20] & 0x1F, 0x10);
        assert_eq!(table[21], 0x11);
        assert!(crc_of_section(&table, section_length));
    }

    #[test]
    fn test_sit_layout_and_crc() {
        let sit = SitParams {
            descriptors: vec![Descriptor::PartialTs(PartialTsDescriptor {
                peak_rate: 48_000_000 / 400,
                minimum_overall_smoothing_rate: 0x3F_FFFF,
                maximum_overall_smoothing_buffer: 0x3FFF,
            })],
            services: vec![SitService {
                service_id: 0x0001,
                running_status: 0,
                descriptors: vec![],
            }],
        };
        let table = sit.build().unwrap();
        assert_eq!(table.len(), 184);
        assert_eq!(table[1], 0x7F);
        let section_length = (((table[2] & 0x0F) as usize) << 8) | table[3] as usize;
        assert_eq!(section_length, 11 + 10 + 4);
        assert_eq!(table[2] & 0xF0, 0xF0);
        assert!(crc_of_section(&table, section_length));
    }

    #[test]
    fn test_null_table() {
        let table = build_null_table();
        assert_eq!(table.len(), 184);
        assert!(table.iter().all(|&b| b == 0xFF));
    }
}
