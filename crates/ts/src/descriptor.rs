//! Program and program-element descriptors carried by the PMT and SIT.

use crate::{Result, TsError};

/// `registration_descriptor` format identifier `HDMV`.
pub const REG_FMT_ID_HDMV: u32 = 0x4844_4D56;
/// `registration_descriptor` format identifier `AC-3`.
pub const REG_FMT_ID_AC3: u32 = 0x4143_2D33;
/// `registration_descriptor` format identifier `VC-1`.
pub const REG_FMT_ID_VC1: u32 = 0x5643_2D31;

/// Registration descriptor (tag 0x05).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationDescriptor {
    /// SMPTE-RA `format_identifier`.
    pub format_identifier: u32,
    /// `additional_identification_info` bytes (at most 8).
    pub additional_info: Vec<u8>,
}

/// AVC video descriptor (tag 0x28), emitted for H.264 still-picture streams.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvcVideoDescriptor {
    /// `profile_idc`.
    pub profile_idc: u8,
    /// `constraint_set0..5_flag` plus `AVC_compatible_flags`.
    pub constraint_flags: u8,
    /// `level_idc`.
    pub level_idc: u8,
    /// `AVC_still_present`.
    pub still_present: bool,
    /// `AVC_24_hour_picture_flag`.
    pub avc_24_hour_picture: bool,
    /// `Frame_Packing_SEI_not_present_flag`.
    pub frame_packing_sei_not_present: bool,
}

/// Partial transport stream descriptor (tag 0x63), carried by the SIT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialTsDescriptor {
    /// 22-bit `peak_rate` in units of 400 bps.
    pub peak_rate: u32,
    /// 22-bit `minimum_overall_smoothing_rate` (0x3FFFFF = unspecified).
    pub minimum_overall_smoothing_rate: u32,
    /// 14-bit `maximum_overall_smoothing_buffer` (0x3FFF = unspecified).
    pub maximum_overall_smoothing_buffer: u16,
}

/// AC-3 audio descriptor (tag 0x81, ATSC A/52 A.3).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ac3AudioDescriptor {
    /// `sample_rate_code`.
    pub sample_rate_code: u8,
    /// `bsid`.
    pub bsid: u8,
    /// `bit_rate_code`.
    pub bit_rate_code: u8,
    /// `surround_mode`.
    pub surround_mode: u8,
    /// `bsmod`.
    pub bsmod: u8,
    /// `num_channels`.
    pub num_channels: u8,
    /// `full_svc`.
    pub full_svc: bool,
}

/// DTCP descriptor (tag 0x88, DTLA volume 1 appendix B).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtcpDescriptor {
    /// `CA_System_ID` (0x0FFF for BDMV).
    pub ca_system_id: u16,
    /// `Retention_Move_mode`.
    pub retention_move_mode: bool,
    /// `Retention_State`.
    pub retention_state: u8,
    /// `EPN`.
    pub epn: bool,
    /// `DTCP_CCI`.
    pub dtcp_cci: u8,
    /// `DOT`.
    pub dot: bool,
    /// `AST`.
    pub ast: bool,
    /// `Image_Constraint_Token`.
    pub image_constraint_token: bool,
    /// `APS`.
    pub aps: u8,
}

impl Default for DtcpDescriptor {
    fn default() -> Self {
        DtcpDescriptor {
            ca_system_id: 0x0FFF,
            retention_move_mode: false,
            retention_state: 0,
            epn: false,
            dtcp_cci: 0,
            dot: false,
            ast: false,
            image_constraint_token: false,
            aps: 0,
        }
    }
}

/// Descriptor variants this muxer emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    /// Registration descriptor (0x05).
    Registration(RegistrationDescriptor),
    /// AVC video descriptor (0x28).
    AvcVideo(AvcVideoDescriptor),
    /// Partial transport stream descriptor (0x63).
    PartialTs(PartialTsDescriptor),
    /// AC-3 audio descriptor (0x81).
    Ac3Audio(Ac3AudioDescriptor),
    /// DTCP descriptor (0x88).
    Dtcp(DtcpDescriptor),
}

impl Descriptor {
    /// `descriptor_tag` byte.
    pub fn tag(&self) -> u8 {
        match self {
            Descriptor::Registration(_) => 0x05,
            Descriptor::AvcVideo(_) => 0x28,
            Descriptor::PartialTs(_) => 0x63,
            Descriptor::Ac3Audio(_) => 0x81,
            Descriptor::Dtcp(_) => 0x88,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            Descriptor::Registration(desc) => {
                let mut out = desc.format_identifier.to_be_bytes().to_vec();
                out.extend_from_slice(&desc.additional_info);
                out
            }
            Descriptor::AvcVideo(desc) => vec![
                desc.profile_idc,
                desc.constraint_flags,
                desc.level_idc,
                ((desc.still_present as u8) << 7)
                    | ((desc.avc_24_hour_picture as u8) << 6)
                    | ((desc.frame_packing_sei_not_present as u8) << 5)
                    | 0x1F,
            ],
            Descriptor::PartialTs(desc) => vec![
                ((desc.peak_rate >> 16) as u8) | 0xC0,
                (desc.peak_rate >> 8) as u8,
                desc.peak_rate as u8,
                ((desc.minimum_overall_smoothing_rate >> 16) as u8) | 0xC0,
                (desc.minimum_overall_smoothing_rate >> 8) as u8,
                desc.minimum_overall_smoothing_rate as u8,
                ((desc.maximum_overall_smoothing_buffer >> 8) as u8) | 0xC0,
                desc.maximum_overall_smoothing_buffer as u8,
            ],
            Descriptor::Ac3Audio(desc) => vec![
                (desc.sample_rate_code << 5) | (desc.bsid & 0x1F),
                (desc.bit_rate_code << 2) | (desc.surround_mode & 0x03),
                (desc.bsmod << 5) | ((desc.num_channels & 0x0F) << 1) | desc.full_svc as u8,
                0xFF, // langcod, deprecated
            ],
            Descriptor::Dtcp(desc) => vec![
                (desc.ca_system_id >> 8) as u8,
                desc.ca_system_id as u8,
                0x80 | ((desc.retention_move_mode as u8) << 6)
                    | ((desc.retention_state << 3) & 0x38)
                    | ((desc.epn as u8) << 2)
                    | (desc.dtcp_cci & 0x03),
                0xE0 | ((desc.dot as u8) << 4)
                    | ((desc.ast as u8) << 3)
                    | ((desc.image_constraint_token as u8) << 2)
                    | (desc.aps & 0x03),
            ],
        }
    }

    /// Encoded size: tag + length + payload.
    pub fn size(&self) -> usize {
        2 + self.payload().len()
    }

    /// Appends `descriptor_tag`, `descriptor_length` and the payload.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        let payload = self.payload();
        if payload.len() > 0xFF {
            return Err(TsError::DescriptorTooLong {
                tag: self.tag(),
                length: payload.len(),
            });
        }
        out.push(self.tag());
        out.push(payload.len() as u8);
        out.extend_from_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_hdmv_video() {
        // HDMV video additional identification:
        // [v8 0xFF] [u8 coding_type] [u4 format | u4 frame_rate] [v8 0x3F]
        let desc = Descriptor::Registration(RegistrationDescriptor {
            format_identifier: REG_FMT_ID_HDMV,
            additional_info: vec![0xFF, 0x1B, 0x64, 0x3F],
        });
        let mut out = Vec::new();
        desc.encode(&mut out).unwrap();
        assert_eq!(out, vec![0x05, 8, b'H', b'D', b'M', b'V', 0xFF, 0x1B, 0x64, 0x3F]);
    }

    #[test]
    fn test_partial_ts_descriptor_layout() {
        let desc = Descriptor::PartialTs(PartialTsDescriptor {
            peak_rate: 48_000_000 / 400,
            minimum_overall_smoothing_rate: 0x3F_FFFF,
            maximum_overall_smoothing_buffer: 0x3FFF,
        });
        let mut out = Vec::new();
        desc.encode(&mut out).unwrap();
        assert_eq!(out[0], 0x63);
        assert_eq!(out[1], 8);
        let peak = (((out[2] & 0x3F) as u32) << 16) | ((out[3] as u32) << 8) | out[4] as u32;
        assert_eq!(peak, 120_000);
        assert_eq!(&out[5..8], &[0xFF, 0xFF, 0xFF]);
        assert_eq!(&out[8..10], &[0xFF, 0xFF]);
    }

    #[test]
    fn test_ac3_descriptor_layout() {
        let desc = Descriptor::Ac3Audio(Ac3AudioDescriptor {
            sample_rate_code: 0, // 48 kHz
            bsid: 8,
            bit_rate_code: 0x0E,
            surround_mode: 0,
            bsmod: 0,
            num_channels: 0x07,
            full_svc: true,
        });
        let mut out = Vec::new();
        desc.encode(&mut out).unwrap();
        assert_eq!(out, vec![0x81, 4, 0x08, 0x38, 0x0F, 0xFF]);
    }

    #[test]
    fn test_dtcp_descriptor_defaults() {
        let desc = Descriptor::Dtcp(DtcpDescriptor::default());
        let mut out = Vec::new();
        desc.encode(&mut out).unwrap();
        assert_eq!(out, vec![0x88, 4, 0x0F, 0xFF, 0x80, 0xE0]);
    }

    #[test]
    fn test_avc_video_descriptor_layout() {
        let desc = Descriptor::AvcVideo(AvcVideoDescriptor {
            profile_idc: 100,
            constraint_flags: 0x00,
            level_idc: 41,
            still_present: true,
            avc_24_hour_picture: false,
            frame_packing_sei_not_present: true,
        });
        let mut out = Vec::new();
        desc.encode(&mut out).unwrap();
        assert_eq!(out, vec![0x28, 4, 100, 0x00, 41, 0x80 | 0x20 | 0x1F]);
    }
}
