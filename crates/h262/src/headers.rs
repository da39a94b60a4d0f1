//! H.262 syntax element parsing (sequence, extension, GOP, picture headers).

use bitio::BitReader;

use crate::{H262Error, Result};

/// `sequence_header_code` start code value.
pub const SEQUENCE_HEADER_CODE: u8 = 0xB3;
/// `extension_start_code` value.
pub const EXTENSION_START_CODE: u8 = 0xB5;
/// `sequence_end_code` value.
pub const SEQUENCE_END_CODE: u8 = 0xB7;
/// `group_start_code` value.
pub const GROUP_START_CODE: u8 = 0xB8;
/// `picture_start_code` value.
pub const PICTURE_START_CODE: u8 = 0x00;

/// Picture coding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureType {
    /// Intra picture.
    I,
    /// Predictive picture.
    P,
    /// Bidirectional picture.
    B,
}

/// Parsed `sequence_header()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceHeader {
    /// Picture width in pixels.
    pub width: u32,
    /// Picture height in pixels.
    pub height: u32,
    /// `aspect_ratio_information`.
    pub aspect_ratio: u8,
    /// `frame_rate_code`.
    pub frame_rate_code: u8,
    /// Nominal bitrate in bps (from the 18-bit field, 400 bps units).
    pub bitrate: u64,
    /// `vbv_buffer_size_value` in 16 kbit units.
    pub vbv_buffer_size: u32,
}

impl SequenceHeader {
    /// Parses the header body (bytes after the 4-byte start code).
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut bits = BitReader::new(data);
        let width = bits.read_bits(12)? as u32;
        let height = bits.read_bits(12)? as u32;
        let aspect_ratio = bits.read_bits(4)? as u8;
        let frame_rate_code = bits.read_bits(4)? as u8;
        let bit_rate_value = bits.read_bits(18)?;
        bits.skip_bits(1)?; // marker_bit
        let vbv_buffer_size = bits.read_bits(10)? as u32;

        if frame_rate_code == 0 || frame_rate_code > 8 {
            return Err(H262Error::InvalidFrameRate(frame_rate_code));
        }

        Ok(SequenceHeader {
            width,
            height,
            aspect_ratio,
            frame_rate_code,
            bitrate: bit_rate_value * 400,
            vbv_buffer_size,
        })
    }

    /// Frame rate as an exact rational `(num, den)`.
    pub fn frame_rate(&self) -> (u32, u32) {
        match self.frame_rate_code {
            1 => (24_000, 1001),
            2 => (24, 1),
            3 => (25, 1),
            4 => (30_000, 1001),
            5 => (30, 1),
            6 => (50, 1),
            7 => (60_000, 1001),
            _ => (60, 1),
        }
    }
}

/// Parsed `sequence_extension()` fields of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SequenceExtension {
    /// `profile_and_level_indication`.
    pub profile_and_level: u8,
    /// `progressive_sequence`.
    pub progressive: bool,
}

impl SequenceExtension {
    /// Parses an extension body; returns `None` for extensions other than
    /// the sequence extension (id 0b0001).
    pub fn parse(data: &[u8]) -> Result<Option<Self>> {
        let mut bits = BitReader::new(data);
        let extension_id = bits.read_bits(4)? as u8;
        if extension_id != 0x1 {
            return Ok(None);
        }
        let profile_and_level = bits.read_bits(8)? as u8;
        let progressive = bits.read_bit()?;
        Ok(Some(SequenceExtension {
            profile_and_level,
            progressive,
        }))
    }
}

/// Parsed `picture_header()` fields of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureHeader {
    /// `temporal_reference`: display order within the GOP.
    pub temporal_reference: u16,
    /// Picture coding type.
    pub picture_type: PictureType,
}

impl PictureHeader {
    /// Parses the header body (bytes after the 4-byte start code).
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut bits = BitReader::new(data);
        let temporal_reference = bits.read_bits(10)? as u16;
        let picture_type = match bits.read_bits(3)? {
            1 => PictureType::I,
            2 => PictureType::P,
            3 => PictureType::B,
            // D pictures and reserved codes are treated as intra.
            _ => PictureType::I,
        };
        Ok(PictureHeader {
            temporal_reference,
            picture_type,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_sequence_header() {
        let header = SequenceHeader::parse(&sequence_header_body()).unwrap();
        assert_eq!(header.width, 1920);
        assert_eq!(header.height, 1080);
        assert_eq!(header.frame_rate_code, 3);
        assert_eq!(header.frame_rate(), (25, 1));
        assert_eq!(header.bitrate, 80_000_000);
        assert_eq!(header.vbv_buffer_size, 597);
    }

    #[test]
    fn test_reserved_frame_rate_rejected() {
        let mut body = sequence_header_body();
        body[3] &= 0xF0; // frame_rate_code = 0
        assert!(matches!(
            SequenceHeader::parse(&body),
            Err(H262Error::InvalidFrameRate(0))
        ));
    }

    #[test]
    fn test_sequence_extension() {
        let ext = SequenceExtension::parse(&sequence_extension_body(false))
            .unwrap()
            .unwrap();
        assert_eq!(ext.profile_and_level, 0x44);
        assert!(!ext.progressive);

        // A display extension (id 0b0010) is skipped.
        let mut body = sequence_extension_body(false);
        body[0] = (body[0] & 0x0F) | 0x20;
        assert!(SequenceExtension::parse(&body).unwrap().is_none());
    }

    #[test]
    fn test_picture_header() {
        let header = PictureHeader::parse(&picture_header_body(2, 1)).unwrap();
        assert_eq!(header.temporal_reference, 2);
        assert_eq!(header.picture_type, PictureType::I);
        let b = PictureHeader::parse(&picture_header_body(0, 3)).unwrap();
        assert_eq!(b.picture_type, PictureType::B);
    }
}
