//! HDMV segment stream walking (SUP layout).
//!
//! ```text
//! Per segment:
//! Offset  Size  Field
//! 0       2     magic "PG" (0x5047)
//! 2       4     pts (90 kHz, BE)
//! 6       4     dts (90 kHz, BE)
//! 10      1     segment_type
//! 11      2     segment_length
//! 13      …     segment_data
//! ```
//!
//! On the wire, a PES packet carries `segment_type` through `segment_data`;
//! the PTS/DTS move into the PES header.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};

use crate::{HdmvError, Result};

/// SUP segment magic, `"PG"`.
pub const SEGMENT_MAGIC: u16 = 0x5047;

/// HDMV segment types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SegmentType {
    /// Palette definition segment.
    Pds = 0x14,
    /// Object definition segment.
    Ods = 0x15,
    /// Presentation composition segment (PG).
    Pcs = 0x16,
    /// Window definition segment (PG).
    Wds = 0x17,
    /// Interactive composition segment (IG).
    Ics = 0x18,
    /// End of display set segment.
    End = 0x80,
}

impl SegmentType {
    /// Parses the segment type byte.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x14 => Ok(SegmentType::Pds),
            0x15 => Ok(SegmentType::Ods),
            0x16 => Ok(SegmentType::Pcs),
            0x17 => Ok(SegmentType::Wds),
            0x18 => Ok(SegmentType::Ics),
            0x80 => Ok(SegmentType::End),
            other => Err(HdmvError::UnknownSegmentType(other)),
        }
    }

    /// True for segments opening a display set (composition segments).
    pub fn starts_display_set(self) -> bool {
        matches!(self, SegmentType::Pcs | SegmentType::Ics)
    }
}

/// One located segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Recorded presentation timestamp, 90 kHz.
    pub pts: u32,
    /// Recorded decoding timestamp, 90 kHz.
    pub dts: u32,
    /// Segment type.
    pub segment_type: SegmentType,
    /// File offset of the `segment_type` byte (the wire payload start).
    pub payload_offset: u64,
    /// Wire payload size: type + length fields + data.
    pub payload_size: u32,
}

/// Walks a SUP file, returning every segment in order.
pub fn scan_segments(path: &Path) -> Result<Vec<Segment>> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut segments = Vec::new();
    let mut offset = 0u64;

    while offset + 13 <= file_len {
        file.seek(SeekFrom::Start(offset))?;
        let magic = file.read_u16::<BigEndian>()?;
        if magic != SEGMENT_MAGIC {
            return Err(HdmvError::InvalidSegmentMagic(offset));
        }
        let pts = file.read_u32::<BigEndian>()?;
        let dts = file.read_u32::<BigEndian>()?;
        let segment_type = SegmentType::from_u8(file.read_u8()?)?;
        let segment_length = file.read_u16::<BigEndian>()? as u64;

        if offset + 13 + segment_length > file_len {
            return Err(HdmvError::TruncatedSegment(offset));
        }
        segments.push(Segment {
            pts,
            dts,
            segment_type,
            payload_offset: offset + 10,
            payload_size: 3 + segment_length as u32,
        });
        offset += 13 + segment_length;
    }

    if segments.is_empty() {
        return Err(HdmvError::EmptyStream);
    }
    Ok(segments)
}

/// Cheap signature probe used by the `AUTO` codec guesser.
pub fn probe(path: &Path) -> bool {
    let Ok(mut file) = File::open(path) else {
        return false;
    };
    let mut head = [0u8; 2];
    file.read_exact(&mut head).is_ok() && head == [0x50, 0x47]
}


#[cfg(test)]
mod tests {
    use super::test_support::segment_bytes;
    use super::*;

    #[test]
    fn test_scan_segments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subs.sup");
        let mut content = Vec::new();
        content.extend_from_slice(&segment_bytes(1000, 900, SegmentType::Pcs, &[0x01; 11]));
        content.extend_from_slice(&segment_bytes(1000, 910, SegmentType::End, &[]));
        std::fs::write(&path, &content).unwrap();

        let segments = scan_segments(&path).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].segment_type, SegmentType::Pcs);
        assert_eq!(segments[0].pts, 1000);
        assert_eq!(segments[0].dts, 900);
        assert_eq!(segments[0].payload_offset, 10);
        assert_eq!(segments[0].payload_size, 3 + 11);
        assert_eq!(segments[1].segment_type, SegmentType::End);
        assert_eq!(segments[1].payload_size, 3);
    }

    #[test]
    fn test_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.sup");
        std::fs::write(&path, vec![0xFFu8; 32]).unwrap();
        assert!(matches!(
            scan_segments(&path),
            Err(HdmvError::InvalidSegmentMagic(0))
        ));
    }

    #[test]
    fn test_truncated_segment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.sup");
        let mut content = segment_bytes(0, 0, SegmentType::Ods, &[0xAA; 100]);
        content.truncate(50);
        std::fs::write(&path, &content).unwrap();
        assert!(matches!(
            scan_segments(&path),
            Err(HdmvError::TruncatedSegment(0))
        ));
    }
}
