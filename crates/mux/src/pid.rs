//! BDAV PID band allocation.

use std::collections::BTreeSet;

use ts::StreamCodingType;

use crate::{MuxError, Result};

/// First BDAV primary video PID.
pub const PID_PRIMARY_VIDEO: u16 = 0x1011;
/// First BDAV primary audio PID.
pub const PID_PRIMARY_AUDIO: u16 = 0x1100;
/// First BDAV Presentation Graphics PID.
pub const PID_PG: u16 = 0x1200;
/// First BDAV Interactive Graphics PID.
pub const PID_IG: u16 = 0x1400;
/// First BDAV text subtitles PID.
pub const PID_TEXT: u16 = 0x1800;
/// First BDAV secondary audio PID.
pub const PID_SECONDARY_AUDIO: u16 = 0x1A00;
/// First BDAV secondary video PID.
pub const PID_SECONDARY_VIDEO: u16 = 0x1B00;

/// A PID band: first value and stream-count cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PidBand {
    /// First PID of the band.
    pub base: u16,
    /// Maximum number of streams.
    pub cap: u16,
}

/// Band for a coding type / secondary flag pair.
pub fn band_of(coding_type: StreamCodingType, secondary: bool) -> PidBand {
    use StreamCodingType::*;
    match (coding_type, secondary) {
        (Mpeg1Video | H262 | Avc | Vc1, false) => PidBand {
            base: PID_PRIMARY_VIDEO,
            cap: 1,
        },
        (Mpeg1Video | H262 | Avc | Vc1, true) => PidBand {
            base: PID_SECONDARY_VIDEO,
            cap: 8,
        },
        (Eac3Secondary | DtsExpress, _) => PidBand {
            base: PID_SECONDARY_AUDIO,
            cap: 32,
        },
        (Lpcm | Ac3 | Dts | TrueHd | Eac3 | DtsHdHr | DtsHdMa, true) => PidBand {
            base: PID_SECONDARY_AUDIO,
            cap: 32,
        },
        (Lpcm | Ac3 | Dts | TrueHd | Eac3 | DtsHdHr | DtsHdMa, false) => PidBand {
            base: PID_PRIMARY_AUDIO,
            cap: 32,
        },
        (Pg, _) => PidBand {
            base: PID_PG,
            cap: 32,
        },
        (Ig, _) => PidBand {
            base: PID_IG,
            cap: 32,
        },
        (Text, _) => PidBand {
            base: PID_TEXT,
            cap: 256,
        },
    }
}

/// Exclusive PID allocator over the BDAV bands.
#[derive(Debug, Default)]
pub struct PidAllocator {
    taken: BTreeSet<u16>,
}

impl PidAllocator {
    /// Creates an empty allocator.
    pub fn new() -> Self {
        PidAllocator::default()
    }

    /// Allocates a PID for a stream: the requested value when it falls in
    /// the right band and is free, the next free band value otherwise.
    pub fn request(
        &mut self,
        coding_type: StreamCodingType,
        secondary: bool,
        requested: u16,
    ) -> Result<u16> {
        let band = band_of(coding_type, secondary);
        let band_range = band.base..band.base + band.cap;

        if requested != 0 && band_range.contains(&requested) && self.taken.insert(requested) {
            return Ok(requested);
        }

        for pid in band_range {
            if self.taken.insert(pid) {
                return Ok(pid);
            }
        }
        Err(MuxError::Pid(format!(
            "band 0x{:04X} exhausted ({} streams max) for {}",
            band.base,
            band.cap,
            coding_type.name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bands() {
        assert_eq!(
            band_of(StreamCodingType::Avc, false),
            PidBand {
                base: 0x1011,
                cap: 1
            }
        );
        assert_eq!(band_of(StreamCodingType::Avc, true).base, 0x1B00);
        assert_eq!(band_of(StreamCodingType::Lpcm, false).base, 0x1100);
        assert_eq!(band_of(StreamCodingType::Eac3Secondary, false).base, 0x1A00);
        assert_eq!(band_of(StreamCodingType::Pg, false).base, 0x1200);
        assert_eq!(band_of(StreamCodingType::Ig, false).base, 0x1400);
    }

    #[test]
    fn test_first_requested_or_next_available() {
        let mut allocator = PidAllocator::new();
        // Requested value honoured inside the band.
        assert_eq!(
            allocator
                .request(StreamCodingType::Ac3, false, 0x1105)
                .unwrap(),
            0x1105
        );
        // Out-of-band request falls back to the band base.
        assert_eq!(
            allocator
                .request(StreamCodingType::Ac3, false, 0x2000)
                .unwrap(),
            0x1100
        );
        // Collision falls to the next free value.
        assert_eq!(
            allocator
                .request(StreamCodingType::Ac3, false, 0x1100)
                .unwrap(),
            0x1101
        );
    }

    #[test]
    fn test_primary_video_cap() {
        let mut allocator = PidAllocator::new();
        allocator.request(StreamCodingType::Avc, false, 0).unwrap();
        assert!(matches!(
            allocator.request(StreamCodingType::H262, false, 0),
            Err(MuxError::Pid(_))
        ));
    }
}
