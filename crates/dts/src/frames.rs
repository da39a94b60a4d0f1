//! DTS core and extension substream header parsing.

use bitio::BitReader;
use memchr::memmem;

use crate::{DtsError, Result};

/// DTS core frame syncword (big-endian 16-bit bitstream flavour).
pub const CORE_SYNCWORD: u32 = 0x7FFE_8001;
/// DTS extension substream syncword.
pub const EXT_SS_SYNCWORD: u32 = 0x6458_2025;
/// DTS XLL (lossless) asset sync, searched inside extension substreams.
pub const XLL_SYNCWORD: u32 = 0x41A2_9547;

/// Frame flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtsFrameKind {
    /// Core substream frame.
    Core,
    /// Extension substream frame (HD layers, muxed as extension frames).
    Extension,
}

/// One parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtsFrameInfo {
    /// Frame flavour.
    pub kind: DtsFrameKind,
    /// Whole frame size in bytes.
    pub frame_size: u32,
    /// Samples covered (per channel); zero for extension frames, which ride
    /// on the core cadence.
    pub samples: u32,
    /// Sample rate in Hz (core frames only).
    pub sample_rate: u32,
    /// Nominal core bitrate code (`RATE`).
    pub rate_code: u8,
    /// `AMODE` channel arrangement (core frames only).
    pub amode: u8,
}

/// Parses a core frame header:
/// `[u32 sync] [b1 FTYPE] [u5 SHORT] [b1 CPF] [u7 NBLKS] [u14 FSIZE]
/// [u6 AMODE] [u4 SFREQ] [u5 RATE] …`
pub fn parse_core_header(data: &[u8], offset: u64) -> Result<DtsFrameInfo> {
    let mut bits = BitReader::new(data);
    if bits.read_bits(32)? as u32 != CORE_SYNCWORD {
        return Err(DtsError::SyncNotFound(offset));
    }
    let _ftype = bits.read_bit()?;
    let _short = bits.read_bits(5)?;
    let _cpf = bits.read_bit()?;
    let nblks = bits.read_bits(7)? as u32;
    let fsize = bits.read_bits(14)? as u32;
    let amode = bits.read_bits(6)? as u8;
    let sfreq = bits.read_bits(4)? as u8;
    let rate = bits.read_bits(5)? as u8;

    // BDAV DTS is 48 kHz only (SFREQ 13).
    if sfreq != 13 {
        return Err(DtsError::UnsupportedSampleRate(sfreq));
    }

    Ok(DtsFrameInfo {
        kind: DtsFrameKind::Core,
        frame_size: fsize + 1,
        samples: (nblks + 1) * 32,
        sample_rate: 48_000,
        rate_code: rate,
        amode,
    })
}

/// Parses an extension substream header:
/// `[u32 sync] [u8 UserDefinedBits] [u2 ExtSSIndex] [b1 HeaderSizeType]
/// [u8/12 HeaderSize-1] [u16/20 ExtSSFsize-1] …`
pub fn parse_ext_header(data: &[u8], offset: u64) -> Result<DtsFrameInfo> {
    let mut bits = BitReader::new(data);
    if bits.read_bits(32)? as u32 != EXT_SS_SYNCWORD {
        return Err(DtsError::SyncNotFound(offset));
    }
    bits.skip_bits(8)?; // UserDefinedBits
    bits.skip_bits(2)?; // ExtSSIndex
    let long_form = bits.read_bit()?;
    let (_header_size, frame_size) = if long_form {
        (bits.read_bits(12)? as u32 + 1, bits.read_bits(20)? as u32 + 1)
    } else {
        (bits.read_bits(8)? as u32 + 1, bits.read_bits(16)? as u32 + 1)
    };

    Ok(DtsFrameInfo {
        kind: DtsFrameKind::Extension,
        frame_size,
        samples: 0,
        sample_rate: 0,
        rate_code: 0,
        amode: 0,
    })
}

/// True if an extension substream payload carries an XLL (lossless) asset.
pub fn contains_xll(payload: &[u8]) -> bool {
    memmem::find(payload, &XLL_SYNCWORD.to_be_bytes()).is_some()
}


#[cfg(test)]
mod tests {
    use super::*;
    use super::test_support::{core_frame_bytes, ext_frame_bytes};

    #[test]
    fn test_parse_core() {
        // 512 samples = nblks 15; fsize 2012 -> 2013-byte frame.
        let frame = core_frame_bytes(2012, 15);
        let info = parse_core_header(&frame, 0).unwrap();
        assert_eq!(info.kind, DtsFrameKind::Core);
        assert_eq!(info.frame_size, 2013);
        assert_eq!(info.samples, 512);
        assert_eq!(info.sample_rate, 48_000);
        assert_eq!(info.amode, 0x09);
    }

    #[test]
    fn test_parse_ext() {
        let frame = ext_frame_bytes(4096, true);
        let info = parse_ext_header(&frame, 0).unwrap();
        assert_eq!(info.kind, DtsFrameKind::Extension);
        assert_eq!(info.frame_size, 4096);
        assert!(contains_xll(&frame));
        assert!(!contains_xll(&ext_frame_bytes(512, false)));
    }

    #[test]
    fn test_reject_non_48k() {
        let mut frame = core_frame_bytes(2012, 15);
        // SFREQ sits in bits 66..70, i.e. byte 8 bits 2..6 (MSB first).
        frame[8] &= !0x3C;
        frame[8] |= 8 << 2; // 44.1 kHz
        assert!(matches!(
            parse_core_header(&frame, 0),
            Err(DtsError::UnsupportedSampleRate(8))
        ));
    }
}
