//! Syncframe header parsing for AC-3, E-AC-3 and TrueHD/MLP.

use bitio::BitReader;

use crate::{Ac3Error, Result};

/// AC-3 / E-AC-3 syncword.
pub const AC3_SYNCWORD: u16 = 0x0B77;
/// MLP/TrueHD major sync pattern (after the access-unit length fields).
pub const MLP_MAJOR_SYNC: u32 = 0xF872_6FBA;

/// Nominal bit rates (kbps) indexed by `frmsizecod >> 1`.
const AC3_BITRATES: [u32; 19] = [
    32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 448, 512, 576, 640,
];

/// Channel counts indexed by `acmod`.
const ACMOD_CHANNELS: [u8; 8] = [2, 1, 2, 3, 3, 4, 4, 5];

/// Which syncframe flavour a header byte pattern announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Plain AC-3 (bsid ≤ 8).
    Ac3,
    /// E-AC-3 independent substream.
    Eac3Independent,
    /// E-AC-3 dependent substream (muxed as extension frames).
    Eac3Dependent,
    /// TrueHD / MLP access unit.
    Mlp,
}

/// One parsed syncframe header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Frame flavour.
    pub kind: FrameKind,
    /// Whole frame size in bytes.
    pub frame_size: u32,
    /// Samples covered by this frame (per channel).
    pub samples: u32,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// BSI summary for descriptor generation (AC-3/E-AC-3 only).
    pub bsi: Option<BsiInfo>,
}

/// BSI fields mirrored into the PMT AC-3 audio descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BsiInfo {
    /// `fscod`.
    pub sample_rate_code: u8,
    /// `bsid`.
    pub bsid: u8,
    /// `frmsizecod >> 1`.
    pub bit_rate_code: u8,
    /// `dsurmod` (0 when absent).
    pub surround_mode: u8,
    /// `bsmod`.
    pub bsmod: u8,
    /// `acmod` (ATSC channel code).
    pub num_channels: u8,
    /// Nominal bitrate in bps.
    pub bitrate: u32,
    /// `lfeon`.
    pub lfe: bool,
}

/// Parses an AC-3 or E-AC-3 syncframe header starting at `data[0]`.
pub fn parse_ac3_header(data: &[u8], offset: u64) -> Result<FrameInfo> {
    let mut bits = BitReader::new(data);
    let syncword = bits.read_bits(16)? as u16;
    if syncword != AC3_SYNCWORD {
        return Err(Ac3Error::SyncNotFound(offset));
    }

    // The bsid field sits at the same bit position in both syntaxes.
    let mut probe = bits.clone();
    probe.skip_bits(24)?;
    let bsid = probe.read_bits(5)? as u8;

    if bsid <= 8 {
        parse_plain_ac3(&mut bits, bsid)
    } else if (11..=16).contains(&bsid) {
        parse_eac3(&mut bits, bsid)
    } else {
        Err(Ac3Error::UnsupportedBsid(bsid))
    }
}

fn parse_plain_ac3(bits: &mut BitReader<'_>, bsid: u8) -> Result<FrameInfo> {
    /* syncinfo: [u16 crc1] [u2 fscod] [u6 frmsizecod] */
    bits.skip_bits(16)?;
    let fscod = bits.read_bits(2)? as u8;
    let frmsizecod = bits.read_bits(6)? as u8;
    if fscod != 0 {
        // BDAV restricts AC-3 to 48 kHz.
        return Err(Ac3Error::UnsupportedSampleRate(fscod));
    }
    if (frmsizecod >> 1) as usize >= AC3_BITRATES.len() {
        return Err(Ac3Error::InvalidFrameSizeCode(frmsizecod));
    }
    let bitrate_kbps = AC3_BITRATES[(frmsizecod >> 1) as usize];
    // At 48 kHz a syncframe spans bitrate_kbps × 2 16-bit words.
    let frame_size = bitrate_kbps * 2 * 2;

    /* bsi: [u5 bsid] [u3 bsmod] [u3 acmod] … */
    bits.skip_bits(5)?;
    let bsmod = bits.read_bits(3)? as u8;
    let acmod = bits.read_bits(3)? as u8;
    if acmod != 1 && acmod & 0x1 != 0 {
        bits.skip_bits(2)?; // cmixlev
    }
    if acmod & 0x4 != 0 {
        bits.skip_bits(2)?; // surmixlev
    }
    let surround_mode = if acmod == 0x2 {
        bits.read_bits(2)? as u8
    } else {
        0
    };
    let lfe = bits.read_bit()?;

    Ok(FrameInfo {
        kind: FrameKind::Ac3,
        frame_size,
        samples: 1536,
        sample_rate: 48_000,
        bsi: Some(BsiInfo {
            sample_rate_code: fscod,
            bsid,
            bit_rate_code: frmsizecod >> 1,
            surround_mode,
            bsmod,
            num_channels: acmod,
            bitrate: bitrate_kbps * 1000,
            lfe,
        }),
    })
}

fn parse_eac3(bits: &mut BitReader<'_>, bsid: u8) -> Result<FrameInfo> {
    /* [u2 strmtyp] [u3 substreamid] [u11 frmsiz] [u2 fscod] … */
    let strmtyp = bits.read_bits(2)? as u8;
    let _substreamid = bits.read_bits(3)?;
    let frmsiz = bits.read_bits(11)? as u32;
    let fscod = bits.read_bits(2)? as u8;
    let numblkscod = if fscod == 0x3 {
        return Err(Ac3Error::UnsupportedSampleRate(fscod));
    } else {
        bits.read_bits(2)? as u8
    };
    if fscod != 0 {
        return Err(Ac3Error::UnsupportedSampleRate(fscod));
    }
    let acmod = bits.read_bits(3)? as u8;
    let lfe = bits.read_bit()?;
    bits.skip_bits(5)?; // bsid (already probed)
    bits.skip_bits(5)?; // dialnorm
    let compre = bits.read_bit()?;
    if compre {
        bits.skip_bits(8)?;
    }
    let bsmod = 0; // informational only in E-AC-3 (carried by metadata)

    let blocks = [1u32, 2, 3, 6][numblkscod as usize];
    let samples = blocks * 256;
    let frame_size = (frmsiz + 1) * 2;
    // Average rate over this frame, rounded to the kbps grid.
    let bitrate = frame_size * 8 * 48_000 / samples;

    Ok(FrameInfo {
        kind: if strmtyp == 0x1 {
            FrameKind::Eac3Dependent
        } else {
            FrameKind::Eac3Independent
        },
        frame_size,
        samples,
        sample_rate: 48_000,
        bsi: Some(BsiInfo {
            sample_rate_code: fscod,
            bsid,
            bit_rate_code: 0,
            surround_mode: 0,
            bsmod,
            num_channels: acmod,
            bitrate,
            lfe,
        }),
    })
}

/// Parses a TrueHD/MLP access unit header:
/// `[u4 check_nibble] [u12 access_unit_length] [u16 input_timing]`, then the
/// major sync pattern on stream-defining units.
pub fn parse_mlp_header(data: &[u8], offset: u64) -> Result<FrameInfo> {
    let mut bits = BitReader::new(data);
    bits.skip_bits(4)?;
    let access_unit_length = bits.read_bits(12)? as u32;
    if access_unit_length == 0 {
        return Err(Ac3Error::SyncNotFound(offset));
    }
    bits.skip_bits(16)?; // input_timing

    let mut sample_rate = 48_000;
    if bits.remaining() >= 32 {
        let sync = bits.read_bits(32)? as u32;
        if sync == MLP_MAJOR_SYNC {
            /* major_sync_info: [u8 format_sync…] [u4 audio_sampling_frequency] */
            bits.skip_bits(4)?;
            let rate_code = bits.read_bits(4)? as u8;
            sample_rate = match rate_code {
                0x0 => 48_000,
                0x1 => 96_000,
                0x2 => 192_000,
                other => return Err(Ac3Error::UnsupportedSampleRate(other)),
            };
        }
    }

    Ok(FrameInfo {
        kind: FrameKind::Mlp,
        frame_size: access_unit_length * 2,
        // MLP access units carry 40 samples per 48 kHz unit time.
        samples: 40 * (sample_rate / 48_000),
        sample_rate,
        bsi: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 640 kbps 48 kHz 3/2+LFE AC-3 syncframe header.
    pub(crate) fn ac3_header_bytes() -> Vec<u8> {
        let mut bits = bitio::BitWriter::new();
        bits.write_bits(AC3_SYNCWORD as u64, 16).unwrap();
        bits.write_bits(0, 16).unwrap(); // crc1
        bits.write_bits(0, 2).unwrap(); // fscod = 48 kHz
        bits.write_bits(0x25, 6).unwrap(); // frmsizecod -> 640 kbps
        bits.write_bits(8, 5).unwrap(); // bsid
        bits.write_bits(0, 3).unwrap(); // bsmod
        bits.write_bits(0x7, 3).unwrap(); // acmod 3/2
        bits.write_bits(0, 2).unwrap(); // cmixlev
        bits.write_bits(0, 2).unwrap(); // surmixlev
        bits.write_bit(true); // lfeon
        bits.align();
        bits.into_bytes()
    }

    #[test]
    fn test_parse_ac3_640k() {
        let header = ac3_header_bytes();
        let info = parse_ac3_header(&header, 0).unwrap();
        assert_eq!(info.kind, FrameKind::Ac3);
        assert_eq!(info.frame_size, 2560);
        assert_eq!(info.samples, 1536);
        let bsi = info.bsi.unwrap();
        assert_eq!(bsi.bitrate, 640_000);
        assert_eq!(bsi.num_channels, 0x7);
        assert_eq!(bsi.bsid, 8);
        assert!(bsi.lfe);
    }

    #[test]
    fn test_reject_non_48k() {
        let mut header = ac3_header_bytes();
        header[4] = (0x1 << 6) | (header[4] & 0x3F); // fscod = 44.1 kHz
        assert!(matches!(
            parse_ac3_header(&header, 0),
            Err(Ac3Error::UnsupportedSampleRate(1))
        ));
    }

    #[test]
    fn test_parse_eac3_dependent() {
        let mut bits = bitio::BitWriter::new();
        bits.write_bits(AC3_SYNCWORD as u64, 16).unwrap();
        bits.write_bits(0x1, 2).unwrap(); // strmtyp = dependent
        bits.write_bits(0, 3).unwrap(); // substreamid
        bits.write_bits(511, 11).unwrap(); // frmsiz -> 1024 bytes
        bits.write_bits(0, 2).unwrap(); // fscod
        bits.write_bits(0x3, 2).unwrap(); // numblkscod = 6 blocks
        bits.write_bits(0x7, 3).unwrap(); // acmod
        bits.write_bit(true); // lfeon
        bits.write_bits(16, 5).unwrap(); // bsid
        bits.write_bits(0, 5).unwrap(); // dialnorm
        bits.write_bit(false); // compre
        bits.align();
        let header = bits.into_bytes();

        let info = parse_ac3_header(&header, 0).unwrap();
        assert_eq!(info.kind, FrameKind::Eac3Dependent);
        assert_eq!(info.frame_size, 1024);
        assert_eq!(info.samples, 1536);
        assert_eq!(info.bsi.unwrap().bsid, 16);
    }

    #[test]
    fn test_parse_mlp_major_sync() {
        let mut bits = bitio::BitWriter::new();
        bits.write_bits(0xC, 4).unwrap(); // check nibble
        bits.write_bits(600, 12).unwrap(); // access_unit_length (words)
        bits.write_bits(0, 16).unwrap(); // input_timing
        bits.write_bits(MLP_MAJOR_SYNC as u64, 32).unwrap();
        bits.write_bits(0, 4).unwrap();
        bits.write_bits(0x1, 4).unwrap(); // 96 kHz
        bits.align();
        let header = bits.into_bytes();

        let info = parse_mlp_header(&header, 0).unwrap();
        assert_eq!(info.kind, FrameKind::Mlp);
        assert_eq!(info.frame_size, 1200);
        assert_eq!(info.sample_rate, 96_000);
        assert_eq!(info.samples, 80);
    }

    #[test]
    fn test_reject_unknown_bsid() {
        let mut header = ac3_header_bytes();
        // Overwrite bsid field (first 5 bits of byte 5).
        header[5] = 0xA << 3; // bsid = 10 (reserved gap)
        assert!(matches!(
            parse_ac3_header(&header, 0),
            Err(Ac3Error::UnsupportedBsid(10))
        ));
    }
}
