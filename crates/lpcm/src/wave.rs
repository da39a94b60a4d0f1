//! RIFF/WAVE container walking.
//!
//! ```text
//! Offset  Size  Field
//! 0       4     "RIFF"
//! 4       4     riff_size (LE)
//! 8       4     "WAVE"
//! 12      …     chunks: 4-byte id, u32 LE size, payload (word aligned)
//! ```

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::{LpcmError, Result};

/// Parsed `fmt ` chunk plus the location of the `data` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveFormat {
    /// Channel count.
    pub channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Bytes per sample frame (all channels).
    pub block_align: u16,
    /// Bits per sample.
    pub bits_per_sample: u16,
    /// Absolute offset of the first audio byte.
    pub data_offset: u64,
    /// Audio byte count.
    pub data_len: u64,
}

impl WaveFormat {
    /// Walks the chunk list and extracts the format and data locations.
    pub fn parse<R: Read + Seek>(input: &mut R) -> Result<Self> {
        let mut riff = [0u8; 4];
        input.read_exact(&mut riff)?;
        if &riff != b"RIFF" {
            return Err(LpcmError::InvalidSignature);
        }
        let _riff_size = input.read_u32::<LittleEndian>()?;
        let mut wave = [0u8; 4];
        input.read_exact(&mut wave)?;
        if &wave != b"WAVE" {
            return Err(LpcmError::InvalidSignature);
        }

        let mut fmt: Option<(u16, u16, u32, u16, u16)> = None;
        let mut data: Option<(u64, u64)> = None;

        loop {
            let mut chunk_id = [0u8; 4];
            match input.read_exact(&mut chunk_id) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(err.into()),
            }
            let chunk_size = input.read_u32::<LittleEndian>()? as u64;

            match &chunk_id {
                b"fmt " => {
                    let format_tag = input.read_u16::<LittleEndian>()?;
                    let channels = input.read_u16::<LittleEndian>()?;
                    let sample_rate = input.read_u32::<LittleEndian>()?;
                    let _byte_rate = input.read_u32::<LittleEndian>()?;
                    let block_align = input.read_u16::<LittleEndian>()?;
                    let bits_per_sample = input.read_u16::<LittleEndian>()?;
                    fmt = Some((format_tag, channels, sample_rate, block_align, bits_per_sample));
                    if chunk_size > 16 {
                        input.seek(SeekFrom::Current(chunk_size as i64 - 16))?;
                    }
                }
                b"data" => {
                    let offset = input.stream_position()?;
                    data = Some((offset, chunk_size));
                    input.seek(SeekFrom::Current(chunk_size as i64))?;
                }
                _ => {
                    // Word-aligned chunk skipping.
                    input.seek(SeekFrom::Current((chunk_size + chunk_size % 2) as i64))?;
                }
            }
            if fmt.is_some() && data.is_some() {
                break;
            }
        }

        let (format_tag, channels, sample_rate, block_align, bits_per_sample) =
            fmt.ok_or(LpcmError::MissingChunk("fmt "))?;
        let (data_offset, data_len) = data.ok_or(LpcmError::MissingChunk("data"))?;

        // 0x0001 = integer PCM, 0xFFFE = extensible (PCM subformat assumed).
        if format_tag != 0x0001 && format_tag != 0xFFFE {
            return Err(LpcmError::UnsupportedFormatTag(format_tag));
        }

        Ok(WaveFormat {
            channels,
            sample_rate,
            block_align,
            bits_per_sample,
            data_offset,
            data_len,
        })
    }
}

/// Cheap signature probe used by the `AUTO` codec guesser.
pub fn probe(path: &Path) -> bool {
    let Ok(mut file) = File::open(path) else {
        return false;
    };
    let mut head = [0u8; 12];
    if file.read_exact(&mut head).is_err() {
        return false;
    }
    &head[0..4] == b"RIFF" && &head[8..12] == b"WAVE"
}
