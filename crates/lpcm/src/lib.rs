//! RIFF/WAVE parser producing BD LPCM scripts.
//!
//! BD LPCM wraps big-endian PCM samples behind a 4-byte `audio_data_header`
//! per PES frame; WAVE stores little-endian samples. The script therefore
//! copies raw sample bytes from the source file, byte-swaps them in place
//! and prepends the header, one PES frame per 1/200 s of audio.

mod error;
mod wave;

pub use error::LpcmError;
pub use wave::WaveFormat;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tracing::debug;

use esms::{
    AudioProperties, BuildCommand, EsProperties, EsmsPesFrame, EsmsWriter, FmtProperties,
    InsertMode, ParsingSettings, SampleRateCode,
};
use ts::{EsType, StreamCodingType};

/// Result type for LPCM operations.
pub type Result<T> = std::result::Result<T, LpcmError>;

/// PES frames carry 1/200 s of audio each.
const PES_FRAMES_PER_SEC: u32 = 200;

/// 90 kHz ticks per PES frame.
const PES_FRAME_TICKS: u64 = 90_000 / PES_FRAMES_PER_SEC as u64;

/// BD LPCM channel assignment codes for plain channel counts.
fn channel_assignment(channels: u16) -> Result<u8> {
    match channels {
        1 => Ok(0x1),  // mono
        2 => Ok(0x3),  // stereo
        4 => Ok(0x4),  // L,R,C,LFE layouts collapse onto the 4ch code
        6 => Ok(0x9),  // 5.1
        8 => Ok(0xB),  // 7.1
        other => Err(LpcmError::UnsupportedChannelCount(other)),
    }
}

/// BD LPCM bits-per-sample code.
fn bit_depth_code(bits: u16) -> Result<u8> {
    match bits {
        16 => Ok(1),
        20 => Ok(2),
        24 => Ok(3),
        other => Err(LpcmError::UnsupportedBitDepth(other)),
    }
}

/// Builds the per-frame `audio_data_header`:
/// `[u16 audio_data_payload_size] [u4 channel_assignment]
/// [u4 sampling_frequency] [u2 bits_per_sample] [v6 reserved]`.
fn audio_data_header(payload_size: u16, channels: u8, rate_code: u8, bits_code: u8) -> [u8; 4] {
    [
        (payload_size >> 8) as u8,
        payload_size as u8,
        (channels << 4) | (rate_code & 0x0F),
        bits_code << 6,
    ]
}

/// Analyzes a WAVE file and emits its LPCM script.
///
/// Returns the effective stream coding type.
pub fn analyze(settings: &ParsingSettings) -> Result<StreamCodingType> {
    let file = File::open(&settings.es_path)?;
    let mut reader = BufReader::new(file);
    let format = WaveFormat::parse(&mut reader)?;

    let sample_rate_code = SampleRateCode::from_hz(format.sample_rate)
        .ok_or(LpcmError::UnsupportedSampleRate(format.sample_rate))?;
    let channels_code = channel_assignment(format.channels)?;
    let bits_code = bit_depth_code(format.bits_per_sample)?;

    let samples_per_frame = format.sample_rate / PES_FRAMES_PER_SEC;
    let frame_bytes = samples_per_frame as u64 * format.block_align as u64;
    if frame_bytes == 0 {
        return Err(LpcmError::EmptyStream);
    }
    let nb_frames = format.data_len.div_ceil(frame_bytes);
    if nb_frames == 0 {
        return Err(LpcmError::EmptyStream);
    }

    let mut writer = EsmsWriter::create(&settings.script_path)?;
    let src_id = writer.add_source_file(&settings.es_path, 4096)?;

    let sample_unit = format.bits_per_sample.div_ceil(8) as u8;
    for idx in 0..nb_frames {
        let src_offset = format.data_offset + idx * frame_bytes;
        let chunk = frame_bytes.min(format.data_len - idx * frame_bytes) as u32;
        let header = audio_data_header(
            chunk as u16,
            channels_code,
            sample_rate_code as u8,
            bits_code,
        );

        let mut commands = vec![
            BuildCommand::AddData {
                offset: 0,
                mode: InsertMode::Overwrite,
                data: header.to_vec(),
            },
            BuildCommand::AddPayload {
                file_id: src_id,
                offset: 4,
                src_offset,
                size: chunk,
            },
        ];
        if sample_unit > 1 {
            commands.push(BuildCommand::ChangeByteOrder {
                unit_size: sample_unit,
                offset: 4,
                length: chunk - chunk % sample_unit as u32,
            });
        }

        writer.write_pes_frame(&EsmsPesFrame {
            extension_frame: false,
            pts: idx * PES_FRAME_TICKS,
            dts: None,
            ext_data: None,
            size: 4 + chunk,
            commands,
        })?;
    }

    let bitrate = format.sample_rate * format.block_align as u32 * 8;
    writer.set_properties(EsProperties {
        es_type: EsType::Audio,
        coding_type: StreamCodingType::Lpcm,
        pts_reference: 0,
        bitrate,
        pts_final: nb_frames * PES_FRAME_TICKS,
        scripting_flags: settings.options.script_flags(),
    });
    writer.set_fmt_properties(FmtProperties::Audio(AudioProperties {
        audio_format: if format.channels > 2 { 0x6 } else { channels_code },
        sample_rate: sample_rate_code,
        bit_depth: bits_code - 1,
        ac3: None,
    }));
    writer.finalize()?;

    debug!(
        source = %settings.es_path.display(),
        frames = nb_frames,
        sample_rate = format.sample_rate,
        channels = format.channels,
        "LPCM script generated"
    );
    Ok(StreamCodingType::Lpcm)
}

/// Exposes a source path's suitability as WAVE input (signature probe).
pub fn probe(path: &Path) -> bool {
    wave::probe(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use esms::{apply_commands, EsmsReader, ParsingOptions, ScriptFlags};
    use std::io::Write as _;

    fn write_wav(dir: &Path, seconds: u32) -> std::path::PathBuf {
        let path = dir.join("track.wav");
        let sample_rate = 48_000u32;
        let channels = 2u16;
        let bits = 16u16;
        let block_align = channels * bits / 8;
        let data_len = sample_rate * seconds * block_align as u32;

        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // PCM
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
        out.extend_from_slice(&block_align.to_le_bytes());
        out.extend_from_slice(&bits.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for idx in 0..(data_len / 2) {
            out.extend_from_slice(&(idx as u16).to_le_bytes());
        }

        let mut file = File::create(&path).unwrap();
        file.write_all(&out).unwrap();
        path
    }

    fn settings(dir: &Path) -> ParsingSettings {
        ParsingSettings {
            es_path: write_wav(dir, 1),
            script_path: dir.join("track.wav.ess"),
            options: ParsingOptions::default(),
            restart: false,
        }
    }

    #[test]
    fn test_analyze_one_second_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        assert_eq!(analyze(&settings).unwrap(), StreamCodingType::Lpcm);

        esms::validate_script(&settings.script_path, ScriptFlags::default()).unwrap();
        let mut reader = EsmsReader::open(&settings.script_path).unwrap();
        assert_eq!(reader.properties().coding_type, StreamCodingType::Lpcm);
        assert_eq!(reader.properties().bitrate, 48_000 * 4 * 8);

        let mut frames = Vec::new();
        while let Some(frame) = reader.next_frame().unwrap() {
            frames.push(frame);
        }
        // 1 s of audio at 200 PES frames per second.
        assert_eq!(frames.len(), 200);
        assert_eq!(frames[0].pts, 0);
        assert_eq!(frames[1].pts, 450);
        // 240 samples × 4 bytes + 4-byte header.
        assert_eq!(frames[0].size, 4 + 240 * 4);
    }

    #[test]
    fn test_payload_is_byte_swapped() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        analyze(&settings).unwrap();

        let mut reader = EsmsReader::open(&settings.script_path).unwrap();
        let frame = reader.next_frame().unwrap().unwrap();

        // The swap command must cover the sample region with 2-byte units.
        assert!(frame.commands.iter().any(|command| matches!(
            command,
            BuildCommand::ChangeByteOrder {
                unit_size: 2,
                offset: 4,
                length,
            } if *length == 240 * 4
        )));

        let source = std::fs::read(&settings.es_path).unwrap();
        let mut sources = [source.as_slice()];
        let payload =
            apply_commands(&frame.commands, frame.size, reader.data_blocks(), &mut sources)
                .unwrap();
        // Header: payload size, stereo 48 kHz 16-bit.
        assert_eq!(&payload[0..2], &(240u16 * 4).to_be_bytes());
        assert_eq!(payload[2], 0x31);
        assert_eq!(payload[3], 0x40);
        // First sample was 0x0000 little-endian, second 0x0001 -> 0x00 0x01
        // once swapped to big-endian.
        assert_eq!(&payload[4..8], &[0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn test_rejects_unsupported_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.wav");
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&36u32.to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&44_100u32.to_le_bytes());
        out.extend_from_slice(&(44_100u32 * 4).to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&0u32.to_le_bytes());
        std::fs::write(&path, &out).unwrap();

        let settings = ParsingSettings {
            es_path: path,
            script_path: dir.path().join("bad.ess"),
            options: ParsingOptions::default(),
            restart: false,
        };
        assert!(matches!(
            analyze(&settings),
            Err(LpcmError::UnsupportedSampleRate(44_100))
        ));
    }
}
