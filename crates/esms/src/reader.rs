//! ESMS validation and reading.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt};
use tracing::debug;

use bitio::Crc32;
use ts::{EsType, StreamCodingType};

use crate::pes_frame::EsmsPesFrame;
use crate::properties::{
    Ac3SpecProperties, AudioProperties, EsProperties, FmtProperties, FrameRateCode,
    H264SpecProperties, HdmvVideoFormat, SampleRateCode, ScriptFlags, VideoProperties,
};
use crate::{
    directory, Result, ScriptError, DATA_BLOCKS_MAGIC, ESMS_MAGIC, ESMS_VERSION,
    ES_PROPERTIES_MAGIC, FMT_PROPERTIES_AUDIO_MAGIC, FMT_PROPERTIES_VIDEO_MAGIC,
    MAX_NB_DIRECTORIES, PES_CUTTING_END_MARKER, PES_CUTTING_MAGIC,
};

/// One source file referenced by a script, pinned by a prefix CRC-32.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFileEntry {
    /// Source file path.
    pub path: PathBuf,
    /// Number of leading bytes covered by the fingerprint.
    pub crc_checked_bytes: u16,
    /// MPEG-2 CRC-32 of that prefix.
    pub crc32: u32,
}

impl SourceFileEntry {
    /// Re-computes the fingerprint of the on-disk file and compares it.
    pub fn verify(&self) -> Result<()> {
        let file = File::open(&self.path).map_err(|_| ScriptError::InvalidSource {
            path: self.path.to_string_lossy().into_owned(),
            reason: "file cannot be opened",
        })?;
        let mut crc = Crc32::new();
        let mut reader = BufReader::new(file).take(self.crc_checked_bytes as u64);
        let mut buf = [0u8; 8192];
        let mut total = 0usize;
        loop {
            let read = reader.read(&mut buf).map_err(ScriptError::Read)?;
            if read == 0 {
                break;
            }
            crc.update(&buf[..read]);
            total += read;
        }
        if total < self.crc_checked_bytes as usize {
            return Err(ScriptError::InvalidSource {
                path: self.path.to_string_lossy().into_owned(),
                reason: "file shorter than fingerprinted prefix",
            });
        }
        if crc.finalize() != self.crc32 {
            return Err(ScriptError::InvalidSource {
                path: self.path.to_string_lossy().into_owned(),
                reason: "checksum mismatch",
            });
        }
        Ok(())
    }
}

fn open_script(path: &Path) -> Result<BufReader<File>> {
    match File::open(path) {
        Ok(file) => Ok(BufReader::new(file)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(ScriptError::NoScript),
        Err(err) => Err(ScriptError::Read(err)),
    }
}

/// Parsed header preamble: version and directory table.
fn read_preamble(input: &mut BufReader<File>) -> Result<(u16, Vec<(u8, u64)>)> {
    let magic = input.read_u32::<BigEndian>()?;
    if magic != ESMS_MAGIC {
        return Err(ScriptError::Header);
    }
    let version = input.read_u16::<BigEndian>()?;
    if version != ESMS_VERSION {
        return Err(ScriptError::Version(version));
    }
    let completed = input.read_u8()?;
    if completed != 0x01 {
        return Err(ScriptError::Incomplete);
    }
    let nb_dirs = input.read_u8()? as usize;
    if nb_dirs > MAX_NB_DIRECTORIES {
        return Err(ScriptError::Header);
    }
    let mut dirs = Vec::with_capacity(nb_dirs);
    for _ in 0..nb_dirs {
        let id = input.read_u8()?;
        let offset = input.read_i64::<BigEndian>()?;
        if offset < 0 {
            return Err(ScriptError::Header);
        }
        dirs.push((id, offset as u64));
    }
    Ok((version, dirs))
}

fn directory_offset(dirs: &[(u8, u64)], id: u8) -> Option<u64> {
    dirs.iter().find(|(dir_id, _)| *dir_id == id).map(|(_, off)| *off)
}

fn read_es_properties(
    input: &mut BufReader<File>,
) -> Result<(EsProperties, Vec<SourceFileEntry>)> {
    let magic = input.read_u32::<BigEndian>()?;
    if magic != ES_PROPERTIES_MAGIC {
        return Err(ScriptError::Header);
    }

    let es_type_raw = input.read_u8()?;
    let es_type = EsType::from_u8(es_type_raw)
        .ok_or_else(|| ScriptError::Broken(format!("unknown ES type {es_type_raw}")))?;
    let coding_type_raw = input.read_u8()?;
    let coding_type = StreamCodingType::from_u8(coding_type_raw)
        .map_err(|_| ScriptError::Broken(format!("unknown coding type 0x{coding_type_raw:02X}")))?;
    if coding_type.es_type() != es_type {
        return Err(ScriptError::Broken(format!(
            "stream type mismatch: {:?} declared for {}",
            es_type,
            coding_type.name()
        )));
    }

    let pts_reference = input.read_u64::<BigEndian>()?;
    let bitrate = input.read_u32::<BigEndian>()?;
    let pts_final = input.read_u64::<BigEndian>()?;
    let scripting_flags = ScriptFlags(input.read_u64::<BigEndian>()?);

    let nb_source_files = input.read_u8()? as usize;
    let mut source_files = Vec::with_capacity(nb_source_files);
    for _ in 0..nb_source_files {
        let path_len = input.read_u16::<BigEndian>()? as usize;
        let mut path_bytes = vec![0u8; path_len];
        input.read_exact(&mut path_bytes)?;
        let path = String::from_utf8(path_bytes)
            .map_err(|_| ScriptError::Broken("non-UTF-8 source path".to_string()))?;
        let crc_checked_bytes = input.read_u16::<BigEndian>()?;
        let crc32 = input.read_u32::<BigEndian>()?;
        source_files.push(SourceFileEntry {
            path: PathBuf::from(path),
            crc_checked_bytes,
            crc32,
        });
    }

    Ok((
        EsProperties {
            es_type,
            coding_type,
            pts_reference,
            bitrate,
            pts_final,
            scripting_flags,
        },
        source_files,
    ))
}

fn read_fmt_properties(
    input: &mut BufReader<File>,
    coding_type: StreamCodingType,
) -> Result<FmtProperties> {
    let magic = input.read_u64::<BigEndian>()?;
    match magic {
        FMT_PROPERTIES_VIDEO_MAGIC => {
            let packed = input.read_u8()?;
            let profile_idc = input.read_u8()?;
            let level_idc = input.read_u8()?;
            let flags = input.read_u8()?;
            let h264 = if coding_type == StreamCodingType::Avc {
                Some(H264SpecProperties {
                    constraint_flags: input.read_u8()?,
                    cpb_size: input.read_u32::<BigEndian>()?,
                    bitrate: input.read_u32::<BigEndian>()?,
                })
            } else {
                None
            };
            Ok(FmtProperties::Video(VideoProperties {
                video_format: HdmvVideoFormat::from_u8(packed >> 4),
                frame_rate: FrameRateCode::from_u8(packed & 0x0F),
                profile_idc,
                level_idc,
                still_picture: flags & 0x80 != 0,
                h264,
            }))
        }
        FMT_PROPERTIES_AUDIO_MAGIC => {
            let packed = input.read_u8()?;
            let bit_depth = input.read_u8()?;
            let _reserved = input.read_u8()?;
            let ac3 = if coding_type.is_ac3_family() {
                let hi = input.read_u8()? as u32;
                let mid = input.read_u8()? as u32;
                let lo = input.read_u8()? as u32;
                let bits = (hi << 16) | (mid << 8) | lo;
                Some(Ac3SpecProperties {
                    sample_rate_code: ((bits >> 21) & 0x07) as u8,
                    bsid: ((bits >> 16) & 0x1F) as u8,
                    bit_rate_code: ((bits >> 10) & 0x3F) as u8,
                    surround_mode: ((bits >> 8) & 0x03) as u8,
                    bsmod: ((bits >> 5) & 0x07) as u8,
                    num_channels: ((bits >> 1) & 0x0F) as u8,
                    full_svc: bits & 0x01 != 0,
                })
            } else {
                None
            };
            let sample_rate = match packed & 0x0F {
                0x01 => SampleRateCode::R48000,
                0x04 => SampleRateCode::R96000,
                0x05 => SampleRateCode::R192000,
                other => {
                    return Err(ScriptError::Broken(format!(
                        "unknown sample rate code {other}"
                    )))
                }
            };
            Ok(FmtProperties::Audio(AudioProperties {
                audio_format: packed >> 4,
                sample_rate,
                bit_depth,
                ac3,
            }))
        }
        _ => Err(ScriptError::Header),
    }
}

fn read_data_blocks(input: &mut BufReader<File>) -> Result<Vec<Vec<u8>>> {
    let magic = input.read_u32::<BigEndian>()?;
    if magic != DATA_BLOCKS_MAGIC {
        return Err(ScriptError::Header);
    }
    let nb_blocks = input.read_u8()? as usize;
    let mut blocks = Vec::with_capacity(nb_blocks);
    for _ in 0..nb_blocks {
        let len = input.read_u32::<BigEndian>()? as usize;
        let mut block = vec![0u8; len];
        input.read_exact(&mut block)?;
        blocks.push(block);
    }
    Ok(blocks)
}

/// Tests validity of a script file and its compatibility with the muxing
/// parameters, re-fingerprinting every referenced source file.
///
/// Returns the script version on success.
pub fn validate_script(path: &Path, required_flags: ScriptFlags) -> Result<u16> {
    let mut input = open_script(path)?;
    let (version, dirs) = read_preamble(&mut input)?;

    let props_offset =
        directory_offset(&dirs, directory::ES_PROPERTIES).ok_or(ScriptError::Header)?;
    input.seek(SeekFrom::Start(props_offset))?;
    let (properties, source_files) = read_es_properties(&mut input)?;

    if !properties.scripting_flags.covers(required_flags) {
        return Err(ScriptError::IncompatibleFlags {
            recorded: properties.scripting_flags.0,
            required: required_flags.0,
        });
    }

    // PES cutting presence is part of structural validity.
    if directory_offset(&dirs, directory::PES_CUTTING).is_none() {
        return Err(ScriptError::Incomplete);
    }

    for entry in &source_files {
        entry.verify()?;
    }

    debug!(script = %path.display(), version, "valid ESMS script");
    Ok(version)
}

/// Open script reader: eager header sections, lazy PES frame delivery.
pub struct EsmsReader {
    input: BufReader<File>,
    properties: EsProperties,
    fmt_properties: FmtProperties,
    source_files: Vec<SourceFileEntry>,
    data_blocks: Vec<Vec<u8>>,
    end_reached: bool,
}

impl EsmsReader {
    /// Opens a script, parses every header section and seeks to the first
    /// PES frame.
    pub fn open(path: &Path) -> Result<Self> {
        let mut input = open_script(path)?;
        let (_, dirs) = read_preamble(&mut input)?;

        let props_offset =
            directory_offset(&dirs, directory::ES_PROPERTIES).ok_or(ScriptError::Header)?;
        input.seek(SeekFrom::Start(props_offset))?;
        let (properties, source_files) = read_es_properties(&mut input)?;

        let fmt_properties = match directory_offset(&dirs, directory::ES_FMT_PROPERTIES) {
            Some(offset) => {
                input.seek(SeekFrom::Start(offset))?;
                read_fmt_properties(&mut input, properties.coding_type)?
            }
            None => FmtProperties::None,
        };

        let data_blocks = match directory_offset(&dirs, directory::ES_DATA_BLOCKS) {
            Some(offset) => {
                input.seek(SeekFrom::Start(offset))?;
                read_data_blocks(&mut input)?
            }
            None => Vec::new(),
        };

        let cutting_offset =
            directory_offset(&dirs, directory::PES_CUTTING).ok_or(ScriptError::Incomplete)?;
        input.seek(SeekFrom::Start(cutting_offset))?;
        let magic = input.read_u32::<BigEndian>()?;
        if magic != PES_CUTTING_MAGIC {
            return Err(ScriptError::Header);
        }

        Ok(EsmsReader {
            input,
            properties,
            fmt_properties,
            source_files,
            data_blocks,
            end_reached: false,
        })
    }

    /// "ES properties" section content.
    pub fn properties(&self) -> &EsProperties {
        &self.properties
    }

    /// "ES format properties" section content.
    pub fn fmt_properties(&self) -> &FmtProperties {
        &self.fmt_properties
    }

    /// Referenced source files.
    pub fn source_files(&self) -> &[SourceFileEntry] {
        &self.source_files
    }

    /// Data blocks usable by `AddDataBlock` commands.
    pub fn data_blocks(&self) -> &[Vec<u8>] {
        &self.data_blocks
    }

    /// True once the end marker has been consumed.
    pub fn end_reached(&self) -> bool {
        self.end_reached
    }

    /// Delivers the next PES frame, or `None` at the end marker.
    pub fn next_frame(&mut self) -> Result<Option<EsmsPesFrame>> {
        if self.end_reached {
            return Ok(None);
        }
        let first_byte = self.input.read_u8()?;
        if first_byte == PES_CUTTING_END_MARKER {
            self.end_reached = true;
            return Ok(None);
        }
        let frame =
            EsmsPesFrame::read_from(&mut self.input, first_byte, self.properties.coding_type)?;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{BuildCommand, InsertMode};
    use crate::writer::EsmsWriter;
    use std::io::Write as _;

    fn write_source(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content).unwrap();
        path
    }

    fn sample_properties(source_flags: ScriptFlags) -> EsProperties {
        EsProperties {
            es_type: EsType::Audio,
            coding_type: StreamCodingType::Ac3,
            pts_reference: 900,
            bitrate: 640_000,
            pts_final: 90_000,
            scripting_flags: source_flags,
        }
    }

    fn build_script(dir: &Path, source: &Path, flags: ScriptFlags) -> PathBuf {
        let script_path = dir.join("track.ess");
        let mut writer = EsmsWriter::create(&script_path).unwrap();
        writer.add_source_file(source, 4096).unwrap();
        writer.set_properties(sample_properties(flags));
        writer.set_fmt_properties(FmtProperties::Audio(AudioProperties {
            audio_format: 0x3,
            sample_rate: SampleRateCode::R48000,
            bit_depth: 0,
            ac3: Some(Ac3SpecProperties {
                sample_rate_code: 0,
                bsid: 8,
                bit_rate_code: 0x0E,
                surround_mode: 0,
                bsmod: 0,
                num_channels: 0x07,
                full_svc: false,
            }),
        }));
        let block_id = writer.add_data_block(vec![0xCA, 0xFE]).unwrap();
        for idx in 0..3u64 {
            writer
                .write_pes_frame(&EsmsPesFrame {
                    extension_frame: idx % 2 == 1,
                    pts: 900 + idx * 2880,
                    dts: None,
                    ext_data: None,
                    size: 16,
                    commands: vec![
                        BuildCommand::AddPayload {
                            file_id: 0,
                            offset: 0,
                            src_offset: idx * 14,
                            size: 14,
                        },
                        BuildCommand::AddDataBlock {
                            block_id,
                            offset: 14,
                            mode: InsertMode::Overwrite,
                        },
                    ],
                })
                .unwrap();
        }
        writer.finalize().unwrap();
        script_path
    }

    #[test]
    fn test_round_trip_and_validation() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "track.ac3", &[0x0B; 256]);
        let script = build_script(dir.path(), &source, ScriptFlags::SEC_STREAM);

        validate_script(&script, ScriptFlags::default()).unwrap();
        validate_script(&script, ScriptFlags::SEC_STREAM).unwrap();

        let mut reader = EsmsReader::open(&script).unwrap();
        assert_eq!(reader.properties().coding_type, StreamCodingType::Ac3);
        assert_eq!(reader.properties().bitrate, 640_000);
        assert_eq!(reader.data_blocks(), &[vec![0xCA, 0xFE]]);
        assert!(matches!(
            reader.fmt_properties(),
            FmtProperties::Audio(audio) if audio.ac3.unwrap().bsid == 8
        ));

        let mut frames = Vec::new();
        while let Some(frame) = reader.next_frame().unwrap() {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 3);
        assert!(!frames[0].extension_frame);
        assert!(frames[1].extension_frame);
        assert_eq!(frames[2].pts, 900 + 2 * 2880);
        assert_eq!(frames[0].commands.len(), 2);
        assert!(reader.end_reached());
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_missing_script() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            validate_script(&dir.path().join("absent.ess"), ScriptFlags::default()),
            Err(ScriptError::NoScript)
        ));
    }

    #[test]
    fn test_incompatible_flags() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "track.ac3", &[0x0B; 64]);
        let script = build_script(dir.path(), &source, ScriptFlags::default());
        assert!(matches!(
            validate_script(&script, ScriptFlags::SEC_STREAM),
            Err(ScriptError::IncompatibleFlags { .. })
        ));
    }

    #[test]
    fn test_source_crc_mismatch_triggers_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "track.ac3", &[0x0B; 64]);
        let script = build_script(dir.path(), &source, ScriptFlags::default());

        // Mutate the fingerprinted prefix.
        write_source(dir.path(), "track.ac3", &[0x77; 64]);
        assert!(matches!(
            validate_script(&script, ScriptFlags::default()),
            Err(ScriptError::InvalidSource { .. })
        ));
    }

    #[test]
    fn test_truncated_header_is_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("partial.ess");
        let source = write_source(dir.path(), "track.ac3", &[0x0B; 64]);
        // Writer dropped without finalize: completed marker stays zero.
        let mut writer = EsmsWriter::create(&script_path).unwrap();
        writer.add_source_file(&source, 64).unwrap();
        writer.set_properties(sample_properties(ScriptFlags::default()));
        drop(writer);
        assert!(matches!(
            validate_script(&script_path, ScriptFlags::default()),
            Err(ScriptError::Incomplete)
        ));
    }

    #[test]
    fn test_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(dir.path(), "junk.ess", b"JUNKJUNKJUNKJUNK");
        assert!(matches!(
            validate_script(&path, ScriptFlags::default()),
            Err(ScriptError::Header)
        ));
    }
}
