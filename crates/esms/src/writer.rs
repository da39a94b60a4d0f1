//! ESMS file generation.
//!
//! The writer streams PES frames to disk as the parser walks the source
//! bitstream, then lands the small header sections and the directory in a
//! finalize pass. A script missing the `completed` marker is rejected by
//! validation, so a crashed build never yields a reusable script.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, WriteBytesExt};
use tracing::debug;

use bitio::Crc32;

use crate::pes_frame::EsmsPesFrame;
use crate::properties::{EsProperties, FmtProperties};
use crate::reader::SourceFileEntry;
use crate::{
    directory, Result, ScriptError, DATA_BLOCKS_MAGIC, ESMS_MAGIC, ESMS_VERSION,
    ES_PROPERTIES_MAGIC, FMT_PROPERTIES_AUDIO_MAGIC, FMT_PROPERTIES_VIDEO_MAGIC,
    MAX_CRC_CHECKED_BYTES, MAX_NB_DATA_BLOCKS, MAX_NB_DIRECTORIES, MAX_NB_SOURCE_FILES,
    PES_CUTTING_END_MARKER, PES_CUTTING_MAGIC,
};

/// Byte offset of the `completed` marker.
const COMPLETED_OFFSET: u64 = 6;
/// Byte offset of the directory table.
const DIRECTORY_OFFSET: u64 = 7;
/// Total reserved header size: magic + version + completed + directory.
const HEADER_SIZE: u64 = DIRECTORY_OFFSET + 1 + (MAX_NB_DIRECTORIES as u64) * 9;

/// Default source fingerprint prefix length.
pub const DEFAULT_CRC_CHECKED_BYTES: usize = 4096;

/// Streaming ESMS script writer.
pub struct EsmsWriter {
    out: BufWriter<File>,
    script_path: PathBuf,
    dirs: Vec<(u8, u64)>,
    source_files: Vec<SourceFileEntry>,
    data_blocks: Vec<Vec<u8>>,
    properties: Option<EsProperties>,
    fmt_properties: FmtProperties,
    pes_cutting_open: bool,
    nb_frames: u64,
}

impl EsmsWriter {
    /// Creates the script file and reserves the header region.
    pub fn create(script_path: &Path) -> Result<Self> {
        let file = File::create(script_path)?;
        let mut out = BufWriter::new(file);

        out.write_u32::<BigEndian>(ESMS_MAGIC)?;
        out.write_u16::<BigEndian>(ESMS_VERSION)?;
        /* [u8 completed] // patched to 0x01 by finalize() */
        out.write_u8(0x00)?;
        /* Zeroed directory table, patched by finalize(). */
        out.write_all(&[0u8; (HEADER_SIZE - DIRECTORY_OFFSET) as usize])?;

        Ok(EsmsWriter {
            out,
            script_path: script_path.to_path_buf(),
            dirs: Vec::new(),
            source_files: Vec::new(),
            data_blocks: Vec::new(),
            properties: None,
            fmt_properties: FmtProperties::None,
            pes_cutting_open: false,
            nb_frames: 0,
        })
    }

    /// Registers a source file, fingerprinting its first `crc_len` bytes
    /// (clamped to the file size and the 64 KiB format bound). Returns the
    /// file index used by `AddPayload` commands.
    pub fn add_source_file(&mut self, path: &Path, crc_len: usize) -> Result<u8> {
        if self.source_files.len() >= MAX_NB_SOURCE_FILES {
            return Err(ScriptError::Memory("too many source files"));
        }

        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let crc_len = crc_len.min(MAX_CRC_CHECKED_BYTES).min(file_len as usize);

        let mut crc = Crc32::new();
        let mut reader = BufReader::new(file).take(crc_len as u64);
        let mut buf = [0u8; 8192];
        loop {
            let read = reader.read(&mut buf)?;
            if read == 0 {
                break;
            }
            crc.update(&buf[..read]);
        }

        let id = self.source_files.len() as u8;
        self.source_files.push(SourceFileEntry {
            path: path.to_path_buf(),
            crc_checked_bytes: crc_len as u16,
            crc32: crc.finalize(),
        });
        Ok(id)
    }

    /// Registers a raw data block, returning its index.
    pub fn add_data_block(&mut self, block: Vec<u8>) -> Result<u8> {
        if self.data_blocks.len() >= MAX_NB_DATA_BLOCKS {
            return Err(ScriptError::Memory("too many data blocks"));
        }
        let id = self.data_blocks.len() as u8;
        self.data_blocks.push(block);
        Ok(id)
    }

    /// Sets the "ES properties" section content.
    pub fn set_properties(&mut self, properties: EsProperties) {
        self.properties = Some(properties);
    }

    /// Sets the "ES format properties" section content.
    pub fn set_fmt_properties(&mut self, fmt: FmtProperties) {
        self.fmt_properties = fmt;
    }

    /// Number of PES frames written so far.
    pub fn nb_frames(&self) -> u64 {
        self.nb_frames
    }

    /// Appends one PES frame to the "PES cutting" section.
    pub fn write_pes_frame(&mut self, frame: &EsmsPesFrame) -> Result<()> {
        if !self.pes_cutting_open {
            let offset = self.out.stream_position()?;
            self.dirs.push((directory::PES_CUTTING, offset));
            self.out.write_u32::<BigEndian>(PES_CUTTING_MAGIC)?;
            self.pes_cutting_open = true;
        }
        frame.write_to(&mut self.out)?;
        self.nb_frames += 1;
        Ok(())
    }

    fn write_es_properties(&mut self) -> Result<()> {
        let properties = self
            .properties
            .ok_or(ScriptError::Memory("missing ES properties"))?;

        let offset = self.out.stream_position()?;
        self.dirs.push((directory::ES_PROPERTIES, offset));

        self.out.write_u32::<BigEndian>(ES_PROPERTIES_MAGIC)?;
        self.out.write_u8(properties.es_type as u8)?;
        self.out.write_u8(properties.coding_type as u8)?;
        self.out.write_u64::<BigEndian>(properties.pts_reference)?;
        self.out.write_u32::<BigEndian>(properties.bitrate)?;
        self.out.write_u64::<BigEndian>(properties.pts_final)?;
        self.out.write_u64::<BigEndian>(properties.scripting_flags.0)?;

        self.out.write_u8(self.source_files.len() as u8)?;
        for entry in &self.source_files {
            let path = entry.path.to_string_lossy();
            let path_bytes = path.as_bytes();
            if path_bytes.len() > u16::MAX as usize {
                return Err(ScriptError::Memory("source path too long"));
            }
            self.out.write_u16::<BigEndian>(path_bytes.len() as u16)?;
            self.out.write_all(path_bytes)?;
            self.out.write_u16::<BigEndian>(entry.crc_checked_bytes)?;
            self.out.write_u32::<BigEndian>(entry.crc32)?;
        }
        Ok(())
    }

    fn write_fmt_properties(&mut self) -> Result<()> {
        match &self.fmt_properties {
            FmtProperties::None => Ok(()),
            FmtProperties::Video(video) => {
                let offset = self.out.stream_position()?;
                self.dirs.push((directory::ES_FMT_PROPERTIES, offset));
                self.out.write_u64::<BigEndian>(FMT_PROPERTIES_VIDEO_MAGIC)?;
                /* [u4 video_format] [u4 frame_rate] */
                self.out
                    .write_u8(((video.video_format as u8) << 4) | video.frame_rate as u8)?;
                self.out.write_u8(video.profile_idc)?;
                self.out.write_u8(video.level_idc)?;
                /* [b1 still_picture] [v7 reserved] */
                self.out.write_u8((video.still_picture as u8) << 7)?;
                if let Some(h264) = &video.h264 {
                    self.out.write_u8(h264.constraint_flags)?;
                    self.out.write_u32::<BigEndian>(h264.cpb_size)?;
                    self.out.write_u32::<BigEndian>(h264.bitrate)?;
                }
                Ok(())
            }
            FmtProperties::Audio(audio) => {
                let offset = self.out.stream_position()?;
                self.dirs.push((directory::ES_FMT_PROPERTIES, offset));
                self.out.write_u64::<BigEndian>(FMT_PROPERTIES_AUDIO_MAGIC)?;
                /* [u4 audio_format] [u4 sample_rate] */
                self.out
                    .write_u8((audio.audio_format << 4) | audio.sample_rate as u8)?;
                self.out.write_u8(audio.bit_depth)?;
                /* [v8 reserved] */
                self.out.write_u8(0x00)?;
                if let Some(ac3) = &audio.ac3 {
                    /* [u3 sample_rate_code] [u5 bsid] [u6 bit_rate_code]
                    [u2 surround_mode] [u3 bsmod] [u4 num_channels]
                    [b1 full_svc] */
                    let packed: u32 = ((ac3.sample_rate_code as u32 & 0x07) << 21)
                        | ((ac3.bsid as u32 & 0x1F) << 16)
                        | ((ac3.bit_rate_code as u32 & 0x3F) << 10)
                        | ((ac3.surround_mode as u32 & 0x03) << 8)
                        | ((ac3.bsmod as u32 & 0x07) << 5)
                        | ((ac3.num_channels as u32 & 0x0F) << 1)
                        | ac3.full_svc as u32;
                    self.out.write_u8((packed >> 16) as u8)?;
                    self.out.write_u8((packed >> 8) as u8)?;
                    self.out.write_u8(packed as u8)?;
                }
                Ok(())
            }
        }
    }

    fn write_data_blocks(&mut self) -> Result<()> {
        if self.data_blocks.is_empty() {
            return Ok(());
        }
        let offset = self.out.stream_position()?;
        self.dirs.push((directory::ES_DATA_BLOCKS, offset));
        self.out.write_u32::<BigEndian>(DATA_BLOCKS_MAGIC)?;
        self.out.write_u8(self.data_blocks.len() as u8)?;
        for block in &self.data_blocks {
            self.out.write_u32::<BigEndian>(block.len() as u32)?;
            self.out.write_all(block)?;
        }
        Ok(())
    }

    /// Terminates the PES cutting sequence, writes the header sections,
    /// patches the directory and the `completed` marker.
    pub fn finalize(mut self) -> Result<()> {
        if !self.pes_cutting_open {
            // A script without a single PES frame still carries the section
            // so readers can detect emptiness rather than corruption.
            let offset = self.out.stream_position()?;
            self.dirs.push((directory::PES_CUTTING, offset));
            self.out.write_u32::<BigEndian>(PES_CUTTING_MAGIC)?;
        }
        self.out.write_u8(PES_CUTTING_END_MARKER)?;

        self.write_es_properties()?;
        self.write_fmt_properties()?;
        self.write_data_blocks()?;

        if self.dirs.len() > MAX_NB_DIRECTORIES {
            return Err(ScriptError::Memory("too many directory entries"));
        }

        self.out.seek(SeekFrom::Start(COMPLETED_OFFSET))?;
        self.out.write_u8(0x01)?;
        self.out.write_u8(self.dirs.len() as u8)?;
        for (id, offset) in &self.dirs {
            self.out.write_u8(*id)?;
            self.out.write_i64::<BigEndian>(*offset as i64)?;
        }
        self.out.flush()?;

        debug!(
            script = %self.script_path.display(),
            frames = self.nb_frames,
            "finalized ESMS script"
        );
        Ok(())
    }
}
