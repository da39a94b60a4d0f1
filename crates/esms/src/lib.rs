//! Elementary Stream Modification Script (ESMS) format.
//!
//! An ESMS file is the compact, deterministic description of how to rebuild
//! the PES packets of one elementary stream from its source file(s) without
//! re-parsing the bitstream: per-PES timings, source byte ranges, in-line
//! modifications and padding, expressed as a short list of build commands.
//! Codec parsers produce one script per track; the muxer validates and
//! replays it on every subsequent run.
//!
//! File layout (all integers big-endian):
//!
//! ```text
//! magic 'ESMS' : u32        0x45534D53
//! version      : u16        0x0001
//! completed    : u8         0x01 once finalized
//! directory    : u8 count, count × (u8 id, i64 offset), 10 slots reserved
//! sections     : ES properties, PES cutting, format properties, data blocks
//! ```

pub mod commands;
pub mod error;
pub mod pes_frame;
pub mod properties;
pub mod reader;
pub mod settings;
pub mod writer;

pub use commands::{apply_commands, BuildCommand, InsertMode, PayloadSource};
pub use error::ScriptError;
pub use pes_frame::{EsmsPesFrame, H264ExtData, PesFrameExtData};
pub use properties::{
    Ac3SpecProperties, AudioProperties, EsProperties, FmtProperties, FrameRateCode,
    H264SpecProperties, HdmvVideoFormat, SampleRateCode, ScriptFlags, VideoProperties,
};
pub use reader::{validate_script, EsmsReader, SourceFileEntry};
pub use settings::{ParsingOptions, ParsingSettings};
pub use writer::EsmsWriter;

/// ESMS file header magic, `"ESMS"`.
pub const ESMS_MAGIC: u32 = 0x4553_4D53;
/// Current ESMS format version.
pub const ESMS_VERSION: u16 = 0x0001;

/// "ES properties" section magic, `"ESPR"`.
pub const ES_PROPERTIES_MAGIC: u32 = 0x4553_5052;
/// "PES cutting" section magic, `"PESC"`.
pub const PES_CUTTING_MAGIC: u32 = 0x5045_5343;
/// Video "format properties" section magic, `"CSPMVIDO"`.
pub const FMT_PROPERTIES_VIDEO_MAGIC: u64 = 0x4353_504D_5649_444F;
/// Audio "format properties" section magic, `"CSPMAUDO"`.
pub const FMT_PROPERTIES_AUDIO_MAGIC: u64 = 0x4353_504D_4155_444F;
/// "Data blocks definition" section magic, `"DTBK"`.
pub const DATA_BLOCKS_MAGIC: u32 = 0x4454_424B;

/// "PES cutting" end-of-frames marker byte.
pub const PES_CUTTING_END_MARKER: u8 = 0xFF;

/// Directory ids.
pub mod directory {
    /// ES properties section.
    pub const ES_PROPERTIES: u8 = 0x01;
    /// PES cutting section.
    pub const PES_CUTTING: u8 = 0x02;
    /// ES format properties section.
    pub const ES_FMT_PROPERTIES: u8 = 0x03;
    /// Data blocks definition section.
    pub const ES_DATA_BLOCKS: u8 = 0x04;
}

/// Maximum number of directory entries.
pub const MAX_NB_DIRECTORIES: usize = 10;
/// Maximum number of source files one script may reference.
pub const MAX_NB_SOURCE_FILES: usize = 8;
/// Maximum number of data blocks.
pub const MAX_NB_DATA_BLOCKS: usize = 255;
/// Maximum number of build commands per PES frame.
pub const MAX_NB_COMMANDS: usize = 32;
/// Upper bound on the CRC-32 fingerprint prefix length.
pub const MAX_CRC_CHECKED_BYTES: usize = 64 * 1024;

/// Result type for script operations.
pub type Result<T> = std::result::Result<T, ScriptError>;
