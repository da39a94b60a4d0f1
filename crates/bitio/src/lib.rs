//! Bit-level I/O primitives shared by the codec parsers and the script
//! pipeline.
//!
//! Provides an MSB-first [`BitReader`] with Exp-Golomb support (H.264
//! `ue(v)`/`se(v)`), a matching [`BitWriter`], and the MPEG-2 CRC-32 used by
//! PSI sections and source-file fingerprinting.

pub mod crc32;
pub mod reader;
pub mod writer;

pub use crc32::{Crc32, mpeg2_crc32};
pub use reader::BitReader;
pub use writer::BitWriter;

use thiserror::Error;

/// Errors raised by bit-level reads.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitIoError {
    /// Not enough bits left in the underlying buffer.
    #[error("unexpected end of bitstream: requested {requested} bits, {available} available")]
    UnexpectedEof {
        /// Number of bits requested.
        requested: usize,
        /// Number of bits remaining.
        available: usize,
    },

    /// A single read or write wider than 64 bits was requested.
    #[error("unsupported field width: {0} bits")]
    FieldTooWide(usize),

    /// An Exp-Golomb code exceeded 32 leading zero bits.
    #[error("malformed Exp-Golomb code (more than 32 leading zeros)")]
    ExpGolombOverflow,
}

/// Result type for bit-level operations.
pub type Result<T> = std::result::Result<T, BitIoError>;
