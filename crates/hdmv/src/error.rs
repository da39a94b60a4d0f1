use thiserror::Error;

/// Errors raised by the HDMV pipeline.
#[derive(Error, Debug)]
pub enum HdmvError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Script generation failed.
    #[error("script error: {0}")]
    Script(#[from] esms::ScriptError),

    /// Missing `PG` magic at a segment boundary.
    #[error("invalid segment magic at offset {0}")]
    InvalidSegmentMagic(u64),

    /// A segment header declared a size running past the end of file.
    #[error("truncated segment at offset {0}")]
    TruncatedSegment(u64),

    /// Reserved segment type byte.
    #[error("unknown segment type 0x{0:02X}")]
    UnknownSegmentType(u8),

    /// The stream contains no display set.
    #[error("empty HDMV stream")]
    EmptyStream,

    /// Quantizer misuse (target outside 2..=256 colors).
    #[error("invalid palette target size {0}")]
    InvalidPaletteTarget(usize),

    /// An operation the pipeline intentionally does not implement
    /// (palette→RGBA back-conversion, RLE decompression for re-entering
    /// quantization).
    #[error("unsupported HDMV operation: {0}")]
    Unsupported(&'static str),
}
