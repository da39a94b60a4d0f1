use thiserror::Error;

/// Errors raised by the AC-3 family analyzer.
#[derive(Error, Debug)]
pub enum Ac3Error {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Script generation failed.
    #[error("script error: {0}")]
    Script(#[from] esms::ScriptError),

    /// Bit-level parsing ran out of data.
    #[error("bitstream error: {0}")]
    Bits(#[from] bitio::BitIoError),

    /// No recognizable syncword at the expected frame boundary.
    #[error("syncword not found at offset {0}")]
    SyncNotFound(u64),

    /// Sample rate outside the BDAV set.
    #[error("unsupported sample rate code {0}")]
    UnsupportedSampleRate(u8),

    /// Reserved or out-of-range frame size code.
    #[error("invalid frmsizecod {0}")]
    InvalidFrameSizeCode(u8),

    /// Reserved bsid value.
    #[error("unsupported bsid {0}")]
    UnsupportedBsid(u8),

    /// A frame header declared a size running past the end of file.
    #[error("truncated frame at offset {0}")]
    TruncatedFrame(u64),

    /// The stream contains no complete frame.
    #[error("empty audio stream")]
    EmptyStream,
}
