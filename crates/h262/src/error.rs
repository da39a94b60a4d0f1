use thiserror::Error;

/// Errors raised by the H.262 analyzer.
#[derive(Error, Debug)]
pub enum H262Error {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Script generation failed.
    #[error("script error: {0}")]
    Script(#[from] esms::ScriptError),

    /// Bit-level parsing ran out of data.
    #[error("bitstream error: {0}")]
    Bits(#[from] bitio::BitIoError),

    /// The stream does not start with a sequence header.
    #[error("missing sequence header")]
    MissingSequenceHeader,

    /// Reserved frame-rate code.
    #[error("invalid frame_rate_code {0}")]
    InvalidFrameRate(u8),

    /// A picture appeared before any sequence header.
    #[error("picture at offset {0} precedes the first sequence header")]
    PictureBeforeSequence(u64),

    /// The stream contains no picture.
    #[error("empty video stream")]
    EmptyStream,
}
