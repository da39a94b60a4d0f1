use thiserror::Error;

/// Errors raised by the LPCM analyzer.
#[derive(Error, Debug)]
pub enum LpcmError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Script generation failed.
    #[error("script error: {0}")]
    Script(#[from] esms::ScriptError),

    /// Missing or malformed RIFF/WAVE signature.
    #[error("not a RIFF/WAVE file")]
    InvalidSignature,

    /// A mandatory chunk is missing.
    #[error("missing WAVE chunk '{0}'")]
    MissingChunk(&'static str),

    /// Only integer PCM data is accepted.
    #[error("unsupported WAVE format tag 0x{0:04X} (PCM required)")]
    UnsupportedFormatTag(u16),

    /// Sample rate outside the BD LPCM set (48/96/192 kHz).
    #[error("unsupported sample rate {0} Hz")]
    UnsupportedSampleRate(u32),

    /// Unsupported channel count.
    #[error("unsupported channel count {0}")]
    UnsupportedChannelCount(u16),

    /// Unsupported bit depth.
    #[error("unsupported bit depth {0}")]
    UnsupportedBitDepth(u16),

    /// The data chunk holds no audio.
    #[error("empty audio stream")]
    EmptyStream,
}
