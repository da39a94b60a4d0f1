use thiserror::Error;

/// Errors raised by the H.264 analyzer.
#[derive(Error, Debug)]
pub enum H264Error {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Script generation failed.
    #[error("script error: {0}")]
    Script(#[from] esms::ScriptError),

    /// Bit-level parsing ran out of data.
    #[error("bitstream error: {0}")]
    Bits(#[from] bitio::BitIoError),

    /// The stream carries no SPS before the first slice.
    #[error("missing sequence parameter set")]
    MissingSps,

    /// No VUI timing information and no `--fps` override.
    #[error("no frame rate available (stream lacks VUI timing, use --fps)")]
    MissingFrameRate,

    /// An SPS field combination this muxer does not handle.
    #[error("unsupported SPS: {0}")]
    UnsupportedSps(&'static str),

    /// An fps/aspect override was requested on an SPS without VUI.
    #[error("cannot patch SPS without VUI parameters")]
    PatchWithoutVui,

    /// The stream contains no access unit.
    #[error("empty video stream")]
    EmptyStream,
}
