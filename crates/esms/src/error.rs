use thiserror::Error;

/// Errors raised by ESMS validation, parsing and generation.
#[derive(Error, Debug)]
pub enum ScriptError {
    /// The script file does not exist.
    #[error("no script file")]
    NoScript,

    /// An I/O error occurred while reading or writing a script.
    #[error("script I/O error: {0}")]
    Read(#[from] std::io::Error),

    /// The file header magic is wrong or a section magic did not match.
    #[error("invalid script header")]
    Header,

    /// Unsupported format version.
    #[error("unsupported script version 0x{0:04X}")]
    Version(u16),

    /// The script was never finalized.
    #[error("incomplete script file")]
    Incomplete,

    /// The recorded scripting flags do not cover the required ones.
    #[error("incompatible script flags: recorded 0x{recorded:X}, required 0x{required:X}")]
    IncompatibleFlags {
        /// Flags stored in the script.
        recorded: u64,
        /// Flags the current mux settings require.
        required: u64,
    },

    /// A referenced source file is missing or its fingerprint changed.
    #[error("invalid source file '{path}': {reason}")]
    InvalidSource {
        /// Source file path as recorded in the script.
        path: String,
        /// Human-readable mismatch cause.
        reason: &'static str,
    },

    /// A declared size exceeds the format's sanity limits.
    #[error("script memory limit exceeded: {0}")]
    Memory(&'static str),

    /// Structurally invalid script content.
    #[error("broken script: {0}")]
    Broken(String),

    /// Unknown build command type byte.
    #[error("unknown script command type 0x{0:02X}")]
    UnknownCommand(u8),

    /// A PES frame declared more commands than the format allows.
    #[error("too many script commands ({0})")]
    TooManyCommands(usize),

    /// A build command addressed bytes outside the PES payload.
    #[error("command range out of payload bounds: offset {offset}, len {len}, payload {payload}")]
    CommandOutOfBounds {
        /// Destination offset.
        offset: usize,
        /// Region length.
        len: usize,
        /// Payload size.
        payload: usize,
    },
}
