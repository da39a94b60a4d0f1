use thiserror::Error;

/// Compliance check classes; each can be independently downgraded to a
/// warning through the mux options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplianceClass {
    /// Generic stream compliance.
    Compliance,
    /// Blu-ray Disc constraints.
    BdCompliance,
    /// T-STD buffering constraints.
    StdCompliance,
    /// BDAV-STD buffering constraints.
    BdavStdCompliance,
}

impl ComplianceClass {
    /// Configuration name of the class.
    pub fn name(self) -> &'static str {
        match self {
            ComplianceClass::Compliance => "COMPLIANCE",
            ComplianceClass::BdCompliance => "BDCOMPLIANCE",
            ComplianceClass::StdCompliance => "STDCOMPLIANCE",
            ComplianceClass::BdavStdCompliance => "BDAVSTDCOMPLIANCE",
        }
    }
}

/// Errors raised by the muxer core.
#[derive(Error, Debug)]
pub enum MuxError {
    /// An I/O error occurred (always fatal).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Script validation or reading failed.
    #[error("script error: {0}")]
    Script(#[from] esms::ScriptError),

    /// A codec parser failed to build a script.
    #[error("script rebuild failed for '{path}': {message}")]
    Parser {
        /// Source ES path.
        path: String,
        /// Parser diagnostic.
        message: String,
    },

    /// TS framing error.
    #[error("framing error: {0}")]
    Framing(#[from] ts::TsError),

    /// Buffering model violation escalated to an error.
    #[error("buffering model error: {0}")]
    BufModel(#[from] bdav_std::BufModelError),

    /// An armed compliance class was violated.
    #[error("{} violation: {message}", class.name())]
    Compliance {
        /// Violated class.
        class: ComplianceClass,
        /// Diagnostic.
        message: String,
    },

    /// Invalid configuration (META file or CLI), fatal at startup.
    #[error("configuration error (line {line}): {message}")]
    Config {
        /// META file line (0 when not line-bound).
        line: usize,
        /// Diagnostic.
        message: String,
    },

    /// PID allocation failed.
    #[error("PID allocation error: {0}")]
    Pid(String),

    /// A script delivered no PES packet at all.
    #[error("empty script for PID 0x{0:04X}")]
    EmptyScript(u16),
}

impl MuxError {
    /// Convenience constructor for configuration errors.
    pub fn config(line: usize, message: impl Into<String>) -> Self {
        MuxError::Config {
            line,
            message: message.into(),
        }
    }
}
