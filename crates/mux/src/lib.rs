//! BDAV transport stream multiplexer core.
//!
//! Consumes one ESMS script per elementary stream (building missing or
//! stale scripts through the codec analyzers), allocates BDAV PIDs, builds
//! the PSI system streams and drives the dual-heap scheduler emitting
//! 188-byte transport packets under BDAV-STD supervision.

pub mod codec;
pub mod compliance;
pub mod context;
pub mod error;
pub mod heap;
pub mod meta;
pub mod pid;
pub mod settings;
pub mod stream;

pub use codec::CodecKeyword;
pub use context::{MuxContext, MuxSummary};
pub use error::{ComplianceClass, MuxError};
pub use meta::{parse_meta_content, parse_meta_file};
pub use pid::PidAllocator;
pub use settings::{DtcpSettings, EsSettings, MuxOptions, MuxSettings};

/// Master clock rate, ticks per second.
pub const MAIN_CLOCK_27MHZ: u64 = 27_000_000;

/// Demultiplexer-side sub-clock rate.
pub const SUB_CLOCK_90KHZ: u64 = 90_000;

/// Result type for muxer operations.
pub type Result<T> = std::result::Result<T, MuxError>;
