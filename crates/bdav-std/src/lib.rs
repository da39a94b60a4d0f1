//! BDAV-STD / T-STD buffering model.
//!
//! A discrete-event hierarchy of leaky buckets mirroring the demuxer-side
//! decoder: per elementary stream a Transport Buffer feeding either a
//! Multiplex Buffer and Elementary Buffer (video) or a single decoder
//! buffer (audio, HDMV), plus one small shared buffer for system PIDs.
//! The scheduler asks [`BufModel::check`] before every packet injection and
//! commits accepted packets with [`BufModel::update`]; an injection that
//! would overflow any downstream bucket is vetoed and rescheduled.
//!
//! All fills are in bits, all timestamps in 27 MHz ticks; rate arithmetic
//! multiplies in 128 bits before dividing so no precision is lost, and each
//! bucket keeps its division remainder so continuous leaks do not drift.

pub mod error;
pub mod model;
pub mod params;

pub use error::BufModelError;
pub use model::{BranchKind, BufModel, BufModelOptions, StreamRef};

/// Result type for buffer model operations.
pub type Result<T> = std::result::Result<T, BufModelError>;
