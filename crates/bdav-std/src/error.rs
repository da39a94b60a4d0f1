use thiserror::Error;

/// Errors raised by the buffering model.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufModelError {
    /// A decoder removal event fired while the buffer lacked the frame's
    /// bytes for longer than the configured tolerance.
    #[error(
        "buffer underflow on PID 0x{pid:04X} ({bucket}): {missing_bits} bits \
         missing at {stc} (removal due {removal_ts})"
    )]
    Underflow {
        /// Affected PID.
        pid: u16,
        /// Bucket name.
        bucket: &'static str,
        /// Bits missing from the frame at its removal time.
        missing_bits: u64,
        /// Current STC, 27 MHz ticks.
        stc: u64,
        /// Scheduled removal time, 27 MHz ticks.
        removal_ts: u64,
    },

    /// A deposit pushed a bucket above its capacity. The scheduler prevents
    /// this through `check`; reaching it indicates an accounting bug or a
    /// mis-sized branch.
    #[error("buffer overflow on PID 0x{pid:04X} ({bucket}): fill {fill_bits} of {capacity_bits}")]
    Overflow {
        /// Affected PID.
        pid: u16,
        /// Bucket name.
        bucket: &'static str,
        /// Fill after the deposit, in bits.
        fill_bits: u64,
        /// Bucket capacity in bits.
        capacity_bits: u64,
    },

    /// A packet was routed to a PID with no registered branch.
    #[error("no buffering branch registered for PID 0x{0:04X}")]
    UnknownPid(u16),
}
