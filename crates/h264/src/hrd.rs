//! Hypothetical Reference Decoder (Annex C) CPB verification.
//!
//! A leak-free arrival model over the access-unit schedule: coded bits
//! enter the CPB at the signalled bitrate starting from an initially full
//! buffer, and each access unit leaves whole at its removal time. An AU
//! whose last bit arrives after its removal time underflows; in CBR mode a
//! buffer standing above the signalled CPB size at a removal overflows.

use tracing::warn;

/// Violation flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HrdViolationKind {
    /// The AU's final bit arrives after its CPB removal time.
    CpbUnderflow,
    /// The buffer exceeds the signalled CPB size (CBR only).
    CpbOverflow,
}

/// One detected violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HrdViolation {
    /// Access unit index in decoding order.
    pub au_index: usize,
    /// Violation flavour.
    pub kind: HrdViolationKind,
    /// Lateness or excess, 90 kHz ticks (underflow) or bits (overflow).
    pub magnitude: u64,
}

/// One scheduled access unit.
#[derive(Debug, Clone, Copy)]
pub struct HrdAccessUnit {
    /// CPB removal time, 90 kHz ticks.
    pub removal_time: u64,
    /// Coded size in bits.
    pub size_bits: u64,
}

/// CPB conformance pass over a whole AU schedule.
///
/// `bitrate` and `cpb_size` come from the SPS HRD parameters; `cbr` is the
/// first scheduler's `cbr_flag`.
pub fn verify_cpb(
    aus: &[HrdAccessUnit],
    bitrate: u64,
    cpb_size: u64,
    cbr: bool,
) -> Vec<HrdViolation> {
    let mut violations = Vec::new();
    if bitrate == 0 || aus.is_empty() {
        return violations;
    }

    // Delivery starts early enough to fill the CPB before the first
    // removal (the usual initial_cpb_removal_delay upper bound).
    let initial_delay = cpb_size * 90_000 / bitrate;
    let t0 = aus[0].removal_time.saturating_sub(initial_delay);

    let mut cumulative_bits = 0u128;
    let mut consumed_bits = 0u128;
    for (au_index, au) in aus.iter().enumerate() {
        cumulative_bits += au.size_bits as u128;

        // Time at which this AU's last bit lands in the CPB.
        let final_arrival = t0 as u128 + cumulative_bits * 90_000 / bitrate as u128;
        if final_arrival > au.removal_time as u128 {
            violations.push(HrdViolation {
                au_index,
                kind: HrdViolationKind::CpbUnderflow,
                magnitude: (final_arrival - au.removal_time as u128) as u64,
            });
        }

        if cbr {
            // Bits standing in the buffer right before this removal: the
            // constant-rate delivery never pauses in CBR mode.
            let sent_by_removal = ((au.removal_time as u128).saturating_sub(t0 as u128)
                * bitrate as u128
                / 90_000)
                .min(cumulative_bits);
            let fill = sent_by_removal.saturating_sub(consumed_bits);
            if fill > cpb_size as u128 {
                violations.push(HrdViolation {
                    au_index,
                    kind: HrdViolationKind::CpbOverflow,
                    magnitude: (fill - cpb_size as u128) as u64,
                });
            }
        }

        consumed_bits += au.size_bits as u128;
    }
    violations
}

/// Logs up to `limit` violations and returns their total count.
pub fn report_violations(violations: &[HrdViolation], limit: usize) -> usize {
    for violation in violations.iter().take(limit) {
        match violation.kind {
            HrdViolationKind::CpbUnderflow => warn!(
                au = violation.au_index,
                late_ticks = violation.magnitude,
                "HRD: CPB underflow"
            ),
            HrdViolationKind::CpbOverflow => warn!(
                au = violation.au_index,
                excess_bits = violation.magnitude,
                "HRD: CPB overflow"
            ),
        }
    }
    if violations.len() > limit {
        warn!(
            suppressed = violations.len() - limit,
            "HRD: further violations not shown"
        );
    }
    violations.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 25 fps schedule with equally sized AUs.
    fn schedule(nb: usize, size_bits: u64) -> Vec<HrdAccessUnit> {
        (0..nb)
            .map(|idx| HrdAccessUnit {
                removal_time: idx as u64 * 3600,
                size_bits,
            })
            .collect()
    }

    #[test]
    fn test_conforming_stream_passes() {
        // 8 Mbps, 25 fps: 320 kbit per frame fits exactly; use 200 kbit.
        let aus = schedule(100, 200_000);
        let violations = verify_cpb(&aus, 8_000_000, 30_000_000, false);
        assert!(violations.is_empty());
    }

    #[test]
    fn test_oversized_stream_underflows() {
        // Sustained 500 kbit frames at 25 fps = 12.5 Mbps over an 8 Mbps
        // channel: arrivals fall behind removals once the initial fill is
        // spent.
        let aus = schedule(200, 500_000);
        let violations = verify_cpb(&aus, 8_000_000, 10_000_000, false);
        assert!(!violations.is_empty());
        assert!(violations
            .iter()
            .all(|violation| violation.kind == HrdViolationKind::CpbUnderflow));
        // Lateness grows monotonically for a sustained overrun.
        let magnitudes: Vec<u64> = violations.iter().map(|v| v.magnitude).collect();
        assert!(magnitudes.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn test_tiny_aus_overflow_in_cbr() {
        // CBR delivery keeps pushing bits even though frames are tiny: the
        // buffer must exceed a small CPB.
        let aus = schedule(200, 1_000);
        let violations = verify_cpb(&aus, 8_000_000, 100_000, true);
        assert!(violations
            .iter()
            .any(|violation| violation.kind == HrdViolationKind::CpbOverflow));
        // The same schedule in VBR mode is clean (delivery pauses).
        assert!(verify_cpb(&aus, 8_000_000, 100_000, false).is_empty());
    }

    #[test]
    fn test_zero_bitrate_skips() {
        let aus = schedule(10, 1_000);
        assert!(verify_cpb(&aus, 0, 100_000, true).is_empty());
    }
}
