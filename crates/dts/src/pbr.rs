//! Peak-bitrate smoothing of DTS-HD extension substreams.
//!
//! DTS encoders can emit a PBR statistics file alongside the bitstream: one
//! average-bitrate sample (kbps) per line, one line per second of program.
//! Extension substream frames are re-bucketed into one-second emission
//! windows so the bytes sent per window follow the recorded distribution;
//! frames overflowing a window slide to the next one (their decoding
//! deadline is unchanged, only the muxing schedule moves).

use std::path::Path;

use tracing::debug;

use crate::{DtsError, Result};

/// Parsed PBR statistics: per-second byte budgets.
#[derive(Debug, Clone)]
pub struct PbrStatistics {
    budgets: Vec<u64>,
}

impl PbrStatistics {
    /// Loads a statistics file: UTF-8, one kbps value per line, `#` comments.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut budgets = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let kbps: u64 = line.parse().map_err(|_| {
                DtsError::InvalidPbrFile(format!("line {}: '{line}' is not a bitrate", idx + 1))
            })?;
            if kbps == 0 {
                return Err(DtsError::InvalidPbrFile(format!(
                    "line {}: zero bitrate",
                    idx + 1
                )));
            }
            budgets.push(kbps * 1000 / 8);
        }
        if budgets.is_empty() {
            return Err(DtsError::InvalidPbrFile("no bitrate samples".to_string()));
        }
        debug!(windows = budgets.len(), "loaded PBR statistics");
        Ok(PbrStatistics { budgets })
    }

    /// Budget in bytes for second `window` (the last sample extends to the
    /// end of the program).
    pub fn budget(&self, window: usize) -> u64 {
        *self
            .budgets
            .get(window)
            .or(self.budgets.last())
            .expect("non-empty budgets")
    }

    /// Number of recorded windows.
    pub fn nb_windows(&self) -> usize {
        self.budgets.len()
    }
}

/// An extension frame to place on the emission timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PbrFrame {
    /// Natural presentation time, 90 kHz ticks.
    pub pts: u64,
    /// Frame size in bytes.
    pub size: u32,
}

/// Assigns each frame an emission timestamp following the budget
/// distribution. Returned timestamps are non-decreasing and never precede
/// the frame's natural PTS window.
pub fn smooth(stats: &PbrStatistics, frames: &[PbrFrame]) -> Vec<u64> {
    const WINDOW_TICKS: u64 = 90_000;

    let mut out = Vec::with_capacity(frames.len());
    let mut window = 0usize;
    let mut window_bytes = 0u64;

    for frame in frames {
        // A frame can never be scheduled before its natural window.
        let natural_window = (frame.pts / WINDOW_TICKS) as usize;
        if natural_window > window {
            window = natural_window;
            window_bytes = 0;
        }
        // Slide past exhausted windows.
        while window_bytes + frame.size as u64 > stats.budget(window) && window_bytes > 0 {
            window += 1;
            window_bytes = 0;
        }
        window_bytes += frame.size as u64;
        out.push(((window as u64) * WINDOW_TICKS).max(frame.pts));
    }
    out
}
