//! Parser-facing settings: every codec analyzer consumes a
//! [`ParsingSettings`] and produces one validating script file.

use std::path::PathBuf;

use crate::properties::{FrameRateCode, ScriptFlags};

/// Per-track options influencing script generation.
#[derive(Debug, Clone, Default)]
pub struct ParsingOptions {
    /// Track is a secondary stream.
    pub secondary: bool,
    /// Keep only the core substream (DTS-HD, TrueHD).
    pub extract_core: bool,
    /// Target DVD media output.
    pub dvd_output: bool,
    /// Frame-rate override (H.264).
    pub fps_mod: Option<FrameRateCode>,
    /// Aspect-ratio override `w:h` (H.264).
    pub ar_mod: Option<(u32, u32)>,
    /// `level_idc` override (H.264).
    pub level_mod: Option<u8>,
    /// Strip SEI messages (H.264).
    pub remove_sei: bool,
    /// Disable the H.264 HRD verifier.
    pub disable_hrd_verifier: bool,
    /// DTS PBR statistics file.
    pub pbr_path: Option<PathBuf>,
    /// Initial HDMV timestamp, 90 kHz ticks.
    pub hdmv_initial_timestamp: Option<u64>,
    /// Rebuild all HDMV timestamps from composition data.
    pub hdmv_force_retiming: bool,
}

impl ParsingOptions {
    /// Flags a script built with these options must record.
    pub fn script_flags(&self) -> ScriptFlags {
        let mut flags = ScriptFlags::default();
        if self.secondary {
            flags |= ScriptFlags::SEC_STREAM;
        }
        if self.extract_core {
            flags |= ScriptFlags::EXTRACT_CORE;
        }
        if self.dvd_output {
            flags |= ScriptFlags::DVD_OUTPUT;
        }
        if self.fps_mod.is_some() {
            flags |= ScriptFlags::CHANGE_FPS;
        }
        if self.ar_mod.is_some() {
            flags |= ScriptFlags::CHANGE_AR;
        }
        if self.level_mod.is_some() {
            flags |= ScriptFlags::CHANGE_LEVEL;
        }
        if self.remove_sei {
            flags |= ScriptFlags::REMOVE_SEI;
        }
        flags
    }
}

/// Inputs of one codec analyzer run.
#[derive(Debug, Clone)]
pub struct ParsingSettings {
    /// Source elementary stream path.
    pub es_path: PathBuf,
    /// Output script path.
    pub script_path: PathBuf,
    /// Per-track options.
    pub options: ParsingOptions,
    /// Second-pass request flag (H.264 HRD gathering).
    pub restart: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_to_flags() {
        let options = ParsingOptions {
            secondary: true,
            level_mod: Some(40),
            ..ParsingOptions::default()
        };
        let flags = options.script_flags();
        assert!(flags.covers(ScriptFlags::SEC_STREAM));
        assert!(flags.covers(ScriptFlags::CHANGE_LEVEL));
        assert!(!flags.covers(ScriptFlags::REMOVE_SEI));
    }
}
