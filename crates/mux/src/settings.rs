//! Mux, track and DTCP settings.

use std::path::PathBuf;

use esms::ParsingOptions;
use ts::StreamCodingType;

use crate::error::ComplianceClass;
use crate::{MuxError, Result, MAIN_CLOCK_27MHZ, SUB_CLOCK_90KHZ};

/// Minimum multiplex recording rate, bps.
pub const MIN_MUX_RATE: u64 = 500_000;
/// Maximum multiplex recording rate, bps.
pub const MAX_MUX_RATE: u64 = 120_000_000;
/// Default multiplex recording rate, bps.
pub const DEFAULT_MUX_RATE: u64 = 48_000_000;

/// Minimum presentation start time, 90 kHz ticks.
pub const MIN_START_TIME: u64 = SUB_CLOCK_90KHZ;
/// Maximum presentation start time, 90 kHz ticks.
pub const MAX_START_TIME: u64 = 1_620_000_000_000;
/// Default presentation start time, 27 MHz ticks (10 minutes).
pub const DEFAULT_START_PCR: u64 = 54_000_000 * 300;

/// Default initial STD buffering delay, seconds.
pub const DEFAULT_INITIAL_STD_DELAY: f64 = 0.9;

/// DTCP descriptor content carried by the PMT.
#[derive(Debug, Clone, Copy)]
pub struct DtcpSettings {
    /// `CA_System_ID` (0x0FFF = BDMV).
    pub ca_system_id: u16,
    /// `Retention_Move_mode`.
    pub retention_move_mode: bool,
    /// `Retention_State`.
    pub retention_state: u8,
    /// `EPN`.
    pub epn: bool,
    /// `DTCP_CCI` (0 = copy free).
    pub dtcp_cci: u8,
    /// `DOT`.
    pub dot: bool,
    /// `AST`.
    pub ast: bool,
    /// `Image_Constraint_Token`.
    pub image_constraint_token: bool,
    /// `APS`.
    pub aps: u8,
}

impl Default for DtcpSettings {
    fn default() -> Self {
        DtcpSettings {
            ca_system_id: 0x0FFF,
            retention_move_mode: false,
            retention_state: 0,
            epn: false,
            dtcp_cci: 0,
            dot: false,
            ast: false,
            image_constraint_token: false,
            aps: 0,
        }
    }
}

/// One input track.
#[derive(Debug, Clone)]
pub struct EsSettings {
    /// Source elementary stream path.
    pub es_path: PathBuf,
    /// Explicit script path (`--esms`), derived from `es_path` otherwise.
    pub script_path: Option<PathBuf>,
    /// Declared coding type, `None` for `AUTO` probing.
    pub coding_type: Option<StreamCodingType>,
    /// Requested PID (0 = pick the best band slot).
    pub pid: u16,
    /// Per-track parsing options.
    pub options: ParsingOptions,
    /// Rebuild the script regardless of validity.
    pub force_rebuild: bool,
}

impl EsSettings {
    /// Creates track settings for a source path.
    pub fn new(es_path: impl Into<PathBuf>) -> Self {
        EsSettings {
            es_path: es_path.into(),
            script_path: None,
            coding_type: None,
            pid: 0,
            options: ParsingOptions::default(),
            force_rebuild: false,
        }
    }
}

/// Global muxing options.
#[derive(Debug, Clone)]
pub struct MuxOptions {
    /// Constant bitrate output (NULL packet padding).
    pub cbr: bool,
    /// Prefix each packet with the 4-byte BDAV `TP_extra_header`.
    pub write_tp_extra_headers: bool,
    /// Rebuild every script even when valid.
    pub force_script_generation: bool,
    /// Skip the BDAV-STD buffering model.
    pub disable_buffering_model: bool,
    /// Carry PCR inside an elementary stream's adaptation fields.
    pub pcr_on_es_packets: bool,
    /// Nominated PID when `pcr_on_es_packets` is set.
    pub pcr_pid: u16,
    /// Escalate decoder underflow to a fatal error.
    pub abort_on_underflow: bool,
    /// Underflow tolerance before reporting, 27 MHz ticks.
    pub underflow_warn_timeout: u64,
    /// Target DVD media (relaxed constraints).
    pub dvd_media: bool,
    /// Compliance classes downgraded to warnings.
    pub suppressed_checks: Vec<ComplianceClass>,
}

impl Default for MuxOptions {
    fn default() -> Self {
        MuxOptions {
            cbr: false,
            write_tp_extra_headers: true,
            force_script_generation: false,
            disable_buffering_model: false,
            pcr_on_es_packets: false,
            pcr_pid: 0,
            abort_on_underflow: false,
            underflow_warn_timeout: MAIN_CLOCK_27MHZ / 66,
            dvd_media: false,
            suppressed_checks: Vec::new(),
        }
    }
}

impl MuxOptions {
    /// True when the class must only warn.
    pub fn is_suppressed(&self, class: ComplianceClass) -> bool {
        self.suppressed_checks.contains(&class)
    }
}

/// Complete multiplex settings.
#[derive(Debug, Clone)]
pub struct MuxSettings {
    /// Input tracks.
    pub tracks: Vec<EsSettings>,
    /// Target multiplex rate, bps.
    pub mux_rate: u64,
    /// Requested initial presentation time, 27 MHz ticks.
    pub start_pcr: u64,
    /// Initial STD buffering delay, seconds (must stay below 1.0).
    pub initial_std_delay: f64,
    /// DTCP descriptor content.
    pub dtcp: DtcpSettings,
    /// Global options.
    pub options: MuxOptions,
}

impl Default for MuxSettings {
    fn default() -> Self {
        MuxSettings {
            tracks: Vec::new(),
            mux_rate: DEFAULT_MUX_RATE,
            start_pcr: DEFAULT_START_PCR,
            initial_std_delay: DEFAULT_INITIAL_STD_DELAY,
            dtcp: DtcpSettings::default(),
            options: MuxOptions::default(),
        }
    }
}

impl MuxSettings {
    /// Sets the multiplex rate, validating its range.
    pub fn set_mux_rate(&mut self, rate: u64) -> Result<()> {
        if !(MIN_MUX_RATE..=MAX_MUX_RATE).contains(&rate) {
            return Err(MuxError::config(
                0,
                format!("mux rate {rate} out of range [{MIN_MUX_RATE}, {MAX_MUX_RATE}]"),
            ));
        }
        self.mux_rate = rate;
        Ok(())
    }

    /// Sets the presentation start time from a 90 kHz value.
    pub fn set_start_time(&mut self, ticks_90khz: u64) -> Result<()> {
        if !(MIN_START_TIME..=MAX_START_TIME).contains(&ticks_90khz) {
            return Err(MuxError::config(
                0,
                format!(
                    "start time {ticks_90khz} out of range [{MIN_START_TIME}, {MAX_START_TIME}]"
                ),
            ));
        }
        self.start_pcr = ticks_90khz * 300;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mux_rate_bounds() {
        let mut settings = MuxSettings::default();
        assert!(settings.set_mux_rate(499_999).is_err());
        assert!(settings.set_mux_rate(120_000_001).is_err());
        settings.set_mux_rate(48_000_000).unwrap();
        assert_eq!(settings.mux_rate, 48_000_000);
    }

    #[test]
    fn test_start_time_converts_to_27mhz() {
        let mut settings = MuxSettings::default();
        settings.set_start_time(90_000).unwrap();
        assert_eq!(settings.start_pcr, 27_000_000);
        assert!(settings.set_start_time(89_999).is_err());
    }

    #[test]
    fn test_default_start_is_ten_minutes() {
        let settings = MuxSettings::default();
        assert_eq!(settings.start_pcr / MAIN_CLOCK_27MHZ, 600);
    }
}
