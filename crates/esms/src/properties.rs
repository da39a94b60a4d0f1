//! Stream-level properties recorded by the "ES properties" and "ES format
//! properties" script sections.

use std::ops::{BitOr, BitOrAssign};

use ts::{EsType, StreamCodingType};

/// Muxing-option flags recorded in a script. A script is reusable only if its
/// recorded flags cover the flags the current mux settings require.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptFlags(pub u64);

impl ScriptFlags {
    /// Secondary stream type.
    pub const SEC_STREAM: ScriptFlags = ScriptFlags(1 << 0);
    /// Extract audio core (DTS-HD / TrueHD).
    pub const EXTRACT_CORE: ScriptFlags = ScriptFlags(1 << 1);
    /// Target DVD media output.
    pub const DVD_OUTPUT: ScriptFlags = ScriptFlags(1 << 2);
    /// Disable automatic compliance fixes.
    pub const DISABLE_FIXES: ScriptFlags = ScriptFlags(1 << 4);
    /// Script is rebuilt at every muxing.
    pub const FORCE_REBUILD: ScriptFlags = ScriptFlags(1 << 5);
    /// FPS value changed (H.264).
    pub const CHANGE_FPS: ScriptFlags = ScriptFlags(1 << 6);
    /// Aspect ratio changed (H.264).
    pub const CHANGE_AR: ScriptFlags = ScriptFlags(1 << 7);
    /// Encoding level changed (H.264).
    pub const CHANGE_LEVEL: ScriptFlags = ScriptFlags(1 << 8);
    /// SEI messages removed (H.264).
    pub const REMOVE_SEI: ScriptFlags = ScriptFlags(1 << 9);

    /// True when all bits of `required` are present.
    pub fn covers(self, required: ScriptFlags) -> bool {
        self.0 & required.0 == required.0
    }

    /// True when `flag` is set.
    pub fn contains(self, flag: ScriptFlags) -> bool {
        self.covers(flag)
    }
}

impl BitOr for ScriptFlags {
    type Output = ScriptFlags;

    fn bitor(self, rhs: ScriptFlags) -> ScriptFlags {
        ScriptFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ScriptFlags {
    fn bitor_assign(&mut self, rhs: ScriptFlags) {
        self.0 |= rhs.0;
    }
}

/// HDMV video format codes carried by PMT registration descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum HdmvVideoFormat {
    /// Reserved / unknown geometry.
    #[default]
    Reserved = 0x0,
    /// 720×480 interlaced.
    I480 = 0x1,
    /// 720×576 interlaced.
    I576 = 0x2,
    /// 720×480 progressive.
    P480 = 0x3,
    /// 1440/1920×1080 interlaced.
    I1080 = 0x4,
    /// 1280×720 progressive.
    P720 = 0x5,
    /// 1440/1920×1080 progressive.
    P1080 = 0x6,
    /// 720×576 progressive.
    P576 = 0x7,
    /// 3840×2160 progressive.
    P2160 = 0x8,
}

impl HdmvVideoFormat {
    /// Maps a picture geometry onto its HDMV format code.
    pub fn from_dimensions(width: u32, height: u32, interlaced: bool) -> Self {
        use HdmvVideoFormat::*;
        match (width, height, interlaced) {
            (720, 480, true) => I480,
            (720, 576, true) => I576,
            (720, 480, false) => P480,
            (1440 | 1920, 1080, true) => I1080,
            (1280, 720, false) => P720,
            (1440 | 1920, 1080, false) => P1080,
            (720, 576, false) => P576,
            (3840, 2160, false) => P2160,
            _ => Reserved,
        }
    }

    /// Parses the 4-bit code.
    pub fn from_u8(value: u8) -> Self {
        use HdmvVideoFormat::*;
        match value {
            0x1 => I480,
            0x2 => I576,
            0x3 => P480,
            0x4 => I1080,
            0x5 => P720,
            0x6 => P1080,
            0x7 => P576,
            0x8 => P2160,
            _ => Reserved,
        }
    }
}

/// HDMV frame-rate codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum FrameRateCode {
    /// Unspecified.
    #[default]
    Unspecified = 0x0,
    /// 23.976 fps.
    F23976 = 0x1,
    /// 24 fps.
    F24 = 0x2,
    /// 25 fps.
    F25 = 0x3,
    /// 29.970 fps.
    F29970 = 0x4,
    /// 50 fps.
    F50 = 0x6,
    /// 59.940 fps.
    F59940 = 0x7,
}

impl FrameRateCode {
    /// Frame rate as an exact rational `(num, den)`.
    pub fn as_rational(self) -> Option<(u32, u32)> {
        use FrameRateCode::*;
        match self {
            Unspecified => None,
            F23976 => Some((24_000, 1001)),
            F24 => Some((24, 1)),
            F25 => Some((25, 1)),
            F29970 => Some((30_000, 1001)),
            F50 => Some((50, 1)),
            F59940 => Some((60_000, 1001)),
        }
    }

    /// Frame rate as a float (fps).
    pub fn as_f64(self) -> Option<f64> {
        self.as_rational().map(|(num, den)| num as f64 / den as f64)
    }

    /// Maps an exact rational frame rate onto its code.
    pub fn from_rational(num: u32, den: u32) -> Self {
        use FrameRateCode::*;
        match (num, den) {
            (24_000, 1001) => F23976,
            (24, 1) => F24,
            (25, 1) => F25,
            (30_000, 1001) => F29970,
            (50, 1) => F50,
            (60_000, 1001) => F59940,
            _ => Unspecified,
        }
    }

    /// Parses the 4-bit code.
    pub fn from_u8(value: u8) -> Self {
        use FrameRateCode::*;
        match value {
            0x1 => F23976,
            0x2 => F24,
            0x3 => F25,
            0x4 => F29970,
            0x6 => F50,
            0x7 => F59940,
            _ => Unspecified,
        }
    }
}

/// BD LPCM / HDMV audio sample-rate codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SampleRateCode {
    /// 48 kHz.
    #[default]
    R48000 = 0x01,
    /// 96 kHz.
    R96000 = 0x04,
    /// 192 kHz.
    R192000 = 0x05,
}

impl SampleRateCode {
    /// Sample rate in Hz.
    pub fn as_hz(self) -> u32 {
        match self {
            SampleRateCode::R48000 => 48_000,
            SampleRateCode::R96000 => 96_000,
            SampleRateCode::R192000 => 192_000,
        }
    }

    /// Maps a sample rate in Hz to its code.
    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            48_000 => Some(SampleRateCode::R48000),
            96_000 => Some(SampleRateCode::R96000),
            192_000 => Some(SampleRateCode::R192000),
            _ => None,
        }
    }
}

/// H.264 specific properties recorded after the video format properties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct H264SpecProperties {
    /// `constraint_set0..5_flag` + `AVC_compatible_flags` byte.
    pub constraint_flags: u8,
    /// `CpbSize[cpb_cnt_minus1]` from the SPS VUI, in bits.
    pub cpb_size: u32,
    /// `BitRate[0]` from the SPS VUI, in bps.
    pub bitrate: u32,
}

/// AC-3 family specific properties recorded after the audio format
/// properties, mirrored into the PMT AC-3 audio descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ac3SpecProperties {
    /// `fscod`.
    pub sample_rate_code: u8,
    /// `bsid`.
    pub bsid: u8,
    /// `frmsizecod >> 1`.
    pub bit_rate_code: u8,
    /// `dsurmod`.
    pub surround_mode: u8,
    /// `bsmod`.
    pub bsmod: u8,
    /// ATSC channel code (`acmod` derived).
    pub num_channels: u8,
    /// Full service flag.
    pub full_svc: bool,
}

/// Video stream format properties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoProperties {
    /// HDMV video format code.
    pub video_format: HdmvVideoFormat,
    /// HDMV frame-rate code.
    pub frame_rate: FrameRateCode,
    /// `profile_idc`.
    pub profile_idc: u8,
    /// `level_idc`.
    pub level_idc: u8,
    /// Still-picture stream.
    pub still_picture: bool,
    /// H.264 extra record.
    pub h264: Option<H264SpecProperties>,
}

/// Audio stream format properties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioProperties {
    /// HDMV audio format code (mono/stereo/multi).
    pub audio_format: u8,
    /// HDMV sample-rate code.
    pub sample_rate: SampleRateCode,
    /// Bit depth code (0 = 16-bit, 1 = 20-bit, 2 = 24-bit).
    pub bit_depth: u8,
    /// AC-3 family extra record.
    pub ac3: Option<Ac3SpecProperties>,
}

/// Codec-specific format properties section content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FmtProperties {
    /// No format properties section (HDMV streams).
    #[default]
    None,
    /// Video section.
    Video(VideoProperties),
    /// Audio section.
    Audio(AudioProperties),
}

/// "ES properties" section content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EsProperties {
    /// Broad stream family.
    pub es_type: EsType,
    /// Stream coding type.
    pub coding_type: StreamCodingType,
    /// Referential zero timestamp, 90 kHz ticks.
    pub pts_reference: u64,
    /// Nominal stream bitrate, bps.
    pub bitrate: u32,
    /// Last presentation timestamp, 90 kHz ticks.
    pub pts_final: u64,
    /// Muxing-option flags this script was built with.
    pub scripting_flags: ScriptFlags,
}
