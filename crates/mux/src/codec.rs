//! Codec dispatch: keyword and signature mapping onto the per-codec
//! analyzers, and the script check-or-build step.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use esms::{validate_script, ParsingSettings, ScriptError};
use ts::StreamCodingType;

use crate::settings::EsSettings;
use crate::{MuxError, Result};

/// META file codec keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKeyword {
    /// Probe the source file signature.
    Auto,
    /// MPEG-1/2 video (`V_MPEG2`, `V_H262`).
    Mpeg2Video,
    /// H.264 video (`V_MPEG4/ISO/AVC`, `V_H264`).
    AvcVideo,
    /// BD LPCM audio (`A_LPCM`).
    Lpcm,
    /// AC-3 family audio (`A_AC3`).
    Ac3,
    /// DTS family audio (`A_DTS`).
    Dts,
    /// HDMV Interactive Graphics (`M_HDMV/IGS`).
    Igs,
    /// HDMV Presentation Graphics (`M_HDMV/PGS`).
    Pgs,
}

impl CodecKeyword {
    /// Parses a META codec keyword.
    pub fn parse(keyword: &str) -> Option<Self> {
        match keyword {
            "AUTO" => Some(CodecKeyword::Auto),
            "V_MPEG2" | "V_H262" => Some(CodecKeyword::Mpeg2Video),
            "V_MPEG4/ISO/AVC" | "V_H264" => Some(CodecKeyword::AvcVideo),
            "A_LPCM" => Some(CodecKeyword::Lpcm),
            "A_AC3" => Some(CodecKeyword::Ac3),
            "A_DTS" => Some(CodecKeyword::Dts),
            "M_HDMV/IGS" => Some(CodecKeyword::Igs),
            "M_HDMV/PGS" => Some(CodecKeyword::Pgs),
            _ => None,
        }
    }
}

/// Parser families (one analyzer per family).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserFamily {
    /// MPEG-1/2 video.
    H262,
    /// H.264 video.
    H264,
    /// BD LPCM.
    Lpcm,
    /// AC-3 / E-AC-3 / TrueHD.
    Ac3,
    /// DTS / DTS-HD / DTS-Express.
    Dts,
    /// HDMV PG/IG.
    Hdmv,
}

impl ParserFamily {
    /// Family handling a declared coding type.
    pub fn of(coding_type: StreamCodingType) -> Self {
        use StreamCodingType::*;
        match coding_type {
            Mpeg1Video | H262 | Vc1 => ParserFamily::H262,
            Avc => ParserFamily::H264,
            Lpcm => ParserFamily::Lpcm,
            Ac3 | TrueHd | Eac3 | Eac3Secondary => ParserFamily::Ac3,
            Dts | DtsHdHr | DtsHdMa | DtsExpress => ParserFamily::Dts,
            Pg | Ig | Text => ParserFamily::Hdmv,
        }
    }

    /// Family for a META keyword, `None` for `AUTO`.
    pub fn of_keyword(keyword: CodecKeyword) -> Option<Self> {
        match keyword {
            CodecKeyword::Auto => None,
            CodecKeyword::Mpeg2Video => Some(ParserFamily::H262),
            CodecKeyword::AvcVideo => Some(ParserFamily::H264),
            CodecKeyword::Lpcm => Some(ParserFamily::Lpcm),
            CodecKeyword::Ac3 => Some(ParserFamily::Ac3),
            CodecKeyword::Dts => Some(ParserFamily::Dts),
            CodecKeyword::Igs | CodecKeyword::Pgs => Some(ParserFamily::Hdmv),
        }
    }
}

/// Guesses the parser family from the source file signature.
pub fn probe_family(path: &Path) -> Result<ParserFamily> {
    let mut file = File::open(path)?;
    let mut head = [0u8; 12];
    let read = file.read(&mut head)?;
    let head = &head[..read];

    if head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"WAVE" {
        return Ok(ParserFamily::Lpcm);
    }
    if head.len() >= 2 && head[0] == 0x50 && head[1] == 0x47 {
        return Ok(ParserFamily::Hdmv);
    }
    if head.len() >= 2 && head[0] == 0x0B && head[1] == 0x77 {
        return Ok(ParserFamily::Ac3);
    }
    if head.len() >= 4 {
        let sync = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
        if sync == 0x7FFE_8001 || sync == 0x6458_2025 {
            return Ok(ParserFamily::Dts);
        }
        if sync == 0x0000_01B3 {
            return Ok(ParserFamily::H262);
        }
    }
    if head.len() >= 5 && &head[0..3] == [0x00, 0x00, 0x01] {
        // H.262 sequence headers are matched above; remaining Annex-B
        // streams (3- or 4-byte start codes) are H.264.
        return Ok(ParserFamily::H264);
    }

    Err(MuxError::Parser {
        path: path.display().to_string(),
        message: "unrecognized stream signature".to_string(),
    })
}

/// Runs the family's analyzer, producing the script.
pub fn analyze(family: ParserFamily, parsing: &ParsingSettings) -> Result<StreamCodingType> {
    let map_err = |message: String| MuxError::Parser {
        path: parsing.es_path.display().to_string(),
        message,
    };
    match family {
        ParserFamily::H262 => h262::analyze(parsing).map_err(|err| map_err(err.to_string())),
        ParserFamily::H264 => h264::analyze(parsing).map_err(|err| map_err(err.to_string())),
        ParserFamily::Lpcm => lpcm::analyze(parsing).map_err(|err| map_err(err.to_string())),
        ParserFamily::Ac3 => ac3::analyze(parsing).map_err(|err| map_err(err.to_string())),
        ParserFamily::Dts => dts::analyze(parsing).map_err(|err| map_err(err.to_string())),
        ParserFamily::Hdmv => hdmv::analyze(parsing).map_err(|err| map_err(err.to_string())),
    }
}

/// Derives the script path for a track: the explicit `--esms` path, or
/// `<es_path>.ess`, with `_<n>` suffixes when another track of the same mux
/// already claimed the file.
pub fn script_path_for(track: &EsSettings, claimed: &[PathBuf]) -> PathBuf {
    if let Some(path) = &track.script_path {
        return path.clone();
    }
    let base = track.es_path.as_os_str().to_os_string();
    let mut candidate = PathBuf::from(base.clone());
    candidate.set_extension(extended_extension(&track.es_path, None));
    let mut increment = 0u32;
    while claimed.contains(&candidate) && increment < 100 {
        increment += 1;
        candidate = PathBuf::from(base.clone());
        candidate.set_extension(extended_extension(&track.es_path, Some(increment)));
    }
    candidate
}

fn extended_extension(path: &Path, increment: Option<u32>) -> String {
    let original = path
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned());
    let mut extension = original.map_or_else(String::new, |ext| format!("{ext}."));
    match increment {
        Some(n) => extension.push_str(&format!("ess_{n:03}")),
        None => extension.push_str("ess"),
    }
    extension
}

/// Ensures a valid script exists for the track, rebuilding it when the
/// validation fails or a rebuild is forced. Returns the effective coding
/// type and the script path.
pub fn prepare_script(
    track: &EsSettings,
    claimed: &[PathBuf],
    force_rebuild: bool,
) -> Result<(StreamCodingType, PathBuf)> {
    let script_path = script_path_for(track, claimed);
    let required_flags = track.options.script_flags();

    let family = match track.coding_type {
        Some(coding_type) => ParserFamily::of(coding_type),
        None => probe_family(&track.es_path)?,
    };

    let rebuild = force_rebuild
        || track.force_rebuild
        || match validate_script(&script_path, required_flags) {
            Ok(_) => false,
            Err(ScriptError::NoScript) => {
                debug!(script = %script_path.display(), "no script, building");
                true
            }
            Err(err) => {
                info!(
                    script = %script_path.display(),
                    "script rejected ({err}), rebuilding"
                );
                true
            }
        };

    if rebuild {
        let parsing = ParsingSettings {
            es_path: track.es_path.clone(),
            script_path: script_path.clone(),
            options: track.options.clone(),
            restart: false,
        };
        let coding_type = analyze(family, &parsing)?;
        validate_script(&script_path, required_flags)?;
        if let Some(expected) = track.coding_type {
            if expected != coding_type {
                warn!(
                    "declared {} but parsed {}",
                    expected.name(),
                    coding_type.name()
                );
            }
        }
        return Ok((coding_type, script_path));
    }

    // Reuse: the coding type comes from the script itself.
    let reader = esms::EsmsReader::open(&script_path)?;
    Ok((reader.properties().coding_type, script_path))
}
