//! META description file reader.
//!
//! Line-oriented UTF-8: the first non-comment line is `MUXOPT` followed by
//! global options, then one track per line:
//!
//! ```text
//! MUXOPT --cbr --mux-rate=48000000
//! V_MPEG2, video.m2v --level=4.0
//! A_LPCM,  audio.wav
//! # comment
//! ```
//!
//! Options use `--key` or `--key=value`; `#` starts a comment.

use std::path::{Path, PathBuf};

use esms::FrameRateCode;
use ts::StreamCodingType;

use crate::codec::CodecKeyword;
use crate::settings::{EsSettings, MuxSettings};
use crate::{MuxError, Result};

/// Splits one line into whitespace-separated fields, honouring quotes.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for ch in line.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => current.push(ch),
            None => match ch {
                '"' | '\'' => quote = Some(ch),
                '#' => break,
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        fields.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            },
        }
    }
    if !current.is_empty() {
        fields.push(current);
    }
    fields
}

/// `--key` / `--key=value` split.
fn split_option(field: &str) -> Option<(&str, Option<&str>)> {
    let body = field.strip_prefix("--")?;
    match body.split_once('=') {
        Some((key, value)) => Some((key, Some(value))),
        None => Some((body, None)),
    }
}

fn required_value<'a>(
    key: &str,
    value: Option<&'a str>,
    line: usize,
) -> Result<&'a str> {
    value.ok_or_else(|| MuxError::config(line, format!("option --{key} requires a value")))
}

fn parse_u64(key: &str, value: &str, line: usize) -> Result<u64> {
    value
        .parse()
        .map_err(|_| MuxError::config(line, format!("option --{key}: '{value}' is not a number")))
}

/// Parses `--fps` values: `23.976`, `24`, `25`, `29.970`, `50`, `59.940`.
fn parse_fps(value: &str, line: usize) -> Result<FrameRateCode> {
    let code = match value {
        "23.976" => FrameRateCode::F23976,
        "24" => FrameRateCode::F24,
        "25" => FrameRateCode::F25,
        "29.970" | "29.97" => FrameRateCode::F29970,
        "50" => FrameRateCode::F50,
        "59.940" | "59.94" => FrameRateCode::F59940,
        other => {
            return Err(MuxError::config(
                line,
                format!("unsupported --fps value '{other}'"),
            ))
        }
    };
    Ok(code)
}

/// Parses `--ar=w:h`.
fn parse_aspect_ratio(value: &str, line: usize) -> Result<(u32, u32)> {
    let Some((width, height)) = value.split_once(':') else {
        return Err(MuxError::config(
            line,
            format!("--ar expects 'w:h', got '{value}'"),
        ));
    };
    let width = parse_u64("ar", width, line)? as u32;
    let height = parse_u64("ar", height, line)? as u32;
    if width == 0 || height == 0 {
        return Err(MuxError::config(line, "--ar terms must be non-zero"));
    }
    Ok((width, height))
}

/// Parses `--level` values: `4.0` or raw `40` forms.
fn parse_level(value: &str, line: usize) -> Result<u8> {
    let level = match value.split_once('.') {
        Some((major, minor)) => {
            let major = parse_u64("level", major, line)?;
            let minor = parse_u64("level", minor, line)?;
            major * 10 + minor
        }
        None => parse_u64("level", value, line)?,
    };
    if !(10..=62).contains(&level) {
        return Err(MuxError::config(
            line,
            format!("--level {value} outside the 1.0–6.2 range"),
        ));
    }
    Ok(level as u8)
}

fn apply_global_option(
    settings: &mut MuxSettings,
    key: &str,
    value: Option<&str>,
    line: usize,
) -> Result<()> {
    match key {
        "no-extra-header" => settings.options.write_tp_extra_headers = false,
        "cbr" => settings.options.cbr = true,
        "force-esms" => settings.options.force_script_generation = true,
        "disable-tstd" => settings.options.disable_buffering_model = true,
        "dvd-media" => settings.options.dvd_media = true,
        "start-time" => {
            let ticks = parse_u64(key, required_value(key, value, line)?, line)?;
            settings.set_start_time(ticks).map_err(|err| match err {
                MuxError::Config { message, .. } => MuxError::Config { line, message },
                other => other,
            })?;
        }
        "mux-rate" => {
            let rate = parse_u64(key, required_value(key, value, line)?, line)?;
            settings.set_mux_rate(rate).map_err(|err| match err {
                MuxError::Config { message, .. } => MuxError::Config { line, message },
                other => other,
            })?;
        }
        other => {
            return Err(MuxError::config(
                line,
                format!("unknown global option --{other}"),
            ))
        }
    }
    Ok(())
}

fn apply_track_option(
    track: &mut EsSettings,
    key: &str,
    value: Option<&str>,
    line: usize,
) -> Result<()> {
    match key {
        "secondary" => track.options.secondary = true,
        "core" => track.options.extract_core = true,
        "remove-sei" => track.options.remove_sei = true,
        "disable-hrd-verif" => track.options.disable_hrd_verifier = true,
        "hdmv-force-retiming" => track.options.hdmv_force_retiming = true,
        "esms" => track.script_path = Some(PathBuf::from(required_value(key, value, line)?)),
        "pbr" => track.options.pbr_path = Some(PathBuf::from(required_value(key, value, line)?)),
        "fps" => {
            track.options.fps_mod = Some(parse_fps(required_value(key, value, line)?, line)?)
        }
        "ar" => {
            track.options.ar_mod =
                Some(parse_aspect_ratio(required_value(key, value, line)?, line)?)
        }
        "level" => {
            track.options.level_mod = Some(parse_level(required_value(key, value, line)?, line)?)
        }
        "hdmv-initial-timestamp" => {
            track.options.hdmv_initial_timestamp =
                Some(parse_u64(key, required_value(key, value, line)?, line)?)
        }
        "pid" => {
            track.pid = parse_u64(key, required_value(key, value, line)?, line)? as u16;
        }
        other => {
            return Err(MuxError::config(
                line,
                format!("unknown track option --{other}"),
            ))
        }
    }
    Ok(())
}

/// Declared coding type for a keyword (families deciding the exact type at
/// parse time stay `None`).
fn declared_coding_type(keyword: CodecKeyword) -> Option<StreamCodingType> {
    match keyword {
        CodecKeyword::Mpeg2Video => Some(StreamCodingType::H262),
        CodecKeyword::AvcVideo => Some(StreamCodingType::Avc),
        CodecKeyword::Lpcm => Some(StreamCodingType::Lpcm),
        CodecKeyword::Ac3 => Some(StreamCodingType::Ac3),
        CodecKeyword::Dts => Some(StreamCodingType::Dts),
        CodecKeyword::Igs => Some(StreamCodingType::Ig),
        CodecKeyword::Pgs => Some(StreamCodingType::Pg),
        CodecKeyword::Auto => None,
    }
}

/// Parses a META file into multiplex settings. Relative track paths are
/// resolved against the META file's directory.
pub fn parse_meta_file(path: &Path) -> Result<MuxSettings> {
    let content = std::fs::read_to_string(path)?;
    let anchor = path.parent().unwrap_or_else(|| Path::new("."));
    parse_meta_content(&content, anchor)
}

/// Parses META content with an anchor directory for relative paths.
pub fn parse_meta_content(content: &str, anchor: &Path) -> Result<MuxSettings> {
    let mut settings = MuxSettings::default();
    let mut header_seen = false;

    for (idx, raw_line) in content.lines().enumerate() {
        let line = idx + 1;
        let fields = split_fields(raw_line);
        if fields.is_empty() {
            continue;
        }

        if !header_seen {
            if fields[0] != "MUXOPT" {
                return Err(MuxError::config(
                    line,
                    format!("expected MUXOPT header, got '{}'", fields[0]),
                ));
            }
            for field in &fields[1..] {
                let Some((key, value)) = split_option(field) else {
                    return Err(MuxError::config(
                        line,
                        format!("unexpected token '{field}' after MUXOPT"),
                    ));
                };
                apply_global_option(&mut settings, key, value, line)?;
            }
            header_seen = true;
            continue;
        }

        // Track line: "<keyword>, <path> [options...]".
        let keyword_field = fields[0].trim_end_matches(',');
        let keyword = CodecKeyword::parse(keyword_field).ok_or_else(|| {
            MuxError::config(line, format!("unknown codec keyword '{keyword_field}'"))
        })?;
        let had_separator = fields[0].ends_with(',');

        let mut rest = fields[1..].iter();
        let path_field = match (had_separator, rest.next()) {
            (true, Some(path)) => path.clone(),
            (false, Some(separator)) if separator == "," => rest
                .next()
                .cloned()
                .ok_or_else(|| MuxError::config(line, "missing track path"))?,
            _ => return Err(MuxError::config(line, "missing track path")),
        };

        let es_path = {
            let candidate = PathBuf::from(&path_field);
            if candidate.is_absolute() {
                candidate
            } else {
                anchor.join(candidate)
            }
        };

        let mut track = EsSettings::new(es_path);
        track.coding_type = declared_coding_type(keyword);
        for field in rest {
            let Some((key, value)) = split_option(field) else {
                return Err(MuxError::config(
                    line,
                    format!("unexpected token '{field}' in track options"),
                ));
            };
            apply_track_option(&mut track, key, value, line)?;
        }
        settings.tracks.push(track);
    }

    if !header_seen {
        return Err(MuxError::config(0, "empty META file"));
    }
    if settings.tracks.is_empty() {
        return Err(MuxError::config(0, "META file declares no track"));
    }
    Ok(settings)
}
