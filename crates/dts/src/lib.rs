//! DTS family parser producing ESMS scripts.
//!
//! Walks core substream frames (512 samples each on BDAV) and extension
//! substreams (DTS-HD layers). Extension frames are flagged for the
//! stream_id_extension 0x72 path; `--core` keeps only the core, and `--pbr`
//! re-buckets extension emission to follow a recorded peak-bitrate trace.

mod error;
pub mod frames;
pub mod pbr;

pub use error::DtsError;
pub use frames::{DtsFrameInfo, DtsFrameKind};
pub use pbr::{PbrFrame, PbrStatistics};

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use tracing::debug;

use esms::{
    AudioProperties, BuildCommand, EsProperties, EsmsPesFrame, EsmsWriter, FmtProperties,
    ParsingSettings, SampleRateCode,
};
use ts::{EsType, StreamCodingType};

/// Result type for DTS operations.
pub type Result<T> = std::result::Result<T, DtsError>;

#[derive(Debug, Clone, Copy)]
struct LocatedFrame {
    info: DtsFrameInfo,
    offset: u64,
    has_xll: bool,
}

fn scan_frames(file: &mut File) -> Result<Vec<LocatedFrame>> {
    let file_len = file.metadata()?.len();
    let mut located = Vec::new();
    let mut offset = 0u64;
    let mut header = [0u8; 16];

    while offset + 8 <= file_len {
        file.seek(SeekFrom::Start(offset))?;
        let avail = ((file_len - offset) as usize).min(header.len());
        file.read_exact(&mut header[..avail])?;

        let sync = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let info = match sync {
            frames::CORE_SYNCWORD => frames::parse_core_header(&header[..avail], offset)?,
            frames::EXT_SS_SYNCWORD => frames::parse_ext_header(&header[..avail], offset)?,
            _ => return Err(DtsError::SyncNotFound(offset)),
        };
        if offset + info.frame_size as u64 > file_len {
            return Err(DtsError::TruncatedFrame(offset));
        }

        let has_xll = if info.kind == DtsFrameKind::Extension {
            let mut payload = vec![0u8; info.frame_size as usize];
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut payload)?;
            frames::contains_xll(&payload)
        } else {
            false
        };

        located.push(LocatedFrame {
            info,
            offset,
            has_xll,
        });
        offset += info.frame_size as u64;
    }

    if located.is_empty() {
        return Err(DtsError::EmptyStream);
    }
    Ok(located)
}

fn coding_type_of(located: &[LocatedFrame], secondary: bool) -> StreamCodingType {
    let has_core = located
        .iter()
        .any(|frame| frame.info.kind == DtsFrameKind::Core);
    let has_ext = located
        .iter()
        .any(|frame| frame.info.kind == DtsFrameKind::Extension);
    let has_xll = located.iter().any(|frame| frame.has_xll);

    if !has_core || secondary {
        // Extension-substream-only streams are DTS-Express.
        StreamCodingType::DtsExpress
    } else if has_xll {
        StreamCodingType::DtsHdMa
    } else if has_ext {
        StreamCodingType::DtsHdHr
    } else {
        StreamCodingType::Dts
    }
}

/// Analyzes a DTS family stream and emits its script.
pub fn analyze(settings: &ParsingSettings) -> Result<StreamCodingType> {
    let mut file = File::open(&settings.es_path)?;
    let located = scan_frames(&mut file)?;
    let coding_type = coding_type_of(&located, settings.options.secondary);
    let extract_core = settings.options.extract_core;

    let pbr_stats = settings
        .options
        .pbr_path
        .as_deref()
        .map(PbrStatistics::load)
        .transpose()?;

    let mut writer = EsmsWriter::create(&settings.script_path)?;
    let src_id = writer.add_source_file(&settings.es_path, 4096)?;

    let sample_rate = located
        .iter()
        .find(|frame| frame.info.kind == DtsFrameKind::Core)
        .map_or(48_000, |frame| frame.info.sample_rate);

    // First pass over timing: core frames advance the sample counter,
    // extensions ride on the cadence of the core frame they follow.
    let mut core_samples = 0u64;
    let mut total_bytes = 0u64;
    let mut first_core: Option<DtsFrameInfo> = None;
    let mut plan: Vec<(LocatedFrame, u64, bool)> = Vec::new();

    for frame in &located {
        match frame.info.kind {
            DtsFrameKind::Core => {
                first_core = first_core.or(Some(frame.info));
                let pts = core_samples * 90_000 / sample_rate as u64;
                plan.push((*frame, pts, false));
                core_samples += frame.info.samples as u64;
                total_bytes += frame.info.frame_size as u64;
            }
            DtsFrameKind::Extension => {
                if extract_core {
                    continue;
                }
                let pts_samples = if first_core.is_some() {
                    core_samples.saturating_sub(512)
                } else {
                    core_samples
                };
                let pts = pts_samples * 90_000 / sample_rate as u64;
                plan.push((*frame, pts, true));
                total_bytes += frame.info.frame_size as u64;
                if first_core.is_none() {
                    // DTS-Express cadence: 512 samples per substream frame.
                    core_samples += 512;
                }
            }
        }
    }

    // PBR smoothing rewrites the emission PTS of extension frames.
    if let Some(stats) = &pbr_stats {
        let ext_frames: Vec<PbrFrame> = plan
            .iter()
            .filter(|(_, _, is_ext)| *is_ext)
            .map(|(frame, pts, _)| PbrFrame {
                pts: *pts,
                size: frame.info.frame_size,
            })
            .collect();
        let emission = pbr::smooth(stats, &ext_frames);
        let mut emission_iter = emission.into_iter();
        for entry in plan.iter_mut().filter(|(_, _, is_ext)| *is_ext) {
            entry.1 = emission_iter.next().expect("one timestamp per frame");
        }
        // Smoothing may move frames across core frames; keep the script in
        // non-decreasing timestamp order.
        plan.sort_by_key(|(frame, pts, _)| (*pts, frame.offset));
    }

    for (frame, pts, is_ext) in &plan {
        writer.write_pes_frame(&EsmsPesFrame {
            extension_frame: *is_ext,
            pts: *pts,
            dts: None,
            ext_data: None,
            size: frame.info.frame_size,
            commands: vec![BuildCommand::AddPayload {
                file_id: src_id,
                offset: 0,
                src_offset: frame.offset,
                size: frame.info.frame_size,
            }],
        })?;
    }

    let duration_samples = core_samples.max(1);
    let pts_final = duration_samples * 90_000 / sample_rate as u64;
    let bitrate = (total_bytes * 8 * sample_rate as u64 / duration_samples) as u32;

    writer.set_properties(EsProperties {
        es_type: EsType::Audio,
        coding_type,
        pts_reference: 0,
        bitrate,
        pts_final,
        scripting_flags: settings.options.script_flags(),
    });
    writer.set_fmt_properties(FmtProperties::Audio(AudioProperties {
        audio_format: match first_core.map_or(0, |info| info.amode) {
            0x0 => 0x1,
            0x1 | 0x2 => 0x3,
            _ => 0x6,
        },
        sample_rate: SampleRateCode::from_hz(sample_rate).unwrap_or_default(),
        bit_depth: 0,
        ac3: None,
    }));
    writer.finalize()?;

    debug!(
        source = %settings.es_path.display(),
        coding_type = coding_type.name(),
        frames = located.len(),
        pbr = pbr_stats.is_some(),
        "DTS script generated"
    );
    Ok(coding_type)
}
