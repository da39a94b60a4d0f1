//! AC-3 family parser producing ESMS scripts.
//!
//! Handles plain AC-3 (Dolby Digital), E-AC-3 (Dolby Digital Plus,
//! independent and dependent substreams) and TrueHD streams interleaving an
//! AC-3 core with MLP access units. Dependent substreams and MLP units are
//! emitted as extension PES frames (stream_id_extension 0x72 path);
//! `--core` keeps only the AC-3/independent frames.

mod error;
pub mod frames;

pub use error::Ac3Error;
pub use frames::{BsiInfo, FrameInfo, FrameKind};

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use tracing::debug;

use esms::{
    Ac3SpecProperties, AudioProperties, BuildCommand, EsProperties, EsmsPesFrame, EsmsWriter,
    FmtProperties, ParsingSettings, SampleRateCode,
};
use ts::{EsType, StreamCodingType};

/// Result type for AC-3 family operations.
pub type Result<T> = std::result::Result<T, Ac3Error>;

/// Extension (MLP) PES frames carry 1/200 s of audio each.
const MLP_PES_PER_SEC: u32 = 200;

/// One frame located in the source file.
#[derive(Debug, Clone, Copy)]
struct LocatedFrame {
    info: FrameInfo,
    offset: u64,
}

/// Scans the whole stream, returning every located syncframe.
fn scan_frames(file: &mut File) -> Result<Vec<LocatedFrame>> {
    let file_len = file.metadata()?.len();
    let mut located = Vec::new();
    let mut offset = 0u64;
    let mut header = [0u8; 32];

    while offset + 4 <= file_len {
        file.seek(SeekFrom::Start(offset))?;
        let avail = ((file_len - offset) as usize).min(header.len());
        file.read_exact(&mut header[..avail])?;

        let info = if header[0] == 0x0B && header[1] == 0x77 {
            frames::parse_ac3_header(&header[..avail], offset)?
        } else {
            frames::parse_mlp_header(&header[..avail], offset)?
        };

        if offset + info.frame_size as u64 > file_len {
            return Err(Ac3Error::TruncatedFrame(offset));
        }
        located.push(LocatedFrame { info, offset });
        offset += info.frame_size as u64;
    }

    if located.is_empty() {
        return Err(Ac3Error::EmptyStream);
    }
    Ok(located)
}

/// Effective coding type of a scanned stream.
fn coding_type_of(located: &[LocatedFrame], secondary: bool) -> StreamCodingType {
    let has_mlp = located
        .iter()
        .any(|frame| frame.info.kind == FrameKind::Mlp);
    if has_mlp {
        return StreamCodingType::TrueHd;
    }
    let has_eac3 = located.iter().any(|frame| {
        matches!(
            frame.info.kind,
            FrameKind::Eac3Independent | FrameKind::Eac3Dependent
        )
    });
    if has_eac3 {
        if secondary {
            StreamCodingType::Eac3Secondary
        } else {
            StreamCodingType::Eac3
        }
    } else {
        StreamCodingType::Ac3
    }
}

/// Analyzes an AC-3 family stream and emits its script.
pub fn analyze(settings: &ParsingSettings) -> Result<StreamCodingType> {
    let mut file = File::open(&settings.es_path)?;
    let located = scan_frames(&mut file)?;
    let coding_type = coding_type_of(&located, settings.options.secondary);
    let extract_core = settings.options.extract_core;

    let mut writer = EsmsWriter::create(&settings.script_path)?;
    let src_id = writer.add_source_file(&settings.es_path, 4096)?;

    let sample_rate = located
        .iter()
        .find(|frame| frame.info.kind != FrameKind::Mlp)
        .map_or_else(|| located[0].info.sample_rate, |frame| frame.info.sample_rate);
    let mlp_group_samples = sample_rate / MLP_PES_PER_SEC;

    // Core frame cadence and the MLP grouping window run on independent
    // sample counters.
    let mut core_samples = 0u64;
    let mut mlp_samples = 0u64;
    let mut total_bytes = 0u64;

    // Pending MLP access-unit group: (start offset, size, start sample).
    let mut mlp_group: Option<(u64, u32, u64)> = None;
    let mut group_fill = 0u32;

    let flush_group = |writer: &mut EsmsWriter,
                           group: &mut Option<(u64, u32, u64)>|
     -> Result<()> {
        if let Some((offset, size, start_sample)) = group.take() {
            writer.write_pes_frame(&EsmsPesFrame {
                extension_frame: true,
                pts: start_sample * 90_000 / sample_rate as u64,
                dts: None,
                ext_data: None,
                size,
                commands: vec![BuildCommand::AddPayload {
                    file_id: src_id,
                    offset: 0,
                    src_offset: offset,
                    size,
                }],
            })?;
        }
        Ok(())
    };

    let mut first_bsi: Option<BsiInfo> = None;
    for frame in &located {
        match frame.info.kind {
            FrameKind::Ac3 | FrameKind::Eac3Independent => {
                first_bsi = first_bsi.or(frame.info.bsi);
                writer.write_pes_frame(&EsmsPesFrame {
                    extension_frame: false,
                    pts: core_samples * 90_000 / sample_rate as u64,
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
                core_samples += frame.info.samples as u64;
                total_bytes += frame.info.frame_size as u64;
            }
            FrameKind::Eac3Dependent => {
                if extract_core {
                    continue;
                }
                // A dependent substream extends the preceding independent
                // frame and shares its presentation time.
                let pts_samples = core_samples.saturating_sub(frame.info.samples as u64);
                writer.write_pes_frame(&EsmsPesFrame {
                    extension_frame: true,
                    pts: pts_samples * 90_000 / sample_rate as u64,
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
                total_bytes += frame.info.frame_size as u64;
            }
            FrameKind::Mlp => {
                if extract_core {
                    continue;
                }
                match &mut mlp_group {
                    None => {
                        mlp_group = Some((frame.offset, frame.info.frame_size, mlp_samples));
                        group_fill = frame.info.samples;
                    }
                    Some((_, size, _)) => {
                        *size += frame.info.frame_size;
                        group_fill += frame.info.samples;
                    }
                }
                mlp_samples += frame.info.samples as u64;
                total_bytes += frame.info.frame_size as u64;
                if group_fill >= mlp_group_samples {
                    flush_group(&mut writer, &mut mlp_group)?;
                    group_fill = 0;
                }
            }
        }
    }
    flush_group(&mut writer, &mut mlp_group)?;

    let duration_samples = core_samples.max(mlp_samples).max(1);
    let pts_final = duration_samples * 90_000 / sample_rate as u64;
    let nominal = first_bsi.map_or(0, |bsi| bsi.bitrate);
    let measured = (total_bytes * 8 * sample_rate as u64 / duration_samples) as u32;
    let bitrate = nominal.max(measured);

    writer.set_properties(EsProperties {
        es_type: EsType::Audio,
        coding_type,
        pts_reference: 0,
        bitrate,
        pts_final,
        scripting_flags: settings.options.script_flags(),
    });

    let bsi = first_bsi.unwrap_or_default();
    writer.set_fmt_properties(FmtProperties::Audio(AudioProperties {
        audio_format: match bsi.num_channels {
            0x1 => 0x1,
            0x0 | 0x2 => 0x3,
            _ => 0x6,
        },
        sample_rate: SampleRateCode::from_hz(sample_rate).unwrap_or_default(),
        bit_depth: 0,
        ac3: Some(Ac3SpecProperties {
            sample_rate_code: bsi.sample_rate_code,
            bsid: bsi.bsid,
            bit_rate_code: bsi.bit_rate_code,
            surround_mode: bsi.surround_mode,
            bsmod: bsi.bsmod,
            num_channels: bsi.num_channels,
            full_svc: false,
        }),
    }));
    writer.finalize()?;

    debug!(
        source = %settings.es_path.display(),
        coding_type = coding_type.name(),
        frames = located.len(),
        "AC-3 family script generated"
    );
    Ok(coding_type)
}
