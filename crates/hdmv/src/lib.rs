//! HDMV PG/IG parser and graphics toolbox.
//!
//! The analyzer walks a SUP-layout segment stream (`PG` magic, recorded
//! PTS/DTS per segment), groups segments into display sets and emits one
//! PES frame per segment. The palette machinery (hexatree quantizer, RGBA
//! to YCbCr conversion, object RLE) shared with the menu compiler lives in
//! the sibling modules.

mod error;
pub mod palette;
pub mod quantizer;
pub mod rle;
pub mod segment;

pub use error::HdmvError;
pub use palette::{ColorMatrix, Palette, PaletteEntry};
pub use quantizer::{HexTreeQuantizer, ReductionPolicy};
pub use segment::{Segment, SegmentType};

use tracing::debug;

use esms::{BuildCommand, EsProperties, EsmsPesFrame, EsmsWriter, ParsingSettings};
use ts::{EsType, StreamCodingType};

/// Result type for HDMV operations.
pub type Result<T> = std::result::Result<T, HdmvError>;

/// Graphics-plane transfer rate used by forced re-timing, bps.
const GRAPHICS_DECODE_RATE: u64 = 16_000_000;

/// Analyzes a PG or IG segment stream and emits its script.
pub fn analyze(settings: &ParsingSettings) -> Result<StreamCodingType> {
    let segments = segment::scan_segments(&settings.es_path)?;

    let coding_type = if segments
        .iter()
        .any(|seg| seg.segment_type == SegmentType::Ics)
    {
        StreamCodingType::Ig
    } else {
        StreamCodingType::Pg
    };

    // Timestamp plan: recorded values, shifted so the first DTS lands on
    // the requested initial timestamp; forced re-timing rebuilds DTS from
    // transfer durations instead.
    let mut timestamps: Vec<(u64, u64)> = if settings.options.hdmv_force_retiming {
        retime_display_sets(&segments)
    } else {
        segments
            .iter()
            .map(|seg| (seg.pts as u64, seg.dts as u64))
            .collect()
    };

    if let Some(initial) = settings.options.hdmv_initial_timestamp {
        let first_dts = timestamps
            .first()
            .map(|&(pts, dts)| dts.min(pts))
            .unwrap_or(0);
        let shift = initial as i64 - first_dts as i64;
        for (pts, dts) in &mut timestamps {
            *pts = (*pts as i64 + shift).max(0) as u64;
            *dts = (*dts as i64 + shift).max(0) as u64;
        }
    }

    let mut writer = EsmsWriter::create(&settings.script_path)?;
    let src_id = writer.add_source_file(&settings.es_path, 4096)?;

    let mut total_bytes = 0u64;
    let mut last_pts = 0u64;
    for (seg, &(pts, dts)) in segments.iter().zip(&timestamps) {
        total_bytes += seg.payload_size as u64;
        last_pts = last_pts.max(pts);
        writer.write_pes_frame(&EsmsPesFrame {
            extension_frame: false,
            pts,
            dts: (dts != pts).then_some(dts),
            ext_data: None,
            size: seg.payload_size,
            commands: vec![BuildCommand::AddPayload {
                file_id: src_id,
                offset: 0,
                src_offset: seg.payload_offset,
                size: seg.payload_size,
            }],
        })?;
    }

    let first_dts = timestamps.first().map(|&(pts, dts)| dts.min(pts)).unwrap_or(0);
    let duration_ticks = (last_pts - first_dts).max(1);
    let bitrate = (total_bytes * 8 * 90_000 / duration_ticks).min(u32::MAX as u64) as u32;

    writer.set_properties(EsProperties {
        es_type: EsType::Hdmv,
        coding_type,
        pts_reference: first_dts,
        bitrate: bitrate.max(100_000),
        pts_final: last_pts,
        scripting_flags: settings.options.script_flags(),
    });
    writer.finalize()?;

    debug!(
        source = %settings.es_path.display(),
        coding_type = coding_type.name(),
        segments = segments.len(),
        "HDMV script generated"
    );
    Ok(coding_type)
}

/// Rebuilds `(pts, dts)` per segment from composition data: each display
/// set keeps its composition PTS, and segment DTS values are backed off by
/// the transfer time of the set's remaining bytes at the graphics decode
/// rate.
fn retime_display_sets(segments: &[Segment]) -> Vec<(u64, u64)> {
    let mut timestamps = Vec::with_capacity(segments.len());
    let mut set_start = 0usize;

    for idx in 0..segments.len() {
        let set_ends = segments[idx].segment_type == SegmentType::End;
        if !set_ends && idx + 1 < segments.len() {
            continue;
        }
        let set = &segments[set_start..=idx];
        let set_pts = set
            .iter()
            .find(|seg| seg.segment_type.starts_display_set())
            .map_or(set.first().map_or(0, |seg| seg.pts as u64), |seg| {
                seg.pts as u64
            });

        // Transfer time of the whole set, then per-segment back-off.
        let mut remaining: u64 = set.iter().map(|seg| seg.payload_size as u64).sum();
        for seg in set {
            let back_off = remaining * 8 * 90_000 / GRAPHICS_DECODE_RATE;
            let dts = set_pts.saturating_sub(back_off);
            timestamps.push((set_pts, dts));
            remaining -= seg.payload_size as u64;
        }
        set_start = idx + 1;
    }
    timestamps
}
