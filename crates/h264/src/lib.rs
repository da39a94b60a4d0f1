//! H.264/AVC Annex-B parser producing ESMS scripts.
//!
//! Splits the byte stream into access units, derives DTS from coded order
//! and PTS from picture order counts, and encodes every reshaping operation
//! as build commands: SEI stripping cuts copy ranges, `--level` overwrites
//! the `level_idc` byte in place, and fps/aspect overrides splice a
//! re-encoded SPS carried as a script data block.

mod error;
pub mod hrd;
pub mod nal;
pub mod slice;
pub mod sps;

pub use error::H264Error;
pub use hrd::{verify_cpb, HrdAccessUnit, HrdViolation, HrdViolationKind};
pub use nal::{NalType, NalUnit};
pub use slice::{PocCounter, SliceHeader};
pub use sps::Sps;

use tracing::{debug, warn};

use esms::{
    BuildCommand, EsProperties, EsmsPesFrame, EsmsWriter, FmtProperties, FrameRateCode,
    H264ExtData, H264SpecProperties, HdmvVideoFormat, InsertMode, ParsingSettings,
    PesFrameExtData, VideoProperties,
};
use ts::{EsType, StreamCodingType};

/// Result type for H.264 operations.
pub type Result<T> = std::result::Result<T, H264Error>;

/// A byte range replaced or removed inside an access unit.
#[derive(Debug, Clone, Copy)]
enum Edit {
    /// Drop the range from the PES payload.
    Cut(u64, u64),
    /// Substitute the range with a data block of the given id and length.
    Replace(u64, u64, u8, u32),
}

impl Edit {
    fn range(&self) -> (u64, u64) {
        match *self {
            Edit::Cut(start, end) => (start, end),
            Edit::Replace(start, end, _, _) => (start, end),
        }
    }
}

/// One access unit and everything needed to script it.
#[derive(Debug, Clone, Default)]
struct AccessUnit {
    start: u64,
    end: u64,
    idr: bool,
    poc: i64,
    sei_ranges: Vec<(u64, u64)>,
    /// Full NAL ranges of in-band SPSes plus the file offset of their
    /// `level_idc` byte.
    sps_sites: Vec<((u64, u64), u64)>,
}

/// Builds the command list of an AU, applying edits (sorted, disjoint) and
/// an optional level overwrite. Returns the commands and the payload size.
fn build_au_commands(
    au: &AccessUnit,
    src_id: u8,
    mut edits: Vec<Edit>,
    level_overwrite: Option<(u64, u8)>,
) -> (Vec<BuildCommand>, u32) {
    edits.sort_by_key(|edit| edit.range().0);

    let mut commands = Vec::new();
    let mut dst_offset = 0u32;
    let mut cursor = au.start;
    let mut level_dst: Option<(u32, u8)> = None;

    let mut push_span = |commands: &mut Vec<BuildCommand>,
                         dst_offset: &mut u32,
                         from: u64,
                         to: u64| {
        if to > from {
            // A level byte inside this span maps onto the PES payload.
            if let Some((file_offset, level)) = level_overwrite {
                if (from..to).contains(&file_offset) {
                    level_dst = Some((*dst_offset + (file_offset - from) as u32, level));
                }
            }
            commands.push(BuildCommand::AddPayload {
                file_id: src_id,
                offset: *dst_offset,
                src_offset: from,
                size: (to - from) as u32,
            });
            *dst_offset += (to - from) as u32;
        }
    };

    for edit in &edits {
        let (edit_start, edit_end) = edit.range();
        push_span(&mut commands, &mut dst_offset, cursor, edit_start);
        if let Edit::Replace(_, _, block_id, block_len) = edit {
            commands.push(BuildCommand::AddDataBlock {
                block_id: *block_id,
                offset: dst_offset,
                mode: InsertMode::Overwrite,
            });
            dst_offset += block_len;
        }
        cursor = edit_end;
    }
    push_span(&mut commands, &mut dst_offset, cursor, au.end);

    if let Some((offset, level)) = level_dst {
        commands.push(BuildCommand::AddData {
            offset,
            mode: InsertMode::Overwrite,
            data: vec![level],
        });
    }

    (commands, dst_offset)
}

/// Analyzes an H.264 Annex-B stream and emits its script.
pub fn analyze(settings: &ParsingSettings) -> Result<StreamCodingType> {
    let data = std::fs::read(&settings.es_path)?;
    let units = nal::split_nal_units(&data);

    // First SPS drives geometry, timing and HRD figures.
    let first_sps_unit = units
        .iter()
        .find(|unit| unit.nal_type == NalType::Sps)
        .copied()
        .ok_or(H264Error::MissingSps)?;
    let first_sps_rbsp = nal::unescape_rbsp(first_sps_unit.payload(&data));
    let sps = Sps::parse(&first_sps_rbsp)?;

    let fps_override = settings
        .options
        .fps_mod
        .and_then(FrameRateCode::as_rational);
    let (num, den) = fps_override
        .or_else(|| sps.frame_rate())
        .ok_or(H264Error::MissingFrameRate)?;

    // Access unit assembly.
    let mut finished: Vec<AccessUnit> = Vec::new();
    let mut current = AccessUnit::default();
    let mut prefix = AccessUnit::default();
    let mut prefix_start: Option<u64> = None;
    let mut poc_counter = PocCounter::default();

    let note_non_vcl = |au: &mut AccessUnit, unit: &NalUnit| {
        match unit.nal_type {
            NalType::Sei => au.sei_ranges.push((unit.start as u64, unit.end as u64)),
            NalType::Sps => au.sps_sites.push((
                (unit.start as u64, unit.end as u64),
                // profile, constraint flags, then level_idc.
                unit.header as u64 + 3,
            )),
            _ => {}
        }
    };

    let mut has_vcl = false;
    for unit in &units {
        if unit.nal_type.is_vcl() {
            let idr = unit.nal_type == NalType::IdrSlice;
            let rbsp = nal::unescape_rbsp(unit.payload(&data));
            let header = SliceHeader::parse(&rbsp, &sps, idr)?;

            if header.first_mb_in_slice == 0 && has_vcl {
                // New picture: close the running AU at the prefix boundary.
                let boundary = prefix_start.unwrap_or(unit.start as u64);
                current.end = boundary;
                finished.push(std::mem::take(&mut current));
                current = std::mem::take(&mut prefix);
                current.start = boundary;
                prefix_start = None;
            }
            if header.first_mb_in_slice == 0 {
                current.idr = idr;
                current.poc = poc_counter.next(
                    &sps,
                    header.pic_order_cnt_lsb,
                    idr,
                    unit.ref_idc != 0,
                );
            } else if prefix_start.is_some() {
                // Mid-picture non-VCL units fold back into the current AU.
                current.sei_ranges.append(&mut prefix.sei_ranges);
                current.sps_sites.append(&mut prefix.sps_sites);
                prefix = AccessUnit::default();
                prefix_start = None;
            }
            has_vcl = true;
        } else if has_vcl {
            prefix_start.get_or_insert(unit.start as u64);
            note_non_vcl(&mut prefix, unit);
        } else {
            note_non_vcl(&mut current, unit);
        }
    }
    if has_vcl {
        current.end = data.len() as u64;
        finished.push(current);
    }
    if finished.is_empty() {
        return Err(H264Error::EmptyStream);
    }
    if sps.pic_order_cnt_type == 1 {
        warn!("POC type 1 stream: display order approximated by coded order");
    }

    // Display indices: sort by POC inside each IDR-delimited sequence.
    let nb_aus = finished.len();
    let mut display_index = vec![0u64; nb_aus];
    let mut group_start = 0usize;
    let mut display_base = 0u64;
    for idx in 0..=nb_aus {
        let group_ends = idx == nb_aus || (idx > group_start && finished[idx].idr);
        if group_ends {
            let mut order: Vec<usize> = (group_start..idx).collect();
            order.sort_by_key(|&au_idx| (finished[au_idx].poc, au_idx));
            for (rank, &au_idx) in order.iter().enumerate() {
                display_index[au_idx] = display_base + rank as u64;
            }
            display_base += (idx - group_start) as u64;
            group_start = idx;
        }
    }
    let reorder_delay = (0..nb_aus)
        .map(|idx| (idx as i64 - display_index[idx] as i64).max(0) as u64)
        .max()
        .unwrap_or(0);

    // Script generation.
    let mut writer = EsmsWriter::create(&settings.script_path)?;
    let src_id = writer.add_source_file(&settings.es_path, 4096)?;

    let effective_level = settings.options.level_mod.unwrap_or(sps.level_idc);
    let needs_sps_patch =
        settings.options.fps_mod.is_some() || settings.options.ar_mod.is_some();
    let patched_block = if needs_sps_patch {
        let sar = settings
            .options
            .ar_mod
            .map(|(width, height)| (width as u16, height as u16));
        let mut rbsp = sps.patched_rbsp(&first_sps_rbsp, fps_override, sar)?;
        if let Some(level) = settings.options.level_mod {
            rbsp[2] = level;
        }
        let mut nal_bytes = vec![0x00, 0x00, 0x00, 0x01, data[first_sps_unit.header]];
        nal_bytes.extend_from_slice(&nal::escape_rbsp(&rbsp));
        let len = nal_bytes.len() as u32;
        Some((writer.add_data_block(nal_bytes)?, len))
    } else {
        None
    };

    let ticks = |index: u64| index * 90_000 * den as u64 / num as u64;
    let mut last_pts = 0u64;
    let mut hrd_schedule = Vec::with_capacity(nb_aus);

    for (decode_idx, au) in finished.iter().enumerate() {
        let dts = ticks(decode_idx as u64);
        let pts = ticks(display_index[decode_idx] + reorder_delay);
        last_pts = last_pts.max(pts);

        let mut edits: Vec<Edit> = Vec::new();
        if settings.options.remove_sei {
            edits.extend(au.sei_ranges.iter().map(|&(s, e)| Edit::Cut(s, e)));
        }
        let mut level_overwrite = None;
        for ((sps_start, sps_end), level_offset) in &au.sps_sites {
            match patched_block {
                Some((block_id, block_len)) => {
                    edits.push(Edit::Replace(*sps_start, *sps_end, block_id, block_len));
                }
                None => {
                    if settings.options.level_mod.is_some() {
                        level_overwrite = Some((*level_offset, effective_level));
                    }
                }
            }
        }

        let (commands, size) = build_au_commands(au, src_id, edits, level_overwrite);
        hrd_schedule.push(hrd::HrdAccessUnit {
            removal_time: dts,
            size_bits: size as u64 * 8,
        });
        writer.write_pes_frame(&EsmsPesFrame {
            extension_frame: false,
            pts,
            dts: (dts != pts).then_some(dts),
            ext_data: Some(PesFrameExtData::H264(H264ExtData {
                cpb_removal_time: dts,
                dpb_output_time: pts,
            })),
            size,
            commands,
        })?;
    }

    let hrd_bitrate = sps.hrd_bitrate();
    if !settings.options.disable_hrd_verifier && hrd_bitrate > 0 {
        let violations = hrd::verify_cpb(
            &hrd_schedule,
            hrd_bitrate,
            sps.hrd_cpb_size(),
            sps.hrd_cbr(),
        );
        hrd::report_violations(&violations, 10);
    }
    let measured =
        (data.len() as u64 * 8 * num as u64 / (den as u64 * nb_aus as u64)).min(u32::MAX as u64);
    let bitrate = if hrd_bitrate > 0 {
        hrd_bitrate.min(u32::MAX as u64) as u32
    } else {
        measured as u32
    };

    writer.set_properties(EsProperties {
        es_type: EsType::Video,
        coding_type: StreamCodingType::Avc,
        pts_reference: 0,
        bitrate,
        pts_final: last_pts + ticks(1),
        scripting_flags: settings.options.script_flags(),
    });
    writer.set_fmt_properties(FmtProperties::Video(VideoProperties {
        video_format: HdmvVideoFormat::from_dimensions(
            sps.width,
            sps.height,
            !sps.frame_mbs_only,
        ),
        frame_rate: FrameRateCode::from_rational(num, den),
        profile_idc: sps.profile_idc,
        level_idc: effective_level,
        still_picture: nb_aus == 1,
        h264: Some(H264SpecProperties {
            constraint_flags: sps.constraint_flags,
            cpb_size: sps.hrd_cpb_size().min(u32::MAX as u64) as u32,
            bitrate,
        }),
    }));
    writer.finalize()?;

    debug!(
        source = %settings.es_path.display(),
        access_units = nb_aus,
        width = sps.width,
        height = sps.height,
        level = effective_level,
        "H.264 script generated"
    );
    Ok(StreamCodingType::Avc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use esms::{apply_commands, EsmsReader, ParsingOptions, ScriptFlags};
    use std::path::Path;

    fn nal(nal_type: u8, ref_idc: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0x00, 0x00, 0x00, 0x01, (ref_idc << 5) | nal_type];
        out.extend_from_slice(payload);
        out
    }

    fn slice_payload(sps: &Sps, first_mb: u32, idr: bool, poc_lsb: u32) -> Vec<u8> {
        let mut bits = bitio::BitWriter::new();
        let write_ue = |bits: &mut bitio::BitWriter, value: u32| {
            let code = value as u64 + 1;
            let len = 64 - code.leading_zeros() as usize;
            bits.write_bits(0, len - 1).unwrap();
            bits.write_bits(code, len).unwrap();
        };
        write_ue(&mut bits, first_mb);
        write_ue(&mut bits, 7); // slice_type
        write_ue(&mut bits, 0); // pps_id
        bits.write_bits(0, sps.log2_max_frame_num as usize).unwrap();
        if idr {
            write_ue(&mut bits, 0);
        }
        bits.write_bits(poc_lsb as u64, sps.log2_max_pic_order_cnt_lsb as usize)
            .unwrap();
        bits.align();
        let mut payload = bits.into_bytes();
        payload.extend_from_slice(&[0x5A; 24]); // slice data
        payload
    }

    /// IDR(poc 0), P(poc 4), B(poc 2) stream with SPS/PPS/SEI prefix.
    fn synthetic_stream() -> (Vec<u8>, Sps) {
        let sps_rbsp = sps::test_support::sps_rbsp(25, 1, true);
        let sps = Sps::parse(&sps_rbsp).unwrap();
        let mut out = Vec::new();
        out.extend_from_slice(&nal(7, 3, &nal::escape_rbsp(&sps_rbsp)));
        out.extend_from_slice(&nal(8, 3, &[0xC8, 0x42])); // PPS
        out.extend_from_slice(&nal(6, 0, &[0x05, 0x02, 0xAA, 0xBB, 0x80])); // SEI
        out.extend_from_slice(&nal(5, 3, &slice_payload(&sps, 0, true, 0)));
        out.extend_from_slice(&nal(1, 2, &slice_payload(&sps, 0, false, 4)));
        out.extend_from_slice(&nal(1, 0, &slice_payload(&sps, 0, false, 2)));
        (out, sps)
    }

    fn run(dir: &Path, options: ParsingOptions) -> (Vec<EsmsPesFrame>, EsmsReader) {
        let (stream, _) = synthetic_stream();
        let es_path = dir.join("video.264");
        std::fs::write(&es_path, &stream).unwrap();
        let settings = ParsingSettings {
            es_path,
            script_path: dir.join("video.264.ess"),
            options,
            restart: false,
        };
        assert_eq!(analyze(&settings).unwrap(), StreamCodingType::Avc);
        esms::validate_script(&settings.script_path, ScriptFlags::default()).unwrap();
        let mut reader = EsmsReader::open(&settings.script_path).unwrap();
        let mut frames = Vec::new();
        while let Some(frame) = reader.next_frame().unwrap() {
            frames.push(frame);
        }
        (frames, reader)
    }

    #[test]
    fn test_access_unit_timing() {
        let dir = tempfile::tempdir().unwrap();
        let (frames, reader) = run(dir.path(), ParsingOptions::default());
        assert_eq!(frames.len(), 3);

        let dur = 3600; // 25 fps in 90 kHz ticks
        // Display order by POC: IDR(0) B(2) P(4); delay = 1
        // (the B decodes at 2 but displays at 1).
        assert_eq!(frames[0].pts, dur);
        assert_eq!(frames[0].dts, Some(0));
        assert_eq!(frames[1].pts, 3 * dur);
        assert_eq!(frames[1].dts, Some(dur));
        assert_eq!(frames[2].pts, 2 * dur);
        assert_eq!(frames[2].dts, None);

        // HRD extension data mirrors the timing.
        assert!(matches!(
            frames[0].ext_data,
            Some(PesFrameExtData::H264(H264ExtData {
                cpb_removal_time: 0,
                dpb_output_time: 3600,
            }))
        ));

        assert_eq!(reader.properties().bitrate, 8_000_000);
        let FmtProperties::Video(video) = reader.fmt_properties() else {
            panic!("expected video properties");
        };
        assert_eq!(video.h264.unwrap().cpb_size, 30_000_000);
        assert_eq!(video.level_idc, 51);
    }

    #[test]
    fn test_units_cover_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let (frames, _) = run(dir.path(), ParsingOptions::default());
        let (stream, _) = synthetic_stream();
        let total: u64 = frames.iter().map(|frame| frame.size as u64).sum();
        assert_eq!(total, stream.len() as u64);
    }

    #[test]
    fn test_level_override_single_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let (frames, _) = run(
            dir.path(),
            ParsingOptions {
                level_mod: Some(40),
                ..ParsingOptions::default()
            },
        );

        // Exactly one overwrite command, placing 0x28 on the level byte.
        let overwrites: Vec<_> = frames[0]
            .commands
            .iter()
            .filter_map(|command| match command {
                BuildCommand::AddData { offset, mode, data } => Some((*offset, *mode, data)),
                _ => None,
            })
            .collect();
        assert_eq!(overwrites.len(), 1);
        let (offset, mode, data) = &overwrites[0];
        assert_eq!(*mode, InsertMode::Overwrite);
        assert_eq!(data.as_slice(), &[0x28]);
        // The SPS payload starts at byte 5 of the AU (4-byte start code +
        // NAL header); level_idc is its third byte.
        assert_eq!(*offset, 5 + 2);

        // Applying the commands yields a payload with the new level.
        let (stream, _) = synthetic_stream();
        let mut sources = [stream.as_slice()];
        let payload =
            apply_commands(&frames[0].commands, frames[0].size, &[], &mut sources).unwrap();
        assert_eq!(payload[7], 0x28);
        // No other overwrite on later frames (no in-band SPS there).
        assert!(frames[1].commands.iter().all(|command| !matches!(
            command,
            BuildCommand::AddData { .. }
        )));
    }

    #[test]
    fn test_remove_sei_cuts_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let (frames, _) = run(
            dir.path(),
            ParsingOptions {
                remove_sei: true,
                ..ParsingOptions::default()
            },
        );
        let (stream, _) = synthetic_stream();
        let sei_len = 5 + 5; // start code + header + payload bytes
        let total: u64 = frames.iter().map(|frame| frame.size as u64).sum();
        assert_eq!(total, (stream.len() - sei_len) as u64);
        // First AU is now two copy spans around the SEI.
        let copies = frames[0]
            .commands
            .iter()
            .filter(|command| matches!(command, BuildCommand::AddPayload { .. }))
            .count();
        assert_eq!(copies, 2);
    }

    #[test]
    fn test_fps_override_replaces_sps() {
        let dir = tempfile::tempdir().unwrap();
        let (frames, reader) = run(
            dir.path(),
            ParsingOptions {
                fps_mod: Some(FrameRateCode::F23976),
                ..ParsingOptions::default()
            },
        );
        // The first AU splices a data block in place of the SPS.
        assert!(frames[0].commands.iter().any(|command| matches!(
            command,
            BuildCommand::AddDataBlock { block_id: 0, .. }
        )));
        assert_eq!(reader.data_blocks().len(), 1);

        // The replacement block re-parses to the overridden rate.
        let block = &reader.data_blocks()[0];
        let units = nal::split_nal_units(block);
        assert_eq!(units[0].nal_type, NalType::Sps);
        let patched = Sps::parse(&nal::unescape_rbsp(units[0].payload(block))).unwrap();
        assert_eq!(patched.frame_rate(), Some((48_000, 2 * 1001)));

        // Timing follows the override: 23.976 fps ≈ 3753.75 ticks.
        assert_eq!(frames[1].dts, Some(90_000 * 1001 / 24_000));
    }

    #[test]
    fn test_missing_sps() {
        let dir = tempfile::tempdir().unwrap();
        let es_path = dir.path().join("junk.264");
        std::fs::write(&es_path, nal(1, 3, &[0x00; 16])).unwrap();
        let settings = ParsingSettings {
            es_path,
            script_path: dir.path().join("junk.ess"),
            options: ParsingOptions::default(),
            restart: false,
        };
        assert!(matches!(analyze(&settings), Err(H264Error::MissingSps)));
    }
}
