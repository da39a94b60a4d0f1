//! MPEG-1/MPEG-2 video parser producing ESMS scripts.
//!
//! Splits the bitstream into picture units (sequence/GOP headers plus the
//! picture and its slices), derives DTS from coded order and PTS from each
//! picture's `temporal_reference`, and records one `AddPayload` command per
//! unit.

mod error;
pub mod headers;

pub use error::H262Error;
pub use headers::{PictureHeader, PictureType, SequenceExtension, SequenceHeader};

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use memchr::memmem;
use tracing::debug;

use esms::{
    BuildCommand, EsProperties, EsmsPesFrame, EsmsWriter, FmtProperties, FrameRateCode,
    HdmvVideoFormat, ParsingSettings, VideoProperties,
};
use ts::{EsType, StreamCodingType};

/// Result type for H.262 operations.
pub type Result<T> = std::result::Result<T, H262Error>;

/// A located start code with a snapshot of the following header bytes.
#[derive(Debug, Clone, Copy)]
struct StartCode {
    offset: u64,
    code: u8,
    header: [u8; 16],
    header_len: usize,
}

/// Scans a file for `00 00 01 xx` start codes using a chunked window.
fn scan_start_codes(path: &Path) -> Result<Vec<StartCode>> {
    const CHUNK: usize = 1 << 20;
    const OVERLAP: usize = 20;

    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut codes = Vec::new();
    let mut buf = Vec::with_capacity(CHUNK + OVERLAP);
    let mut base = 0u64;

    let mut scan = |buf: &[u8], base: u64, search_end: usize, codes: &mut Vec<StartCode>| {
        let mut pos = 0usize;
        while let Some(found) = memmem::find(&buf[pos..search_end.max(pos)], &[0x00, 0x00, 0x01]) {
            let at = pos + found;
            if at + 3 >= buf.len() {
                break;
            }
            let code = buf[at + 3];
            let header_start = at + 4;
            let header_len = (buf.len() - header_start).min(16);
            let mut header = [0u8; 16];
            header[..header_len].copy_from_slice(&buf[header_start..header_start + header_len]);
            codes.push(StartCode {
                offset: base + at as u64,
                code,
                header,
                header_len,
            });
            pos = at + 3;
        }
    };

    loop {
        let mut chunk = vec![0u8; CHUNK];
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            // Codes inside the retained overlap tail.
            scan(&buf, base, buf.len(), &mut codes);
            break;
        }
        chunk.truncate(read);
        buf.extend_from_slice(&chunk);

        // Leave the tail unscanned until the next chunk arrives so start
        // codes spanning chunk boundaries keep their header bytes.
        let search_end = buf.len().saturating_sub(OVERLAP);
        scan(&buf, base, search_end, &mut codes);

        if buf.len() > OVERLAP {
            let cut = buf.len() - OVERLAP;
            base += cut as u64;
            buf.drain(..cut);
        }
    }

    // Drop duplicates introduced by the overlap.
    codes.dedup_by_key(|code| code.offset);
    Ok(codes)
}

#[derive(Debug, Clone, Copy)]
struct Picture {
    unit_start: u64,
    unit_end: u64,
    temporal_reference: u16,
    picture_type: PictureType,
    gop_index: u32,
}

/// Analyzes an H.262 stream and emits its script.
pub fn analyze(settings: &ParsingSettings) -> Result<StreamCodingType> {
    let codes = scan_start_codes(&settings.es_path)?;
    let file_len = std::fs::metadata(&settings.es_path)?.len();

    let mut sequence: Option<SequenceHeader> = None;
    let mut extension: Option<SequenceExtension> = None;
    let mut pictures: Vec<Picture> = Vec::new();
    let mut pending_unit_start: Option<u64> = None;
    let mut gop_index = 0u32;
    let mut seen_picture_in_gop = false;

    for code in &codes {
        match code.code {
            headers::SEQUENCE_HEADER_CODE => {
                if sequence.is_none() {
                    sequence = Some(SequenceHeader::parse(&code.header[..code.header_len])?);
                }
                pending_unit_start.get_or_insert(code.offset);
            }
            headers::EXTENSION_START_CODE => {
                if extension.is_none() {
                    extension = SequenceExtension::parse(&code.header[..code.header_len])?;
                }
            }
            headers::GROUP_START_CODE => {
                if seen_picture_in_gop {
                    gop_index += 1;
                    seen_picture_in_gop = false;
                }
                pending_unit_start.get_or_insert(code.offset);
            }
            headers::PICTURE_START_CODE => {
                if sequence.is_none() {
                    return Err(H262Error::PictureBeforeSequence(code.offset));
                }
                let header = PictureHeader::parse(&code.header[..code.header_len])?;
                let unit_start = pending_unit_start.take().unwrap_or(code.offset);
                if let Some(previous) = pictures.last_mut() {
                    previous.unit_end = unit_start;
                }
                pictures.push(Picture {
                    unit_start,
                    unit_end: file_len,
                    temporal_reference: header.temporal_reference,
                    picture_type: header.picture_type,
                    gop_index,
                });
                seen_picture_in_gop = true;
            }
            headers::SEQUENCE_END_CODE => {
                // The end code belongs to the last picture unit.
            }
            _ => {}
        }
    }

    let sequence = sequence.ok_or(H262Error::MissingSequenceHeader)?;
    if pictures.is_empty() {
        return Err(H262Error::EmptyStream);
    }

    // Display-order bases per GOP: pictures displayed before each GOP.
    let nb_gops = gop_index as usize + 1;
    let mut gop_sizes = vec![0u64; nb_gops];
    for picture in &pictures {
        gop_sizes[picture.gop_index as usize] += 1;
    }
    let mut gop_bases = vec![0u64; nb_gops];
    for idx in 1..nb_gops {
        gop_bases[idx] = gop_bases[idx - 1] + gop_sizes[idx - 1];
    }

    let has_b_pictures = pictures
        .iter()
        .any(|picture| picture.picture_type == PictureType::B);
    let reorder_delay = u64::from(has_b_pictures);

    let (num, den) = sequence.frame_rate();
    let ticks = |index: u64| index * 90_000 * den as u64 / num as u64;

    let mut writer = EsmsWriter::create(&settings.script_path)?;
    let src_id = writer.add_source_file(&settings.es_path, 4096)?;

    let mut last_pts = 0u64;
    for (decode_index, picture) in pictures.iter().enumerate() {
        let dts = ticks(decode_index as u64);
        let display_index = gop_bases[picture.gop_index as usize]
            + picture.temporal_reference as u64
            + reorder_delay;
        let pts = ticks(display_index);
        last_pts = last_pts.max(pts);

        let size = (picture.unit_end - picture.unit_start) as u32;
        writer.write_pes_frame(&EsmsPesFrame {
            extension_frame: false,
            pts,
            dts: (dts != pts).then_some(dts),
            ext_data: None,
            size,
            commands: vec![BuildCommand::AddPayload {
                file_id: src_id,
                offset: 0,
                src_offset: picture.unit_start,
                size,
            }],
        })?;
    }

    let interlaced = extension.is_none_or(|ext| !ext.progressive);
    let frame_rate = FrameRateCode::from_rational(num, den);
    let profile_and_level = extension.map_or(0, |ext| ext.profile_and_level);

    writer.set_properties(EsProperties {
        es_type: EsType::Video,
        coding_type: StreamCodingType::H262,
        pts_reference: 0,
        bitrate: sequence.bitrate.min(u32::MAX as u64) as u32,
        pts_final: last_pts + ticks(1),
        scripting_flags: settings.options.script_flags(),
    });
    writer.set_fmt_properties(FmtProperties::Video(VideoProperties {
        video_format: HdmvVideoFormat::from_dimensions(
            sequence.width,
            sequence.height,
            interlaced,
        ),
        frame_rate,
        profile_idc: (profile_and_level >> 4) & 0x07,
        level_idc: profile_and_level & 0x0F,
        still_picture: pictures.len() == 1,
        h264: None,
    }));
    writer.finalize()?;

    debug!(
        source = %settings.es_path.display(),
        pictures = pictures.len(),
        width = sequence.width,
        height = sequence.height,
        "H.262 script generated"
    );
    Ok(StreamCodingType::H262)
}

#[cfg(test)]
mod tests {
    use super::*;
    use esms::{EsmsReader, ParsingOptions, ScriptFlags};
    use super::headers::test_support::*;

    /// seq + ext + GOP(I B B P) + GOP(I B) stream, 25 fps.
    fn synthetic_stream() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&start_code(
            headers::SEQUENCE_HEADER_CODE,
            &sequence_header_body(),
        ));
        out.extend_from_slice(&start_code(
            headers::EXTENSION_START_CODE,
            &sequence_extension_body(false),
        ));
        out.extend_from_slice(&start_code(headers::GROUP_START_CODE, &[0x00; 4]));
        // Decode order I(tr2) B(tr0) B(tr1) P(tr3).
        for (tr, ptype) in [(2u16, 1u8), (0, 3), (1, 3), (3, 2)] {
            out.extend_from_slice(&start_code(
                headers::PICTURE_START_CODE,
                &picture_header_body(tr, ptype),
            ));
            out.extend_from_slice(&start_code(0x01, &[0xAA; 32])); // slice
        }
        out.extend_from_slice(&start_code(headers::GROUP_START_CODE, &[0x00; 4]));
        for (tr, ptype) in [(1u16, 1u8), (0, 3)] {
            out.extend_from_slice(&start_code(
                headers::PICTURE_START_CODE,
                &picture_header_body(tr, ptype),
            ));
            out.extend_from_slice(&start_code(0x01, &[0xBB; 32]));
        }
        out
    }

    fn run(dir: &Path) -> (Vec<EsmsPesFrame>, EsProperties, FmtProperties) {
        let es_path = dir.join("video.m2v");
        std::fs::write(&es_path, synthetic_stream()).unwrap();
        let settings = ParsingSettings {
            es_path,
            script_path: dir.join("video.m2v.ess"),
            options: ParsingOptions::default(),
            restart: false,
        };
        assert_eq!(analyze(&settings).unwrap(), StreamCodingType::H262);
        esms::validate_script(&settings.script_path, ScriptFlags::default()).unwrap();

        let mut reader = EsmsReader::open(&settings.script_path).unwrap();
        let mut frames = Vec::new();
        while let Some(frame) = reader.next_frame().unwrap() {
            frames.push(frame);
        }
        (frames, *reader.properties(), *reader.fmt_properties())
    }

    #[test]
    fn test_picture_timing() {
        let dir = tempfile::tempdir().unwrap();
        let (frames, properties, _) = run(dir.path());
        assert_eq!(frames.len(), 6);

        let dur = 90_000 / 25;
        // I picture: decoded first, displayed third (tr 2 + 1 reorder).
        assert_eq!(frames[0].dts, Some(0));
        assert_eq!(frames[0].pts, 3 * dur);
        // First B picture: dts == pts == 1 frame.
        assert_eq!(frames[1].pts, dur);
        assert_eq!(frames[1].dts, None);
        // P picture at decode 3 displays at tr 3 + 1.
        assert_eq!(frames[3].pts, 4 * dur);
        assert_eq!(frames[3].dts, Some(3 * dur));
        // Second GOP base is 4 displayed pictures.
        assert_eq!(frames[4].pts, (4 + 1 + 1) * dur);

        assert_eq!(properties.coding_type, StreamCodingType::H262);
        assert_eq!(properties.bitrate, 80_000_000);
    }

    #[test]
    fn test_units_cover_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let (frames, _, _) = run(dir.path());
        let total: u64 = frames.iter().map(|frame| frame.size as u64).sum();
        assert_eq!(total, synthetic_stream().len() as u64);
        // The first unit starts at byte 0 (sequence header included).
        assert!(matches!(
            frames[0].commands[0],
            BuildCommand::AddPayload { src_offset: 0, .. }
        ));
    }

    #[test]
    fn test_format_properties() {
        let dir = tempfile::tempdir().unwrap();
        let (_, _, fmt) = run(dir.path());
        let FmtProperties::Video(video) = fmt else {
            panic!("expected video properties");
        };
        assert_eq!(video.video_format, HdmvVideoFormat::I1080);
        assert_eq!(video.frame_rate, FrameRateCode::F25);
        assert_eq!(video.profile_idc, 0x4);
        assert_eq!(video.level_idc, 0x4);
        assert!(!video.still_picture);
    }

    #[test]
    fn test_missing_sequence_header() {
        let dir = tempfile::tempdir().unwrap();
        let es_path = dir.path().join("junk.m2v");
        std::fs::write(&es_path, vec![0u8; 64]).unwrap();
        let settings = ParsingSettings {
            es_path,
            script_path: dir.path().join("junk.ess"),
            options: ParsingOptions::default(),
            restart: false,
        };
        assert!(matches!(
            analyze(&settings),
            Err(H262Error::MissingSequenceHeader)
        ));
    }
}
