//! End-to-end muxing runs over synthetic elementary streams, checking the
//! BDAV output invariants: aligned units, sync bytes, continuity counters,
//! PAT CRC, PCR cadence and per-PID timestamp ordering.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use bitio::mpeg2_crc32;
use mux::{parse_meta_content, MuxContext, MuxSettings};

const TP_SIZE: usize = 188;

/// Writes a 0.2 s stereo 16-bit 48 kHz WAVE file.
fn write_wav(dir: &Path) -> PathBuf {
    let path = dir.join("audio.wav");
    let sample_rate = 48_000u32;
    let block_align = 4u16;
    let data_len = sample_rate / 5 * block_align as u32;

    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for idx in 0..(data_len / 2) {
        out.extend_from_slice(&(idx as u16).to_le_bytes());
    }
    std::fs::write(&path, &out).unwrap();
    path
}

/// Writes a 640 kbps AC-3 stream of `frames` syncframes.
fn write_ac3(dir: &Path, frames: usize) -> PathBuf {
    let path = dir.join("audio.ac3");
    let mut bits = bitio::BitWriter::new();
    bits.write_bits(0x0B77, 16).unwrap();
    bits.write_bits(0, 16).unwrap(); // crc1
    bits.write_bits(0, 2).unwrap(); // fscod 48 kHz
    bits.write_bits(0x25, 6).unwrap(); // 640 kbps
    bits.write_bits(8, 5).unwrap(); // bsid
    bits.write_bits(0, 3).unwrap(); // bsmod
    bits.write_bits(0x7, 3).unwrap(); // acmod 3/2
    bits.write_bits(0, 2).unwrap();
    bits.write_bits(0, 2).unwrap();
    bits.write_bit(true); // lfeon
    bits.align();
    let mut frame = bits.into_bytes();
    frame.resize(2560, 0x00);

    let mut file = std::fs::File::create(&path).unwrap();
    for _ in 0..frames {
        file.write_all(&frame).unwrap();
    }
    path
}

struct TsOutput {
    packets: Vec<Vec<u8>>,
    packet_stride: usize,
}

impl TsOutput {
    fn parse(data: &[u8], extra_header: bool) -> Self {
        let stride = if extra_header { 4 + TP_SIZE } else { TP_SIZE };
        assert_eq!(data.len() % stride, 0, "output is whole packets");
        let packets = data
            .chunks(stride)
            .map(|chunk| chunk[stride - TP_SIZE..].to_vec())
            .collect();
        TsOutput {
            packets,
            packet_stride: stride,
        }
    }

    fn pid(packet: &[u8]) -> u16 {
        (((packet[1] & 0x1F) as u16) << 8) | packet[2] as u16
    }

    fn pusi(packet: &[u8]) -> bool {
        packet[1] & 0x40 != 0
    }

    fn continuity(packet: &[u8]) -> u8 {
        packet[3] & 0x0F
    }

    fn has_payload(packet: &[u8]) -> bool {
        packet[3] & 0x10 != 0
    }

    fn has_adaptation(packet: &[u8]) -> bool {
        packet[3] & 0x20 != 0
    }

    fn payload(packet: &[u8]) -> &[u8] {
        let mut offset = 4;
        if Self::has_adaptation(packet) {
            offset += 1 + packet[4] as usize;
        }
        &packet[offset..]
    }

    fn pcr(packet: &[u8]) -> Option<u64> {
        if !Self::has_adaptation(packet) || packet[4] == 0 {
            return None;
        }
        if packet[5] & 0x10 == 0 {
            return None;
        }
        let base = ((packet[6] as u64) << 25)
            | ((packet[7] as u64) << 17)
            | ((packet[8] as u64) << 9)
            | ((packet[9] as u64) << 1)
            | ((packet[10] as u64) >> 7);
        let ext = (((packet[10] as u64) & 0x01) << 8) | packet[11] as u64;
        Some(base * 300 + ext)
    }
}

fn mux_dir(dir: &Path, cbr: bool, extra_headers: bool) -> TsOutput {
    let wav = write_wav(dir);
    let ac3 = write_ac3(dir, 8);

    let mut settings = MuxSettings::default();
    settings.options.cbr = cbr;
    settings.options.write_tp_extra_headers = extra_headers;
    settings.set_mux_rate(12_000_000).unwrap();
    settings
        .tracks
        .push(mux::EsSettings::new(wav));
    settings.tracks.push(mux::EsSettings::new(ac3));

    let mut ctx = MuxContext::new(settings).unwrap();
    let mut out = Vec::new();
    ctx.mux(&mut out).unwrap();
    TsOutput::parse(&out, extra_headers)
}

#[test]
fn test_aligned_units_and_sync() {
    let dir = tempfile::tempdir().unwrap();
    let output = mux_dir(dir.path(), true, true);

    assert_eq!(output.packets.len() % 32, 0);
    assert_eq!(output.packet_stride, 192);
    for packet in &output.packets {
        assert_eq!(packet[0], 0x47);
    }
}

#[test]
fn test_first_packet_is_pat_with_pusi() {
    let dir = tempfile::tempdir().unwrap();
    let output = mux_dir(dir.path(), true, true);
    let first = &output.packets[0];
    assert_eq!(TsOutput::pid(first), 0x0000);
    assert!(TsOutput::pusi(first));
}

#[test]
fn test_continuity_counters() {
    let dir = tempfile::tempdir().unwrap();
    let output = mux_dir(dir.path(), true, true);

    let mut last: HashMap<u16, u8> = HashMap::new();
    for packet in &output.packets {
        let pid = TsOutput::pid(packet);
        let cc = TsOutput::continuity(packet);
        if pid == 0x1FFF {
            assert_eq!(cc, 0, "NULL counter held at zero");
            continue;
        }
        if TsOutput::has_payload(packet) {
            if let Some(&previous) = last.get(&pid) {
                assert_eq!(cc, (previous + 1) & 0x0F, "PID 0x{pid:04X}");
            }
            last.insert(pid, cc);
        } else if let Some(&previous) = last.get(&pid) {
            // Payload-less packets repeat the previous counter.
            assert_eq!(cc, previous, "PID 0x{pid:04X}");
        }
    }
}

#[test]
fn test_pat_and_pmt_sections_crc() {
    let dir = tempfile::tempdir().unwrap();
    let output = mux_dir(dir.path(), true, true);

    for target in [0x0000u16, 0x0100] {
        let packet = output
            .packets
            .iter()
            .find(|packet| TsOutput::pid(packet) == target && TsOutput::pusi(packet))
            .expect("section present");
        let payload = TsOutput::payload(packet);
        // pointer_field, then the section.
        let section = &payload[1 + payload[0] as usize..];
        let section_length = (((section[1] & 0x0F) as usize) << 8) | section[2] as usize;
        assert_eq!(
            mpeg2_crc32(&section[..3 + section_length]),
            0,
            "PID 0x{target:04X} section CRC"
        );
    }
}

#[test]
fn test_pmt_declares_both_tracks() {
    let dir = tempfile::tempdir().unwrap();
    let output = mux_dir(dir.path(), true, true);
    let packet = output
        .packets
        .iter()
        .find(|packet| TsOutput::pid(packet) == 0x0100 && TsOutput::pusi(packet))
        .unwrap();
    let payload = TsOutput::payload(packet);
    let section = &payload[1..];
    // LPCM (0x80) on 0x1100 and AC-3 (0x81) on 0x1101 appear as elements.
    let bytes = section.to_vec();
    let has_lpcm = bytes
        .windows(3)
        .any(|window| window == [0x80, 0xE0 | 0x11, 0x00]);
    let has_ac3 = bytes
        .windows(3)
        .any(|window| window == [0x81, 0xE0 | 0x11, 0x01]);
    assert!(has_lpcm, "LPCM element missing");
    assert!(has_ac3, "AC-3 element missing");
}

#[test]
fn test_pcr_monotonic_with_bounded_gaps() {
    let dir = tempfile::tempdir().unwrap();
    let output = mux_dir(dir.path(), true, true);

    let pcrs: Vec<u64> = output
        .packets
        .iter()
        .filter(|packet| TsOutput::pid(packet) == 0x1001)
        .filter_map(|packet| TsOutput::pcr(packet))
        .collect();
    assert!(pcrs.len() > 2, "PCR packets present");
    for pair in pcrs.windows(2) {
        assert!(pair[1] > pair[0], "PCR strictly increasing");
        // 100 ms bound (the cadence is 50 ms).
        assert!(pair[1] - pair[0] <= 2_700_000, "PCR gap {}", pair[1] - pair[0]);
    }
}

#[test]
fn test_pts_non_decreasing_per_pid() {
    let dir = tempfile::tempdir().unwrap();
    let output = mux_dir(dir.path(), true, true);

    let mut last_pts: HashMap<u16, u64> = HashMap::new();
    for packet in &output.packets {
        let pid = TsOutput::pid(packet);
        if !(0x1100..0x1200).contains(&pid) || !TsOutput::pusi(packet) {
            continue;
        }
        let payload = TsOutput::payload(packet);
        assert_eq!(&payload[0..3], &[0x00, 0x00, 0x01], "PES start code");
        let flags = payload[7];
        assert!(flags & 0x80 != 0, "PTS present");
        let pts = (((payload[9] as u64 >> 1) & 0x07) << 30)
            | ((payload[10] as u64) << 22)
            | (((payload[11] as u64 >> 1) & 0x7F) << 15)
            | ((payload[12] as u64) << 7)
            | ((payload[13] as u64 >> 1) & 0x7F);
        if let Some(&previous) = last_pts.get(&pid) {
            assert!(pts >= previous, "PID 0x{pid:04X} PTS went backwards");
        }
        last_pts.insert(pid, pts);
    }
    assert_eq!(last_pts.len(), 2, "both audio PIDs carried PES packets");
}

#[test]
fn test_vbr_smaller_than_cbr() {
    let dir_cbr = tempfile::tempdir().unwrap();
    let dir_vbr = tempfile::tempdir().unwrap();
    let cbr = mux_dir(dir_cbr.path(), true, true);
    let vbr = mux_dir(dir_vbr.path(), false, true);
    assert!(vbr.packets.len() < cbr.packets.len());
    // VBR still pads to aligned units.
    assert_eq!(vbr.packets.len() % 32, 0);
}

#[test]
fn test_no_extra_header_output() {
    let dir = tempfile::tempdir().unwrap();
    let output = mux_dir(dir.path(), false, false);
    assert_eq!(output.packet_stride, 188);
    for packet in &output.packets {
        assert_eq!(packet[0], 0x47);
    }
}

#[test]
fn test_script_reuse_second_run() {
    let dir = tempfile::tempdir().unwrap();
    let first = mux_dir(dir.path(), true, true);
    // Scripts now exist; a second run must reuse them and produce the same
    // packet count.
    let second = mux_dir(dir.path(), true, true);
    assert_eq!(first.packets.len(), second.packets.len());
}

#[test]
fn test_meta_driven_run() {
    let dir = tempfile::tempdir().unwrap();
    write_wav(dir.path());
    write_ac3(dir.path(), 4);

    let meta = "\
MUXOPT --cbr --mux-rate=12000000
A_LPCM, audio.wav
A_AC3, audio.ac3
";
    let settings = parse_meta_content(meta, dir.path()).unwrap();
    let mut ctx = MuxContext::new(settings).unwrap();
    let mut out = Vec::new();
    let summary = ctx.mux(&mut out).unwrap();
    assert_eq!(summary.nb_packets % 32, 0);
    assert!(summary.per_pid.iter().any(|&(pid, _)| pid == 0x1100));
    assert!(summary.per_pid.iter().any(|&(pid, _)| pid == 0x1101));
}
