//! Buffer sizing and leak-rate constants.
//!
//! Centralized so compliance tuning touches one table. Sizes are stored in
//! bytes and converted to bits where the model needs them.

use ts::StreamCodingType;

/// Transport Buffer size, all stream kinds (H.222 T-STD).
pub const TB_SIZE: u64 = 512;

/// Shared system-PID buffer size.
pub const SYS_BUFFER_SIZE: u64 = 1536;

/// Video Multiplex Buffer size in bits.
pub const VIDEO_MB_SIZE_BITS: u64 = 2 * 1024 * 1024;

/// Default Elementary Buffer size in bits for H.262 video (MP@HL VBV).
pub const H262_EB_SIZE_BITS: u64 = 9_781_248;

/// Default Elementary Buffer size in bits for H.264 video when the script
/// records no CPB size.
pub const AVC_EB_SIZE_BITS: u64 = 30_000_000;

/// Maximum elementary video rate accepted on a BDAV mux, bps.
pub const MAX_VIDEO_RATE: u64 = 40_000_000;

/// Main audio / HDMV decoder buffer sizes in bytes.
pub fn decoder_buffer_size(coding_type: StreamCodingType) -> u64 {
    use StreamCodingType::*;
    match coding_type {
        Lpcm => 16_384,
        Ac3 | Eac3 | Eac3Secondary => 5_696,
        Dts | DtsExpress => 8_192,
        DtsHdHr | DtsHdMa | TrueHd => 65_536,
        Pg | Ig | Text => 1_048_576,
        // Video types use the TB→MB→EB chain instead.
        Mpeg1Video | H262 | Avc | Vc1 => 0,
    }
}

/// Transport Buffer leak rate for an elementary stream:
/// `min(1.2 × peak bitrate, max codec rate)` for video, fixed transfer
/// rates for audio and HDMV streams.
pub fn tb_leak_rate(coding_type: StreamCodingType, bitrate: u64) -> u64 {
    if coding_type.is_video() {
        (bitrate + bitrate / 5).min(MAX_VIDEO_RATE)
    } else {
        // Audio and HDMV TBs drain at 2 Mbps minimum, 1.2× bitrate when the
        // stream is faster than that.
        (bitrate + bitrate / 5).max(2_000_000)
    }
}

/// Video Multiplex Buffer leak rate towards the Elementary Buffer.
pub fn mb_leak_rate(bitrate: u64) -> u64 {
    // Rbx: elementary rate plus 5% headroom.
    bitrate + bitrate / 20
}

/// Elementary Buffer size for a video stream, bits.
pub fn video_eb_size(coding_type: StreamCodingType, cpb_size: u32) -> u64 {
    if cpb_size > 0 {
        return cpb_size as u64;
    }
    match coding_type {
        StreamCodingType::Avc => AVC_EB_SIZE_BITS,
        _ => H262_EB_SIZE_BITS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tb_leak_rate_clamps_to_codec_max() {
        assert_eq!(tb_leak_rate(StreamCodingType::Avc, 40_000_000), MAX_VIDEO_RATE);
        assert_eq!(tb_leak_rate(StreamCodingType::Avc, 10_000_000), 12_000_000);
        assert_eq!(tb_leak_rate(StreamCodingType::Ac3, 640_000), 2_000_000);
    }

    #[test]
    fn test_video_eb_prefers_recorded_cpb() {
        assert_eq!(video_eb_size(StreamCodingType::Avc, 1_000_000), 1_000_000);
        assert_eq!(video_eb_size(StreamCodingType::Avc, 0), AVC_EB_SIZE_BITS);
        assert_eq!(video_eb_size(StreamCodingType::H262, 0), H262_EB_SIZE_BITS);
    }
}
