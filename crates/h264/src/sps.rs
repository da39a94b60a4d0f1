//! Sequence parameter set parsing and VUI patching.

use bitio::{BitReader, BitWriter};

use crate::{H264Error, Result};

/// Profiles carrying the extended chroma/bit-depth block.
const HIGH_PROFILES: [u8; 12] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134];

/// HRD parameters of one (NAL or VCL) layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HrdParams {
    /// `bit_rate_scale`.
    pub bit_rate_scale: u8,
    /// `cpb_size_scale`.
    pub cpb_size_scale: u8,
    /// Per-CPB `(bit_rate_value_minus1, cpb_size_value_minus1, cbr_flag)`.
    pub cpbs: Vec<(u32, u32, bool)>,
    /// `initial_cpb_removal_delay_length_minus1`.
    pub initial_cpb_removal_delay_length: u8,
    /// `cpb_removal_delay_length_minus1`.
    pub cpb_removal_delay_length: u8,
    /// `dpb_output_delay_length_minus1`.
    pub dpb_output_delay_length: u8,
    /// `time_offset_length`.
    pub time_offset_length: u8,
}

impl HrdParams {
    /// `BitRate[0]` in bps.
    pub fn bitrate(&self) -> u64 {
        self.cpbs.first().map_or(0, |(bit_rate, _, _)| {
            (*bit_rate as u64 + 1) << (6 + self.bit_rate_scale)
        })
    }

    /// `CpbSize[cpb_cnt_minus1]` in bits.
    pub fn cpb_size(&self) -> u64 {
        self.cpbs.last().map_or(0, |(_, cpb_size, _)| {
            (*cpb_size as u64 + 1) << (4 + self.cpb_size_scale)
        })
    }

    fn parse(bits: &mut BitReader<'_>) -> Result<Self> {
        let cpb_cnt = bits.read_ue()? as usize + 1;
        let bit_rate_scale = bits.read_bits(4)? as u8;
        let cpb_size_scale = bits.read_bits(4)? as u8;
        let mut cpbs = Vec::with_capacity(cpb_cnt);
        for _ in 0..cpb_cnt {
            let bit_rate = bits.read_ue()?;
            let cpb_size = bits.read_ue()?;
            let cbr = bits.read_bit()?;
            cpbs.push((bit_rate, cpb_size, cbr));
        }
        Ok(HrdParams {
            bit_rate_scale,
            cpb_size_scale,
            cpbs,
            initial_cpb_removal_delay_length: bits.read_bits(5)? as u8,
            cpb_removal_delay_length: bits.read_bits(5)? as u8,
            dpb_output_delay_length: bits.read_bits(5)? as u8,
            time_offset_length: bits.read_bits(5)? as u8,
        })
    }

    fn write(&self, bits: &mut BitWriter) {
        write_ue(bits, self.cpbs.len() as u32 - 1);
        bits.write_bits(self.bit_rate_scale as u64, 4).expect("4-bit field");
        bits.write_bits(self.cpb_size_scale as u64, 4).expect("4-bit field");
        for (bit_rate, cpb_size, cbr) in &self.cpbs {
            write_ue(bits, *bit_rate);
            write_ue(bits, *cpb_size);
            bits.write_bit(*cbr);
        }
        bits.write_bits(self.initial_cpb_removal_delay_length as u64, 5)
            .expect("5-bit field");
        bits.write_bits(self.cpb_removal_delay_length as u64, 5)
            .expect("5-bit field");
        bits.write_bits(self.dpb_output_delay_length as u64, 5)
            .expect("5-bit field");
        bits.write_bits(self.time_offset_length as u64, 5)
            .expect("5-bit field");
    }
}

/// VUI parameters (every field retained so the block can be re-emitted).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vui {
    /// `aspect_ratio_idc` and the extended SAR pair for idc 255.
    pub aspect_ratio: Option<(u8, Option<(u16, u16)>)>,
    /// `overscan_appropriate_flag`.
    pub overscan: Option<bool>,
    /// `(video_format, video_full_range, colour_description)`.
    pub video_signal: Option<(u8, bool, Option<(u8, u8, u8)>)>,
    /// `(chroma_sample_loc_type_top_field, _bottom_field)`.
    pub chroma_loc: Option<(u32, u32)>,
    /// `(num_units_in_tick, time_scale, fixed_frame_rate_flag)`.
    pub timing: Option<(u32, u32, bool)>,
    /// NAL HRD parameters.
    pub nal_hrd: Option<HrdParams>,
    /// VCL HRD parameters.
    pub vcl_hrd: Option<HrdParams>,
    /// `low_delay_hrd_flag` (present when either HRD block is).
    pub low_delay_hrd: bool,
    /// `pic_struct_present_flag`.
    pub pic_struct_present: bool,
    /// Bitstream restriction block.
    pub bitstream_restriction: Option<BitstreamRestriction>,
}

/// `bitstream_restriction` block fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitstreamRestriction {
    /// `motion_vectors_over_pic_boundaries_flag`.
    pub motion_vectors_over_pic_boundaries: bool,
    /// `max_bytes_per_pic_denom`.
    pub max_bytes_per_pic_denom: u32,
    /// `max_bits_per_mb_denom`.
    pub max_bits_per_mb_denom: u32,
    /// `log2_max_mv_length_horizontal`.
    pub log2_max_mv_length_horizontal: u32,
    /// `log2_max_mv_length_vertical`.
    pub log2_max_mv_length_vertical: u32,
    /// `max_num_reorder_frames`.
    pub max_num_reorder_frames: u32,
    /// `max_dec_frame_buffering`.
    pub max_dec_frame_buffering: u32,
}

/// Parsed sequence parameter set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sps {
    /// `profile_idc`.
    pub profile_idc: u8,
    /// Constraint flags byte.
    pub constraint_flags: u8,
    /// `level_idc`.
    pub level_idc: u8,
    /// `log2_max_frame_num_minus4 + 4`.
    pub log2_max_frame_num: u32,
    /// `pic_order_cnt_type`.
    pub pic_order_cnt_type: u32,
    /// `log2_max_pic_order_cnt_lsb_minus4 + 4` (POC type 0).
    pub log2_max_pic_order_cnt_lsb: u32,
    /// `delta_pic_order_always_zero_flag` (POC type 1).
    pub delta_pic_order_always_zero: bool,
    /// `max_num_ref_frames`.
    pub max_num_ref_frames: u32,
    /// Picture width in luma samples.
    pub width: u32,
    /// Picture height in luma samples.
    pub height: u32,
    /// `frame_mbs_only_flag`.
    pub frame_mbs_only: bool,
    /// VUI parameters when present.
    pub vui: Option<Vui>,
    /// Bit offset of `vui_parameters_present_flag` inside the RBSP.
    pub(crate) vui_flag_bit_offset: usize,
}

fn write_ue(bits: &mut BitWriter, value: u32) {
    let code = value as u64 + 1;
    let len = 64 - code.leading_zeros() as usize;
    bits.write_bits(0, len - 1).expect("Exp-Golomb prefix fits 64 bits");
    bits.write_bits(code, len).expect("Exp-Golomb code fits 64 bits");
}

impl Sps {
    /// Parses an SPS RBSP (emulation prevention already removed).
    pub fn parse(rbsp: &[u8]) -> Result<Self> {
        let mut bits = BitReader::new(rbsp);
        let mut sps = Sps {
            profile_idc: bits.read_bits(8)? as u8,
            constraint_flags: bits.read_bits(8)? as u8,
            level_idc: bits.read_bits(8)? as u8,
            ..Sps::default()
        };
        let _sps_id = bits.read_ue()?;

        let mut chroma_format_idc = 1;
        if HIGH_PROFILES.contains(&sps.profile_idc) || sps.profile_idc == 135 {
            chroma_format_idc = bits.read_ue()?;
            if chroma_format_idc == 3 {
                bits.skip_bits(1)?; // separate_colour_plane_flag
            }
            let _bit_depth_luma = bits.read_ue()?;
            let _bit_depth_chroma = bits.read_ue()?;
            bits.skip_bits(1)?; // qpprime_y_zero_transform_bypass_flag
            if bits.read_bit()? {
                return Err(H264Error::UnsupportedSps("seq_scaling_matrix"));
            }
        }

        sps.log2_max_frame_num = bits.read_ue()? + 4;
        sps.pic_order_cnt_type = bits.read_ue()?;
        match sps.pic_order_cnt_type {
            0 => sps.log2_max_pic_order_cnt_lsb = bits.read_ue()? + 4,
            1 => {
                sps.delta_pic_order_always_zero = bits.read_bit()?;
                let _offset_for_non_ref_pic = bits.read_se()?;
                let _offset_for_top_to_bottom = bits.read_se()?;
                let cycle = bits.read_ue()?;
                for _ in 0..cycle {
                    let _offset = bits.read_se()?;
                }
            }
            _ => {}
        }
        sps.max_num_ref_frames = bits.read_ue()?;
        bits.skip_bits(1)?; // gaps_in_frame_num_value_allowed_flag

        let width_in_mbs = bits.read_ue()? + 1;
        let height_in_map_units = bits.read_ue()? + 1;
        sps.frame_mbs_only = bits.read_bit()?;
        if !sps.frame_mbs_only {
            bits.skip_bits(1)?; // mb_adaptive_frame_field_flag
        }
        bits.skip_bits(1)?; // direct_8x8_inference_flag

        let frame_height_multiplier = if sps.frame_mbs_only { 1 } else { 2 };
        let mut width = width_in_mbs * 16;
        let mut height = height_in_map_units * 16 * frame_height_multiplier;

        if bits.read_bit()? {
            // frame_cropping: units depend on chroma format; 4:2:0 halves.
            let (crop_x, crop_y) = match chroma_format_idc {
                0 => (1, 1),
                1 => (2, 2),
                2 => (2, 1),
                _ => (1, 1),
            };
            let left = bits.read_ue()?;
            let right = bits.read_ue()?;
            let top = bits.read_ue()?;
            let bottom = bits.read_ue()?;
            width -= (left + right) * crop_x;
            height -= (top + bottom) * crop_y * frame_height_multiplier;
        }
        sps.width = width;
        sps.height = height;

        sps.vui_flag_bit_offset = bits.position();
        if bits.read_bit()? {
            sps.vui = Some(Self::parse_vui(&mut bits)?);
        }

        Ok(sps)
    }

    fn parse_vui(bits: &mut BitReader<'_>) -> Result<Vui> {
        let mut vui = Vui::default();

        if bits.read_bit()? {
            let idc = bits.read_bits(8)? as u8;
            let sar = if idc == 255 {
                Some((bits.read_bits(16)? as u16, bits.read_bits(16)? as u16))
            } else {
                None
            };
            vui.aspect_ratio = Some((idc, sar));
        }
        if bits.read_bit()? {
            vui.overscan = Some(bits.read_bit()?);
        }
        if bits.read_bit()? {
            let video_format = bits.read_bits(3)? as u8;
            let full_range = bits.read_bit()?;
            let colour = if bits.read_bit()? {
                Some((
                    bits.read_bits(8)? as u8,
                    bits.read_bits(8)? as u8,
                    bits.read_bits(8)? as u8,
                ))
            } else {
                None
            };
            vui.video_signal = Some((video_format, full_range, colour));
        }
        if bits.read_bit()? {
            vui.chroma_loc = Some((bits.read_ue()?, bits.read_ue()?));
        }
        if bits.read_bit()? {
            let num_units_in_tick = bits.read_bits(32)? as u32;
            let time_scale = bits.read_bits(32)? as u32;
            let fixed = bits.read_bit()?;
            vui.timing = Some((num_units_in_tick, time_scale, fixed));
        }
        let nal_hrd_present = bits.read_bit()?;
        if nal_hrd_present {
            vui.nal_hrd = Some(HrdParams::parse(bits)?);
        }
        let vcl_hrd_present = bits.read_bit()?;
        if vcl_hrd_present {
            vui.vcl_hrd = Some(HrdParams::parse(bits)?);
        }
        if nal_hrd_present || vcl_hrd_present {
            vui.low_delay_hrd = bits.read_bit()?;
        }
        vui.pic_struct_present = bits.read_bit()?;
        if bits.read_bit()? {
            vui.bitstream_restriction = Some(BitstreamRestriction {
                motion_vectors_over_pic_boundaries: bits.read_bit()?,
                max_bytes_per_pic_denom: bits.read_ue()?,
                max_bits_per_mb_denom: bits.read_ue()?,
                log2_max_mv_length_horizontal: bits.read_ue()?,
                log2_max_mv_length_vertical: bits.read_ue()?,
                max_num_reorder_frames: bits.read_ue()?,
                max_dec_frame_buffering: bits.read_ue()?,
            });
        }

        Ok(vui)
    }

    /// Frame rate from VUI timing as `(num, den)` where fps = num/den.
    pub fn frame_rate(&self) -> Option<(u32, u32)> {
        let (num_units_in_tick, time_scale, _) = self.vui.as_ref()?.timing?;
        if num_units_in_tick == 0 {
            return None;
        }
        // Two ticks per frame.
        Some((time_scale, 2 * num_units_in_tick))
    }

    /// NAL HRD bitrate in bps, when signalled.
    pub fn hrd_bitrate(&self) -> u64 {
        self.vui
            .as_ref()
            .and_then(|vui| vui.nal_hrd.as_ref())
            .map_or(0, HrdParams::bitrate)
    }

    /// NAL HRD CPB size in bits, when signalled.
    pub fn hrd_cpb_size(&self) -> u64 {
        self.vui
            .as_ref()
            .and_then(|vui| vui.nal_hrd.as_ref())
            .map_or(0, HrdParams::cpb_size)
    }

    /// First scheduler's `cbr_flag`, when HRD parameters are signalled.
    pub fn hrd_cbr(&self) -> bool {
        self.vui
            .as_ref()
            .and_then(|vui| vui.nal_hrd.as_ref())
            .and_then(|hrd| hrd.cpbs.first())
            .is_some_and(|&(_, _, cbr)| cbr)
    }

    /// Maximum picture reordering depth.
    pub fn max_num_reorder(&self) -> u32 {
        if self.pic_order_cnt_type == 2 {
            return 0;
        }
        self.vui
            .as_ref()
            .and_then(|vui| vui.bitstream_restriction.as_ref())
            .map_or(self.max_num_ref_frames.min(4), |br| br.max_num_reorder_frames)
    }

    /// Re-emits the SPS RBSP with VUI timing and/or aspect overrides: bits
    /// before the VUI flag are copied verbatim, the VUI block is re-encoded
    /// from the parsed fields.
    pub fn patched_rbsp(
        &self,
        rbsp: &[u8],
        fps: Option<(u32, u32)>,
        aspect_ratio: Option<(u16, u16)>,
    ) -> Result<Vec<u8>> {
        let Some(vui) = &self.vui else {
            return Err(H264Error::PatchWithoutVui);
        };

        let mut vui = vui.clone();
        if let Some((num, den)) = fps {
            // fps = time_scale / (2 · num_units_in_tick).
            let fixed = vui.timing.map_or(true, |(_, _, fixed)| fixed);
            vui.timing = Some((den, 2 * num, fixed));
        }
        if let Some((sar_w, sar_h)) = aspect_ratio {
            vui.aspect_ratio = Some((255, Some((sar_w, sar_h))));
        }

        let mut bits = BitWriter::new();
        let mut prefix = BitReader::new(rbsp);
        for _ in 0..self.vui_flag_bit_offset {
            bits.write_bit(prefix.read_bit()?);
        }
        bits.write_bit(true); // vui_parameters_present_flag

        Self::write_vui(&mut bits, &vui);

        // rbsp_trailing_bits: stop bit plus zero alignment.
        bits.write_bit(true);
        bits.align();
        Ok(bits.into_bytes())
    }

    fn write_vui(bits: &mut BitWriter, vui: &Vui) {
        match &vui.aspect_ratio {
            Some((idc, sar)) => {
                bits.write_bit(true);
                bits.write_bits(*idc as u64, 8).expect("8-bit field");
                if let Some((sar_w, sar_h)) = sar {
                    bits.write_bits(*sar_w as u64, 16).expect("16-bit field");
                    bits.write_bits(*sar_h as u64, 16).expect("16-bit field");
                }
            }
            None => bits.write_bit(false),
        }
        match vui.overscan {
            Some(appropriate) => {
                bits.write_bit(true);
                bits.write_bit(appropriate);
            }
            None => bits.write_bit(false),
        }
        match &vui.video_signal {
            Some((video_format, full_range, colour)) => {
                bits.write_bit(true);
                bits.write_bits(*video_format as u64, 3).expect("3-bit field");
                bits.write_bit(*full_range);
                match colour {
                    Some((primaries, transfer, matrix)) => {
                        bits.write_bit(true);
                        bits.write_bits(*primaries as u64, 8).expect("8-bit field");
                        bits.write_bits(*transfer as u64, 8).expect("8-bit field");
                        bits.write_bits(*matrix as u64, 8).expect("8-bit field");
                    }
                    None => bits.write_bit(false),
                }
            }
            None => bits.write_bit(false),
        }
        match vui.chroma_loc {
            Some((top, bottom)) => {
                bits.write_bit(true);
                write_ue(bits, top);
                write_ue(bits, bottom);
            }
            None => bits.write_bit(false),
        }
        match vui.timing {
            Some((num_units_in_tick, time_scale, fixed)) => {
                bits.write_bit(true);
                bits.write_bits(num_units_in_tick as u64, 32).expect("32-bit field");
                bits.write_bits(time_scale as u64, 32).expect("32-bit field");
                bits.write_bit(fixed);
            }
            None => bits.write_bit(false),
        }
        match &vui.nal_hrd {
            Some(hrd) => {
                bits.write_bit(true);
                hrd.write(bits);
            }
            None => bits.write_bit(false),
        }
        match &vui.vcl_hrd {
            Some(hrd) => {
                bits.write_bit(true);
                hrd.write(bits);
            }
            None => bits.write_bit(false),
        }
        if vui.nal_hrd.is_some() || vui.vcl_hrd.is_some() {
            bits.write_bit(vui.low_delay_hrd);
        }
        bits.write_bit(vui.pic_struct_present);
        match &vui.bitstream_restriction {
            Some(br) => {
                bits.write_bit(true);
                bits.write_bit(br.motion_vectors_over_pic_boundaries);
                write_ue(bits, br.max_bytes_per_pic_denom);
                write_ue(bits, br.max_bits_per_mb_denom);
                write_ue(bits, br.log2_max_mv_length_horizontal);
                write_ue(bits, br.log2_max_mv_length_vertical);
                write_ue(bits, br.max_num_reorder_frames);
                write_ue(bits, br.max_dec_frame_buffering);
            }
            None => bits.write_bit(false),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::sps_rbsp;
    use super::*;

    #[test]
    fn test_parse_dimensions_and_level() {
        let sps = Sps::parse(&sps_rbsp(25, 1, false)).unwrap();
        assert_eq!(sps.profile_idc, 100);
        assert_eq!(sps.level_idc, 51);
        assert_eq!(sps.width, 1920);
        assert_eq!(sps.height, 1080);
        assert!(sps.frame_mbs_only);
        assert_eq!(sps.log2_max_pic_order_cnt_lsb, 6);
        assert_eq!(sps.frame_rate(), Some((50, 2)));
    }

    #[test]
    fn test_parse_hrd() {
        let sps = Sps::parse(&sps_rbsp(24_000, 1001, true)).unwrap();
        assert_eq!(sps.hrd_bitrate(), 8_000_000);
        assert_eq!(sps.hrd_cpb_size(), 30_000_000);
        assert_eq!(sps.frame_rate(), Some((48_000, 2 * 1001)));
    }

    #[test]
    fn test_patched_fps_round_trips() {
        let rbsp = sps_rbsp(25, 1, true);
        let sps = Sps::parse(&rbsp).unwrap();
        let patched = sps
            .patched_rbsp(&rbsp, Some((24_000, 1001)), None)
            .unwrap();
        let reparsed = Sps::parse(&patched).unwrap();
        assert_eq!(reparsed.frame_rate(), Some((48_000, 2 * 1001)));
        // Untouched fields survive.
        assert_eq!(reparsed.width, 1920);
        assert_eq!(reparsed.level_idc, 51);
        assert_eq!(reparsed.hrd_bitrate(), 8_000_000);
    }

    #[test]
    fn test_patched_aspect_ratio() {
        let rbsp = sps_rbsp(25, 1, false);
        let sps = Sps::parse(&rbsp).unwrap();
        let patched = sps.patched_rbsp(&rbsp, None, Some((4, 3))).unwrap();
        let reparsed = Sps::parse(&patched).unwrap();
        assert_eq!(
            reparsed.vui.unwrap().aspect_ratio,
            Some((255, Some((4, 3))))
        );
    }

    #[test]
    fn test_patch_requires_vui() {
        // Truncate the SPS before the VUI: parse a VUI-less variant.
        let mut bits = BitWriter::new();
        bits.write_bits(66, 8).unwrap(); // Baseline
        bits.write_bits(0, 8).unwrap();
        bits.write_bits(30, 8).unwrap();
        write_ue(&mut bits, 0); // sps_id
        write_ue(&mut bits, 0); // log2_max_frame_num_minus4
        write_ue(&mut bits, 2); // pic_order_cnt_type 2
        write_ue(&mut bits, 1); // max_num_ref_frames
        bits.write_bit(false);
        write_ue(&mut bits, 79); // 1280
        write_ue(&mut bits, 44); // 720
        bits.write_bit(true);
        bits.write_bit(true);
        bits.write_bit(false); // no cropping
        bits.write_bit(false); // no vui
        bits.write_bit(true);
        bits.align();
        let rbsp = bits.into_bytes();

        let sps = Sps::parse(&rbsp).unwrap();
        assert_eq!(sps.width, 1280);
        assert_eq!(sps.height, 720);
        assert!(sps.vui.is_none());
        assert!(matches!(
            sps.patched_rbsp(&rbsp, Some((25, 1)), None),
            Err(H264Error::PatchWithoutVui)
        ));
    }
}
