//! Coded slice header parsing (the few leading fields the muxer needs).

use bitio::BitReader;

use crate::sps::Sps;
use crate::Result;

/// Leading slice header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceHeader {
    /// `first_mb_in_slice` (zero marks the first slice of a picture).
    pub first_mb_in_slice: u32,
    /// `slice_type` (modulo the "all slices" offset).
    pub slice_type: u32,
    /// `frame_num`.
    pub frame_num: u32,
    /// `pic_order_cnt_lsb` (POC type 0 only, zero otherwise).
    pub pic_order_cnt_lsb: u32,
}

impl SliceHeader {
    /// Parses the slice header prefix from an unescaped RBSP.
    pub fn parse(rbsp: &[u8], sps: &Sps, idr: bool) -> Result<Self> {
        let mut bits = BitReader::new(rbsp);
        let first_mb_in_slice = bits.read_ue()?;
        let slice_type = bits.read_ue()? % 5;
        let _pps_id = bits.read_ue()?;
        let frame_num = bits.read_bits(sps.log2_max_frame_num as usize)? as u32;

        if !sps.frame_mbs_only {
            let field_pic = bits.read_bit()?;
            if field_pic {
                bits.skip_bits(1)?; // bottom_field_flag
            }
        }
        if idr {
            let _idr_pic_id = bits.read_ue()?;
        }
        let pic_order_cnt_lsb = if sps.pic_order_cnt_type == 0 {
            bits.read_bits(sps.log2_max_pic_order_cnt_lsb as usize)? as u32
        } else {
            0
        };

        Ok(SliceHeader {
            first_mb_in_slice,
            slice_type,
            frame_num,
            pic_order_cnt_lsb,
        })
    }
}

/// Incremental POC type 0 decoder (H.264 8.2.1.1, without MMCO 5 events).
#[derive(Debug, Default)]
pub struct PocCounter {
    prev_msb: i64,
    prev_lsb: i64,
}

impl PocCounter {
    /// Feeds one picture, returning its picture order count.
    pub fn next(&mut self, sps: &Sps, lsb: u32, idr: bool, is_reference: bool) -> i64 {
        let max = 1i64 << sps.log2_max_pic_order_cnt_lsb;
        if idr {
            self.prev_msb = 0;
            self.prev_lsb = 0;
        }
        let lsb = lsb as i64;
        let msb = if lsb < self.prev_lsb && self.prev_lsb - lsb >= max / 2 {
            self.prev_msb + max
        } else if lsb > self.prev_lsb && lsb - self.prev_lsb > max / 2 {
            self.prev_msb - max
        } else {
            self.prev_msb
        };
        if is_reference {
            self.prev_msb = msb;
            self.prev_lsb = lsb;
        }
        msb + lsb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sps::Sps;
    use bitio::BitWriter;

    fn minimal_sps() -> Sps {
        Sps {
            log2_max_frame_num: 4,
            log2_max_pic_order_cnt_lsb: 6,
            pic_order_cnt_type: 0,
            frame_mbs_only: true,
            ..Sps::default()
        }
    }

    fn write_ue(bits: &mut BitWriter, value: u32) {
        let code = value as u64 + 1;
        let len = 64 - code.leading_zeros() as usize;
        bits.write_bits(0, len - 1).unwrap();
        bits.write_bits(code, len).unwrap();
    }

    #[test]
    fn test_parse_idr_slice() {
        let mut bits = BitWriter::new();
        write_ue(&mut bits, 0); // first_mb_in_slice
        write_ue(&mut bits, 7); // slice_type I (7 % 5 = 2)
        write_ue(&mut bits, 0); // pps_id
        bits.write_bits(0, 4).unwrap(); // frame_num
        write_ue(&mut bits, 1); // idr_pic_id
        bits.write_bits(0, 6).unwrap(); // pic_order_cnt_lsb
        bits.align();

        let header = SliceHeader::parse(&bits.into_bytes(), &minimal_sps(), true).unwrap();
        assert_eq!(header.first_mb_in_slice, 0);
        assert_eq!(header.slice_type, 2);
        assert_eq!(header.pic_order_cnt_lsb, 0);
    }

    #[test]
    fn test_poc_wraps() {
        let sps = minimal_sps(); // MaxPicOrderCntLsb = 64
        let mut poc = PocCounter::default();
        assert_eq!(poc.next(&sps, 0, true, true), 0);
        assert_eq!(poc.next(&sps, 60, false, true), 60);
        // lsb wrapped past 64: 4 < 60 and 60 - 4 >= 32 -> msb += 64.
        assert_eq!(poc.next(&sps, 4, false, true), 68);
        assert_eq!(poc.next(&sps, 8, false, true), 72);
    }

    #[test]
    fn test_poc_resets_on_idr() {
        let sps = minimal_sps();
        let mut poc = PocCounter::default();
        poc.next(&sps, 40, false, true);
        assert_eq!(poc.next(&sps, 0, true, true), 0);
        assert_eq!(poc.next(&sps, 2, false, true), 2);
    }
}
