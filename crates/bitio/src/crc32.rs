//! MPEG-2 CRC-32 (ITU-T H.222.0 / ISO 13818-1).
//!
//! Polynomial 0x04C11DB7, init 0xFFFFFFFF, no bit reflection, no final XOR.
//! Used for PSI section checksums and ESMS source-file fingerprints. This is
//! NOT the zlib/ISO 3309 CRC-32.

/// Compile-time generated 256-entry lookup table.
const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0u32;
    while i < 256 {
        let mut crc = i << 24;
        let mut j = 0;
        while j < 8 {
            if crc & 0x8000_0000 != 0 {
                crc = (crc << 1) ^ 0x04C1_1DB7;
            } else {
                crc <<= 1;
            }
            j += 1;
        }
        table[i as usize] = crc;
        i += 1;
    }
    table
};

/// Computes the MPEG-2 CRC-32 of a byte slice in one call.
pub fn mpeg2_crc32(data: &[u8]) -> u32 {
    let mut crc = Crc32::new();
    crc.update(data);
    crc.finalize()
}

/// Incremental MPEG-2 CRC-32 hasher.
///
/// Feeding the same bytes in any chunking yields the same digest, which lets
/// source-file fingerprints be computed while streaming.
#[derive(Debug, Clone)]
pub struct Crc32 {
    state: u32,
}

impl Crc32 {
    /// Creates a hasher in the initial state.
    pub fn new() -> Self {
        Crc32 { state: 0xFFFF_FFFF }
    }

    /// Feeds `data` into the hasher.
    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.state =
                (self.state << 8) ^ CRC32_TABLE[((self.state >> 24) ^ byte as u32) as usize];
        }
    }

    /// Returns the digest.
    pub fn finalize(&self) -> u32 {
        self.state
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Crc32::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // CRC-32/MPEG-2 of "123456789" is 0x0376E6E7
        assert_eq!(mpeg2_crc32(b"123456789"), 0x0376_E6E7);
    }

    #[test]
    fn test_empty_data() {
        assert_eq!(mpeg2_crc32(b""), 0xFFFF_FFFF);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let data = b"some section payload bytes";
        let mut crc = Crc32::new();
        crc.update(&data[..7]);
        crc.update(&data[7..]);
        assert_eq!(crc.finalize(), mpeg2_crc32(data));
    }

    #[test]
    fn test_section_with_appended_crc_hashes_to_zero() {
        let data = b"table body";
        let crc = mpeg2_crc32(data);
        let mut section = data.to_vec();
        section.extend_from_slice(&crc.to_be_bytes());
        assert_eq!(mpeg2_crc32(&section), 0);
    }
}
