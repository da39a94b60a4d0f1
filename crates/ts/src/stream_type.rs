use crate::TsError;

/// Stream coding types (PMT `stream_type` / codec identifiers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StreamCodingType {
    /// MPEG-1 video.
    Mpeg1Video = 0x01,
    /// MPEG-2 (H.262) video.
    H262 = 0x02,
    /// H.264/AVC video.
    Avc = 0x1B,
    /// SMPTE VC-1 video.
    Vc1 = 0xEA,

    /// BD LPCM audio.
    Lpcm = 0x80,
    /// Dolby Digital (AC-3) audio.
    Ac3 = 0x81,
    /// DTS Coherent Acoustics audio.
    Dts = 0x82,
    /// Dolby TrueHD audio.
    TrueHd = 0x83,
    /// Dolby Digital Plus (E-AC-3) audio.
    Eac3 = 0x84,
    /// DTS-HD High Resolution audio.
    DtsHdHr = 0x85,
    /// DTS-HD Master Audio.
    DtsHdMa = 0x86,

    /// HDMV Presentation Graphics.
    Pg = 0x90,
    /// HDMV Interactive Graphics.
    Ig = 0x91,
    /// HDMV Text subtitles.
    Text = 0x92,

    /// Dolby Digital Plus secondary audio.
    Eac3Secondary = 0xA1,
    /// DTS-Express secondary audio.
    DtsExpress = 0xA2,
}

/// Broad stream families used by the ESMS format and the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EsType {
    /// Video elementary stream.
    Video = 0x00,
    /// Audio elementary stream.
    Audio = 0x01,
    /// HDMV stream (PG/IG/Text).
    Hdmv = 0x02,
}

impl EsType {
    /// Parses the one-byte ESMS encoding.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(EsType::Video),
            0x01 => Some(EsType::Audio),
            0x02 => Some(EsType::Hdmv),
            _ => None,
        }
    }
}

impl StreamCodingType {
    /// Parses a `stream_coding_type` byte.
    pub fn from_u8(value: u8) -> Result<Self, TsError> {
        use StreamCodingType::*;
        Ok(match value {
            0x01 => Mpeg1Video,
            0x02 => H262,
            0x1B => Avc,
            0xEA => Vc1,
            0x80 => Lpcm,
            0x81 => Ac3,
            0x82 => Dts,
            0x83 => TrueHd,
            0x84 => Eac3,
            0x85 => DtsHdHr,
            0x86 => DtsHdMa,
            0x90 => Pg,
            0x91 => Ig,
            0x92 => Text,
            0xA1 => Eac3Secondary,
            0xA2 => DtsExpress,
            other => return Err(TsError::UnknownCodingType(other)),
        })
    }

    /// The broad family this coding type belongs to.
    pub fn es_type(self) -> EsType {
        use StreamCodingType::*;
        match self {
            Mpeg1Video | H262 | Avc | Vc1 => EsType::Video,
            Lpcm | Ac3 | Dts | TrueHd | Eac3 | DtsHdHr | DtsHdMa | Eac3Secondary | DtsExpress => {
                EsType::Audio
            }
            Pg | Ig | Text => EsType::Hdmv,
        }
    }

    /// True for every video coding type.
    pub fn is_video(self) -> bool {
        self.es_type() == EsType::Video
    }

    /// True for every audio coding type.
    pub fn is_audio(self) -> bool {
        self.es_type() == EsType::Audio
    }

    /// True for the AC-3 derived family (AC-3, TrueHD, E-AC-3 and its
    /// secondary form) which carries an AC-3 audio descriptor in the PMT.
    pub fn is_ac3_family(self) -> bool {
        use StreamCodingType::*;
        matches!(self, Ac3 | TrueHd | Eac3 | Eac3Secondary)
    }

    /// True for the DTS family.
    pub fn is_dts_family(self) -> bool {
        use StreamCodingType::*;
        matches!(self, Dts | DtsHdHr | DtsHdMa | DtsExpress)
    }

    /// True for coding types allowed as secondary streams.
    pub fn is_secondary_compatible(self) -> bool {
        use StreamCodingType::*;
        matches!(
            self,
            Mpeg1Video | H262 | Avc | Vc1 | Eac3 | Eac3Secondary | DtsExpress
        )
    }

    /// Display name.
    pub fn name(self) -> &'static str {
        use StreamCodingType::*;
        match self {
            Mpeg1Video => "MPEG-1 video",
            H262 => "H.262/MPEG-2 video",
            Avc => "H.264/AVC video",
            Vc1 => "VC-1 video",
            Lpcm => "LPCM audio",
            Ac3 => "AC-3 audio",
            Dts => "DTS audio",
            TrueHd => "Dolby TrueHD audio",
            Eac3 => "E-AC-3 audio",
            DtsHdHr => "DTS-HD High Resolution audio",
            DtsHdMa => "DTS-HD Master Audio",
            Pg => "HDMV Presentation Graphics",
            Ig => "HDMV Interactive Graphics",
            Text => "HDMV Text subtitles",
            Eac3Secondary => "E-AC-3 secondary audio",
            DtsExpress => "DTS-Express secondary audio",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_supported() {
        for byte in [
            0x01, 0x02, 0x1B, 0xEA, 0x80, 0x81, 0x82, 0x83, 0x84, 0x85, 0x86, 0x90, 0x91, 0x92,
            0xA1, 0xA2,
        ] {
            let coding = StreamCodingType::from_u8(byte).unwrap();
            assert_eq!(coding as u8, byte);
        }
    }

    #[test]
    fn test_unknown_coding_type() {
        assert!(matches!(
            StreamCodingType::from_u8(0x42),
            Err(TsError::UnknownCodingType(0x42))
        ));
    }

    #[test]
    fn test_families() {
        assert!(StreamCodingType::Avc.is_video());
        assert!(StreamCodingType::Lpcm.is_audio());
        assert_eq!(StreamCodingType::Ig.es_type(), EsType::Hdmv);
        assert!(StreamCodingType::TrueHd.is_ac3_family());
        assert!(!StreamCodingType::Dts.is_ac3_family());
        assert!(StreamCodingType::DtsExpress.is_dts_family());
        assert!(StreamCodingType::Eac3Secondary.is_secondary_compatible());
        assert!(!StreamCodingType::Lpcm.is_secondary_compatible());
    }
}
