use thiserror::Error;

/// Errors raised while assembling transport stream structures.
#[derive(Error, Debug)]
pub enum TsError {
    /// A PSI section exceeded its maximum `section_length`.
    #[error("{table} section_length exceeds {max} bytes ({length} bytes)")]
    SectionTooLong {
        /// Table kind ("PAT", "PMT", "SIT").
        table: &'static str,
        /// Computed section length.
        length: usize,
        /// Limit for this table kind.
        max: usize,
    },

    /// A descriptor payload exceeded the 255-byte `descriptor_length` field.
    #[error("descriptor 0x{tag:02X} payload too long ({length} bytes)")]
    DescriptorTooLong {
        /// Descriptor tag.
        tag: u8,
        /// Payload length.
        length: usize,
    },

    /// `program_info_length` / `ES_info_length` field overflow.
    #[error("{field} exceeds 12-bit range ({length} bytes)")]
    InfoLengthTooLong {
        /// Offending length field name.
        field: &'static str,
        /// Computed length.
        length: usize,
    },

    /// A transport packet was requested with the reserved
    /// `adaptation_field_control == 0b00`.
    #[error("reserved adaptation_field_control value 0b00")]
    ReservedAdaptationFieldControl,

    /// The adaptation field plus payload did not fit the 188-byte packet.
    #[error("transport packet content overflow: header {header} + payload {payload} bytes")]
    PacketOverflow {
        /// Header size including adaptation field.
        header: usize,
        /// Requested payload size.
        payload: usize,
    },

    /// A PES header requested a DTS without a PTS
    /// (`PTS_DTS_flags == 0b01` is forbidden).
    #[error("PES header with DTS but no PTS")]
    DtsWithoutPts,

    /// Unknown `stream_coding_type` byte.
    #[error("unknown stream coding type 0x{0:02X}")]
    UnknownCodingType(u8),
}
