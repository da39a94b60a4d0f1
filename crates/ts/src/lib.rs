//! BDAV MPEG-2 Transport Stream framing.
//!
//! This crate builds the wire-level pieces of a BDAV transport stream:
//! 188-byte transport packets with adaptation fields and PCR, the optional
//! 4-byte BDAV `TP_extra_header`, PES packet headers (including the 0xFD
//! extended stream id scheme used by AC-3/DTS families), and the PSI system
//! sections (PAT, PMT, SIT) with their program and program-element
//! descriptors.

pub mod descriptor;
pub mod error;
pub mod packet;
pub mod pes;
pub mod psi;
pub mod stream_type;

pub use descriptor::{
    Ac3AudioDescriptor, AvcVideoDescriptor, Descriptor, DtcpDescriptor, PartialTsDescriptor,
    RegistrationDescriptor, REG_FMT_ID_AC3, REG_FMT_ID_HDMV, REG_FMT_ID_VC1,
};
pub use error::TsError;
pub use packet::{
    AdaptationFieldExtension, AdaptationFieldParams, TpHeaderParams, write_tp_extra_header,
    PID_NULL, PID_PAT, PID_PCR, PID_PMT, PID_SIT, TP_EXTRA_HEADER_SIZE, TP_HEADER_SIZE, TP_SIZE,
};
pub use pes::{
    PesHeaderParams, STREAM_ID_EXTENDED, STREAM_ID_EXT_PRIMARY, STREAM_ID_EXT_SECONDARY,
    STREAM_ID_PRIVATE_1, STREAM_ID_VIDEO_FIRST,
};
pub use psi::{build_null_table, PatParams, PatProgram, PmtElement, PmtParams, SitParams, SitService};
pub use stream_type::{EsType, StreamCodingType};

/// Result type for TS framing operations.
pub type Result<T> = std::result::Result<T, TsError>;
