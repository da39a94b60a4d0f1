//! Stream handles: elementary streams replaying their script, and system
//! streams cycling their table bytes.

use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;

use tracing::trace;

use esms::{apply_commands, EsProperties, EsmsPesFrame, EsmsReader, FmtProperties};
use ts::pes::PesHeaderParams;
use ts::{EsType, StreamCodingType};

use crate::{MuxError, Result, MAIN_CLOCK_27MHZ};

/// Prefetch low-water mark for the PES frame queue.
const MIN_QUEUED_PES_FRAMES: usize = 50;
/// Frames pulled per refill.
const PES_FRAMES_REFILL: usize = 200;

/// System stream flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemKind {
    /// Program Association Table.
    Pat,
    /// Program Map Table.
    Pmt,
    /// Selection Information Table.
    Sit,
    /// PCR-only pseudo-stream.
    Pcr,
    /// NULL padding stream.
    Null,
}

impl SystemKind {
    /// Scheduler priority (higher wins timestamp ties).
    pub fn priority(self) -> u8 {
        match self {
            SystemKind::Pcr => 1,
            SystemKind::Sit => 2,
            SystemKind::Pmt => 3,
            SystemKind::Pat => 4,
            SystemKind::Null => 0,
        }
    }

    /// Table emission period, 27 MHz ticks.
    pub fn period(self) -> u64 {
        match self {
            SystemKind::Pcr => MAIN_CLOCK_27MHZ / 20, // 50 ms
            SystemKind::Sit => MAIN_CLOCK_27MHZ / 2,  // 500 ms
            SystemKind::Pmt => MAIN_CLOCK_27MHZ / 20, // 50 ms
            SystemKind::Pat => MAIN_CLOCK_27MHZ / 20, // 50 ms
            SystemKind::Null => MAIN_CLOCK_27MHZ / 20,
        }
    }
}

/// A system stream: cycling table bytes plus write state.
#[derive(Debug)]
pub struct SystemStream {
    /// Flavour.
    pub kind: SystemKind,
    /// Full table bytes (pointer field through padding).
    pub table: Vec<u8>,
    /// Current write offset into the table.
    pub offset: usize,
    /// True once a complete table has been emitted at least once.
    pub first_full_table_supplied: bool,
    /// NULL packets hold their counter at zero.
    pub use_continuity_counter: bool,
}

impl SystemStream {
    /// Creates a system stream around its table bytes.
    pub fn new(kind: SystemKind, table: Vec<u8>) -> Self {
        SystemStream {
            kind,
            table,
            offset: 0,
            first_full_table_supplied: false,
            use_continuity_counter: kind != SystemKind::Null,
        }
    }

    /// Bytes left in the current table cycle.
    pub fn remaining(&self) -> usize {
        self.table.len() - self.offset
    }

    /// True when the next packet starts a new table.
    pub fn is_payload_start(&self) -> bool {
        self.offset == 0
    }

    /// Copies up to `len` table bytes into `dst`, cycling at the end.
    pub fn fill_payload(&mut self, dst: &mut [u8]) {
        let len = dst.len().min(self.remaining());
        dst[..len].copy_from_slice(&self.table[self.offset..self.offset + len]);
        self.offset += len;
        if self.remaining() == 0 {
            self.offset = 0;
            self.first_full_table_supplied = true;
        }
    }
}

/// An elementary stream: script reader, prefetch queue and the PES packet
/// under construction.
pub struct EsStream {
    reader: EsmsReader,
    sources: Vec<File>,
    queue: VecDeque<EsmsPesFrame>,
    script_drained: bool,

    /// Secondary-stream flag (PES stream_id_extension selection).
    pub secondary: bool,
    /// Largest initial decoding delay contribution: first DTS relative to
    /// the stream zero, 27 MHz ticks.
    pub initial_delay: u64,

    /// PES packet being emitted: header plus payload bytes, and the read
    /// offset inside it.
    pub packet: Vec<u8>,
    /// Read offset inside `packet`.
    pub packet_offset: usize,
    /// Current PES PTS, 27 MHz ticks (absolute).
    pub pts: u64,
    /// Current PES DTS, 27 MHz ticks (absolute).
    pub dts: u64,
    /// Current frame is an extension frame.
    pub extension_frame: bool,
    /// Current frame removal time for the buffering model, 27 MHz ticks.
    pub removal_ts: u64,
    /// Header/payload split of the current packet, bits.
    pub header_bits: u64,
    /// Payload bits of the current packet.
    pub payload_bits: u64,
}

impl EsStream {
    /// Opens a validated script and its source files.
    pub fn open(script_path: &Path, secondary: bool) -> Result<Self> {
        let mut reader = EsmsReader::open(script_path)?;
        let mut sources = Vec::with_capacity(reader.source_files().len());
        for entry in reader.source_files() {
            sources.push(File::open(&entry.path)?);
        }

        // Prime the queue so the first frame's timing is known up front.
        let mut queue = VecDeque::new();
        let mut script_drained = false;
        while queue.len() < PES_FRAMES_REFILL {
            match reader.next_frame()? {
                Some(frame) => queue.push_back(frame),
                None => {
                    script_drained = true;
                    break;
                }
            }
        }

        let initial_delay = queue
            .front()
            .map(|frame| {
                frame
                    .dts_or_pts()
                    .saturating_sub(reader.properties().pts_reference)
                    * 300
            })
            .unwrap_or(0);

        Ok(EsStream {
            reader,
            sources,
            queue,
            script_drained,
            secondary,
            initial_delay,
            packet: Vec::new(),
            packet_offset: 0,
            pts: 0,
            dts: 0,
            extension_frame: false,
            removal_ts: 0,
            header_bits: 0,
            payload_bits: 0,
        })
    }

    /// Script-level stream properties.
    pub fn properties(&self) -> &EsProperties {
        self.reader.properties()
    }

    /// Script-level format properties.
    pub fn fmt_properties(&self) -> &FmtProperties {
        self.reader.fmt_properties()
    }

    /// Bytes left in the PES packet under emission.
    pub fn remaining(&self) -> usize {
        self.packet.len() - self.packet_offset
    }

    /// True when the next packet starts the PES packet.
    pub fn is_payload_start(&self) -> bool {
        self.packet_offset == 0
    }

    /// Copies up to `dst.len()` PES bytes into `dst`.
    pub fn fill_payload(&mut self, dst: &mut [u8]) {
        let len = dst.len().min(self.remaining());
        dst[..len].copy_from_slice(&self.packet[self.packet_offset..self.packet_offset + len]);
        self.packet_offset += len;
    }

    fn refill_queue(&mut self) -> Result<()> {
        if self.script_drained || self.queue.len() >= MIN_QUEUED_PES_FRAMES {
            return Ok(());
        }
        for _ in 0..PES_FRAMES_REFILL {
            match self.reader.next_frame()? {
                Some(frame) => self.queue.push_back(frame),
                None => {
                    self.script_drained = true;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Builds the next PES packet (header and payload bytes) from the
    /// script. Returns `false` once the script is exhausted.
    ///
    /// `referential_stc` anchors script-relative timestamps on the mux
    /// timeline; `std_buf_delay` shifts decoder removal events back onto
    /// the muxer clock.
    pub fn build_next_pes_packet(
        &mut self,
        referential_stc: u64,
        std_buf_delay: u64,
    ) -> Result<bool> {
        self.refill_queue()?;
        let Some(frame) = self.queue.pop_front() else {
            return Ok(false);
        };

        let properties = *self.reader.properties();
        let zero = properties.pts_reference;
        self.pts = referential_stc + frame.pts.saturating_sub(zero) * 300;
        self.dts = referential_stc + frame.dts_or_pts().saturating_sub(zero) * 300;
        self.extension_frame = frame.extension_frame;
        self.removal_ts = self.dts.saturating_sub(std_buf_delay);

        let payload = apply_commands(
            &frame.commands,
            frame.size,
            self.reader.data_blocks(),
            &mut self.sources,
        )?;

        let header = prepare_pes_header(
            properties.coding_type,
            self.secondary,
            frame.extension_frame,
            self.pts / 300,
            self.dts / 300,
            payload.len(),
        );

        // Grow without shrinking: the buffer is reused across packets.
        self.packet.clear();
        self.packet.resize(header.size(), 0);
        let written = header.write_into(&mut self.packet).map_err(MuxError::Framing)?;
        debug_assert_eq!(written, header.size());
        self.packet.extend_from_slice(&payload);
        self.packet_offset = 0;
        self.header_bits = (written as u64) * 8;
        self.payload_bits = (payload.len() as u64) * 8;

        trace!(
            coding_type = properties.coding_type.name(),
            pts = self.pts,
            dts = self.dts,
            size = self.packet.len(),
            "PES packet built"
        );
        Ok(true)
    }
}

/// Builds the PES header parameters for a frame of the given coding type:
/// video uses stream id 0xE0 with PTS+DTS, LPCM and HDMV ride
/// `private_stream_1`, AC-3/DTS families use the 0xFD extension scheme
/// (0x71 primary, 0x72 extension substreams and secondary streams).
pub fn prepare_pes_header(
    coding_type: StreamCodingType,
    secondary: bool,
    extension_frame: bool,
    pts_90k: u64,
    dts_90k: u64,
    payload_len: usize,
) -> PesHeaderParams {
    use ts::pes::*;

    match coding_type.es_type() {
        EsType::Video => PesHeaderParams {
            stream_id: STREAM_ID_VIDEO_FIRST,
            payload_len,
            data_alignment: true,
            pts: Some(pts_90k),
            dts: (dts_90k != pts_90k).then_some(dts_90k),
            stream_id_extension: None,
        },
        EsType::Hdmv => PesHeaderParams {
            stream_id: STREAM_ID_PRIVATE_1,
            payload_len,
            data_alignment: true,
            pts: Some(pts_90k),
            dts: (dts_90k != pts_90k).then_some(dts_90k),
            stream_id_extension: None,
        },
        EsType::Audio => {
            if coding_type == StreamCodingType::Lpcm {
                PesHeaderParams {
                    stream_id: STREAM_ID_PRIVATE_1,
                    payload_len,
                    data_alignment: true,
                    pts: Some(pts_90k),
                    dts: None,
                    stream_id_extension: None,
                }
            } else {
                PesHeaderParams {
                    stream_id: STREAM_ID_EXTENDED,
                    payload_len,
                    data_alignment: true,
                    pts: Some(pts_90k),
                    dts: None,
                    stream_id_extension: Some(if extension_frame || secondary {
                        STREAM_ID_EXT_SECONDARY
                    } else {
                        STREAM_ID_EXT_PRIMARY
                    }),
                }
            }
        }
    }
}

/// A scheduler-owned stream handle.
pub enum Stream {
    /// Elementary stream.
    Es(EsStream),
    /// System stream.
    System(SystemStream),
}

/// Common per-stream wire state.
pub struct StreamSlot {
    /// Assigned PID.
    pub pid: u16,
    /// 4-bit continuity counter.
    pub continuity_counter: u8,
    /// Packets written on this PID.
    pub packets_written: u64,
    /// The handle.
    pub stream: Stream,
}

impl StreamSlot {
    /// Creates a slot.
    pub fn new(pid: u16, stream: Stream) -> Self {
        StreamSlot {
            pid,
            continuity_counter: 0,
            packets_written: 0,
            stream,
        }
    }

    /// The ES handle, if this slot holds one.
    pub fn as_es(&self) -> Option<&EsStream> {
        match &self.stream {
            Stream::Es(es) => Some(es),
            Stream::System(_) => None,
        }
    }

    /// Mutable ES handle accessor.
    pub fn as_es_mut(&mut self) -> Option<&mut EsStream> {
        match &mut self.stream {
            Stream::Es(es) => Some(es),
            Stream::System(_) => None,
        }
    }

    /// The system handle, if this slot holds one.
    pub fn as_system_mut(&mut self) -> Option<&mut SystemStream> {
        match &mut self.stream {
            Stream::System(sys) => Some(sys),
            Stream::Es(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_stream_cycles() {
        let mut sys = SystemStream::new(SystemKind::Pat, vec![0xAB; 184]);
        assert!(sys.is_payload_start());
        assert!(!sys.first_full_table_supplied);

        let mut dst = [0u8; 100];
        sys.fill_payload(&mut dst);
        assert_eq!(sys.remaining(), 84);
        assert!(!sys.is_payload_start());

        let mut dst = [0u8; 84];
        sys.fill_payload(&mut dst);
        assert!(sys.is_payload_start());
        assert!(sys.first_full_table_supplied);
    }

    #[test]
    fn test_null_stream_holds_counter() {
        let sys = SystemStream::new(SystemKind::Null, vec![0xFF; 184]);
        assert!(!sys.use_continuity_counter);
        let pat = SystemStream::new(SystemKind::Pat, vec![0x00; 184]);
        assert!(pat.use_continuity_counter);
    }

    #[test]
    fn test_pes_header_selection() {
        let video = prepare_pes_header(StreamCodingType::Avc, false, false, 100, 50, 10);
        assert_eq!(video.stream_id, 0xE0);
        assert_eq!(video.dts, Some(50));

        let lpcm = prepare_pes_header(StreamCodingType::Lpcm, false, false, 100, 100, 10);
        assert_eq!(lpcm.stream_id, 0xBD);
        assert!(lpcm.dts.is_none());

        let ac3 = prepare_pes_header(StreamCodingType::Ac3, false, false, 100, 100, 10);
        assert_eq!(ac3.stream_id, 0xFD);
        assert_eq!(ac3.stream_id_extension, Some(0x71));

        let thd_ext = prepare_pes_header(StreamCodingType::TrueHd, false, true, 100, 100, 10);
        assert_eq!(thd_ext.stream_id_extension, Some(0x72));

        let secondary = prepare_pes_header(StreamCodingType::Eac3Secondary, true, false, 0, 0, 10);
        assert_eq!(secondary.stream_id_extension, Some(0x72));

        let pg = prepare_pes_header(StreamCodingType::Pg, false, false, 900, 450, 10);
        assert_eq!(pg.stream_id, 0xBD);
        assert_eq!(pg.dts, Some(450));
    }

    #[test]
    fn test_system_priorities() {
        assert_eq!(SystemKind::Pcr.priority(), 1);
        assert_eq!(SystemKind::Sit.priority(), 2);
        assert_eq!(SystemKind::Pmt.priority(), 3);
        assert_eq!(SystemKind::Pat.priority(), 4);
        assert_eq!(SystemKind::Pcr.period(), MAIN_CLOCK_27MHZ / 20);
    }
}
