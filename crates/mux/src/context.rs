//! Muxing context: initialization and the per-packet scheduler loop.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use tracing::{debug, info, trace, warn};

use bdav_std::{BufModel, BufModelOptions, StreamRef};
use esms::FmtProperties;
use ts::packet::{TpHeaderParams, TP_PCR_FIELD_OFFSET};
use ts::{
    build_null_table, write_tp_extra_header, Ac3AudioDescriptor, AvcVideoDescriptor, Descriptor,
    DtcpDescriptor, EsType, PartialTsDescriptor, PatParams, PatProgram, PmtElement, PmtParams,
    RegistrationDescriptor, SitParams, SitService, StreamCodingType, PID_NULL, PID_PAT, PID_PCR,
    PID_PMT, PID_SIT, REG_FMT_ID_AC3, REG_FMT_ID_HDMV, TP_SIZE,
};

use crate::codec::prepare_script;
use crate::compliance;
use crate::heap::{StreamHeap, TimingInfos};
use crate::pid::PidAllocator;
use crate::settings::MuxSettings;
use crate::stream::{EsStream, Stream, StreamSlot, SystemKind, SystemStream};
use crate::{MuxError, Result, MAIN_CLOCK_27MHZ};

/// Pre-DTS emission nudge per transport packet, 27 MHz ticks.
const TP_SHIFT_BEFORE_DTS: u64 = 846;

/// PCR carriage state.
#[derive(Debug, Clone, Copy, Default)]
struct PcrParam {
    carried_by_es: bool,
    es_pid: u16,
    injection_required: bool,
}

/// End-of-run statistics.
#[derive(Debug, Clone)]
pub struct MuxSummary {
    /// Transport packets written.
    pub nb_packets: u64,
    /// Bytes written (including BDAV extra headers).
    pub nb_bytes: u64,
    /// Packets per PID.
    pub per_pid: Vec<(u16, u64)>,
}

impl std::fmt::Display for MuxSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} packets, {} bytes muxed (",
            self.nb_packets, self.nb_bytes
        )?;
        for (idx, (pid, count)) in self.per_pid.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "0x{pid:04X}: {count}")?;
        }
        write!(f, ")")
    }
}

/// The muxer working context.
pub struct MuxContext {
    settings: MuxSettings,

    streams: Vec<StreamSlot>,
    null_stream: StreamSlot,
    sys_heap: StreamHeap,
    es_heap: StreamHeap,

    pcr_param: PcrParam,
    model: Option<BufModel>,

    /// Current STC with its fractional part (CBR pacing must not drift).
    stc: f64,
    /// `floor(stc)`.
    stc_ts: u64,
    byte_duration: f64,
    tp_duration: f64,
    referential_stc: u64,
    std_buf_delay: u64,

    nb_packets: u64,
    nb_bytes: u64,
    per_pid: BTreeMap<u16, u64>,
}

impl MuxContext {
    /// Creates the context: checks or builds every script, allocates PIDs,
    /// computes initial timings, builds the system streams and primes both
    /// heaps.
    pub fn new(settings: MuxSettings) -> Result<Self> {
        if settings.tracks.is_empty() {
            return Err(MuxError::config(0, "no input track"));
        }

        // Scripts and ES handles.
        let mut allocator = PidAllocator::new();
        let mut streams: Vec<StreamSlot> = Vec::new();
        let mut claimed_scripts: Vec<PathBuf> = Vec::new();

        for track in &settings.tracks {
            let (coding_type, script_path) = prepare_script(
                track,
                &claimed_scripts,
                settings.options.force_script_generation,
            )?;
            claimed_scripts.push(script_path.clone());

            let es = EsStream::open(&script_path, track.options.secondary)?;
            if let FmtProperties::Video(video) = es.fmt_properties() {
                compliance::enforce(
                    compliance::check_video_configuration(
                        coding_type,
                        video.video_format,
                        video.frame_rate,
                        track.options.secondary,
                    ),
                    &settings.options,
                )?;
            }
            let pid = allocator.request(coding_type, track.options.secondary, track.pid)?;
            debug!(
                pid,
                coding_type = coding_type.name(),
                script = %script_path.display(),
                "track ready"
            );
            streams.push(StreamSlot::new(pid, Stream::Es(es)));
        }

        // Initial timing values.
        let byte_duration = MAIN_CLOCK_27MHZ as f64 * 8.0 / settings.mux_rate as f64;
        let tp_duration = TP_SIZE as f64 * byte_duration;

        let initial_decoding_delay = streams
            .iter()
            .filter_map(StreamSlot::as_es)
            .map(|es| es.initial_delay)
            .max()
            .unwrap_or(0);
        let std_buf_delay =
            (settings.initial_std_delay * MAIN_CLOCK_27MHZ as f64).ceil() as u64;

        let mut start_pcr = settings.start_pcr;
        if start_pcr < initial_decoding_delay + std_buf_delay {
            warn!(
                "start PCR raised to the minimal initial buffering delay \
                 to avoid negative timestamps"
            );
            start_pcr = initial_decoding_delay + std_buf_delay;
        }
        let stc_ts =
            ((start_pcr - initial_decoding_delay) / 300 * 300).saturating_sub(std_buf_delay);
        let referential_stc = start_pcr;

        let pcr_param = PcrParam {
            carried_by_es: settings.options.pcr_on_es_packets,
            es_pid: settings.options.pcr_pid,
            injection_required: false,
        };

        let model = if settings.options.disable_buffering_model {
            None
        } else {
            Some(BufModel::new(
                BufModelOptions {
                    abort_on_underflow: settings.options.abort_on_underflow,
                    underflow_warn_timeout: settings.options.underflow_warn_timeout,
                },
                stc_ts,
            ))
        };

        let mut ctx = MuxContext {
            model,
            settings,
            streams,
            null_stream: StreamSlot::new(
                PID_NULL,
                Stream::System(SystemStream::new(SystemKind::Null, build_null_table())),
            ),
            sys_heap: StreamHeap::new(),
            es_heap: StreamHeap::new(),
            pcr_param,
            stc: stc_ts as f64,
            stc_ts,
            byte_duration,
            tp_duration,
            referential_stc,
            std_buf_delay,
            nb_packets: 0,
            nb_bytes: 0,
            per_pid: BTreeMap::new(),
        };

        ctx.init_buffer_model();
        ctx.init_system_streams()?;
        ctx.init_elementary_streams()?;

        debug!(
            stc = ctx.stc_ts,
            referential = ctx.referential_stc,
            delay = ctx.std_buf_delay,
            "muxing context initialized"
        );
        Ok(ctx)
    }

    fn init_buffer_model(&mut self) {
        let Some(model) = &mut self.model else {
            return;
        };
        for slot in &self.streams {
            let Some(es) = slot.as_es() else { continue };
            let properties = es.properties();
            let cpb_size = match es.fmt_properties() {
                FmtProperties::Video(video) => video.h264.map_or(0, |h264| h264.cpb_size),
                _ => 0,
            };
            model.register_es(
                slot.pid,
                properties.coding_type,
                properties.bitrate as u64,
                cpb_size,
                self.stc_ts,
            );
        }
    }

    /// Builds PAT/PMT/SIT/PCR streams and queues them.
    fn init_system_streams(&mut self) -> Result<()> {
        let pat = PatParams {
            transport_stream_id: 0x0000,
            version: 0,
            current_next: true,
            programs: vec![
                PatProgram {
                    program_number: 0x0000,
                    pid: PID_SIT,
                },
                PatProgram {
                    program_number: 0x0001,
                    pid: PID_PMT,
                },
            ],
        };

        let pcr_pid = if self.pcr_param.carried_by_es {
            self.pcr_param.es_pid
        } else {
            PID_PCR
        };
        let mut pmt = PmtParams {
            program_number: 0x0001,
            pcr_pid,
            descriptors: vec![
                Descriptor::Registration(RegistrationDescriptor {
                    format_identifier: REG_FMT_ID_HDMV,
                    additional_info: vec![],
                }),
                Descriptor::Dtcp(DtcpDescriptor {
                    ca_system_id: self.settings.dtcp.ca_system_id,
                    retention_move_mode: self.settings.dtcp.retention_move_mode,
                    retention_state: self.settings.dtcp.retention_state,
                    epn: self.settings.dtcp.epn,
                    dtcp_cci: self.settings.dtcp.dtcp_cci,
                    dot: self.settings.dtcp.dot,
                    ast: self.settings.dtcp.ast,
                    image_constraint_token: self.settings.dtcp.image_constraint_token,
                    aps: self.settings.dtcp.aps,
                }),
            ],
            elements: Vec::new(),
        };
        for slot in &self.streams {
            let Some(es) = slot.as_es() else { continue };
            pmt.elements.push(PmtElement {
                stream_type: es.properties().coding_type,
                pid: slot.pid,
                descriptors: element_descriptors(es),
            });
        }

        let sit = SitParams {
            descriptors: vec![Descriptor::PartialTs(PartialTsDescriptor {
                peak_rate: (self.settings.mux_rate / 400) as u32,
                minimum_overall_smoothing_rate: 0x3F_FFFF,
                maximum_overall_smoothing_buffer: 0x3FFF,
            })],
            services: vec![SitService {
                service_id: 0x0001,
                running_status: 0,
                descriptors: vec![],
            }],
        };

        let tables = [
            (SystemKind::Pat, PID_PAT, pat.build()?),
            (SystemKind::Pmt, PID_PMT, pmt.build()?),
            (SystemKind::Pcr, PID_PCR, Vec::new()),
            (SystemKind::Sit, PID_SIT, sit.build()?),
        ];
        for (kind, pid, table) in tables {
            let ts_per_pes = (table.len().div_ceil(184) as u64).max(1);
            let timing = TimingInfos {
                ts_pt: self.stc_ts,
                priority: kind.priority(),
                pes_duration: kind.period(),
                ts_per_pes,
                ts_duration: kind.period() / ts_per_pes,
            };
            let slot = StreamSlot::new(pid, Stream::System(SystemStream::new(kind, table)));
            let index = self.streams.len();
            self.streams.push(slot);
            self.sys_heap.push(timing, index);
        }
        Ok(())
    }

    /// Builds the first PES packet of every ES and queues the streams.
    fn init_elementary_streams(&mut self) -> Result<()> {
        for index in 0..self.streams.len() {
            let pid = self.streams[index].pid;
            let referential = self.referential_stc;
            let delay = self.std_buf_delay;
            let Some(es) = self.streams[index].as_es_mut() else {
                continue;
            };
            if !es.build_next_pes_packet(referential, delay)? {
                return Err(MuxError::EmptyScript(pid));
            }
            let timing = calc_pes_timing(es, delay);
            Self::register_pes_frame(&mut self.model, pid, es)?;
            trace!(pid, ts_pt = timing.ts_pt, "ES queued");
            self.es_heap.push(timing, index);
        }
        Ok(())
    }

    fn register_pes_frame(
        model: &mut Option<BufModel>,
        pid: u16,
        es: &EsStream,
    ) -> Result<()> {
        if let Some(model) = model {
            model.add_pes_frame(pid, es.header_bits, es.payload_bits, es.removal_ts)?;
        }
        Ok(())
    }

    /// True while elementary stream data remains to mux.
    pub fn es_remaining(&self) -> bool {
        !self.es_heap.is_empty()
    }

    /// Total number of transport packets written so far.
    pub fn nb_packets(&self) -> u64 {
        self.nb_packets
    }

    /// PCR field value for a packet written at the current STC.
    fn pcr_field_value(&self) -> u64 {
        (self.stc + TP_PCR_FIELD_OFFSET as f64 * self.byte_duration) as u64
    }

    fn pcr_injection_required(&self, pid: u16) -> bool {
        self.pcr_param.carried_by_es
            && self.pcr_param.injection_required
            && self.pcr_param.es_pid == pid
    }

    /// Writes one transport packet for the stream at `index`.
    fn write_stream_packet<W: Write>(
        &mut self,
        out: &mut W,
        index: usize,
        pcr: Option<u64>,
    ) -> Result<(usize, usize)> {
        let extra_header = self.settings.options.write_tp_extra_headers;
        let stc_ts = self.stc_ts;
        let slot = &mut self.streams[index];

        let (remaining, payload_start) = match &slot.stream {
            Stream::Es(es) => (es.remaining(), es.is_payload_start()),
            Stream::System(sys) => (sys.remaining(), sys.is_payload_start()),
        };

        let header = TpHeaderParams::for_payload(
            slot.pid,
            slot.continuity_counter,
            payload_start,
            remaining,
            pcr,
        );
        let mut tp = [0u8; TP_SIZE];
        let header_size = header.write_into(&mut tp)?;
        let payload_size = TP_SIZE - header_size;
        if payload_size > 0 {
            match &mut slot.stream {
                Stream::Es(es) => es.fill_payload(&mut tp[header_size..]),
                Stream::System(sys) => sys.fill_payload(&mut tp[header_size..]),
            }
            slot.continuity_counter = (slot.continuity_counter + 1) & 0x0F;
        } else if let Stream::System(sys) = &mut slot.stream {
            // A payload-less cycle (PCR pseudo-stream) counts as supplied.
            sys.first_full_table_supplied = true;
        }

        if extra_header {
            out.write_all(&write_tp_extra_header(stc_ts))?;
            self.nb_bytes += 4;
        }
        out.write_all(&tp)?;

        slot.packets_written += 1;
        self.nb_packets += 1;
        self.nb_bytes += TP_SIZE as u64;
        *self.per_pid.entry(slot.pid).or_insert(0) += 1;
        Ok((header_size, payload_size))
    }

    /// Attempts to mux one system packet; false when none is due or the
    /// slot was skipped.
    fn try_mux_system_packet<W: Write>(&mut self, out: &mut W) -> Result<bool> {
        if !self.sys_heap.is_ready(self.stc_ts) {
            return Ok(false);
        }
        let (mut timing, index) = self.sys_heap.pop().expect("heap is ready");
        let kind = match &self.streams[index].stream {
            Stream::System(sys) => sys.kind,
            Stream::Es(_) => unreachable!("system heap holds system streams"),
        };

        if kind == SystemKind::Pcr && self.pcr_param.carried_by_es {
            // PCR rides an ES: raise the injection request, emit nothing.
            self.pcr_param.injection_required = true;
            timing.increment();
            self.sys_heap.push(timing, index);
            return Ok(false);
        }

        // Admission check against the shared system branch.
        if let Some(model) = &self.model {
            if !model.check(self.stc_ts, (TP_SIZE as u64) * 8, StreamRef::System) {
                trace!(pid = self.streams[index].pid, "system packet deferred");
                self.sys_heap.push(timing, index);
                return Ok(false);
            }
        }

        let pcr = (kind == SystemKind::Pcr).then(|| self.pcr_field_value());
        let (header_size, payload_size) = self.write_stream_packet(out, index, pcr)?;

        if let Some(model) = &mut self.model {
            model.add_system_ts_frame(header_size as u64, payload_size as u64);
            model.update(self.stc_ts, (TP_SIZE as u64) * 8, StreamRef::System)?;
        }

        let supplied = match &self.streams[index].stream {
            Stream::System(sys) => sys.first_full_table_supplied,
            Stream::Es(_) => unreachable!(),
        };
        if supplied {
            // Rate-limit only once the full initial table went out.
            timing.increment();
        }
        self.sys_heap.push(timing, index);
        trace!(stc = self.stc_ts, kind = ?kind, "system packet muxed");
        Ok(true)
    }

    /// Attempts to mux one elementary stream packet.
    fn try_mux_es_packet<W: Write>(&mut self, out: &mut W) -> Result<bool> {
        // Pick the first due ES whose injection the model admits.
        let picked = loop {
            if !self.es_heap.is_ready(self.stc_ts) {
                break None;
            }
            let (mut timing, index) = self.es_heap.pop().expect("heap is ready");
            let pid = self.streams[index].pid;
            let admitted = self.model.as_ref().is_none_or(|model| {
                model.check(self.stc_ts, (TP_SIZE as u64) * 8, StreamRef::Es(pid))
            });
            if admitted {
                break Some((timing, index));
            }
            trace!(pid, stc = self.stc_ts, "ES packet deferred (buffer full)");
            timing.increment();
            self.es_heap.push(timing, index);
        };
        let Some((mut timing, index)) = picked else {
            return Ok(false);
        };

        let pid = self.streams[index].pid;
        let pcr = self
            .pcr_injection_required(pid)
            .then(|| self.pcr_field_value());
        let (header_size, payload_size) = self.write_stream_packet(out, index, pcr)?;
        if pcr.is_some() {
            self.pcr_param.injection_required = false;
        }

        if let Some(model) = &mut self.model {
            model.add_es_ts_frame(pid, header_size as u64, payload_size as u64)?;
            model.update(
                self.stc_ts,
                (TP_SIZE as u64) * 8,
                StreamRef::Es(pid),
            )?;
        }

        // Next PES packet once the current one is exhausted.
        let referential = self.referential_stc;
        let delay = self.std_buf_delay;
        let es = self.streams[index]
            .as_es_mut()
            .expect("ES heap holds elementary streams");
        if es.remaining() == 0 {
            if !es.build_next_pes_packet(referential, delay)? {
                debug!(pid, "elementary stream completed");
                return Ok(true); // Script exhausted, stream leaves the heap.
            }
            let new_timing = calc_pes_timing(es, delay);
            let es = &self.streams[index];
            Self::register_pes_frame(&mut self.model, pid, es.as_es().expect("checked"))?;
            timing = new_timing;
        } else {
            timing.increment();
        }
        self.es_heap.push(timing, index);
        Ok(true)
    }

    fn write_null_packet<W: Write>(&mut self, out: &mut W) -> Result<()> {
        let extra_header = self.settings.options.write_tp_extra_headers;
        let header = TpHeaderParams {
            pid: PID_NULL,
            has_payload: true,
            ..TpHeaderParams::default()
        };
        let mut tp = [0u8; TP_SIZE];
        let header_size = header.write_into(&mut tp)?;
        if let Stream::System(sys) = &mut self.null_stream.stream {
            sys.fill_payload(&mut tp[header_size..]);
        }
        if extra_header {
            out.write_all(&write_tp_extra_header(self.stc_ts))?;
            self.nb_bytes += 4;
        }
        out.write_all(&tp)?;
        self.null_stream.packets_written += 1;
        self.nb_packets += 1;
        self.nb_bytes += TP_SIZE as u64;
        *self.per_pid.entry(PID_NULL).or_insert(0) += 1;
        trace!(stc = self.stc_ts, "NULL packet muxed");
        Ok(())
    }

    fn advance_stc(&mut self) {
        self.stc += self.tp_duration;
        self.stc_ts = self.stc as u64;
    }

    /// Writes the next transport packet: system tables first, then
    /// elementary streams, then CBR padding; the STC advances by one packet
    /// duration in every case.
    pub fn mux_next_packet<W: Write>(&mut self, out: &mut W) -> Result<()> {
        if !self.try_mux_system_packet(out)?
            && !self.try_mux_es_packet(out)?
            && self.settings.options.cbr
        {
            self.write_null_packet(out)?;
        }
        self.advance_stc();
        Ok(())
    }

    /// Pads with NULL packets up to a whole BDAV Aligned Unit (32 packets).
    pub fn pad_aligned_unit<W: Write>(&mut self, out: &mut W) -> Result<()> {
        while self.nb_packets % 32 != 0 {
            self.write_null_packet(out)?;
            self.advance_stc();
        }
        Ok(())
    }

    /// Runs the whole mux loop onto `out`.
    pub fn mux<W: Write>(&mut self, out: &mut W) -> Result<MuxSummary> {
        while self.es_remaining() {
            self.mux_next_packet(out)?;
        }
        self.pad_aligned_unit(out)?;
        out.flush()?;
        let summary = self.summary();
        info!("{summary}");
        Ok(summary)
    }

    /// Current statistics.
    pub fn summary(&self) -> MuxSummary {
        MuxSummary {
            nb_packets: self.nb_packets,
            nb_bytes: self.nb_bytes,
            per_pid: self.per_pid.iter().map(|(&pid, &count)| (pid, count)).collect(),
        }
    }
}

/// Scheduling parameters of the current PES packet: cadence from the codec
/// (or the stream bitrate for duration-driven HDMV streams), the packet
/// count from the PES size, and the emission start nudged ahead of the DTS.
fn calc_pes_timing(es: &EsStream, std_buf_delay: u64) -> TimingInfos {
    let properties = es.properties();
    let dts = es.dts.saturating_sub(std_buf_delay);
    let bitrate = (properties.bitrate as u64).max(1);

    // PES packets per second as a rational (num/den per second).
    let (cadence_num, cadence_den) = match properties.es_type {
        EsType::Video => match es.fmt_properties() {
            FmtProperties::Video(video) => {
                video.frame_rate.as_rational().unwrap_or((25, 1))
            }
            _ => (25, 1),
        },
        EsType::Audio => match properties.coding_type {
            StreamCodingType::Lpcm => (200, 1),
            StreamCodingType::TrueHd if es.extension_frame => (200, 1),
            coding if coding.is_dts_family() => (48_000, 512),
            _ => (48_000, 1536),
        },
        EsType::Hdmv => {
            // Duration-driven: derived from the current PES size below.
            (0, 1)
        }
    };

    let pes_duration = if cadence_num == 0 {
        let size_bits = (es.packet.len() as u64 * 8).max(1);
        (MAIN_CLOCK_27MHZ * size_bits / bitrate).max(1)
    } else {
        MAIN_CLOCK_27MHZ * cadence_den as u64 / cadence_num as u64
    };

    // Average PES size floor from the bitrate, against the real size.
    let rate_based = bitrate * pes_duration / MAIN_CLOCK_27MHZ / 8;
    let pes_size = rate_based.max(es.remaining() as u64).max(1);

    let ts_per_pes = pes_size.div_ceil(184).max(1);
    let ts_duration = (pes_duration / ts_per_pes).max(1);
    let nudge = ts_per_pes * TP_SHIFT_BEFORE_DTS;
    let ts_pt = if nudge < dts { dts - nudge } else { dts };

    TimingInfos {
        ts_pt,
        priority: 0,
        pes_duration,
        ts_per_pes,
        ts_duration,
    }
}

/// PMT program-element descriptors for one elementary stream.
fn element_descriptors(es: &EsStream) -> Vec<Descriptor> {
    let properties = es.properties();
    let coding = properties.coding_type;

    match coding {
        // DTS family and HDMV graphics carry no element descriptor.
        StreamCodingType::Dts
        | StreamCodingType::DtsHdHr
        | StreamCodingType::DtsHdMa
        | StreamCodingType::DtsExpress
        | StreamCodingType::Pg
        | StreamCodingType::Ig
        | StreamCodingType::Text => Vec::new(),

        StreamCodingType::Ac3
        | StreamCodingType::TrueHd
        | StreamCodingType::Eac3
        | StreamCodingType::Eac3Secondary => {
            let mut descriptors = vec![Descriptor::Registration(RegistrationDescriptor {
                format_identifier: REG_FMT_ID_AC3,
                additional_info: vec![],
            })];
            if let FmtProperties::Audio(audio) = es.fmt_properties() {
                if let Some(ac3) = audio.ac3 {
                    descriptors.push(Descriptor::Ac3Audio(Ac3AudioDescriptor {
                        sample_rate_code: ac3.sample_rate_code,
                        bsid: ac3.bsid,
                        bit_rate_code: ac3.bit_rate_code,
                        surround_mode: ac3.surround_mode,
                        bsmod: ac3.bsmod,
                        num_channels: ac3.num_channels,
                        full_svc: ac3.full_svc,
                    }));
                }
            }
            descriptors
        }

        StreamCodingType::Mpeg1Video
        | StreamCodingType::H262
        | StreamCodingType::Avc
        | StreamCodingType::Vc1 => {
            let FmtProperties::Video(video) = es.fmt_properties() else {
                return Vec::new();
            };
            let mut descriptors = vec![Descriptor::Registration(RegistrationDescriptor {
                format_identifier: REG_FMT_ID_HDMV,
                additional_info: vec![
                    0xFF,
                    coding as u8,
                    ((video.video_format as u8) << 4) | (video.frame_rate as u8 & 0x0F),
                    0x3F,
                ],
            })];
            if coding == StreamCodingType::Avc && video.still_picture {
                descriptors.push(Descriptor::AvcVideo(AvcVideoDescriptor {
                    profile_idc: video.profile_idc,
                    constraint_flags: video.h264.map_or(0, |h264| h264.constraint_flags),
                    level_idc: video.level_idc,
                    still_present: true,
                    avc_24_hour_picture: false,
                    frame_packing_sei_not_present: true,
                }));
            }
            descriptors
        }

        StreamCodingType::Lpcm => {
            let FmtProperties::Audio(audio) = es.fmt_properties() else {
                return Vec::new();
            };
            vec![Descriptor::Registration(RegistrationDescriptor {
                format_identifier: REG_FMT_ID_HDMV,
                additional_info: vec![
                    0xFF,
                    coding as u8,
                    (audio.audio_format << 4) | (audio.sample_rate as u8 & 0x0F),
                    (audio.bit_depth << 6) | 0x3F,
                ],
            })]
        }
    }
}
