//! Leaky-bucket chains and the model facade.

use std::collections::{BTreeMap, VecDeque};

use tracing::{trace, warn};
use ts::StreamCodingType;

use crate::error::BufModelError;
use crate::params;
use crate::Result;

const MAIN_CLOCK: u64 = 27_000_000;

/// Model-wide behaviour knobs.
#[derive(Debug, Clone, Copy)]
pub struct BufModelOptions {
    /// Escalate decoder underflow to a fatal error instead of a warning.
    pub abort_on_underflow: bool,
    /// Grace period in 27 MHz ticks before a late frame counts as underflow.
    pub underflow_warn_timeout: u64,
}

impl Default for BufModelOptions {
    fn default() -> Self {
        BufModelOptions {
            abort_on_underflow: false,
            // 15 ms of tolerated decoder-side lateness.
            underflow_warn_timeout: MAIN_CLOCK / 66,
        }
    }
}

/// Packet destination inside the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRef {
    /// Shared system-PID branch (PAT/PMT/SIT/PCR).
    System,
    /// Elementary stream branch keyed by PID.
    Es(u16),
}

/// Bucket drain behaviour.
#[derive(Debug, Clone, Copy)]
enum Leak {
    /// Continuous leak at a fixed rate, bps.
    Rate(u64),
    /// Unbounded leak: fill clamps to zero on every update.
    Infinite,
    /// Data leaves only through frame-removal events.
    FrameRemoval,
}

/// A frame awaiting its decoder removal time in the final bucket.
#[derive(Debug, Clone, Copy)]
struct PendingFrame {
    removal_ts: u64,
    size_bits: u64,
}

#[derive(Debug, Clone)]
struct Bucket {
    name: &'static str,
    capacity_bits: u64,
    leak: Leak,
    fill_bits: u64,
    last_ts: u64,
    /// Remainder of `rate · dt / MAIN_CLOCK`, carried between updates.
    leak_carry: u64,
    /// Leading bits that leak out of this bucket without being forwarded
    /// downstream (TS headers at the TB, PES headers at the MB).
    drop_pending_bits: u64,
    /// Removal events, FIFO by insertion.
    frames: VecDeque<PendingFrame>,
}

/// One bucket drain step outcome.
struct DrainOutcome {
    forwarded_bits: u64,
    underflow: Option<(u64, u64)>, // (missing_bits, removal_ts)
}

impl Bucket {
    fn new(name: &'static str, capacity_bits: u64, leak: Leak, stc: u64) -> Self {
        Bucket {
            name,
            capacity_bits,
            leak,
            fill_bits: 0,
            last_ts: stc,
            leak_carry: 0,
            drop_pending_bits: 0,
            frames: VecDeque::new(),
        }
    }

    /// Drains the bucket up to `stc`, returning bits forwarded downstream.
    fn advance(&mut self, stc: u64, timeout: u64) -> DrainOutcome {
        let dt = stc.saturating_sub(self.last_ts);
        self.last_ts = self.last_ts.max(stc);

        let mut drained = 0u64;
        let mut underflow = None;

        match self.leak {
            Leak::Rate(bps) => {
                let total = (bps as u128 * dt as u128 + self.leak_carry as u128)
                    / MAIN_CLOCK as u128;
                self.leak_carry = ((bps as u128 * dt as u128 + self.leak_carry as u128)
                    % MAIN_CLOCK as u128) as u64;
                drained = (total as u64).min(self.fill_bits);
                self.fill_bits -= drained;
            }
            Leak::Infinite => {
                drained = self.fill_bits;
                self.fill_bits = 0;
            }
            Leak::FrameRemoval => {
                while let Some(frame) = self.frames.front().copied() {
                    if frame.removal_ts > stc {
                        break;
                    }
                    if self.fill_bits >= frame.size_bits {
                        self.fill_bits -= frame.size_bits;
                        self.frames.pop_front();
                    } else if stc.saturating_sub(frame.removal_ts) >= timeout {
                        // The frame stayed incomplete past the tolerance.
                        let missing = frame.size_bits - self.fill_bits;
                        underflow = Some((missing, frame.removal_ts));
                        self.fill_bits = 0;
                        self.frames.pop_front();
                        break;
                    } else {
                        // Still within grace: wait for the data.
                        break;
                    }
                }
                // Removed frames leave the system, nothing is forwarded.
            }
        }

        let dropped = drained.min(self.drop_pending_bits);
        self.drop_pending_bits -= dropped;
        DrainOutcome {
            forwarded_bits: drained - dropped,
            underflow,
        }
    }
}

/// Branch shape of an elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    /// Transport Buffer → Multiplex Buffer → Elementary Buffer.
    Video,
    /// Transport Buffer → decoder buffer.
    AudioOrHdmv,
    /// Shared system branch.
    System,
}

#[derive(Debug, Clone)]
struct Branch {
    kind: BranchKind,
    buckets: Vec<Bucket>,
}

impl Branch {
    fn video(coding_type: StreamCodingType, bitrate: u64, cpb_size: u32, stc: u64) -> Self {
        Branch {
            kind: BranchKind::Video,
            buckets: vec![
                Bucket::new(
                    "TB",
                    params::TB_SIZE * 8,
                    Leak::Rate(params::tb_leak_rate(coding_type, bitrate)),
                    stc,
                ),
                Bucket::new(
                    "MB",
                    params::VIDEO_MB_SIZE_BITS,
                    Leak::Rate(params::mb_leak_rate(bitrate)),
                    stc,
                ),
                Bucket::new(
                    "EB",
                    params::video_eb_size(coding_type, cpb_size),
                    Leak::FrameRemoval,
                    stc,
                ),
            ],
        }
    }

    fn audio_or_hdmv(coding_type: StreamCodingType, bitrate: u64, stc: u64) -> Self {
        Branch {
            kind: BranchKind::AudioOrHdmv,
            buckets: vec![
                Bucket::new(
                    "TB",
                    params::TB_SIZE * 8,
                    Leak::Rate(params::tb_leak_rate(coding_type, bitrate)),
                    stc,
                ),
                Bucket::new(
                    "B",
                    params::decoder_buffer_size(coding_type) * 8,
                    Leak::FrameRemoval,
                    stc,
                ),
            ],
        }
    }

    fn system(stc: u64) -> Self {
        // A single shared buffer for every system PID, drained at an
        // unbounded rate: its fill clamps to zero on every update.
        Branch {
            kind: BranchKind::System,
            buckets: vec![Bucket::new(
                "Bsys",
                params::SYS_BUFFER_SIZE * 8,
                Leak::Infinite,
                stc,
            )],
        }
    }

    /// Advances every bucket to `stc`, cascading drained bits downstream.
    fn advance(&mut self, stc: u64, timeout: u64) -> Option<(u64, u64, &'static str)> {
        let mut first_underflow = None;
        for idx in 0..self.buckets.len() {
            let outcome = self.buckets[idx].advance(stc, timeout);
            if let Some((missing, removal_ts)) = outcome.underflow {
                first_underflow
                    .get_or_insert((missing, removal_ts, self.buckets[idx].name));
            }
            if idx + 1 < self.buckets.len() {
                self.buckets[idx + 1].fill_bits += outcome.forwarded_bits;
            }
        }
        first_underflow
    }

    /// Adds `bits` to the input bucket.
    fn deposit(&mut self, bits: u64) {
        self.buckets[0].fill_bits += bits;
    }

    /// First bucket whose fill exceeds its capacity, if any.
    fn overflowed(&self) -> Option<&Bucket> {
        self.buckets
            .iter()
            .find(|bucket| bucket.fill_bits > bucket.capacity_bits)
    }

    fn final_bucket_mut(&mut self) -> &mut Bucket {
        self.buckets.last_mut().expect("branch has buckets")
    }
}

/// The buffering model: one branch per registered ES PID plus the shared
/// system branch.
#[derive(Debug, Clone)]
pub struct BufModel {
    branches: BTreeMap<u16, Branch>,
    system: Branch,
    options: BufModelOptions,
}

impl BufModel {
    /// Creates an empty model with its system branch rooted at `stc`.
    pub fn new(options: BufModelOptions, stc: u64) -> Self {
        BufModel {
            branches: BTreeMap::new(),
            system: Branch::system(stc),
            options,
        }
    }

    /// Registers the branch for an elementary stream.
    pub fn register_es(
        &mut self,
        pid: u16,
        coding_type: StreamCodingType,
        bitrate: u64,
        cpb_size: u32,
        stc: u64,
    ) {
        let branch = if coding_type.is_video() {
            Branch::video(coding_type, bitrate, cpb_size, stc)
        } else {
            Branch::audio_or_hdmv(coding_type, bitrate, stc)
        };
        trace!(pid, kind = ?branch.kind, "registered buffering branch");
        self.branches.insert(pid, branch);
    }

    /// True when a branch exists for `pid`.
    pub fn manages_pid(&self, pid: u16) -> bool {
        self.branches.contains_key(&pid)
    }

    fn branch(&self, target: StreamRef) -> Result<&Branch> {
        match target {
            StreamRef::System => Ok(&self.system),
            StreamRef::Es(pid) => self
                .branches
                .get(&pid)
                .ok_or(BufModelError::UnknownPid(pid)),
        }
    }

    fn branch_mut(&mut self, target: StreamRef) -> Result<&mut Branch> {
        match target {
            StreamRef::System => Ok(&mut self.system),
            StreamRef::Es(pid) => self
                .branches
                .get_mut(&pid)
                .ok_or(BufModelError::UnknownPid(pid)),
        }
    }

    /// Returns false iff depositing `bits` at `stc` would push any
    /// downstream bucket of the target branch above capacity.
    ///
    /// Every bucket is tested against its own fill plus everything still in
    /// flight upstream of it (conservative: transit-time drainage of the
    /// bucket itself is not credited), so a nearly-full decoder buffer
    /// vetoes admission even while the transport buffer is empty.
    pub fn check(&self, stc: u64, bits: u64, target: StreamRef) -> bool {
        let Ok(branch) = self.branch(target) else {
            return true; // Unmanaged stream, nothing to enforce.
        };
        let mut probe = branch.clone();
        probe.advance(stc, self.options.underflow_warn_timeout);

        let mut in_flight = bits;
        for bucket in &probe.buckets {
            if bucket.fill_bits + in_flight > bucket.capacity_bits {
                return false;
            }
            in_flight += bucket.fill_bits.saturating_sub(bucket.drop_pending_bits);
        }
        true
    }

    /// Performs the deposit: drains every bucket to `stc`, then adds the
    /// new input. Decoder underflow warns or aborts per the options;
    /// overflow is reported as an error (admission must be vetted through
    /// [`BufModel::check`] first).
    pub fn update(&mut self, stc: u64, bits: u64, target: StreamRef) -> Result<()> {
        let timeout = self.options.underflow_warn_timeout;
        let abort = self.options.abort_on_underflow;
        let pid = match target {
            StreamRef::Es(pid) => pid,
            StreamRef::System => 0x0000,
        };

        let branch = self.branch_mut(target)?;
        if let Some((missing_bits, removal_ts, bucket)) = branch.advance(stc, timeout) {
            let err = BufModelError::Underflow {
                pid,
                bucket,
                missing_bits,
                stc,
                removal_ts,
            };
            if abort {
                return Err(err);
            }
            warn!("{err}");
        }
        branch.deposit(bits);

        if let Some(bucket) = branch.overflowed() {
            return Err(BufModelError::Overflow {
                pid,
                bucket: bucket.name,
                fill_bits: bucket.fill_bits,
                capacity_bits: bucket.capacity_bits,
            });
        }
        Ok(())
    }

    /// Registers one ES transport packet: its 4-byte-plus header leaks out
    /// of the Transport Buffer without reaching the decoder path.
    pub fn add_es_ts_frame(
        &mut self,
        pid: u16,
        header_bytes: u64,
        _payload_bytes: u64,
    ) -> Result<()> {
        let branch = self.branch_mut(StreamRef::Es(pid))?;
        branch.buckets[0].drop_pending_bits += header_bytes * 8;
        Ok(())
    }

    /// Registers one system transport packet. System data is absorbed by
    /// the infinite-leak system buffer, so only the trace remains.
    pub fn add_system_ts_frame(&mut self, header_bytes: u64, payload_bytes: u64) {
        trace!(header_bytes, payload_bytes, "system packet registered");
    }

    /// Registers one PES frame: its header bits vanish before the final
    /// buffer and its payload is pulled out at `removal_ts`.
    pub fn add_pes_frame(
        &mut self,
        pid: u16,
        pes_header_bits: u64,
        pes_payload_bits: u64,
        removal_ts: u64,
    ) -> Result<()> {
        let branch = self.branch_mut(StreamRef::Es(pid))?;
        match branch.kind {
            BranchKind::Video => {
                // PES headers are stripped between MB and EB.
                branch.buckets[1].drop_pending_bits += pes_header_bits;
                branch.final_bucket_mut().frames.push_back(PendingFrame {
                    removal_ts,
                    size_bits: pes_payload_bits,
                });
            }
            _ => {
                // Audio/HDMV decoder removes header and payload together.
                branch.final_bucket_mut().frames.push_back(PendingFrame {
                    removal_ts,
                    size_bits: pes_header_bits + pes_payload_bits,
                });
            }
        }
        Ok(())
    }
}
