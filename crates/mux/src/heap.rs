//! Scheduler heaps: streams ordered by next transport packet emission
//! timestamp, priority breaking ties, insertion order breaking the rest.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Per-stream timing state carried through the heap.
#[derive(Debug, Clone, Copy)]
pub struct TimingInfos {
    /// Next transport packet emission timestamp, 27 MHz ticks.
    pub ts_pt: u64,
    /// Priority level (PCR 1, SIT 2, PMT 3, PAT 4; ES 0). On equal
    /// timestamps the higher priority wins.
    pub priority: u8,
    /// PES packet duration, 27 MHz ticks.
    pub pes_duration: u64,
    /// Transport packets per PES packet.
    pub ts_per_pes: u64,
    /// Transport packet emission period, 27 MHz ticks.
    pub ts_duration: u64,
}

impl TimingInfos {
    /// Advances the emission timestamp by one packet period.
    pub fn increment(&mut self) {
        self.ts_pt += self.ts_duration;
    }
}

#[derive(Debug)]
struct HeapEntry {
    timing: TimingInfos,
    stream: usize,
    seq: u64,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: invert so the earliest timestamp wins,
        // then the highest priority, then FIFO insertion order.
        other
            .timing
            .ts_pt
            .cmp(&self.timing.ts_pt)
            .then_with(|| self.timing.priority.cmp(&other.timing.priority))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of streams keyed by emission timestamp.
#[derive(Debug, Default)]
pub struct StreamHeap {
    entries: BinaryHeap<HeapEntry>,
    next_seq: u64,
}

impl StreamHeap {
    /// Creates an empty heap.
    pub fn new() -> Self {
        StreamHeap::default()
    }

    /// Number of queued streams.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no stream is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queues a stream with its timing state.
    pub fn push(&mut self, timing: TimingInfos, stream: usize) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(HeapEntry {
            timing,
            stream,
            seq,
        });
    }

    /// True when the top stream's timestamp has been reached.
    pub fn is_ready(&self, stc: u64) -> bool {
        self.entries
            .peek()
            .is_some_and(|entry| entry.timing.ts_pt <= stc)
    }

    /// Extracts the top stream.
    pub fn pop(&mut self) -> Option<(TimingInfos, usize)> {
        self.entries
            .pop()
            .map(|entry| (entry.timing, entry.stream))
    }
}
