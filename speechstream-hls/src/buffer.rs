// Segment buffer
//
// Accumulates variably-sized audio chunks and decides when the pending bytes
// form a complete segment. Two independent triggers cut a segment:
// - the byte-rate duration estimate reaches the target duration
// - the number of buffered chunks reaches the safety ceiling
//
// The buffer itself is plain data. The owning session wraps it in a mutex and
// performs the segment write outside that lock.

use bytes::{Bytes, BytesMut};

/// Why a segment was cut from the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutReason {
    /// Estimated duration reached the target
    Duration,
    /// Chunk count reached the safety ceiling
    ChunkCap,
    /// Flushed at finalize time regardless of size
    Remainder,
}

/// Bytes drained from the buffer, ready to be written as one segment.
#[derive(Debug, Clone)]
pub struct DrainedSegment {
    /// 1-based sequence number, gapless within a session
    pub sequence: u64,
    pub data: Bytes,
    pub chunk_count: usize,
    /// Duration estimate at drain time, in seconds
    pub estimated_duration: f64,
    pub reason: CutReason,
}

/// Result of appending one chunk.
#[derive(Debug)]
pub enum Append {
    /// Buffer is closed; the chunk was ignored
    Rejected,
    /// Chunk buffered, segment not yet full
    Buffered,
    /// Chunk buffered and the buffer was swapped out as a full segment
    Full(DrainedSegment),
}

#[derive(Debug)]
pub struct SegmentBuffer {
    pending: BytesMut,
    chunk_count: usize,
    estimated_duration: f64,
    target_duration: f64,
    bytes_per_second: f64,
    max_chunks: usize,
    issued: u64,
    closed: bool,
}

impl SegmentBuffer {
    #[must_use]
    pub fn new(target_duration: f64, bytes_per_second: f64, max_chunks: usize) -> Self {
        Self {
            pending: BytesMut::new(),
            chunk_count: 0,
            estimated_duration: 0.0,
            target_duration,
            bytes_per_second,
            max_chunks: max_chunks.max(1),
            issued: 0,
            closed: false,
        }
    }

    /// Append a chunk, cutting a segment when either trigger fires.
    pub fn append(&mut self, chunk: &[u8]) -> Append {
        if self.closed {
            return Append::Rejected;
        }

        self.pending.extend_from_slice(chunk);
        self.chunk_count += 1;
        self.estimated_duration += chunk.len() as f64 / self.bytes_per_second;

        let reason = if self.estimated_duration >= self.target_duration {
            Some(CutReason::Duration)
        } else if self.chunk_count >= self.max_chunks {
            Some(CutReason::ChunkCap)
        } else {
            None
        };

        match reason.and_then(|reason| self.take(reason)) {
            Some(segment) => Append::Full(segment),
            None => Append::Buffered,
        }
    }

    /// Flush whatever is buffered as a final segment and close the buffer.
    ///
    /// Returns `None` when nothing was buffered.
    pub fn drain_remainder(&mut self) -> Option<DrainedSegment> {
        self.closed = true;
        self.take(CutReason::Remainder)
    }

    /// Close the buffer and drop anything pending. Returns the dropped byte count.
    pub fn discard(&mut self) -> usize {
        self.closed = true;
        let dropped = self.pending.len();
        self.pending.clear();
        self.chunk_count = 0;
        self.estimated_duration = 0.0;
        dropped
    }

    fn take(&mut self, reason: CutReason) -> Option<DrainedSegment> {
        if self.chunk_count == 0 {
            return None;
        }

        self.issued += 1;
        let segment = DrainedSegment {
            sequence: self.issued,
            data: self.pending.split().freeze(),
            chunk_count: self.chunk_count,
            estimated_duration: self.estimated_duration,
            reason,
        };
        self.chunk_count = 0;
        self.estimated_duration = 0.0;
        Some(segment)
    }

    /// Number of segments handed out so far
    #[must_use]
    pub const fn issued(&self) -> u64 {
        self.issued
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    #[must_use]
    pub const fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    #[must_use]
    pub const fn estimated_duration(&self) -> f64 {
        self.estimated_duration
    }

    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }
}
