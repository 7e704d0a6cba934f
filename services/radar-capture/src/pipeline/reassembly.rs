//! Frame reassembly from the datagram stream
//!
//! Frames are fixed-size slices of one continuous byte stream, so a frame
//! boundary can fall anywhere inside a datagram. The assembler starts out
//! synchronizing: it discards bytes until it sees a datagram that straddles a
//! boundary (the sender's cumulative byte counter tells where the boundary
//! is). From then on it requires strictly contiguous sequence numbers and
//! slices frames by counting payload bytes.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::packet::{ByteCountMode, Datagram, FrameGeometry};

/// Completed radar frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    samples: Vec<u16>,
    index: u64,
    lost_packets: bool,
    captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(samples: Vec<u16>, index: u64, lost_packets: bool) -> Self {
        Self {
            samples,
            index,
            lost_packets,
            captured_at: Utc::now(),
        }
    }

    /// Raw ADC samples in stream order
    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    /// Absolute frame number, derived from the sender's byte counter
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Whether any contributing datagram arrived out of sequence
    pub fn lost_packets(&self) -> bool {
        self.lost_packets
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

/// Non-contiguous sequence number seen after synchronization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("packet sequence gap after packet {last_sequence}: expected {expected}, received {received}")]
pub struct SequenceGap {
    pub last_sequence: u32,
    pub expected: u32,
    pub received: u32,
    /// Index of the last frame completed before the gap
    pub last_frame_index: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    Synchronizing,
    Steady,
    Failed(SequenceGap),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AssemblerStats {
    /// Datagrams accepted in steady state
    pub datagrams: u64,
    /// Payload bytes thrown away while looking for the first frame boundary
    pub bytes_discarded: u64,
    pub frames_completed: u64,
}

/// Frame reassembler - turns datagrams into frames
pub struct FrameAssembler {
    frame_bytes: usize,
    mode: ByteCountMode,
    state: SyncState,
    last_sequence: Option<u32>,
    last_frame_index: Option<u64>,
    /// In-progress frame; only the first `collected` bytes are live
    buffer: Vec<u8>,
    collected: usize,
    pub stats: AssemblerStats,
}

impl FrameAssembler {
    pub fn new(geometry: FrameGeometry, mode: ByteCountMode) -> Self {
        Self {
            frame_bytes: geometry.frame_bytes(),
            mode,
            state: SyncState::Synchronizing,
            last_sequence: None,
            last_frame_index: None,
            buffer: vec![0u8; geometry.frame_bytes()],
            collected: 0,
            stats: AssemblerStats::default(),
        }
    }

    pub fn is_synchronized(&self) -> bool {
        self.state == SyncState::Steady
    }

    /// Bytes accumulated into the in-progress frame
    pub fn collected(&self) -> usize {
        self.collected
    }

    pub fn last_sequence(&self) -> Option<u32> {
        self.last_sequence
    }

    pub fn last_frame_index(&self) -> Option<u64> {
        self.last_frame_index
    }

    /// Feed one datagram, in arrival order, and collect any completed frames
    ///
    /// Once a gap has been reported the assembler stays failed and returns the
    /// same error for every later datagram.
    pub fn push(&mut self, datagram: &Datagram<'_>) -> Result<Vec<Frame>, SequenceGap> {
        match self.state {
            SyncState::Failed(gap) => return Err(gap),
            SyncState::Synchronizing => {
                self.synchronize(datagram);
                return Ok(Vec::new());
            }
            SyncState::Steady => {}
        }

        let last = self.last_sequence.unwrap_or(datagram.sequence.wrapping_sub(1));
        let expected = last.wrapping_add(1);
        if datagram.sequence != expected {
            let gap = SequenceGap {
                last_sequence: last,
                expected,
                received: datagram.sequence,
                last_frame_index: self.last_frame_index,
            };
            self.state = SyncState::Failed(gap);
            return Err(gap);
        }
        self.last_sequence = Some(datagram.sequence);
        self.stats.datagrams += 1;

        let payload = datagram.payload();
        let total = self.collected + payload.len();
        let completed = total / self.frame_bytes;

        if completed == 0 {
            self.buffer[self.collected..total].copy_from_slice(payload);
            self.collected = total;
            trace!(
                "Packet {}: {} of {} frame bytes collected",
                datagram.sequence,
                self.collected,
                self.frame_bytes
            );
            return Ok(Vec::new());
        }

        // The newest frame finished here is numbered from the byte counter;
        // any earlier ones in the same datagram count down from it.
        let newest_index = datagram.end_offset(self.mode) / self.frame_bytes as u64;
        let mut frames = Vec::with_capacity(completed);
        let mut consumed = 0;

        for n in 0..completed {
            let take = self.frame_bytes - self.collected;
            self.buffer[self.collected..].copy_from_slice(&payload[consumed..consumed + take]);
            consumed += take;
            self.collected = 0;

            let index = newest_index.saturating_sub((completed - 1 - n) as u64);
            frames.push(self.finish_frame(index));
        }

        let rest = &payload[consumed..];
        self.buffer[..rest.len()].copy_from_slice(rest);
        self.collected = rest.len();

        Ok(frames)
    }

    /// Look for the first frame boundary inside a datagram
    fn synchronize(&mut self, datagram: &Datagram<'_>) {
        let payload = datagram.payload();
        let end = datagram.end_offset(self.mode);
        let after = (end % self.frame_bytes as u64) as usize;

        self.last_sequence = Some(datagram.sequence);

        // `after` bytes at the tail of this payload belong to the next frame.
        // An odd count would split a sample, which a sane counter never does.
        if after < payload.len() && after % 2 == 0 {
            let start = payload.len() - after;
            self.buffer[..after].copy_from_slice(&payload[start..]);
            self.collected = after;
            self.stats.bytes_discarded += start as u64;
            self.state = SyncState::Steady;
            info!(
                "Frame boundary found in packet {} (byte count {}), {} bytes of frame {} collected",
                datagram.sequence,
                datagram.byte_count,
                after,
                end / self.frame_bytes as u64 + 1
            );
        } else {
            self.stats.bytes_discarded += payload.len() as u64;
            debug!(
                "Synchronizing: packet {} ends {} bytes into a frame",
                datagram.sequence, after
            );
        }
    }

    fn finish_frame(&mut self, index: u64) -> Frame {
        let samples = self
            .buffer
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        self.stats.frames_completed += 1;
        self.last_frame_index = Some(index);
        Frame::new(samples, index, false)
    }
}
