//! Overwrite-on-full frame ring shared by the capture thread and a consumer
//!
//! Single producer, single consumer: [`frame_ring`] hands out exactly one
//! [`FrameWriter`] and one [`FrameReader`], neither of which is `Clone`.
//!
//! The writer never blocks and never rejects a frame. When the consumer falls
//! a full lap behind, the oldest unread frame is overwritten and the reader is
//! told so with [`ReadResult::Overwritten`] instead of silently handing out
//! newer data in place of what it missed.
//!
//! One mutex guards the cursors and the slot being touched. Slots hold
//! `Arc<Frame>`, so the critical section is a pointer swap on write and a
//! reference-count bump on read; a reader can never observe a half-written
//! frame.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::error::CaptureError;
use super::reassembly::Frame;

/// Frames held by the ring unless configured otherwise
pub const DEFAULT_CAPACITY: usize = 1500;

/// Why the producer closed the ring
#[derive(Debug, Clone)]
pub enum StopReason {
    /// Capture was stopped on request
    Requested,
    /// Capture ended on a fatal error
    Failed(CaptureError),
}

/// Outcome of one non-blocking read
#[derive(Debug, Clone)]
pub enum ReadResult {
    Frame(Arc<Frame>),
    /// Nothing pending yet
    NoNewFrame,
    /// The consumer fell at least one lap behind; acknowledge to resume
    Overwritten,
    /// The producer is gone and every pending frame has been read
    Stopped(StopReason),
}

struct RingState {
    slots: Vec<Option<Arc<Frame>>>,
    /// Frames ever written; write cursor is `written % capacity`
    written: u64,
    /// Frames ever consumed (or skipped); read cursor is `read % capacity`
    read: u64,
    overwritten: bool,
    last_read_index: Option<u64>,
    dropped: u64,
    stopped: Option<StopReason>,
}

struct Shared {
    capacity: usize,
    state: Mutex<RingState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RingState> {
        // Every update under the lock is a handful of plain stores
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Create a ring holding up to `capacity` unread frames
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn frame_ring(capacity: usize) -> (FrameWriter, FrameReader) {
    assert!(capacity > 0, "frame ring capacity must be non-zero");

    let shared = Arc::new(Shared {
        capacity,
        state: Mutex::new(RingState {
            slots: vec![None; capacity],
            written: 0,
            read: 0,
            overwritten: false,
            last_read_index: None,
            dropped: 0,
            stopped: None,
        }),
    });

    (
        FrameWriter {
            shared: shared.clone(),
        },
        FrameReader { shared },
    )
}

/// Producer half, owned by the capture thread
pub struct FrameWriter {
    shared: Arc<Shared>,
}

impl FrameWriter {
    /// Store a completed frame
    ///
    /// Returns `true` when an unread frame had to be overwritten.
    pub fn write(&mut self, frame: Frame) -> bool {
        let frame = Arc::new(frame);
        let capacity = self.shared.capacity as u64;
        let mut state = self.shared.lock();

        let slot = (state.written % capacity) as usize;
        let overwrote = state.written - state.read >= capacity;
        if overwrote {
            state.overwritten = true;
            state.dropped += 1;
        }

        let previous = state.slots[slot].replace(frame);
        state.written += 1;
        drop(state);

        // Free the displaced frame outside the lock
        drop(previous);
        overwrote
    }

    pub fn write_cursor(&self) -> usize {
        (self.shared.lock().written % self.shared.capacity as u64) as usize
    }

    pub fn frames_written(&self) -> u64 {
        self.shared.lock().written
    }

    /// Close the ring; the reader sees `Stopped` once it has drained it
    pub fn close(self, reason: StopReason) {
        let mut state = self.shared.lock();
        if state.stopped.is_none() {
            state.stopped = Some(reason);
        }
    }
}

impl Drop for FrameWriter {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        if state.stopped.is_none() {
            state.stopped = Some(StopReason::Requested);
        }
    }
}

/// Consumer half
pub struct FrameReader {
    shared: Arc<Shared>,
}

impl FrameReader {
    /// Take the next frame, if any; never blocks on the producer
    pub fn read(&mut self) -> ReadResult {
        let capacity = self.shared.capacity as u64;
        let mut state = self.shared.lock();

        if state.read == state.written {
            return match &state.stopped {
                Some(reason) => ReadResult::Stopped(reason.clone()),
                None => ReadResult::NoNewFrame,
            };
        }
        if state.overwritten {
            return ReadResult::Overwritten;
        }

        let slot = (state.read % capacity) as usize;
        match state.slots[slot].clone() {
            Some(frame) => {
                state.last_read_index = Some(frame.index());
                state.read += 1;
                ReadResult::Frame(frame)
            }
            None => ReadResult::NoNewFrame,
        }
    }

    /// Clear the overwritten signal and resume at the oldest frame still held
    ///
    /// Returns how many frames were lost to the overrun.
    pub fn acknowledge_overwrite(&mut self) -> u64 {
        let capacity = self.shared.capacity as u64;
        let mut state = self.shared.lock();

        let oldest = state.written.saturating_sub(capacity);
        let missed = oldest.saturating_sub(state.read);
        state.read = state.read.max(oldest);
        state.overwritten = false;
        missed
    }

    /// Clear the overwritten signal and drop the whole backlog
    ///
    /// Returns how many frames were skipped, read or not yet written alike.
    pub fn skip_to_latest(&mut self) -> u64 {
        let mut state = self.shared.lock();

        let skipped = state.written - state.read;
        state.read = state.written;
        state.overwritten = false;
        skipped
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Unread frames, including any already lost to an overrun
    pub fn pending(&self) -> u64 {
        let state = self.shared.lock();
        state.written - state.read
    }

    pub fn write_cursor(&self) -> usize {
        (self.shared.lock().written % self.shared.capacity as u64) as usize
    }

    pub fn read_cursor(&self) -> usize {
        (self.shared.lock().read % self.shared.capacity as u64) as usize
    }

    /// Index of the frame returned by the last successful read
    pub fn last_read_index(&self) -> Option<u64> {
        self.shared.lock().last_read_index
    }

    pub fn is_overwritten(&self) -> bool {
        self.shared.lock().overwritten
    }

    /// Frames overwritten before the consumer read them
    pub fn dropped_frames(&self) -> u64 {
        self.shared.lock().dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn frame(index: u64) -> Frame {
        Frame::new(vec![index as u16; 4], index, false)
    }

    fn expect_frame(reader: &mut FrameReader) -> Arc<Frame> {
        match reader.read() {
            ReadResult::Frame(frame) => frame,
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_read() {
        let (_writer, mut reader) = frame_ring(4);
        assert!(matches!(reader.read(), ReadResult::NoNewFrame));
        assert!(matches!(reader.read(), ReadResult::NoNewFrame));
        assert_eq!(reader.read_cursor(), 0);
        assert_eq!(reader.last_read_index(), None);
    }

    #[test]
    fn test_reads_in_order() {
        let (mut writer, mut reader) = frame_ring(4);
        for index in 10..13 {
            assert!(!writer.write(frame(index)));
        }
        assert_eq!(reader.pending(), 3);

        for index in 10..13 {
            let frame = expect_frame(&mut reader);
            assert_eq!(frame.index(), index);
            assert_eq!(frame.samples(), &[index as u16; 4]);
            assert_eq!(reader.last_read_index(), Some(index));
        }
        assert!(matches!(reader.read(), ReadResult::NoNewFrame));
        assert_eq!(reader.read_cursor(), 3);
        assert_eq!(reader.write_cursor(), 3);
    }

    #[test]
    fn test_cursors_wrap() {
        let (mut writer, mut reader) = frame_ring(3);
        for index in 0..7 {
            writer.write(frame(index));
            assert_eq!(expect_frame(&mut reader).index(), index);
        }
        assert_eq!(writer.write_cursor(), 1);
        assert_eq!(reader.read_cursor(), 1);
        assert_eq!(writer.frames_written(), 7);
        assert!(!reader.is_overwritten());
    }

    #[test]
    fn test_full_lap_is_not_overwritten() {
        let (mut writer, mut reader) = frame_ring(4);
        for index in 0..4 {
            assert!(!writer.write(frame(index)));
        }
        assert!(!reader.is_overwritten());
        assert_eq!(reader.pending(), reader.capacity() as u64);
        assert_eq!(expect_frame(&mut reader).index(), 0);
    }

    #[test]
    fn test_one_past_full_lap_is_overwritten() {
        let (mut writer, mut reader) = frame_ring(4);
        for index in 0..4 {
            writer.write(frame(index));
        }
        assert!(writer.write(frame(4)));
        assert!(reader.is_overwritten());
        assert_eq!(reader.dropped_frames(), 1);

        // repeated until acknowledged
        assert!(matches!(reader.read(), ReadResult::Overwritten));
        assert!(matches!(reader.read(), ReadResult::Overwritten));
        assert_eq!(reader.read_cursor(), 0);
    }

    #[test]
    fn test_acknowledge_resumes_at_oldest_held() {
        let (mut writer, mut reader) = frame_ring(4);
        for index in 0..6 {
            writer.write(frame(index));
        }

        assert_eq!(reader.acknowledge_overwrite(), 2);
        assert!(!reader.is_overwritten());
        for index in 2..6 {
            assert_eq!(expect_frame(&mut reader).index(), index);
        }
        assert!(matches!(reader.read(), ReadResult::NoNewFrame));
    }

    #[test]
    fn test_skip_to_latest() {
        let (mut writer, mut reader) = frame_ring(4);
        for index in 0..9 {
            writer.write(frame(index));
        }

        assert_eq!(reader.skip_to_latest(), 9);
        assert!(matches!(reader.read(), ReadResult::NoNewFrame));

        writer.write(frame(9));
        assert_eq!(expect_frame(&mut reader).index(), 9);
    }

    #[test]
    fn test_stopped_after_drain() {
        let (mut writer, mut reader) = frame_ring(4);
        writer.write(frame(1));
        writer.close(StopReason::Failed(CaptureError::ThreadPanicked));

        assert_eq!(expect_frame(&mut reader).index(), 1);
        match reader.read() {
            ReadResult::Stopped(StopReason::Failed(CaptureError::ThreadPanicked)) => {}
            other => panic!("expected failed stop, got {:?}", other),
        }
    }

    #[test]
    fn test_dropped_writer_stops_ring() {
        let (writer, mut reader) = frame_ring(2);
        drop(writer);
        assert!(matches!(
            reader.read(),
            ReadResult::Stopped(StopReason::Requested)
        ));
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        const FRAMES: u64 = 2000;
        let (mut writer, mut reader) = frame_ring(64);

        let producer = thread::spawn(move || {
            for index in 0..FRAMES {
                writer.write(Frame::new(vec![index as u16; 256], index, false));
                if index % 100 == 0 {
                    thread::sleep(Duration::from_millis(1));
                }
            }
        });

        let mut last: Option<u64> = None;
        let mut missed = 0;
        loop {
            match reader.read() {
                ReadResult::Frame(frame) => {
                    // every slot is whole: samples match the frame's own index
                    assert!(frame.samples().iter().all(|&s| s == frame.index() as u16));
                    if let Some(prev) = last {
                        assert!(frame.index() > prev);
                    }
                    last = Some(frame.index());
                }
                ReadResult::Overwritten => missed += reader.acknowledge_overwrite(),
                ReadResult::NoNewFrame => thread::yield_now(),
                ReadResult::Stopped(_) => break,
            }
        }
        producer.join().unwrap();

        assert_eq!(last, Some(FRAMES - 1));
        assert!(reader.dropped_frames() >= missed);
    }
}
