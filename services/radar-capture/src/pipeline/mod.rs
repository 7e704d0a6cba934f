//! Capture pipeline: UDP socket -> datagram parser -> frame reassembler -> ring buffer
//!
//! The capture thread owns the socket, the reassembler and the ring's writer.
//! A consumer polls the ring through [`FrameReader::read`], which never blocks.

pub mod capture;
mod error;
pub mod reassembly;
pub mod ring;

pub use capture::{
    CaptureConfig, CaptureHandle, CaptureSession, CaptureStats, CaptureSummary, RadarCapture,
    StatsSnapshot,
};
pub use error::CaptureError;
pub use reassembly::{Frame, FrameAssembler, SequenceGap};
pub use ring::{frame_ring, FrameReader, FrameWriter, ReadResult, StopReason};
