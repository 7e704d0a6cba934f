//! Radar Capture - UDP frame capture for a radar ADC front-end
//!
//! Receives the raw sample stream the capture card sends as UDP datagrams,
//! reassembles fixed-size frames across arbitrary packet boundaries and hands
//! them to a slower consumer through an overwrite-on-full ring buffer.

pub mod config;
pub mod packet;
pub mod pipeline;

pub use config::{Config, OverrunPolicy};
pub use packet::{AdcParams, ByteCountMode, CounterByteOrder, FrameGeometry};
pub use pipeline::{
    CaptureConfig, CaptureError, CaptureSession, Frame, FrameReader, RadarCapture, ReadResult,
    StopReason,
};
