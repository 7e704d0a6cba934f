//! Fatal capture session errors

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::reassembly::SequenceGap;

/// Reasons a capture session ends on its own
///
/// Every variant carries the last good packet and frame so the caller can
/// decide whether to restart capture from scratch.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error(
        "packet sequence gap after packet {last_sequence}: expected {expected}, received {received} (last frame {last_frame_index:?})"
    )]
    SequenceGap {
        last_sequence: u32,
        expected: u32,
        received: u32,
        last_frame_index: Option<u64>,
    },

    #[error(
        "no datagram from sensor within {timeout:?} (last packet {last_sequence:?}, last frame {last_frame_index:?})"
    )]
    SensorTimeout {
        timeout: Duration,
        last_sequence: Option<u32>,
        last_frame_index: Option<u64>,
    },

    #[error("socket receive failed: {0}")]
    Io(#[source] Arc<io::Error>),

    #[error("capture thread panicked")]
    ThreadPanicked,
}

impl CaptureError {
    pub fn last_sequence(&self) -> Option<u32> {
        match self {
            Self::SequenceGap { last_sequence, .. } => Some(*last_sequence),
            Self::SensorTimeout { last_sequence, .. } => *last_sequence,
            Self::Io(_) | Self::ThreadPanicked => None,
        }
    }

    pub fn last_frame_index(&self) -> Option<u64> {
        match self {
            Self::SequenceGap {
                last_frame_index, ..
            }
            | Self::SensorTimeout {
                last_frame_index, ..
            } => *last_frame_index,
            Self::Io(_) | Self::ThreadPanicked => None,
        }
    }
}

impl From<SequenceGap> for CaptureError {
    fn from(gap: SequenceGap) -> Self {
        Self::SequenceGap {
            last_sequence: gap.last_sequence,
            expected: gap.expected,
            received: gap.received,
            last_frame_index: gap.last_frame_index,
        }
    }
}

impl From<io::Error> for CaptureError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
