//! Frame geometry derived from the radar's ADC configuration

use thiserror::Error;

use super::parser::HEADER_LEN;

/// Largest datagram the front-end sends, header included
pub const DEFAULT_MAX_PACKET_SIZE: usize = 4096;

/// ADC acquisition parameters for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdcParams {
    /// Chirp loops per frame
    pub chirps: usize,
    /// Receive antennas
    pub rx: usize,
    /// Transmit antennas
    pub tx: usize,
    /// ADC samples per chirp
    pub samples: usize,
    /// Components per sample (2 for I/Q)
    pub iq: usize,
    /// Bytes per sample component
    pub bytes: usize,
}

impl Default for AdcParams {
    fn default() -> Self {
        Self {
            chirps: 128,
            rx: 4,
            tx: 3,
            samples: 256,
            iq: 2,
            bytes: 2,
        }
    }
}

impl AdcParams {
    /// Bytes produced by one full acquisition cycle
    pub fn frame_bytes(&self) -> usize {
        self.chirps * self.rx * self.tx * self.samples * self.iq * self.bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("frame length must be non-zero")]
    EmptyFrame,
    #[error("frame length {0} is not a whole number of 16-bit samples")]
    OddFrameLength(usize),
    #[error("max packet size {0} leaves no room for payload after the datagram header")]
    PacketTooSmall(usize),
}

/// Fixed sizes the capture pipeline is built around
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    frame_bytes: usize,
    max_packet_size: usize,
}

impl FrameGeometry {
    pub fn new(frame_bytes: usize, max_packet_size: usize) -> Result<Self, GeometryError> {
        if frame_bytes == 0 {
            return Err(GeometryError::EmptyFrame);
        }
        if frame_bytes % 2 != 0 {
            return Err(GeometryError::OddFrameLength(frame_bytes));
        }
        if max_packet_size <= HEADER_LEN {
            return Err(GeometryError::PacketTooSmall(max_packet_size));
        }
        Ok(Self {
            frame_bytes,
            max_packet_size,
        })
    }

    pub fn from_adc(params: &AdcParams, max_packet_size: usize) -> Result<Self, GeometryError> {
        Self::new(params.frame_bytes(), max_packet_size)
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Number of u16 values in one completed frame
    pub fn samples_per_frame(&self) -> usize {
        self.frame_bytes / 2
    }
}

impl Default for FrameGeometry {
    fn default() -> Self {
        Self {
            frame_bytes: AdcParams::default().frame_bytes(),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_adc_frame_size() {
        // 128 chirps * 4 rx * 3 tx * 256 samples * I/Q * 2 bytes
        assert_eq!(AdcParams::default().frame_bytes(), 1_572_864);
        let geometry = FrameGeometry::default();
        assert_eq!(geometry.samples_per_frame(), 786_432);
        assert_eq!(geometry.max_packet_size(), 4096);
    }

    #[test]
    fn test_from_adc() {
        let params = AdcParams {
            chirps: 2,
            rx: 1,
            tx: 1,
            samples: 4,
            iq: 2,
            bytes: 2,
        };
        let geometry = FrameGeometry::from_adc(&params, 1024).unwrap();
        assert_eq!(geometry.frame_bytes(), 32);
        assert_eq!(geometry.samples_per_frame(), 16);
    }

    #[test]
    fn test_invalid_geometry() {
        assert_eq!(FrameGeometry::new(0, 4096), Err(GeometryError::EmptyFrame));
        assert_eq!(FrameGeometry::new(33, 4096), Err(GeometryError::OddFrameLength(33)));
        assert_eq!(FrameGeometry::new(32, 10), Err(GeometryError::PacketTooSmall(10)));
    }
}
