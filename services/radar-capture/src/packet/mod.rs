//! Radar datagram wire format and frame geometry

pub mod geometry;
pub mod parser;

pub use geometry::{AdcParams, FrameGeometry, GeometryError, DEFAULT_MAX_PACKET_SIZE};
pub use parser::{
    parse_datagram, parse_datagram_with, ByteCountMode, CounterByteOrder, Datagram, ParseError,
    HEADER_LEN,
};
