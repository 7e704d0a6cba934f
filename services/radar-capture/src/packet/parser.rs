//! Radar data datagram parser
//!
//! Wire layout of one datagram:
//! - bytes 0-3: packet sequence number, 32-bit little-endian
//! - bytes 4-9: 48-bit cumulative byte counter, big-endian unless the card
//!   is configured for [`CounterByteOrder::LittleEndian`]
//! - bytes 10..: ADC samples, u16 little-endian

use std::str::FromStr;

use thiserror::Error;

/// Sequence number + byte counter
pub const HEADER_LEN: usize = 10;

const SEQUENCE_LEN: usize = 4;

/// Parse error types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed datagram: {0} bytes is shorter than the header")]
    TruncatedHeader(usize),
    #[error("malformed datagram: {0}-byte payload is not a whole number of samples")]
    OddPayload(usize),
}

/// How the sender's byte counter relates to the datagram carrying it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteCountMode {
    /// Counter already includes this datagram's payload
    #[default]
    Inclusive,
    /// Counter covers only the bytes sent before this datagram (DCA1000 style)
    Preceding,
}

impl FromStr for ByteCountMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inclusive" => Ok(Self::Inclusive),
            "preceding" => Ok(Self::Preceding),
            other => Err(format!("unknown byte count mode '{}'", other)),
        }
    }
}

/// Byte order of the 48-bit counter in bytes 4-9
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CounterByteOrder {
    /// Most-significant byte first
    #[default]
    BigEndian,
    /// Least-significant byte first, as the DCA1000 firmware writes it
    LittleEndian,
}

impl FromStr for CounterByteOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "big" | "big-endian" | "be" => Ok(Self::BigEndian),
            "little" | "little-endian" | "le" => Ok(Self::LittleEndian),
            other => Err(format!("unknown counter byte order '{}'", other)),
        }
    }
}

/// One decoded datagram, borrowing the receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Datagram<'a> {
    /// Sender-assigned packet sequence number
    pub sequence: u32,
    /// Raw value of the cumulative byte counter
    pub byte_count: u64,
    payload: &'a [u8],
}

impl<'a> Datagram<'a> {
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    pub fn payload_bytes(&self) -> usize {
        self.payload.len()
    }

    /// Payload viewed as little-endian u16 samples
    pub fn samples(&self) -> impl Iterator<Item = u16> + 'a {
        let payload = self.payload;
        payload
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
    }

    /// Total bytes sent once this datagram has arrived
    pub fn end_offset(&self, mode: ByteCountMode) -> u64 {
        match mode {
            ByteCountMode::Inclusive => self.byte_count,
            ByteCountMode::Preceding => self.byte_count + self.payload.len() as u64,
        }
    }
}

/// Parse one received datagram with a big-endian byte counter
pub fn parse_datagram(bytes: &[u8]) -> Result<Datagram<'_>, ParseError> {
    parse_datagram_with(bytes, CounterByteOrder::default())
}

/// Parse one received datagram, decoding the byte counter in `order`
pub fn parse_datagram_with(
    bytes: &[u8],
    order: CounterByteOrder,
) -> Result<Datagram<'_>, ParseError> {
    if bytes.len() < HEADER_LEN {
        return Err(ParseError::TruncatedHeader(bytes.len()));
    }

    let payload = &bytes[HEADER_LEN..];
    if payload.len() % 2 != 0 {
        return Err(ParseError::OddPayload(payload.len()));
    }

    let sequence = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);

    // The top two bytes of the u64 are always zero
    let mut counter = [0u8; 8];
    let byte_count = match order {
        CounterByteOrder::BigEndian => {
            counter[2..].copy_from_slice(&bytes[SEQUENCE_LEN..HEADER_LEN]);
            u64::from_be_bytes(counter)
        }
        CounterByteOrder::LittleEndian => {
            counter[..6].copy_from_slice(&bytes[SEQUENCE_LEN..HEADER_LEN]);
            u64::from_le_bytes(counter)
        }
    };

    Ok(Datagram {
        sequence,
        byte_count,
        payload,
    })
}

/// Build a datagram in wire format with a big-endian byte counter
#[cfg(test)]
pub(crate) fn encode_datagram(sequence: u32, byte_count: u64, samples: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + samples.len() * 2);
    out.extend_from_slice(&sequence.to_le_bytes());
    out.extend_from_slice(&byte_count.to_be_bytes()[2..]);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_fields() {
        // seq = 7, byte counter = 0x0102_0304_0506
        let bytes = hex::decode("07000000010203040506341278563412").unwrap();
        let datagram = parse_datagram(&bytes).unwrap();
        assert_eq!(datagram.sequence, 7);
        assert_eq!(datagram.byte_count, 0x0102_0304_0506);
        assert_eq!(datagram.payload_bytes(), 6);
        let samples: Vec<u16> = datagram.samples().collect();
        assert_eq!(samples, vec![0x1234, 0x5678, 0x1234]);
    }

    #[test]
    fn test_parse_counter_uses_all_six_bytes() {
        let bytes = hex::decode("01000000ffffffffffff").unwrap();
        let datagram = parse_datagram(&bytes).unwrap();
        assert_eq!(datagram.byte_count, 0xFFFF_FFFF_FFFF);
        assert_eq!(datagram.payload_bytes(), 0);
        assert_eq!(datagram.samples().count(), 0);
    }

    #[test]
    fn test_parse_counter_big_endian() {
        let bytes = hex::decode("01000000010203040506").unwrap();
        assert_eq!(parse_datagram(&bytes).unwrap().byte_count, 0x0102_0304_0506);
        assert_eq!(
            parse_datagram_with(&bytes, CounterByteOrder::BigEndian)
                .unwrap()
                .byte_count,
            0x0102_0304_0506
        );
    }

    #[test]
    fn test_parse_counter_little_endian() {
        let bytes = hex::decode("01000000060504030201").unwrap();
        let datagram = parse_datagram_with(&bytes, CounterByteOrder::LittleEndian).unwrap();
        assert_eq!(datagram.sequence, 1);
        assert_eq!(datagram.byte_count, 0x0102_0304_0506);

        // Same bytes read most-significant first
        assert_eq!(parse_datagram(&bytes).unwrap().byte_count, 0x0605_0403_0201);
    }

    #[test]
    fn test_counter_byte_order_from_str() {
        assert_eq!("big".parse::<CounterByteOrder>(), Ok(CounterByteOrder::BigEndian));
        assert_eq!(
            " Little-Endian ".parse::<CounterByteOrder>(),
            Ok(CounterByteOrder::LittleEndian)
        );
        assert!("middle".parse::<CounterByteOrder>().is_err());
    }

    #[test]
    fn test_parse_high_sequence_number() {
        let bytes = hex::decode("ffffff7f000000000000").unwrap();
        assert_eq!(parse_datagram(&bytes).unwrap().sequence, i32::MAX as u32);
    }

    #[test]
    fn test_parse_truncated() {
        assert_eq!(parse_datagram(&[]), Err(ParseError::TruncatedHeader(0)));
        assert_eq!(
            parse_datagram(&[0u8; 9]),
            Err(ParseError::TruncatedHeader(9))
        );
    }

    #[test]
    fn test_parse_odd_payload() {
        assert_eq!(parse_datagram(&[0u8; 13]), Err(ParseError::OddPayload(3)));
    }

    #[test]
    fn test_end_offset_modes() {
        let bytes = encode_datagram(3, 100, &[1, 2, 3, 4]);
        let datagram = parse_datagram(&bytes).unwrap();
        assert_eq!(datagram.end_offset(ByteCountMode::Inclusive), 100);
        assert_eq!(datagram.end_offset(ByteCountMode::Preceding), 108);
    }

    #[test]
    fn test_encode_matches_parse() {
        let bytes = encode_datagram(0x0A0B0C0D, 0x0000_1122_3344_5566, &[0xBEEF]);
        assert_eq!(hex::encode(&bytes), "0d0c0b0a112233445566efbe");
        let datagram = parse_datagram(&bytes).unwrap();
        assert_eq!(datagram.sequence, 0x0A0B0C0D);
        assert_eq!(datagram.byte_count, 0x1122_3344_5566);
    }

    #[test]
    fn test_byte_count_mode_from_str() {
        assert_eq!("inclusive".parse::<ByteCountMode>(), Ok(ByteCountMode::Inclusive));
        assert_eq!(" Preceding ".parse::<ByteCountMode>(), Ok(ByteCountMode::Preceding));
        assert!("both".parse::<ByteCountMode>().is_err());
    }
}
