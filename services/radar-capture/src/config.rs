//! Configuration loaded from environment variables

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::packet::{
    AdcParams, ByteCountMode, CounterByteOrder, FrameGeometry, GeometryError,
    DEFAULT_MAX_PACKET_SIZE,
};
use crate::pipeline::ring::DEFAULT_CAPACITY;
use crate::pipeline::CaptureConfig;

/// What the consumer does after falling a full ring behind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverrunPolicy {
    /// Continue from the oldest frame still in the ring
    #[default]
    Resume,
    /// Drop the backlog and wait for the next new frame
    Latest,
}

impl FromStr for OverrunPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "resume" => Ok(Self::Resume),
            "latest" => Ok(Self::Latest),
            other => Err(format!("unknown overrun policy '{}'", other)),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Local address bound for radar data
    pub data_addr: SocketAddr,

    /// Local address bound for sensor configuration replies
    pub config_addr: Option<SocketAddr>,

    /// Capture card address; data from other hosts is ignored
    pub sensor_addr: Option<SocketAddr>,

    /// ADC parameters the frame size is derived from
    pub adc: AdcParams,

    /// Largest datagram accepted, header included
    pub max_packet_size: usize,

    /// Ring buffer capacity in frames
    pub buffer_frames: usize,

    /// Sensor silence that ends the capture session
    pub recv_timeout: Duration,

    /// Kernel receive buffer requested for the data socket
    pub recv_buffer_bytes: usize,

    /// Meaning of the byte counter in the datagram header
    pub byte_count_mode: ByteCountMode,

    /// Byte order of the counter in the datagram header
    pub counter_byte_order: CounterByteOrder,

    pub overrun_policy: OverrunPolicy,

    /// How often the consumer polls the ring
    pub poll_interval: Duration,

    /// Statistics reporting interval
    pub stats_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key/value source; unset or unparsable
    /// values fall back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        // Set-but-empty disables an optional address
        let optional_addr = |key: &str, default: SocketAddr| match lookup(key) {
            Some(s) if s.trim().is_empty() => None,
            Some(s) => s.trim().parse().ok().or(Some(default)),
            None => Some(default),
        };

        let adc_default = AdcParams::default();

        Self {
            data_addr: parsed(&lookup, "DATA_ADDR")
                .unwrap_or_else(|| SocketAddr::from(([192, 168, 33, 30], 4098))),

            config_addr: optional_addr("CONFIG_ADDR", SocketAddr::from(([192, 168, 33, 30], 4096))),

            sensor_addr: optional_addr("SENSOR_ADDR", SocketAddr::from(([192, 168, 33, 180], 4096))),

            adc: AdcParams {
                chirps: parsed(&lookup, "ADC_CHIRPS").unwrap_or(adc_default.chirps),
                rx: parsed(&lookup, "ADC_RX").unwrap_or(adc_default.rx),
                tx: parsed(&lookup, "ADC_TX").unwrap_or(adc_default.tx),
                samples: parsed(&lookup, "ADC_SAMPLES").unwrap_or(adc_default.samples),
                iq: parsed(&lookup, "ADC_IQ").unwrap_or(adc_default.iq),
                bytes: parsed(&lookup, "ADC_BYTES").unwrap_or(adc_default.bytes),
            },

            max_packet_size: parsed(&lookup, "MAX_PACKET_SIZE").unwrap_or(DEFAULT_MAX_PACKET_SIZE),

            buffer_frames: parsed(&lookup, "BUFFER_FRAMES").unwrap_or(DEFAULT_CAPACITY),

            recv_timeout: Duration::from_secs(parsed(&lookup, "RECV_TIMEOUT_SECS").unwrap_or(10)),

            recv_buffer_bytes: parsed(&lookup, "RECV_BUFFER_BYTES").unwrap_or(1 << 27),

            byte_count_mode: parsed(&lookup, "BYTE_COUNT_MODE").unwrap_or_default(),

            counter_byte_order: parsed(&lookup, "COUNTER_BYTE_ORDER").unwrap_or_default(),

            overrun_policy: parsed(&lookup, "OVERRUN_POLICY").unwrap_or_default(),

            poll_interval: Duration::from_millis(parsed(&lookup, "POLL_INTERVAL_MS").unwrap_or(50)),

            stats_interval: Duration::from_secs(parsed(&lookup, "STATS_INTERVAL_SECS").unwrap_or(5)),
        }
    }

    /// Frame geometry for the configured ADC parameters
    pub fn geometry(&self) -> Result<FrameGeometry, GeometryError> {
        FrameGeometry::from_adc(&self.adc, self.max_packet_size)
    }

    /// Settings for the capture thread
    pub fn capture_config(&self) -> Result<CaptureConfig, GeometryError> {
        Ok(CaptureConfig {
            data_addr: self.data_addr,
            config_addr: self.config_addr,
            sensor_addr: self.sensor_addr,
            geometry: self.geometry()?,
            byte_count_mode: self.byte_count_mode,
            counter_byte_order: self.counter_byte_order,
            buffer_frames: self.buffer_frames,
            recv_timeout: self.recv_timeout,
            recv_buffer_bytes: self.recv_buffer_bytes,
            stats_interval: self.stats_interval,
        })
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}
