//! Radar data capture over UDP
//!
//! Binds the data socket, then runs parse -> reassemble -> ring write on a
//! dedicated thread until stopped or until the session fails.

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::packet::{parse_datagram_with, ByteCountMode, CounterByteOrder, FrameGeometry};

use super::error::CaptureError;
use super::reassembly::FrameAssembler;
use super::ring::{frame_ring, FrameReader, FrameWriter, StopReason, DEFAULT_CAPACITY};

/// Longest a single receive call blocks before `running` is checked again
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Local address the sensor streams data to
    pub data_addr: SocketAddr,
    /// Local address for sensor configuration replies, held open for the session
    pub config_addr: Option<SocketAddr>,
    /// When set, datagrams from any other IP are dropped
    pub sensor_addr: Option<SocketAddr>,
    pub geometry: FrameGeometry,
    pub byte_count_mode: ByteCountMode,
    pub counter_byte_order: CounterByteOrder,
    /// Ring capacity in frames
    pub buffer_frames: usize,
    /// Sensor silence that ends the session
    pub recv_timeout: Duration,
    /// Requested kernel receive buffer; 0 keeps the OS default
    pub recv_buffer_bytes: usize,
    pub stats_interval: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            data_addr: SocketAddr::from(([192, 168, 33, 30], 4098)),
            config_addr: Some(SocketAddr::from(([192, 168, 33, 30], 4096))),
            sensor_addr: Some(SocketAddr::from(([192, 168, 33, 180], 4096))),
            geometry: FrameGeometry::default(),
            byte_count_mode: ByteCountMode::default(),
            counter_byte_order: CounterByteOrder::default(),
            buffer_frames: DEFAULT_CAPACITY,
            recv_timeout: Duration::from_secs(10),
            recv_buffer_bytes: 1 << 27,
            stats_interval: Duration::from_secs(5),
        }
    }
}

/// Statistics for radar capture (atomic for thread-safe access)
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub datagrams_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub malformed_datagrams: AtomicU64,
    pub foreign_datagrams: AtomicU64,
    pub bytes_discarded: AtomicU64,
    pub frames_completed: AtomicU64,
    pub frames_overwritten: AtomicU64,
    pub synchronized: AtomicBool,
}

impl CaptureStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            malformed_datagrams: self.malformed_datagrams.load(Ordering::Relaxed),
            foreign_datagrams: self.foreign_datagrams.load(Ordering::Relaxed),
            bytes_discarded: self.bytes_discarded.load(Ordering::Relaxed),
            frames_completed: self.frames_completed.load(Ordering::Relaxed),
            frames_overwritten: self.frames_overwritten.load(Ordering::Relaxed),
            synchronized: self.synchronized.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub datagrams_received: u64,
    pub bytes_received: u64,
    pub malformed_datagrams: u64,
    pub foreign_datagrams: u64,
    pub bytes_discarded: u64,
    pub frames_completed: u64,
    pub frames_overwritten: u64,
    pub synchronized: bool,
}

/// Final state of a session that was stopped on request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSummary {
    pub stats: StatsSnapshot,
    pub last_sequence: Option<u32>,
    pub last_frame_index: Option<u64>,
}

/// Join handle for the capture thread
pub struct CaptureHandle {
    inner: JoinHandle<Result<CaptureSummary, CaptureError>>,
}

impl CaptureHandle {
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Wait for the capture thread to end
    pub fn join(self) -> Result<CaptureSummary, CaptureError> {
        self.inner
            .join()
            .unwrap_or(Err(CaptureError::ThreadPanicked))
    }
}

/// A running capture: the consumer side of the ring plus the thread handle
pub struct CaptureSession {
    pub reader: FrameReader,
    pub handle: CaptureHandle,
    local_addr: SocketAddr,
}

impl CaptureSession {
    /// Address the data socket actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Radar capture controller
pub struct RadarCapture {
    config: CaptureConfig,
    running: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
}

impl RadarCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            stats: CaptureStats::new(),
        }
    }

    /// Bind the sockets and start the capture thread
    pub fn start(&self) -> Result<CaptureSession> {
        info!("===========================================");
        info!("  Starting Radar UDP Capture");
        info!("===========================================");
        info!("  Data address: {}", self.config.data_addr);
        info!("  Frame size: {} bytes", self.config.geometry.frame_bytes());
        info!("  Ring buffer: {} frames", self.config.buffer_frames);
        info!("  Receive timeout: {:?}", self.config.recv_timeout);

        anyhow::ensure!(
            self.config.buffer_frames > 0,
            "Ring buffer must hold at least one frame"
        );

        let socket = bind_data_socket(self.config.data_addr, self.config.recv_buffer_bytes)?;
        let local_addr = socket
            .local_addr()
            .context("Failed to read data socket address")?;

        let config_socket = match self.config.config_addr {
            Some(addr) => {
                let socket = UdpSocket::bind(addr)
                    .with_context(|| format!("Failed to bind config socket to {}", addr))?;
                info!("  Config address: {}", addr);
                Some(socket)
            }
            None => None,
        };

        let (writer, reader) = frame_ring(self.config.buffer_frames);

        // Clone for thread
        let config = self.config.clone();
        let running = self.running.clone();
        let stats = self.stats.clone();

        running.store(true, Ordering::SeqCst);

        let spawned = thread::Builder::new()
            .name("radar-capture".to_string())
            .spawn(move || {
                // Released when the session ends
                let _config_socket = config_socket;
                let result = run_capture(&config, &socket, &running, &stats, writer);
                running.store(false, Ordering::SeqCst);
                if let Err(e) = &result {
                    error!("Radar capture failed: {}", e);
                }
                result
            });

        let inner = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e).context("Failed to spawn capture thread");
            }
        };

        Ok(CaptureSession {
            reader,
            handle: CaptureHandle { inner },
            local_addr,
        })
    }

    /// Stop capturing; the thread notices within one receive slice
    pub fn stop(&self) {
        info!("Stopping radar capture...");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get statistics
    pub fn stats(&self) -> &Arc<CaptureStats> {
        &self.stats
    }
}

impl Drop for RadarCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Create the data socket with an enlarged kernel receive buffer
fn bind_data_socket(addr: SocketAddr, recv_buffer_bytes: usize) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .context("Failed to create UDP socket")?;

    if recv_buffer_bytes > 0 {
        // The kernel may clamp this (net.core.rmem_max); not fatal
        if let Err(e) = socket.set_recv_buffer_size(recv_buffer_bytes) {
            warn!("Could not set receive buffer to {} bytes: {}", recv_buffer_bytes, e);
        }
        match socket.recv_buffer_size() {
            Ok(size) => info!("  Receive buffer: {} bytes", size),
            Err(e) => debug!("Could not read receive buffer size: {}", e),
        }
    }

    socket
        .bind(&addr.into())
        .with_context(|| format!("Failed to bind data socket to {}", addr))?;

    Ok(socket.into())
}

/// Main capture loop (runs in dedicated thread)
fn run_capture(
    config: &CaptureConfig,
    socket: &UdpSocket,
    running: &AtomicBool,
    stats: &CaptureStats,
    mut writer: FrameWriter,
) -> Result<CaptureSummary, CaptureError> {
    socket.set_read_timeout(Some(STOP_CHECK_INTERVAL.min(config.recv_timeout)))?;

    let mut assembler = FrameAssembler::new(config.geometry, config.byte_count_mode);
    let mut buffer = vec![0u8; config.geometry.max_packet_size()];

    let mut last_datagram = Instant::now();
    let mut last_stats_time = Instant::now();
    let mut last_stats_bytes = 0u64;
    let mut overrunning = false;

    info!("Waiting for radar data...");

    let outcome = loop {
        if !running.load(Ordering::SeqCst) {
            break Ok(());
        }

        // Only sensor datagrams count as liveness
        if last_datagram.elapsed() >= config.recv_timeout {
            break Err(CaptureError::SensorTimeout {
                timeout: config.recv_timeout,
                last_sequence: assembler.last_sequence(),
                last_frame_index: assembler.last_frame_index(),
            });
        }

        let (len, source) = match socket.recv_from(&mut buffer) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => break Err(e.into()),
        };

        if let Some(sensor) = config.sensor_addr {
            if source.ip() != sensor.ip() {
                stats.foreign_datagrams.fetch_add(1, Ordering::Relaxed);
                debug!("Ignoring {} bytes from unexpected source {}", len, source);
                continue;
            }
        }
        last_datagram = Instant::now();

        stats.datagrams_received.fetch_add(1, Ordering::Relaxed);
        stats.bytes_received.fetch_add(len as u64, Ordering::Relaxed);

        let datagram = match parse_datagram_with(&buffer[..len], config.counter_byte_order) {
            Ok(datagram) => datagram,
            Err(e) => {
                stats.malformed_datagrams.fetch_add(1, Ordering::Relaxed);
                warn!("Dropping datagram from {}: {}", source, e);
                debug!("Malformed datagram: {}", hex::encode(&buffer[..len.min(32)]));
                continue;
            }
        };

        let was_synchronized = assembler.is_synchronized();
        let frames = match assembler.push(&datagram) {
            Ok(frames) => frames,
            Err(gap) => break Err(gap.into()),
        };
        if !was_synchronized && assembler.is_synchronized() {
            stats.synchronized.store(true, Ordering::Relaxed);
        }
        stats
            .bytes_discarded
            .store(assembler.stats.bytes_discarded, Ordering::Relaxed);

        for frame in frames {
            debug!(
                "Frame {} complete ({} samples, packet {})",
                frame.index(),
                frame.samples().len(),
                datagram.sequence
            );
            stats.frames_completed.fetch_add(1, Ordering::Relaxed);

            if writer.write(frame) {
                stats.frames_overwritten.fetch_add(1, Ordering::Relaxed);
                if !overrunning {
                    warn!("Consumer fell a full ring behind, overwriting unread frames");
                    overrunning = true;
                }
            } else {
                overrunning = false;
            }
        }

        // Periodic stats logging
        if last_stats_time.elapsed() >= config.stats_interval {
            let snapshot = stats.snapshot();
            let elapsed = last_stats_time.elapsed().as_secs_f32();
            let rate = (snapshot.bytes_received - last_stats_bytes) as f32 / elapsed;

            info!(
                "[Capture Stats] Rate: {:.2} MB/s | Datagrams: {} | Frames: {} | Overwritten: {} | Malformed: {}",
                rate / 1_000_000.0,
                snapshot.datagrams_received,
                snapshot.frames_completed,
                snapshot.frames_overwritten,
                snapshot.malformed_datagrams
            );

            last_stats_time = Instant::now();
            last_stats_bytes = snapshot.bytes_received;
        }
    };

    let summary = CaptureSummary {
        stats: stats.snapshot(),
        last_sequence: assembler.last_sequence(),
        last_frame_index: assembler.last_frame_index(),
    };

    info!("Radar capture stopped");
    info!(
        "Final stats: Datagrams={}, Frames={}, Overwritten={}, Malformed={}, Last packet={:?}, Last frame={:?}",
        summary.stats.datagrams_received,
        summary.stats.frames_completed,
        summary.stats.frames_overwritten,
        summary.stats.malformed_datagrams,
        summary.last_sequence,
        summary.last_frame_index
    );

    match outcome {
        Ok(()) => {
            writer.close(StopReason::Requested);
            Ok(summary)
        }
        Err(e) => {
            writer.close(StopReason::Failed(e.clone()));
            Err(e)
        }
    }
}
