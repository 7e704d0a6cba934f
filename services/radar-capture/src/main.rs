//! Radar Capture - UDP capture of a radar ADC front-end
//!
//! Captures the raw frame stream from the capture card, reassembles frames
//! and polls them from the ring buffer the way a processing stage would.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use radar_capture::pipeline::{CaptureSession, FrameReader};
use radar_capture::{Config, OverrunPolicy, RadarCapture, ReadResult, StopReason};

/// Frames handed to the (external) processing stage so far
#[derive(Debug, Default)]
struct ConsumerStats {
    frames_read: u64,
    frames_lost: u64,
    frames_missed: u64,
    overruns: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("===========================================");
    info!("   Radar Capture - UDP frame reassembly");
    info!("===========================================");

    // Load configuration
    let config = Config::from_env();

    info!("Configuration:");
    info!("  Data address: {}", config.data_addr);
    info!("  Config address: {:?}", config.config_addr);
    info!("  Sensor address: {:?}", config.sensor_addr);
    info!(
        "  ADC: {} chirps x {} rx x {} tx x {} samples",
        config.adc.chirps, config.adc.rx, config.adc.tx, config.adc.samples
    );
    info!("  Byte count mode: {:?}", config.byte_count_mode);
    info!("  Counter byte order: {:?}", config.counter_byte_order);
    info!("  Overrun policy: {:?}", config.overrun_policy);

    let capture_config = config
        .capture_config()
        .context("Invalid frame geometry")?;

    let capture = RadarCapture::new(capture_config);
    let CaptureSession {
        mut reader, handle, ..
    } = match capture.start() {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to start radar capture: {:#}", e);
            error!("Make sure the data address is assigned to a local interface.");
            return Err(e);
        }
    };

    info!("===========================================");
    info!("  Capture running.");
    info!("  Press Ctrl+C to stop.");
    info!("===========================================");

    let mut poll = tokio::time::interval(config.poll_interval);
    let mut consumer = ConsumerStats::default();
    let mut last_report = Instant::now();

    // Main consumer loop - drain the ring on every tick until capture ends
    let stop_reason = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received");
                capture.stop();
            }
            _ = poll.tick() => {}
        }

        if let Some(reason) = drain(&mut reader, config.overrun_policy, &mut consumer) {
            break reason;
        }

        // Periodic consumer report
        if last_report.elapsed() >= config.stats_interval.max(Duration::from_secs(1)) {
            info!(
                "[Consumer] Read: {} | Pending: {}/{} | Missed: {} | Overruns: {} | Last frame: {:?}",
                consumer.frames_read,
                reader.pending(),
                reader.capacity(),
                consumer.frames_missed,
                consumer.overruns,
                reader.last_read_index()
            );
            last_report = Instant::now();
        }
    };

    let result = tokio::task::spawn_blocking(move || handle.join())
        .await
        .context("Capture thread join failed")?;

    info!(
        "Consumer totals: read={} lost-flagged={} missed={} overruns={}",
        consumer.frames_read, consumer.frames_lost, consumer.frames_missed, consumer.overruns
    );

    match result {
        Ok(summary) => {
            info!(
                "Shutdown complete. Frames captured: {}, last frame: {:?}",
                summary.stats.frames_completed, summary.last_frame_index
            );
            Ok(())
        }
        Err(e) => {
            if let StopReason::Failed(_) = stop_reason {
                error!(
                    "Capture session failed at packet {:?}, frame {:?}; restart capture to continue",
                    e.last_sequence(),
                    e.last_frame_index()
                );
            }
            Err(e).context("Radar capture failed")
        }
    }
}

/// Read every pending frame; returns the stop reason once capture has ended
fn drain(
    reader: &mut FrameReader,
    policy: OverrunPolicy,
    consumer: &mut ConsumerStats,
) -> Option<StopReason> {
    loop {
        match reader.read() {
            ReadResult::Frame(frame) => {
                consumer.frames_read += 1;
                if frame.lost_packets() {
                    consumer.frames_lost += 1;
                }
                debug!(
                    "Frame {} ({} samples) captured at {}",
                    frame.index(),
                    frame.samples().len(),
                    frame.captured_at().format("%H:%M:%S%.3f")
                );
            }
            ReadResult::NoNewFrame => return None,
            ReadResult::Overwritten => {
                consumer.overruns += 1;
                let missed = match policy {
                    OverrunPolicy::Resume => reader.acknowledge_overwrite(),
                    OverrunPolicy::Latest => reader.skip_to_latest(),
                };
                consumer.frames_missed += missed;
                warn!(
                    "Ring buffer overwritten: {} frames missed after frame {:?}",
                    missed,
                    reader.last_read_index()
                );
            }
            ReadResult::Stopped(reason) => {
                match &reason {
                    StopReason::Requested => info!("Capture stopped"),
                    StopReason::Failed(e) => error!("Capture ended: {}", e),
                }
                return Some(reason);
            }
        }
    }
}
