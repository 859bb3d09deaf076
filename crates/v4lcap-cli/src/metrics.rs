// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 v4lcap developers

use serde::Serialize;
use std::time::Instant;
use v4lcap::capture::AcquiredFrame;

/// Capture statistics collected by the `capture` command
#[derive(Debug, Clone, Serialize)]
pub struct CaptureMetrics {
    /// Total number of frames acquired
    pub frames_captured: u64,
    /// Total source bytes delivered by the device
    pub bytes_captured: u64,
    /// Total duration in milliseconds
    pub duration_ms: u64,
    /// Average throughput in frames per second
    pub throughput_fps: f64,
    /// Average bandwidth in megabits per second
    pub bandwidth_mbps: f64,
    /// Last once-per-second rate reported by the engine
    pub engine_fps: u32,
    /// Minimum inter-frame interval in microseconds
    pub interval_min_us: u64,
    /// Maximum inter-frame interval in microseconds
    pub interval_max_us: u64,
    /// Average inter-frame interval in microseconds
    pub interval_avg_us: u64,
    /// 50th percentile (median) interval in microseconds
    pub interval_p50_us: u64,
    /// 95th percentile interval in microseconds
    pub interval_p95_us: u64,
    /// 99th percentile interval in microseconds
    pub interval_p99_us: u64,
    /// Gaps in the driver's buffer sequence numbers
    pub dropped_frames: u64,
    /// Sliced VBI records delivered
    pub vbi_records: u64,
    /// Sink failures absorbed by the engine
    pub sink_errors: u64,
}

/// Metrics collector fed with every acquired frame
pub struct MetricsCollector {
    start_time: Instant,
    last_frame: Option<Instant>,
    intervals_us: Vec<u64>,
    frames: u64,
    bytes: u64,
    engine_fps: u32,
    prev_sequence: Option<u32>,
    dropped_frames: u64,
    vbi_records: u64,
    sink_errors: u64,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            last_frame: None,
            intervals_us: Vec::new(),
            frames: 0,
            bytes: 0,
            engine_fps: 0,
            prev_sequence: None,
            dropped_frames: 0,
            vbi_records: 0,
            sink_errors: 0,
        }
    }

    /// Record one acquisition received at `now`
    pub fn record_frame(&mut self, frame: &AcquiredFrame, now: Instant) {
        if let Some(last) = self.last_frame {
            let interval = now.saturating_duration_since(last);
            self.record_interval_us(interval.as_micros() as u64);
        }
        self.last_frame = Some(now);

        self.frames += 1;
        self.bytes += frame.bytes_used as u64;
        self.engine_fps = frame.fps;
        self.vbi_records += frame.records as u64;
        self.sink_errors += frame.sink_errors.len() as u64;

        if let Some(sequence) = frame.device_sequence {
            self.track_sequence(sequence);
        }
    }

    /// Record an inter-frame interval in microseconds
    pub fn record_interval_us(&mut self, interval_us: u64) {
        self.intervals_us.push(interval_us);
    }

    /// Track the driver's buffer sequence number to detect drops
    /// Returns the number of dropped frames detected (0 or N)
    pub fn track_sequence(&mut self, sequence: u32) -> u64 {
        let drops = match self.prev_sequence {
            Some(prev) => {
                let expected = prev.wrapping_add(1);
                if sequence > expected {
                    u64::from(sequence - expected)
                } else {
                    if sequence < expected {
                        log::warn!("Device sequence number decreased: {} -> {}", prev, sequence);
                    }
                    0
                }
            }
            None => 0,
        };

        self.dropped_frames += drops;
        self.prev_sequence = Some(sequence);
        drops
    }

    /// Finalize and calculate all metrics
    pub fn finalize(&mut self) -> CaptureMetrics {
        let duration = self.start_time.elapsed();
        let duration_ms = duration.as_millis() as u64;
        let duration_secs = duration.as_secs_f64();

        let throughput_fps = if duration_secs > 0.0 {
            self.frames as f64 / duration_secs
        } else {
            0.0
        };

        let bandwidth_mbps = if duration_secs > 0.0 {
            (self.bytes as f64 * 8.0) / (duration_secs * 1_000_000.0)
        } else {
            0.0
        };

        self.intervals_us.sort_unstable();
        let (min_us, max_us, avg_us) = match (self.intervals_us.first(), self.intervals_us.last()) {
            (Some(&min), Some(&max)) => {
                let sum: u64 = self.intervals_us.iter().sum();
                (min, max, sum / self.intervals_us.len() as u64)
            }
            _ => (0, 0, 0),
        };

        CaptureMetrics {
            frames_captured: self.frames,
            bytes_captured: self.bytes,
            duration_ms,
            throughput_fps,
            bandwidth_mbps,
            engine_fps: self.engine_fps,
            interval_min_us: min_us,
            interval_max_us: max_us,
            interval_avg_us: avg_us,
            interval_p50_us: self.percentile(50.0),
            interval_p95_us: self.percentile(95.0),
            interval_p99_us: self.percentile(99.0),
            dropped_frames: self.dropped_frames,
            vbi_records: self.vbi_records,
            sink_errors: self.sink_errors,
        }
    }

    /// Calculate percentile from sorted interval data
    /// Assumes self.intervals_us is already sorted
    fn percentile(&self, p: f64) -> u64 {
        if self.intervals_us.is_empty() {
            return 0;
        }

        let len = self.intervals_us.len();
        let idx = ((p / 100.0) * (len - 1) as f64).round() as usize;
        self.intervals_us[idx.min(len - 1)]
    }

    /// Print metrics in human-readable format
    pub fn print_text(&mut self) {
        let metrics = self.finalize();
        println!("\n=== Capture Metrics ===");
        println!("Frames captured:   {}", metrics.frames_captured);
        println!(
            "Bytes captured:    {} ({:.2} MB)",
            metrics.bytes_captured,
            metrics.bytes_captured as f64 / 1_048_576.0
        );
        println!(
            "Duration:          {:.2} s",
            metrics.duration_ms as f64 / 1000.0
        );
        println!("Throughput:        {:.2} fps", metrics.throughput_fps);
        println!("Engine rate:       {} fps", metrics.engine_fps);
        println!("Bandwidth:         {:.2} Mbps", metrics.bandwidth_mbps);

        if metrics.frames_captured > 1 {
            println!("\nFrame Interval (us):");
            println!("  Min:    {}", metrics.interval_min_us);
            println!("  Max:    {}", metrics.interval_max_us);
            println!("  Avg:    {}", metrics.interval_avg_us);
            println!("  P50:    {}", metrics.interval_p50_us);
            println!("  P95:    {}", metrics.interval_p95_us);
            println!("  P99:    {}", metrics.interval_p99_us);
        }

        if metrics.vbi_records > 0 {
            println!("\nVBI records:       {}", metrics.vbi_records);
        }

        if metrics.dropped_frames > 0 {
            println!(
                "\nDropped frames:    {} ({:.2}%)",
                metrics.dropped_frames,
                (metrics.dropped_frames as f64
                    / (metrics.frames_captured + metrics.dropped_frames) as f64)
                    * 100.0
            );
        }

        if metrics.sink_errors > 0 {
            println!("Sink errors:       {}", metrics.sink_errors);
        }
    }

    /// Print metrics in JSON format
    pub fn print_json(&mut self) -> Result<(), serde_json::Error> {
        let metrics = self.finalize();
        let json = serde_json::to_string_pretty(&metrics)?;
        println!("{}", json);
        Ok(())
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
