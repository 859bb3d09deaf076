// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 v4lcap developers

use crate::error::CliError;
use crate::metrics::MetricsCollector;
use crate::utils;
use clap::Args as ClapArgs;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use v4lcap::capture::{AcquiredFrame, CaptureConfig, DisplaySink, VbiSink};
use v4lcap::format::{BufType, Format, Fraction, PixFormat};
use v4lcap::fourcc::FourCC;
use v4lcap::session::{CaptureEvents, Session};
use v4lcap::vbi::SlicedRecord;
use v4lcap::ErrorKind;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Device node path
    #[arg(short, long, default_value = "/dev/video0")]
    device: String,

    /// Bypass libv4l2 and use the kernel interface directly
    #[arg(long)]
    raw: bool,

    /// What to capture: video|vbi|sliced-vbi
    #[arg(short, long, default_value = "video")]
    kind: String,

    /// I/O method: read|mmap|user
    #[arg(short, long, default_value = "mmap")]
    method: String,

    /// Video resolution in WxH format (default: keep the device's)
    #[arg(short, long)]
    resolution: Option<String>,

    /// Video pixel format as FOURCC (default: keep the device's)
    #[arg(long)]
    format: Option<String>,

    /// Requested frame rate
    #[arg(short = 'F', long)]
    fps: Option<u32>,

    /// Convert frames for display into this FOURCC (RGB3 or BGR3)
    #[arg(long)]
    display: Option<String>,

    /// Append every display frame to this file
    #[arg(long)]
    display_out: Option<PathBuf>,

    /// Append the source bytes of every frame to this file
    #[arg(long)]
    save_raw: Option<PathBuf>,

    /// Save the source bytes of the first frame to this file
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Write decoded VBI records to this file as JSON lines
    #[arg(long)]
    vbi_out: Option<PathBuf>,

    /// Number of frames (0=unlimited)
    #[arg(short, long, default_value = "0")]
    frames: u64,

    /// Number of buffers to request for streaming I/O
    #[arg(short, long, default_value = "3")]
    buffers: u32,

    /// Readability wait per iteration in milliseconds
    #[arg(short, long, default_value = "2000")]
    timeout: u64,

    /// Print capture metrics when done
    #[arg(long)]
    metrics: bool,
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Capture parameters: {:?}", args);

    let kind = utils::parse_kind(&args.kind)?;
    let method = utils::parse_method(&args.method)?;
    if kind != BufType::VideoCapture && (args.resolution.is_some() || args.format.is_some()) {
        return Err(CliError::InvalidArgs(format!(
            "--resolution and --format apply to video capture, not {}",
            kind
        )));
    }
    if args.fps == Some(0) {
        return Err(CliError::InvalidArgs("--fps must be positive".to_string()));
    }
    let resolution = args
        .resolution
        .as_deref()
        .map(utils::parse_resolution)
        .transpose()?;
    let fourcc = args.format.as_deref().map(utils::parse_fourcc).transpose()?;
    let display = args.display.as_deref().map(utils::parse_fourcc).transpose()?;
    if let Some(fourcc) = display.filter(|f| ![FourCC::RGB24, FourCC::BGR24].contains(f)) {
        return Err(CliError::InvalidArgs(format!(
            "{} is not a display format (supported: RGB3, BGR3)",
            fourcc
        )));
    }

    // Install signal handler for graceful shutdown
    let term = utils::install_signal_handler()?;

    log::info!("Opening device: {}", args.device);
    let mut session = Session::new();
    session.open(&args.device, args.raw)?;

    let caps = session.capabilities()?;
    log::info!("Device: {}", caps);
    if !caps.supports(kind) {
        return Err(CliError::SetupFailed(format!(
            "{} does not support {} capture",
            args.device, kind
        )));
    }

    let mut config = CaptureConfig::new()
        .with_kind(kind)
        .with_method(method)
        .with_buffers(args.buffers);
    if resolution.is_some() || fourcc.is_some() {
        config = config.with_format(requested_format(&mut session, resolution, fourcc)?);
    }
    if let Some(fps) = args.fps {
        config = config.with_interval(Fraction::from_fps(fps));
    }
    config = match display {
        Some(fourcc) => config.with_display_format(fourcc),
        None => config.with_display(args.display_out.is_some()),
    };

    session.set_events(LogEvents);
    if let Some(path) = &args.display_out {
        session.set_display(Some(Box::new(DisplayFile::create(path.clone())?)));
    }
    if let Some(path) = &args.vbi_out {
        let file = File::create(path).map_err(|e| {
            CliError::General(format!("Failed to create {}: {}", path.display(), e))
        })?;
        session.set_vbi_sink(Some(Box::new(JsonLines::new(file))));
    }

    log::info!("Starting {} capture ({} I/O)", kind, method);
    session.start(config).map_err(CliError::setup)?;
    if let Some(capture) = session.capture() {
        log::info!("Capture format: {}", capture.format());
        if let Some(negotiated) = capture.negotiated() {
            log::info!("Display format: {}", negotiated.destination);
        }
    }

    if let Some(path) = &args.save_raw {
        session.set_raw_save_target(Some(path.as_path())).map_err(|e| {
            CliError::General(format!("Failed to create {}: {}", path.display(), e))
        })?;
    }
    if let Some(path) = &args.snapshot {
        session.request_snapshot(path);
    }

    let mut metrics = MetricsCollector::new();
    let result = acquire(&mut session, &args, &term, &mut metrics);

    if args.snapshot.is_some() && session.snapshot_pending() {
        log::warn!("No frame was captured; snapshot not written");
    }
    session.close();
    session.set_display(None);
    session.set_vbi_sink(None);

    if term.load(Ordering::Relaxed) {
        log::info!("Received Ctrl+C, stopped");
    }

    if args.metrics || json {
        if json {
            metrics
                .print_json()
                .map_err(|e| CliError::General(format!("Failed to serialize JSON: {}", e)))?;
        } else {
            metrics.print_text();
        }
    }

    result
}

/// Video format built from `--resolution` and `--format` on top of the
/// device's current one
fn requested_format(
    session: &mut Session,
    resolution: Option<(u32, u32)>,
    fourcc: Option<FourCC>,
) -> Result<Format, CliError> {
    let Format::Video(mut pix) = session.format(BufType::VideoCapture)? else {
        return Err(CliError::SetupFailed(
            "device did not report a video format".to_string(),
        ));
    };
    if let Some((width, height)) = resolution {
        pix.width = width;
        pix.height = height;
    }
    if let Some(fourcc) = fourcc {
        pix.fourcc = fourcc;
    }
    pix.update_stride();
    log::debug!("Requesting {}", pix);
    Ok(Format::Video(pix))
}

fn acquire(
    session: &mut Session,
    args: &Args,
    term: &std::sync::atomic::AtomicBool,
    metrics: &mut MetricsCollector,
) -> Result<(), CliError> {
    let timeout = Duration::from_millis(args.timeout);
    let max_frames = if args.frames == 0 {
        u64::MAX
    } else {
        args.frames
    };
    let mut frame_count = 0u64;

    while frame_count < max_frames && !term.load(Ordering::Relaxed) {
        if !session.wait_readable(timeout).map_err(CliError::streaming)? {
            log::warn!("No data within {} ms", args.timeout);
            continue;
        }

        let Some(frame) = session.on_data_ready().map_err(CliError::streaming)? else {
            continue;
        };
        metrics.record_frame(&frame, Instant::now());
        frame_count += 1;

        if frame_count % 30 == 0 {
            log::info!("Frame: {} Fps: {}", frame.sequence, frame.fps);
        }
    }

    log::info!("Captured {} frames", frame_count);
    Ok(())
}

/// Logs session notifications
struct LogEvents;

impl CaptureEvents for LogEvents {
    fn on_frame(&mut self, frame: &AcquiredFrame) {
        log::trace!(
            "frame {} ({} bytes, {} records)",
            frame.sequence,
            frame.bytes_used,
            frame.records
        );
    }

    fn on_error(&mut self, kind: ErrorKind, message: &str) {
        log::error!("{}: {}", kind, message);
    }
}

/// Display sink appending every converted frame to a file
struct DisplayFile {
    file: File,
    path: PathBuf,
    failed: bool,
}

impl DisplayFile {
    fn create(path: PathBuf) -> Result<Self, CliError> {
        let file = File::create(&path).map_err(|e| {
            CliError::General(format!("Failed to create {}: {}", path.display(), e))
        })?;
        Ok(DisplayFile {
            file,
            path,
            failed: false,
        })
    }
}

impl DisplaySink for DisplayFile {
    fn show(&mut self, frame: &[u8], format: &PixFormat, status: &str) {
        if self.failed {
            return;
        }
        if let Err(e) = self.file.write_all(frame) {
            log::error!("Display output {} failed: {}", self.path.display(), e);
            self.failed = true;
            return;
        }
        log::trace!("{} [{}]", status, format);
    }
}

#[derive(Serialize)]
struct RecordLine<'a> {
    frame: u64,
    service: &'a str,
    id: u32,
    field: u32,
    line: u32,
    data: String,
}

/// VBI sink writing one JSON object per decoded line
struct JsonLines<W: Write> {
    writer: W,
    frame: u64,
    failed: bool,
}

impl<W: Write> JsonLines<W> {
    fn new(writer: W) -> Self {
        JsonLines {
            writer,
            frame: 0,
            failed: false,
        }
    }

    fn write_record(&mut self, record: &SlicedRecord) -> Result<(), String> {
        let line = RecordLine {
            frame: self.frame,
            service: record.service_name().unwrap_or("unknown"),
            id: record.id,
            field: record.field,
            line: record.line,
            data: record.payload().iter().map(|b| format!("{:02x}", b)).collect(),
        };
        serde_json::to_writer(&mut self.writer, &line).map_err(|e| e.to_string())?;
        self.writer.write_all(b"\n").map_err(|e| e.to_string())
    }
}

impl<W: Write> VbiSink for JsonLines<W> {
    fn records(&mut self, records: &[SlicedRecord]) {
        self.frame += 1;
        if self.failed {
            return;
        }
        for record in records.iter().filter(|r| !r.is_empty()) {
            if let Err(e) = self.write_record(record) {
                log::error!("VBI output failed: {}", e);
                self.failed = true;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use v4lcap_sys as ffi;

    #[test]
    fn test_json_lines_skip_empty_slots() {
        let mut teletext = SlicedRecord::new(ffi::V4L2_SLICED_TELETEXT_B, 0, 7);
        teletext.data[0] = 0x55;
        teletext.data[41] = 0xa0;
        let mut vps = SlicedRecord::new(ffi::V4L2_SLICED_VPS, 0, 16);
        vps.data[..2].copy_from_slice(&[0x12, 0x34]);

        let mut sink = JsonLines::new(Vec::new());
        sink.records(&[teletext, SlicedRecord::new(0, 0, 0)]);
        sink.records(&[vps]);

        let text = String::from_utf8(sink.writer).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);

        assert_eq!(lines[0]["frame"], 1);
        assert_eq!(lines[0]["service"], "Teletext System B");
        assert_eq!(lines[0]["line"], 7);
        let data = lines[0]["data"].as_str().unwrap();
        assert_eq!(data.len(), 42 * 2);
        assert!(data.starts_with("55"));
        assert!(data.ends_with("a0"));

        assert_eq!(lines[1]["frame"], 2);
        assert_eq!(lines[1]["id"], ffi::V4L2_SLICED_VPS);
        assert_eq!(lines[1]["data"].as_str().unwrap(), "12340000000000000000000000");
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_json_lines_failure_disables_sink() {
        let mut sink = JsonLines::new(Broken);
        let record = SlicedRecord::new(ffi::V4L2_SLICED_VPS, 0, 16);
        sink.records(&[record]);
        assert!(sink.failed);
        sink.records(&[record]);
        assert_eq!(sink.frame, 2);
    }
}
