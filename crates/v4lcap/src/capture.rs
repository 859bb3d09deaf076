// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 v4lcap developers

//! Frame Acquisition Loop
//!
//! [`Capture::start`] commits the source format, negotiates the display
//! format (video) or prepares the VBI context, provisions the buffer pool,
//! resets the counters and turns streaming on. Any failure unwinds what was
//! acquired before it and hands the device back in a [`StartError`].
//!
//! [`Capture::on_data_ready`] is the unit of work for one readability edge.
//! It takes at most one frame from the pool, routes it to the [`Sinks`] and
//! returns the buffer to the device. A fatal error halts the capture with the
//! same release sequence as [`Capture::stop`]; the capture then answers
//! [`Error::NotStreaming`] until it is stopped.

use std::{
    fmt, io,
    time::{Duration, Instant},
};

use unix_ts::Timestamp;

use crate::convert::{negotiate, Converter, Negotiated, PixelConverter};
use crate::counters::FrameCounters;
use crate::device::Device;
use crate::fourcc::FourCC;
use crate::format::{BufType, Format, Fraction, PixFormat};
use crate::pool::{self, BufferPool, Filled, IoMethod, Ownership};
use crate::vbi::{self, SlicedRecord, VbiState};
use crate::Error;

/// Receives one displayable frame and the status line per acquisition
pub trait DisplaySink {
    fn show(&mut self, frame: &[u8], format: &PixFormat, status: &str);
}

/// Append-only byte stream for the untouched source bytes
pub trait RawSink {
    fn write_frame(&mut self, data: &[u8]) -> io::Result<()>;
}

impl<W: io::Write> RawSink for W {
    fn write_frame(&mut self, data: &[u8]) -> io::Result<()> {
        self.write_all(data)
    }
}

/// One-shot consumer of the source bytes of a single frame
pub trait SnapshotSink {
    fn save(&mut self, data: &[u8], format: &Format) -> io::Result<()>;
}

/// Receives the sliced records of each VBI capture
pub trait VbiSink {
    fn records(&mut self, records: &[SlicedRecord]);
}

/// Consumers attached to a running capture.
///
/// The snapshot sink is taken by the first frame that reaches it; the raw
/// sink is detached after a failed write.
#[derive(Default)]
pub struct Sinks {
    pub display: Option<Box<dyn DisplaySink>>,
    pub raw: Option<Box<dyn RawSink>>,
    pub snapshot: Option<Box<dyn SnapshotSink>>,
    pub vbi: Option<Box<dyn VbiSink>>,
}

impl Sinks {
    pub fn new() -> Self {
        Sinks::default()
    }

    pub fn with_display(mut self, sink: impl DisplaySink + 'static) -> Self {
        self.display = Some(Box::new(sink));
        self
    }

    pub fn with_raw(mut self, sink: impl RawSink + 'static) -> Self {
        self.raw = Some(Box::new(sink));
        self
    }

    pub fn with_snapshot(mut self, sink: impl SnapshotSink + 'static) -> Self {
        self.snapshot = Some(Box::new(sink));
        self
    }

    pub fn with_vbi(mut self, sink: impl VbiSink + 'static) -> Self {
        self.vbi = Some(Box::new(sink));
        self
    }
}

impl fmt::Debug for Sinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sinks")
            .field("display", &self.display.is_some())
            .field("raw", &self.raw.is_some())
            .field("snapshot", &self.snapshot.is_some())
            .field("vbi", &self.vbi.is_some())
            .finish()
    }
}

/// Immutable configuration of one capture start
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// capture kind, taken from the format when one is given
    kind: BufType,

    /// format to commit, the device's current format when `None`
    format: Option<Format>,

    /// buffer exchange strategy
    method: IoMethod,

    /// produce a displayable frame per acquisition
    display: bool,

    /// requested display format for converted frames
    display_format: Option<FourCC>,

    /// number of buffers to request from the device
    buffers: u32,

    /// requested time per frame
    interval: Option<Fraction>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            kind: BufType::VideoCapture,
            format: None,
            method: IoMethod::default(),
            display: false,
            display_format: None,
            buffers: pool::DEFAULT_BUFFERS,
            interval: None,
        }
    }
}

impl CaptureConfig {
    pub fn new() -> Self {
        CaptureConfig::default()
    }

    pub fn with_kind(self, kind: BufType) -> Self {
        let format = self.format.filter(|f| f.buf_type() == kind);
        CaptureConfig {
            kind,
            format,
            ..self
        }
    }

    pub fn with_format(self, format: Format) -> Self {
        CaptureConfig {
            kind: format.buf_type(),
            format: Some(format),
            ..self
        }
    }

    pub fn with_method(self, method: IoMethod) -> Self {
        CaptureConfig { method, ..self }
    }

    pub fn with_display(self, display: bool) -> Self {
        CaptureConfig { display, ..self }
    }

    /// Request a display format for converted frames; implies display.
    pub fn with_display_format(self, fourcc: FourCC) -> Self {
        CaptureConfig {
            display: true,
            display_format: Some(fourcc),
            ..self
        }
    }

    pub fn with_buffers(self, buffers: u32) -> Self {
        CaptureConfig { buffers, ..self }
    }

    pub fn with_interval(self, interval: Fraction) -> Self {
        CaptureConfig {
            interval: Some(interval),
            ..self
        }
    }

    pub fn kind(&self) -> BufType {
        self.kind
    }

    pub fn format(&self) -> Option<&Format> {
        self.format.as_ref()
    }

    pub fn method(&self) -> IoMethod {
        self.method
    }

    pub fn display(&self) -> bool {
        self.display
    }

    pub fn display_format(&self) -> Option<FourCC> {
        self.display_format
    }

    pub fn buffers(&self) -> u32 {
        self.buffers
    }

    pub fn interval(&self) -> Option<Fraction> {
        self.interval
    }
}

/// Result of one acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredFrame {
    /// Engine sequence number, 1 for the first frame after start
    pub sequence: u32,
    pub fps: u32,
    /// Source bytes delivered by the device
    pub bytes_used: usize,
    /// Bytes written to the display buffer, `None` without display
    pub display_bytes: Option<usize>,
    /// Sliced records delivered to the VBI sink
    pub records: usize,
    pub device_sequence: Option<u32>,
    pub timestamp: Option<Timestamp>,
    /// Sink failures absorbed during this acquisition
    pub sink_errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    Frame(AcquiredFrame),
    /// No data ready; nothing changed
    WouldBlock,
}

/// A failed start, carrying the device back to the caller
pub struct StartError<D> {
    pub error: Error,
    pub device: D,
}

impl<D> StartError<D> {
    pub fn into_parts(self) -> (Error, D) {
        (self.error, self.device)
    }
}

impl<D> fmt::Debug for StartError<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<D> fmt::Display for StartError<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "capture start failed: {}", self.error)
    }
}

impl<D> std::error::Error for StartError<D> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<D> From<StartError<D>> for Error {
    fn from(err: StartError<D>) -> Self {
        err.error
    }
}

/// A streaming capture owning its device
pub struct Capture<D: Device> {
    /// `None` only once [`Capture::stop`] has taken the device back
    device: Option<D>,
    run: Run,
}

/// Everything a capture holds besides the device
struct Run {
    config: CaptureConfig,
    format: Format,
    negotiated: Option<Negotiated>,
    converter: Box<dyn Converter>,
    vbi: VbiState,
    pool: Box<dyn BufferPool>,
    counters: FrameCounters,
    display: Vec<u8>,
    display_len: Option<usize>,
    conversion_logged: bool,
    halted: bool,
}

impl<D: Device> Capture<D> {
    /// Start capturing with the built-in [`PixelConverter`].
    pub fn start(device: D, config: CaptureConfig) -> Result<Self, StartError<D>> {
        Capture::start_with_converter(device, config, Box::new(PixelConverter::new()))
    }

    pub fn start_with_converter(
        mut device: D,
        config: CaptureConfig,
        mut converter: Box<dyn Converter>,
    ) -> Result<Self, StartError<D>> {
        match Run::start(&mut device, config, converter.as_mut()) {
            Ok(parts) => Ok(Capture {
                device: Some(device),
                run: Run::new(parts, converter),
            }),
            Err(error) => {
                log::debug!("Capture start failed: {}", error);
                Err(StartError { error, device })
            }
        }
    }

    /// Process one readability edge.
    pub fn on_data_ready(&mut self, sinks: &mut Sinks) -> Result<Acquisition, Error> {
        let device = self.device.as_mut().ok_or(Error::NotStreaming)?;
        self.run.on_data_ready(device, sinks)
    }

    /// Wait up to `timeout` for the device to have data ready.
    pub fn wait_readable(&mut self, timeout: Duration) -> Result<bool, Error> {
        match self.device.as_mut() {
            Some(device) if !self.run.halted => Ok(device.wait_readable(timeout)?),
            _ => Err(Error::NotStreaming),
        }
    }

    /// Release everything and return the device.
    pub fn stop(mut self) -> D {
        let mut device = self
            .device
            .take()
            .expect("capture holds its device until stop");
        self.run.halt(&mut device);
        device
    }

    #[cfg(test)]
    pub(crate) fn device(&self) -> &D {
        self.device.as_ref().unwrap()
    }

    #[cfg(test)]
    pub(crate) fn device_mut(&mut self) -> &mut D {
        self.device.as_mut().unwrap()
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.run.config
    }

    /// The committed source format
    pub fn format(&self) -> &Format {
        &self.run.format
    }

    /// Display negotiation outcome for video captures with display
    pub fn negotiated(&self) -> Option<&Negotiated> {
        self.run.negotiated.as_ref()
    }

    pub fn vbi(&self) -> &VbiState {
        &self.run.vbi
    }

    /// Number of streaming buffers, 0 for read I/O and after a halt
    pub fn buffers(&self) -> usize {
        self.run.pool.len()
    }

    pub fn ownership(&self, index: usize) -> Option<Ownership> {
        self.run.pool.ownership(index)
    }

    pub fn sequence(&self) -> u32 {
        self.run.counters.sequence()
    }

    pub fn fps(&self) -> u32 {
        self.run.counters.fps()
    }

    pub fn is_streaming(&self) -> bool {
        !self.run.halted
    }

    /// Display frame written by the last acquisition
    pub fn display_frame(&self) -> Option<&[u8]> {
        self.run.display_len.map(|n| &self.run.display[..n])
    }
}

impl<D: Device> Drop for Capture<D> {
    fn drop(&mut self) {
        if let Some(device) = self.device.as_mut() {
            self.run.halt(device);
        }
    }
}

/// Pieces acquired by a successful start
struct Started {
    config: CaptureConfig,
    format: Format,
    negotiated: Option<Negotiated>,
    vbi: VbiState,
    pool: Box<dyn BufferPool>,
    display: Vec<u8>,
}

impl Run {
    fn new(started: Started, converter: Box<dyn Converter>) -> Self {
        Run {
            config: started.config,
            format: started.format,
            negotiated: started.negotiated,
            converter,
            vbi: started.vbi,
            pool: started.pool,
            counters: FrameCounters::new(),
            display: started.display,
            display_len: None,
            conversion_logged: false,
            halted: false,
        }
    }

    fn start(
        dev: &mut dyn Device,
        config: CaptureConfig,
        converter: &mut dyn Converter,
    ) -> Result<Started, Error> {
        let kind = config.kind;
        let format = commit_format(dev, &config)?;
        log::debug!("Committed {}", format);

        if let Some(interval) = config.interval {
            match dev.set_frame_interval(kind, interval) {
                Ok(actual) => log::debug!(
                    "Frame interval {}/{}",
                    actual.numerator,
                    actual.denominator
                ),
                Err(err) => log::warn!("{}", err),
            }
        }

        let mut negotiated = None;
        let mut vbi = VbiState::default();
        let mut display_size = 0;
        match &format {
            Format::Video(pix) => {
                if config.display {
                    let n = negotiate(pix, config.display_format, converter);
                    display_size = n.display_size();
                    negotiated = Some(n);
                }
            }
            Format::Vbi(raw) => {
                let std = dev.standard()?;
                vbi.prepare_raw(raw, std)?;
                if config.display {
                    display_size = format.size() * 3;
                }
            }
            Format::SlicedVbi(sliced) => {
                if sliced.service_set == 0 {
                    return Err(Error::NoServicesPossible);
                }
                vbi.prepare_sliced(*sliced);
            }
        }

        let size = format.size();
        if size == 0 {
            return Err(Error::UnsupportedFormat(format!(
                "{} reports a zero frame size",
                format
            )));
        }
        let mut display = Vec::new();
        display
            .try_reserve_exact(display_size)
            .map_err(|_| Error::OutOfMemory)?;
        display.resize(display_size, 0);

        let mut pool = pool::provision(dev, config.method, kind, config.buffers, size)?;
        if config.method != IoMethod::Read {
            if let Err(err) = dev.stream_on(kind) {
                pool.release(dev);
                return Err(err.into());
            }
        }

        log::debug!(
            "Capturing {} with {} I/O, {} buffers",
            kind,
            config.method,
            pool.len()
        );
        Ok(Started {
            config,
            format,
            negotiated,
            vbi,
            pool,
            display,
        })
    }

    fn on_data_ready(
        &mut self,
        dev: &mut dyn Device,
        sinks: &mut Sinks,
    ) -> Result<Acquisition, Error> {
        if self.halted {
            return Err(Error::NotStreaming);
        }

        let filled = match self.pool.dequeue_one(dev) {
            Ok(Some(filled)) => filled,
            Ok(None) => return Ok(Acquisition::WouldBlock),
            Err(err) => return Err(self.fail(dev, err)),
        };
        let (sequence, fps) = self.counters.tick(Instant::now());

        let frame = match self.deliver(&filled, sequence, fps, sinks) {
            Ok(frame) => frame,
            Err(err) => return Err(self.fail(dev, err)),
        };
        if let Err(err) = self.pool.queue_back(dev, filled.index) {
            return Err(self.fail(dev, err));
        }

        log::trace!(
            "Frame {} ({} bytes) fps {}",
            frame.sequence,
            frame.bytes_used,
            frame.fps
        );
        Ok(Acquisition::Frame(frame))
    }

    /// Route one filled buffer to the sinks.
    fn deliver(
        &mut self,
        filled: &Filled,
        sequence: u32,
        fps: u32,
        sinks: &mut Sinks,
    ) -> Result<AcquiredFrame, Error> {
        let data = self.pool.data(filled)?;
        let status = format!("Frame: {} Fps: {}", sequence, fps);
        let mut records = 0;
        self.display_len = None;

        if self.config.kind.is_vbi() {
            let sliced = self.vbi.process(data)?;
            records = sliced.len();
            if let Some(sink) = sinks.vbi.as_mut() {
                sink.records(&sliced);
            }
            if let (Format::Vbi(raw), true) = (&self.format, self.config.display) {
                let n = vbi::raw_to_rgb24(data, &mut self.display);
                self.display_len = Some(n);
                let pix = PixFormat::new(raw.samples_per_line, raw.rows(), FourCC::RGB24);
                if let Some(sink) = sinks.display.as_mut() {
                    sink.show(&self.display[..n], &pix, &status);
                }
            }
        } else if let Some(negotiated) = &self.negotiated {
            let capacity = self.display.len();
            let n = if negotiated.must_convert {
                match self.converter.convert(
                    &negotiated.source,
                    &negotiated.destination,
                    data,
                    &mut self.display,
                ) {
                    Ok(n) => n,
                    Err(err) => {
                        if !self.conversion_logged {
                            log::warn!("{}, showing unconverted data", err);
                            self.conversion_logged = true;
                        }
                        copy_bounded(data, &mut self.display)
                    }
                }
            } else {
                copy_bounded(data, &mut self.display)
            };
            debug_assert!(n <= capacity);
            self.display_len = Some(n);
            if let Some(sink) = sinks.display.as_mut() {
                sink.show(&self.display[..n], &negotiated.destination, &status);
            }
        }

        let mut sink_errors = Vec::new();
        if let Some(sink) = sinks.raw.as_mut() {
            if let Err(err) = sink.write_frame(data) {
                log::error!("Raw save failed, detaching sink: {}", err);
                sink_errors.push(format!("raw save failed: {}", err));
                sinks.raw = None;
            }
        }

        if let Some(mut sink) = sinks.snapshot.take() {
            if let Err(err) = sink.save(data, &self.format) {
                log::error!("Snapshot failed: {}", err);
                sink_errors.push(format!("snapshot failed: {}", err));
            }
        }

        Ok(AcquiredFrame {
            sequence,
            fps,
            bytes_used: data.len(),
            display_bytes: self.display_len,
            records,
            device_sequence: filled.device_sequence,
            timestamp: filled.timestamp,
            sink_errors,
        })
    }

    /// Halt after a fatal per-frame error.
    fn fail(&mut self, dev: &mut dyn Device, err: Error) -> Error {
        log::error!("Capture halted: {}", err);
        self.halt(dev);
        err
    }

    /// Release sequence shared by stop, drop and fatal errors.
    fn halt(&mut self, dev: &mut dyn Device) {
        if self.halted {
            return;
        }
        self.halted = true;
        self.pool.release(dev);
        self.vbi.close();
        self.display_len = None;
        log::debug!(
            "Capture stopped after {} frames",
            self.counters.sequence()
        );
    }
}

/// Commit the source format for `config` and return it as adjusted.
fn commit_format(dev: &mut dyn Device, config: &CaptureConfig) -> Result<Format, Error> {
    let requested = match (config.format, config.kind) {
        (Some(format), _) => format,
        (None, BufType::SlicedVbiCapture) => {
            Format::SlicedVbi(vbi::sliced_request(dev.standard()?))
        }
        (None, kind) => dev.get_format(kind)?,
    };
    Ok(dev.set_format(&requested)?)
}

fn copy_bounded(src: &[u8], dst: &mut [u8]) -> usize {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
    n
}
