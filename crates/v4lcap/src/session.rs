// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 v4lcap developers

//! Device Session
//!
//! A [`Session`] is the command surface a host application drives: open a
//! device, adjust its format, start and stop capture, request a snapshot or
//! point raw saving at a file. While capturing, the host calls
//! [`Session::on_data_ready`] on every readability edge and hears back
//! through its [`CaptureEvents`].
//!
//! At most one capture runs per session. Opening another device stops and
//! releases the current one first.

use std::{
    fs::{self, File},
    io,
    mem,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::capture::{
    AcquiredFrame, Acquisition, Capture, CaptureConfig, DisplaySink, Sinks, SnapshotSink, VbiSink,
};
use crate::device::Device;
use crate::format::{BufType, Format};
use crate::v4l2::{Capabilities, V4l2Device};
use crate::{Error, ErrorKind};

/// Notifications emitted by a session
pub trait CaptureEvents {
    fn on_frame(&mut self, _frame: &AcquiredFrame) {}

    fn on_error(&mut self, _kind: ErrorKind, _message: &str) {}

    fn on_status(&mut self, _frame: u32, _fps: u32) {}
}

/// Events that go nowhere
#[derive(Debug, Default)]
pub struct NoEvents;

impl CaptureEvents for NoEvents {}

/// Snapshot sink writing the source bytes to a file
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    path: PathBuf,
}

impl FileSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSnapshot { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotSink for FileSnapshot {
    fn save(&mut self, data: &[u8], format: &Format) -> io::Result<()> {
        fs::write(&self.path, data)?;
        log::info!(
            "Snapshot of {} ({} bytes) saved to {}",
            format,
            data.len(),
            self.path.display()
        );
        Ok(())
    }
}

enum State<D: Device> {
    Closed,
    Open(D),
    Capturing(Capture<D>),
}

pub struct Session<D: Device = V4l2Device> {
    state: State<D>,
    sinks: Sinks,
    raw_target: Option<PathBuf>,
    events: Box<dyn CaptureEvents>,
}

impl Session<V4l2Device> {
    pub fn new() -> Self {
        Session::empty()
    }

    /// Open the V4L2 device node at `path`, closing any current device.
    ///
    /// In raw mode every primitive goes straight to the kernel; otherwise
    /// libv4l2 is used when it can be loaded.
    pub fn open<P: AsRef<Path>>(&mut self, path: P, raw_mode: bool) -> Result<(), Error> {
        self.close();
        self.state = State::Open(V4l2Device::open(path, raw_mode)?);
        Ok(())
    }
}

impl Default for Session<V4l2Device> {
    fn default() -> Self {
        Session::new()
    }
}

impl<D: Device> Session<D> {
    fn empty() -> Self {
        Session {
            state: State::Closed,
            sinks: Sinks::new(),
            raw_target: None,
            events: Box::new(NoEvents),
        }
    }

    /// Session over an already opened device
    pub fn with_device(device: D) -> Self {
        let mut session = Session::empty();
        session.state = State::Open(device);
        session
    }

    /// Replace the current device, closing it first.
    pub fn attach(&mut self, device: D) {
        self.close();
        self.state = State::Open(device);
    }

    pub fn set_events(&mut self, events: impl CaptureEvents + 'static) {
        self.events = Box::new(events);
    }

    pub fn set_display(&mut self, sink: Option<Box<dyn DisplaySink>>) {
        self.sinks.display = sink;
    }

    pub fn set_vbi_sink(&mut self, sink: Option<Box<dyn VbiSink>>) {
        self.sinks.vbi = sink;
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.state, State::Closed)
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self.state, State::Capturing(_))
    }

    /// The running capture, if any
    pub fn capture(&self) -> Option<&Capture<D>> {
        match &self.state {
            State::Capturing(capture) => Some(capture),
            _ => None,
        }
    }

    fn idle_device(&mut self) -> Result<&mut D, Error> {
        match &mut self.state {
            State::Open(device) => Ok(device),
            State::Capturing(_) => Err(Error::Busy),
            State::Closed => Err(Error::NotOpen),
        }
    }

    pub fn capabilities(&mut self) -> Result<Capabilities, Error> {
        Ok(self.idle_device()?.capabilities()?)
    }

    /// Commit `format`, returning it as adjusted by the driver.
    pub fn set_format(&mut self, format: &Format) -> Result<Format, Error> {
        Ok(self.idle_device()?.set_format(format)?)
    }

    /// Current format for `kind`; the committed one while capturing it.
    pub fn format(&mut self, kind: BufType) -> Result<Format, Error> {
        if let State::Capturing(capture) = &self.state {
            if capture.format().buf_type() == kind {
                return Ok(*capture.format());
            }
        }
        Ok(self.idle_device()?.get_format(kind)?)
    }

    pub fn start(&mut self, config: CaptureConfig) -> Result<(), Error> {
        let device = match mem::replace(&mut self.state, State::Closed) {
            State::Open(device) => device,
            State::Closed => return Err(Error::NotOpen),
            capturing @ State::Capturing(_) => {
                self.state = capturing;
                return Err(Error::Busy);
            }
        };

        match Capture::start(device, config) {
            Ok(capture) => {
                self.state = State::Capturing(capture);
                Ok(())
            }
            Err(err) => {
                let (error, device) = err.into_parts();
                self.state = State::Open(device);
                self.events.on_error(error.kind(), &error.to_string());
                Err(error)
            }
        }
    }

    /// Stop capturing and drop the raw-save target and any pending snapshot.
    /// A no-op when idle.
    pub fn stop(&mut self) {
        self.state = match mem::replace(&mut self.state, State::Closed) {
            State::Capturing(capture) => {
                self.drop_frame_sinks();
                State::Open(capture.stop())
            }
            other => other,
        };
    }

    /// Stop and close the device.
    pub fn close(&mut self) {
        self.stop();
        self.drop_frame_sinks();
        self.state = State::Closed;
    }

    fn drop_frame_sinks(&mut self) {
        self.sinks.raw = None;
        self.sinks.snapshot = None;
        self.raw_target = None;
    }

    /// Save the source bytes of the next frame to `path`.
    pub fn request_snapshot(&mut self, path: impl Into<PathBuf>) {
        self.sinks.snapshot = Some(Box::new(FileSnapshot::new(path)));
    }

    pub fn snapshot_pending(&self) -> bool {
        self.sinks.snapshot.is_some()
    }

    /// Append the source bytes of every frame to `path`, truncating it
    /// first, or stop saving with `None`.
    pub fn set_raw_save_target(&mut self, path: Option<&Path>) -> Result<(), Error> {
        self.sinks.raw = None;
        self.raw_target = None;
        if let Some(path) = path {
            let file = File::create(path)?;
            self.sinks.raw = Some(Box::new(file));
            self.raw_target = Some(path.to_path_buf());
            log::debug!("Saving raw frames to {}", path.display());
        }
        Ok(())
    }

    pub fn raw_save_target(&self) -> Option<&Path> {
        self.raw_target.as_deref()
    }

    pub fn wait_readable(&mut self, timeout: Duration) -> Result<bool, Error> {
        match &mut self.state {
            State::Capturing(capture) => capture.wait_readable(timeout),
            _ => Err(Error::NotStreaming),
        }
    }

    /// Acquire at most one frame.
    ///
    /// Returns `None` when no data was ready. A fatal error stops the
    /// capture before it is returned.
    pub fn on_data_ready(&mut self) -> Result<Option<AcquiredFrame>, Error> {
        let State::Capturing(capture) = &mut self.state else {
            return Err(Error::NotStreaming);
        };

        match capture.on_data_ready(&mut self.sinks) {
            Ok(Acquisition::WouldBlock) => Ok(None),
            Ok(Acquisition::Frame(frame)) => {
                for message in &frame.sink_errors {
                    self.events.on_error(ErrorKind::Io, message);
                }
                if self.sinks.raw.is_none() {
                    self.raw_target = None;
                }
                self.events.on_frame(&frame);
                self.events.on_status(frame.sequence, frame.fps);
                Ok(Some(frame))
            }
            Err(err) => {
                self.events.on_error(err.kind(), &err.to_string());
                self.stop();
                Err(err)
            }
        }
    }
}
