// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 v4lcap developers

//! v4lcap: V4L2 capture engine
//!
//! Buffer management and frame acquisition for Video4Linux2 capture devices:
//! video frames, raw VBI scan lines and sliced VBI records, under the read,
//! memory-mapped and user-pointer I/O methods.
//!
//! # Quick Start
//!
//! ```no_run
//! use v4lcap::capture::CaptureConfig;
//! use v4lcap::session::Session;
//! use std::time::Duration;
//!
//! let mut session = Session::new();
//! session.open("/dev/video0", false)?;
//! session.start(CaptureConfig::default())?;
//! for _ in 0..100 {
//!     if session.wait_readable(Duration::from_secs(1))? {
//!         if let Some(status) = session.on_data_ready()? {
//!             println!("frame {} at {} fps", status.sequence, status.fps);
//!         }
//!     }
//! }
//! session.stop();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Layers
//!
//! - [`device`] - the [`device::Device`] control-plane trait and
//!   [`v4l2::V4l2Device`], its kernel-backed implementation
//! - [`pool`] - buffer pools for the three I/O methods with explicit
//!   per-slot ownership
//! - [`convert`] - display format negotiation and pixel conversion
//! - [`vbi`] - raw VBI slicing and sliced record parsing
//! - [`capture`] - the per-readability acquisition loop and its sinks
//! - [`session`] - open/start/stop command surface for a host application

use std::{error, fmt, io, num::TryFromIntError};

use v4lcap_sys as ffi;

/// Error type for capture operations
#[derive(Debug)]
pub enum Error {
    /// A device primitive failed
    Device(device::DeviceError),

    /// The device granted fewer buffers than the minimum of two
    InsufficientBuffers { granted: u32 },

    /// A buffer could not be mapped or allocated
    OutOfMemory,

    /// Pixel conversion failed; absorbed by the acquisition loop
    Conversion(convert::ConversionError),

    /// Captured data size disagrees with the configured frame size
    SizeMismatch { expected: usize, actual: usize },

    /// No VBI service can be decoded with the device's raw VBI geometry
    NoServicesPossible,

    /// The device delivers a format the engine cannot handle
    UnsupportedFormat(String),

    /// A buffer was accessed while owned by the other party
    Ownership {
        index: u32,
        owner: pool::Ownership,
    },

    /// Capture is not running, or was halted by an earlier fatal error
    NotStreaming,

    /// The session has no open device
    NotOpen,

    /// The session is capturing and cannot accept the command
    Busy,

    /// libv4l2 could not be loaded
    LibraryNotLoaded(ffi::libloading::Error),

    /// I/O error outside the device primitives (opening nodes, sink files)
    Io(io::Error),

    /// Integer conversion error (try_from failed)
    TryFromInt(TryFromIntError),
}

/// Error category reported to [`session::CaptureEvents::on_error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Device,
    InsufficientBuffers,
    OutOfMemory,
    Conversion,
    SizeMismatch,
    NoServicesPossible,
    UnsupportedFormat,
    Ownership,
    NotStreaming,
    NotOpen,
    Busy,
    Library,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ErrorKind::Device => "device",
            ErrorKind::InsufficientBuffers => "insufficient-buffers",
            ErrorKind::OutOfMemory => "out-of-memory",
            ErrorKind::Conversion => "conversion",
            ErrorKind::SizeMismatch => "size-mismatch",
            ErrorKind::NoServicesPossible => "no-services-possible",
            ErrorKind::UnsupportedFormat => "unsupported-format",
            ErrorKind::Ownership => "ownership",
            ErrorKind::NotStreaming => "not-streaming",
            ErrorKind::NotOpen => "not-open",
            ErrorKind::Busy => "busy",
            ErrorKind::Library => "library",
            ErrorKind::Io => "io",
        };
        f.write_str(name)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Device(_) => ErrorKind::Device,
            Error::InsufficientBuffers { .. } => ErrorKind::InsufficientBuffers,
            Error::OutOfMemory => ErrorKind::OutOfMemory,
            Error::Conversion(_) => ErrorKind::Conversion,
            Error::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            Error::NoServicesPossible => ErrorKind::NoServicesPossible,
            Error::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Error::Ownership { .. } => ErrorKind::Ownership,
            Error::NotStreaming => ErrorKind::NotStreaming,
            Error::NotOpen => ErrorKind::NotOpen,
            Error::Busy => ErrorKind::Busy,
            Error::LibraryNotLoaded(_) => ErrorKind::Library,
            Error::Io(_) | Error::TryFromInt(_) => ErrorKind::Io,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Device(err) => write!(f, "{}", err),
            Error::InsufficientBuffers { granted } => write!(
                f,
                "insufficient buffer memory: device granted {} buffer(s), need at least {}",
                granted,
                pool::MIN_BUFFERS
            ),
            Error::OutOfMemory => write!(f, "out of memory while setting up buffers"),
            Error::Conversion(err) => write!(f, "conversion failed: {}", err),
            Error::SizeMismatch { expected, actual } => write!(
                f,
                "incorrect vbi size: expected {} bytes, got {}",
                expected, actual
            ),
            Error::NoServicesPossible => write!(f, "no VBI services can be decoded"),
            Error::UnsupportedFormat(msg) => write!(f, "unsupported format: {}", msg),
            Error::Ownership { index, owner } => {
                write!(f, "buffer {} is owned by the {}", index, owner)
            }
            Error::NotStreaming => write!(f, "capture is not streaming"),
            Error::NotOpen => write!(f, "no device is open"),
            Error::Busy => write!(f, "device is busy capturing"),
            Error::LibraryNotLoaded(err) => write!(f, "libv4l2 could not be loaded: {}", err),
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::TryFromInt(err) => write!(f, "Integer conversion error: {}", err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Device(err) => Some(err),
            Error::Conversion(err) => Some(err),
            Error::LibraryNotLoaded(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::TryFromInt(err) => Some(err),
            _ => None,
        }
    }
}

impl From<device::DeviceError> for Error {
    fn from(err: device::DeviceError) -> Self {
        Error::Device(err)
    }
}

impl From<convert::ConversionError> for Error {
    fn from(err: convert::ConversionError) -> Self {
        Error::Conversion(err)
    }
}

impl From<ffi::libloading::Error> for Error {
    fn from(err: ffi::libloading::Error) -> Self {
        Error::LibraryNotLoaded(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<TryFromIntError> for Error {
    fn from(err: TryFromIntError) -> Self {
        Error::TryFromInt(err)
    }
}

/// Control plane of a capture device and its errors.
pub mod device;

/// Kernel-backed device access.
pub mod v4l2;

/// Format descriptors.
pub mod format;

/// The fourcc module provides portable handling of fourcc codes.
pub mod fourcc;

/// Buffer pools for the read, mmap and userptr I/O methods.
pub mod pool;

/// Display format negotiation and pixel conversion.
pub mod convert;

/// VBI demultiplexing.
pub mod vbi;

/// Frame sequence and rate bookkeeping.
pub mod counters;

/// The frame acquisition loop.
pub mod capture;

/// Device session commands and events.
pub mod session;

#[cfg(test)]
mod mock;

/// Load libv4l2 and report whether it is usable.
///
/// Devices opened without raw mode fall back to the kernel interface when
/// this fails; the check is informational.
pub fn libv4l2_available() -> Result<(), Error> {
    ffi::init()?;
    Ok(())
}
