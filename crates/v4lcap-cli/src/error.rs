// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 v4lcap developers

use std::fmt;
use std::io;
use std::process::ExitCode;

use v4lcap::{Error, ErrorKind};

/// CLI-specific error type with exit code mapping
#[derive(Debug)]
pub enum CliError {
    /// Invalid command-line arguments
    InvalidArgs(String),
    /// Device node missing or inaccessible
    DeviceNotFound(String),
    /// Capture could not be started (buffers, format, VBI services)
    SetupFailed(String),
    /// Capture was halted by a fatal error while streaming
    CaptureFailed(String),
    /// Anything else
    General(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::InvalidArgs(msg) => write!(f, "Invalid arguments: {}", msg),
            CliError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            CliError::SetupFailed(msg) => write!(f, "Capture setup failed: {}", msg),
            CliError::CaptureFailed(msg) => write!(f, "Capture failed: {}", msg),
            CliError::General(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    fn code(&self) -> u8 {
        match self {
            CliError::General(_) => 1,
            CliError::InvalidArgs(_) => 2,
            CliError::DeviceNotFound(_) => 3,
            CliError::SetupFailed(_) => 4,
            CliError::CaptureFailed(_) => 5,
        }
    }

    /// Map an error returned while starting capture
    pub fn setup(err: Error) -> Self {
        match CliError::from(err) {
            CliError::General(msg) => CliError::SetupFailed(msg),
            other => other,
        }
    }

    /// Map an error returned by the acquisition loop
    pub fn streaming(err: Error) -> Self {
        match err.kind() {
            ErrorKind::Io => CliError::General(err.to_string()),
            _ => CliError::CaptureFailed(err.to_string()),
        }
    }
}

fn is_missing(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    )
}

/// Map v4lcap::Error to CliError with appropriate exit codes
impl From<Error> for CliError {
    fn from(err: Error) -> Self {
        match &err {
            Error::Io(io_err) if is_missing(io_err.kind()) => {
                CliError::DeviceNotFound(err.to_string())
            }
            Error::Device(dev_err) if dev_err.io_error().raw_os_error() == Some(libc::ENODEV) => {
                CliError::DeviceNotFound(err.to_string())
            }
            Error::InsufficientBuffers { .. }
            | Error::OutOfMemory
            | Error::NoServicesPossible
            | Error::UnsupportedFormat(_) => CliError::SetupFailed(err.to_string()),
            Error::SizeMismatch { .. } | Error::NotStreaming => {
                CliError::CaptureFailed(err.to_string())
            }
            Error::LibraryNotLoaded(lib_err) => {
                CliError::General(format!("Failed to load libv4l2: {}", lib_err))
            }
            _ => CliError::General(err.to_string()),
        }
    }
}

/// Helper function to convert result to exit code
pub fn result_to_exit_code<T>(result: Result<T, CliError>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            e.exit_code()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use v4lcap::device::DeviceError;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::General("test".into()).code(), 1);
        assert_eq!(CliError::InvalidArgs("test".into()).code(), 2);
        assert_eq!(CliError::DeviceNotFound("test".into()).code(), 3);
        assert_eq!(CliError::SetupFailed("test".into()).code(), 4);
        assert_eq!(CliError::CaptureFailed("test".into()).code(), 5);
    }

    #[test]
    fn test_error_display() {
        let err = CliError::DeviceNotFound("/dev/video9".to_string());
        assert_eq!(format!("{}", err), "Device not found: /dev/video9");
    }

    #[test]
    fn test_library_error_mapping() {
        let missing = Error::Io(io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(
            CliError::from(missing),
            CliError::DeviceNotFound(_)
        ));

        let unplugged = Error::Device(DeviceError::new("VIDIOC_QUERYCAP", libc::ENODEV));
        assert!(matches!(
            CliError::from(unplugged),
            CliError::DeviceNotFound(_)
        ));

        assert!(matches!(
            CliError::from(Error::InsufficientBuffers { granted: 1 }),
            CliError::SetupFailed(_)
        ));
        assert!(matches!(
            CliError::from(Error::SizeMismatch {
                expected: 128,
                actual: 100
            }),
            CliError::CaptureFailed(_)
        ));
    }

    #[test]
    fn test_setup_and_streaming_context() {
        let dev_err = || Error::Device(DeviceError::new("VIDIOC_STREAMON", 5));
        assert!(matches!(CliError::setup(dev_err()), CliError::SetupFailed(_)));
        assert!(matches!(
            CliError::streaming(dev_err()),
            CliError::CaptureFailed(_)
        ));
        assert!(matches!(
            CliError::setup(Error::Io(io::Error::from(io::ErrorKind::PermissionDenied))),
            CliError::DeviceNotFound(_)
        ));
    }
}
