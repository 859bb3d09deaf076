// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 v4lcap developers

use crate::error::CliError;
use signal_hook::consts::SIGINT;
use signal_hook::flag;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use v4lcap::format::BufType;
use v4lcap::fourcc::FourCC;
use v4lcap::pool::IoMethod;

/// Parse resolution string in format "WxH" or "W*H"
pub fn parse_resolution(s: &str) -> Result<(u32, u32), CliError> {
    let (width_str, height_str) = s
        .split_once('x')
        .or_else(|| s.split_once('*'))
        .ok_or_else(|| {
            CliError::InvalidArgs(format!(
                "Invalid resolution format (expected WxH or W*H): {}",
                s
            ))
        })?;

    let width = width_str
        .parse::<u32>()
        .map_err(|_| CliError::InvalidArgs(format!("Invalid width in resolution: {}", s)))?;
    let height = height_str
        .parse::<u32>()
        .map_err(|_| CliError::InvalidArgs(format!("Invalid height in resolution: {}", s)))?;

    if width == 0 || height == 0 {
        return Err(CliError::InvalidArgs(format!(
            "Resolution dimensions must be positive: {}",
            s
        )));
    }

    Ok((width, height))
}

/// Parse a four character pixel format code such as "YUYV" or "RGB3"
pub fn parse_fourcc(s: &str) -> Result<FourCC, CliError> {
    s.parse::<FourCC>().map_err(CliError::InvalidArgs)
}

/// Parse the capture kind: video, vbi or sliced-vbi
pub fn parse_kind(s: &str) -> Result<BufType, CliError> {
    match s.to_lowercase().as_str() {
        "video" => Ok(BufType::VideoCapture),
        "vbi" | "raw-vbi" => Ok(BufType::VbiCapture),
        "sliced-vbi" | "sliced" => Ok(BufType::SlicedVbiCapture),
        _ => Err(CliError::InvalidArgs(format!(
            "Invalid capture kind: {} (supported: video, vbi, sliced-vbi)",
            s
        ))),
    }
}

/// Parse the I/O method: read, mmap or user
pub fn parse_method(s: &str) -> Result<IoMethod, CliError> {
    s.to_lowercase()
        .parse::<IoMethod>()
        .map_err(|e| CliError::InvalidArgs(format!("{} (supported: read, mmap, user)", e)))
}

/// Install signal handler for graceful shutdown on Ctrl+C
///
/// Returns an Arc<AtomicBool> that will be set to true when SIGINT is received.
/// Check this flag periodically in the capture loop to exit gracefully.
pub fn install_signal_handler() -> Result<Arc<AtomicBool>, CliError> {
    let term = Arc::new(AtomicBool::new(false));

    flag::register(SIGINT, Arc::clone(&term))
        .map_err(|e| CliError::General(format!("Failed to register signal handler: {}", e)))?;

    log::debug!("Installed SIGINT handler");
    Ok(term)
}
