// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 v4lcap developers

//! Device capability descriptor
//!
//! - [`Capabilities`] - driver, card and bus names plus the capability flags
//!   reported by `VIDIOC_QUERYCAP`
//! - [`IoCapabilities`] - boolean flags for the I/O methods a device offers

use std::fmt;

use crate::format::BufType;
use v4lcap_sys as ffi;

/// I/O methods a device supports
///
/// | Method | Flag | Buffers |
/// |--------|------|---------|
/// | read | `V4L2_CAP_READWRITE` | none, one read per frame |
/// | mmap / userptr | `V4L2_CAP_STREAMING` | queued buffers |
///
/// The streaming flag does not distinguish between mapped and user pointer
/// buffers; a driver lacking one of them rejects it at `VIDIOC_REQBUFS`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoCapabilities {
    pub read: bool,
    pub streaming: bool,
}

/// Capability descriptor of an open device
///
/// # Example
///
/// ```no_run
/// use v4lcap::device::Device;
/// use v4lcap::v4l2::V4l2Device;
///
/// let mut dev = V4l2Device::open("/dev/video0", false)?;
/// let caps = dev.capabilities()?;
/// println!("{} ({}) on {}", caps.card(), caps.driver(), caps.bus_info());
/// println!("video capture: {}", caps.is_video_capture());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    driver: String,
    card: String,
    bus_info: String,
    version: u32,
    /// Capabilities of this device node, `device_caps` when the driver
    /// reports it
    flags: u32,
}

impl Capabilities {
    pub fn new(driver: &str, card: &str, bus_info: &str, version: u32, flags: u32) -> Self {
        Capabilities {
            driver: driver.to_owned(),
            card: card.to_owned(),
            bus_info: bus_info.to_owned(),
            version,
            flags,
        }
    }

    pub(crate) fn from_ffi(raw: &ffi::v4l2_capability) -> Self {
        let flags = if raw.capabilities & ffi::V4L2_CAP_DEVICE_CAPS != 0 {
            raw.device_caps
        } else {
            raw.capabilities
        };

        Capabilities {
            driver: c_str(&raw.driver),
            card: c_str(&raw.card),
            bus_info: c_str(&raw.bus_info),
            version: raw.version,
            flags,
        }
    }

    /// Driver name (e.g., "bttv", "uvcvideo")
    pub fn driver(&self) -> &str {
        &self.driver
    }

    /// Card/device name
    pub fn card(&self) -> &str {
        &self.card
    }

    /// Bus information (e.g., "PCI:0000:03:00.0")
    pub fn bus_info(&self) -> &str {
        &self.bus_info
    }

    /// Kernel version the driver was built for, `(major, minor, patch)`
    pub fn version(&self) -> (u32, u32, u32) {
        (
            (self.version >> 16) & 0xff,
            (self.version >> 8) & 0xff,
            self.version & 0xff,
        )
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn is_video_capture(&self) -> bool {
        self.flags & ffi::V4L2_CAP_VIDEO_CAPTURE != 0
    }

    pub fn is_vbi_capture(&self) -> bool {
        self.flags & ffi::V4L2_CAP_VBI_CAPTURE != 0
    }

    pub fn is_sliced_vbi_capture(&self) -> bool {
        self.flags & ffi::V4L2_CAP_SLICED_VBI_CAPTURE != 0
    }

    pub fn is_radio(&self) -> bool {
        self.flags & ffi::V4L2_CAP_RADIO != 0
    }

    pub fn has_tuner(&self) -> bool {
        self.flags & ffi::V4L2_CAP_TUNER != 0
    }

    pub fn has_audio(&self) -> bool {
        self.flags & ffi::V4L2_CAP_AUDIO != 0
    }

    /// Whether the device can capture `kind` at all
    pub fn supports(&self, kind: BufType) -> bool {
        match kind {
            BufType::VideoCapture => self.is_video_capture(),
            BufType::VbiCapture => self.is_vbi_capture(),
            BufType::SlicedVbiCapture => self.is_sliced_vbi_capture(),
        }
    }

    pub fn io(&self) -> IoCapabilities {
        IoCapabilities {
            read: self.flags & ffi::V4L2_CAP_READWRITE != 0,
            streaming: self.flags & ffi::V4L2_CAP_STREAMING != 0,
        }
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) - {}", self.card, self.driver, self.bus_info)
    }
}

fn c_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
