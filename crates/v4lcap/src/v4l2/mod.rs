// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 v4lcap developers

//! V4L2 device access
//!
//! [`V4l2Device`] implements [`crate::device::Device`] on top of a real device
//! node, through libv4l2 when it is installed and through the kernel interface
//! otherwise. [`Capabilities`] is what `VIDIOC_QUERYCAP` reports about it.
//!
//! ```no_run
//! use v4lcap::device::Device;
//! use v4lcap::format::BufType;
//! use v4lcap::v4l2::V4l2Device;
//!
//! let mut dev = V4l2Device::open("/dev/video0", false)?;
//! let caps = dev.capabilities()?;
//! if caps.supports(BufType::VideoCapture) {
//!     println!("{}", dev.get_format(BufType::VideoCapture)?);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod caps;
mod device;

pub use caps::{Capabilities, IoCapabilities};
pub use device::V4l2Device;
