// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 v4lcap developers

//! Format descriptors exchanged with a capture device.
//!
//! A [`Format`] is a tagged description of one unit of capture data: a video
//! frame ([`PixFormat`]), a raw VBI capture ([`VbiFormat`]) or a block of
//! sliced VBI records ([`SlicedVbiFormat`]). [`Format::size`] is the number of
//! bytes the device delivers per unit and is what buffers are sized from.

use std::fmt;

use crate::fourcc::FourCC;
use v4lcap_sys as ffi;

/// Capture kind of a device queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BufType {
    /// Video frames (`V4L2_BUF_TYPE_VIDEO_CAPTURE`)
    VideoCapture = ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE,
    /// Raw VBI scan lines (`V4L2_BUF_TYPE_VBI_CAPTURE`)
    VbiCapture = ffi::V4L2_BUF_TYPE_VBI_CAPTURE,
    /// Sliced VBI records (`V4L2_BUF_TYPE_SLICED_VBI_CAPTURE`)
    SlicedVbiCapture = ffi::V4L2_BUF_TYPE_SLICED_VBI_CAPTURE,
}

impl BufType {
    pub fn raw(self) -> u32 {
        self as u32
    }

    pub fn is_vbi(self) -> bool {
        matches!(self, BufType::VbiCapture | BufType::SlicedVbiCapture)
    }

    pub fn name(&self) -> &'static str {
        match self {
            BufType::VideoCapture => "video",
            BufType::VbiCapture => "vbi",
            BufType::SlicedVbiCapture => "sliced-vbi",
        }
    }
}

impl fmt::Display for BufType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Single-planar video format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixFormat {
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCC,
    pub field: u32,
    pub bytes_per_line: u32,
    /// Size in bytes of one complete frame
    pub size_image: u32,
    pub colorspace: u32,
}

impl PixFormat {
    pub fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        let mut pix = PixFormat {
            width,
            height,
            fourcc,
            field: ffi::V4L2_FIELD_NONE,
            bytes_per_line: 0,
            size_image: 0,
            colorspace: 0,
        };
        pix.update_stride();
        pix
    }

    /// Recompute `bytes_per_line` and `size_image` for packed and 4:2:0
    /// layouts known to the converter. Unknown (compressed) formats keep
    /// whatever size the driver reported.
    pub fn update_stride(&mut self) {
        let (num, den) = match self.fourcc {
            FourCC::RGB32 | FourCC::BGR32 => (4, 1),
            FourCC::RGB24 | FourCC::BGR24 => (3, 1),
            FourCC::YUYV | FourCC::YVYU | FourCC::UYVY => (2, 1),
            FourCC::RGB565 | FourCC::RGB555 | FourCC::RGB444 => (2, 1),
            FourCC::GREY => (1, 1),
            FourCC::NV12 | FourCC::NV21 | FourCC::YU12 | FourCC::YV12 => {
                self.bytes_per_line = self.width;
                self.size_image = self.width * self.height * 3 / 2;
                return;
            }
            _ => return,
        };
        self.bytes_per_line = self.width * num / den;
        self.size_image = self.bytes_per_line * self.height;
    }
}

impl fmt::Display for PixFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {} ({} bytes)",
            self.width, self.height, self.fourcc, self.size_image
        )
    }
}

/// Raw VBI format: scan lines of 8-bit samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VbiFormat {
    /// Samples per second
    pub sampling_rate: u32,
    /// Samples from the start of the line (0H) to the first captured sample
    pub offset: u32,
    pub samples_per_line: u32,
    pub sample_format: FourCC,
    /// First captured line of each field, ITU-R line numbering
    pub start: [i32; 2],
    /// Number of captured lines per field
    pub count: [u32; 2],
    pub flags: u32,
}

impl VbiFormat {
    /// Number of rows delivered per capture, both fields.
    pub fn rows(&self) -> u32 {
        self.count[0] + self.count[1]
    }

    pub fn is_interlaced(&self) -> bool {
        self.flags & ffi::V4L2_VBI_INTERLACED != 0
    }
}

/// Sliced VBI format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlicedVbiFormat {
    pub service_set: u16,
    /// Service mask per field and line
    pub service_lines: [[u16; 24]; 2],
    /// Bytes per read or buffer, as reported by the device
    pub io_size: u32,
}

/// Tagged format descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Video(PixFormat),
    Vbi(VbiFormat),
    SlicedVbi(SlicedVbiFormat),
}

impl Format {
    pub fn buf_type(&self) -> BufType {
        match self {
            Format::Video(_) => BufType::VideoCapture,
            Format::Vbi(_) => BufType::VbiCapture,
            Format::SlicedVbi(_) => BufType::SlicedVbiCapture,
        }
    }

    /// Bytes per unit of capture data
    pub fn size(&self) -> usize {
        match self {
            Format::Video(pix) => pix.size_image as usize,
            Format::Vbi(vbi) => vbi.samples_per_line as usize * vbi.rows() as usize,
            Format::SlicedVbi(sliced) => sliced.io_size as usize,
        }
    }

    pub fn as_video(&self) -> Option<&PixFormat> {
        match self {
            Format::Video(pix) => Some(pix),
            _ => None,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Video(pix) => write!(f, "video {}", pix),
            Format::Vbi(vbi) => write!(
                f,
                "vbi {} samples x {} lines @ {} Hz",
                vbi.samples_per_line,
                vbi.rows(),
                vbi.sampling_rate
            ),
            Format::SlicedVbi(sliced) => write!(
                f,
                "sliced-vbi services 0x{:04x} io_size {}",
                sliced.service_set, sliced.io_size
            ),
        }
    }
}

/// Analog video standard bitmask (`v4l2_std_id`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VideoStandard(pub u64);

impl VideoStandard {
    pub const PAL: VideoStandard = VideoStandard(ffi::V4L2_STD_PAL);
    pub const NTSC: VideoStandard = VideoStandard(ffi::V4L2_STD_NTSC);
    pub const SECAM: VideoStandard = VideoStandard(ffi::V4L2_STD_SECAM);

    /// Whether the standard belongs to the 625-line, 50 Hz family.
    pub fn is_625_50(&self) -> bool {
        self.0 & ffi::V4L2_STD_625_50 != 0
    }

    /// Sliced VBI services carried by this standard family
    pub fn sliced_service_set(&self) -> u16 {
        if self.is_625_50() {
            ffi::V4L2_SLICED_VBI_625
        } else {
            ffi::V4L2_SLICED_VBI_525
        }
    }
}

/// Time per frame, `numerator / denominator` seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fraction {
    pub numerator: u32,
    pub denominator: u32,
}

impl Fraction {
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Fraction {
            numerator,
            denominator,
        }
    }

    /// Frame interval for a frame rate in frames per second
    pub fn from_fps(fps: u32) -> Self {
        Fraction::new(1, fps)
    }
}
