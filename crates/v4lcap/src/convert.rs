// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 v4lcap developers

//! Format Negotiator & Converter
//!
//! [`negotiate`] decides whether frames in the committed source format can be
//! handed to a display sink as they are, or must first be converted into a
//! 24-bit interleaved RGB format. [`PixelConverter`] is the built-in
//! [`Converter`], doing BT.601 YUV to RGB in integer arithmetic.
//!
//! The capability probe [`Converter::try_format`] is allowed to rewrite the
//! source format it is given (to suggest one it converts better from). The
//! source format is already committed to the device at that point, so the
//! negotiator only ever probes with a scratch copy and drops the suggestion.

use std::{error, fmt};

use crate::fourcc::FourCC;
use crate::format::PixFormat;

/// Formats a display sink accepts without conversion
pub const DISPLAYABLE: [FourCC; 5] = [
    FourCC::BGR32,
    FourCC::RGB24,
    FourCC::RGB565,
    FourCC::RGB555,
    FourCC::RGB444,
];

/// Destination chosen when the caller does not request one
pub const DEFAULT_DESTINATION: FourCC = FourCC::RGB24;

pub fn is_displayable(fourcc: FourCC) -> bool {
    DISPLAYABLE.contains(&fourcc)
}

/// Per-frame conversion failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    /// The converter cannot read this source format
    UnsupportedSource(FourCC),
    /// The converter cannot produce this destination format
    UnsupportedDestination(FourCC),
    /// Fewer source bytes than one frame of the source format
    ShortSource { expected: usize, actual: usize },
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionError::UnsupportedSource(fourcc) => {
                write!(f, "cannot convert from {}", fourcc)
            }
            ConversionError::UnsupportedDestination(fourcc) => {
                write!(f, "cannot convert to {}", fourcc)
            }
            ConversionError::ShortSource { expected, actual } => write!(
                f,
                "short frame: {} bytes, expected {}",
                actual, expected
            ),
        }
    }
}

impl error::Error for ConversionError {}

/// Pixel format converter
pub trait Converter {
    /// Adjust `dest` to the format the converter would produce from `src`.
    ///
    /// May rewrite `src` to suggest a better source format.
    fn try_format(
        &mut self,
        dest: &mut PixFormat,
        src: &mut PixFormat,
    ) -> Result<(), ConversionError>;

    /// Convert one frame, writing at most `dst.len()` bytes. Returns the
    /// number of bytes written.
    fn convert(
        &mut self,
        src_fmt: &PixFormat,
        dst_fmt: &PixFormat,
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<usize, ConversionError>;
}

/// Outcome of display format negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    /// The committed source format, never altered by negotiation
    pub source: PixFormat,
    pub destination: PixFormat,
    pub must_convert: bool,
}

impl Negotiated {
    /// Bytes of one display frame
    pub fn display_size(&self) -> usize {
        self.destination.size_image as usize
    }
}

/// Pick the display format for frames in `source`.
///
/// A displayable source is passed through (`must_convert == false`).
/// Otherwise the destination is `requested`, or [`DEFAULT_DESTINATION`], as
/// adjusted by the converter's probe.
pub fn negotiate(
    source: &PixFormat,
    requested: Option<FourCC>,
    converter: &mut dyn Converter,
) -> Negotiated {
    if is_displayable(source.fourcc) {
        log::debug!("{} is displayable, no conversion", source.fourcc);
        return Negotiated {
            source: *source,
            destination: *source,
            must_convert: false,
        };
    }

    let mut destination = PixFormat::new(
        source.width,
        source.height,
        requested.unwrap_or(DEFAULT_DESTINATION),
    );
    let mut probe = *source;
    if let Err(err) = converter.try_format(&mut destination, &mut probe) {
        log::warn!("Conversion probe failed: {}", err);
    }
    if probe != *source {
        log::debug!(
            "Ignoring suggested source format {}, {} is committed",
            probe,
            source
        );
    }
    destination.update_stride();

    log::debug!("Converting {} to {}", source, destination);
    Negotiated {
        source: *source,
        destination,
        must_convert: true,
    }
}

/// Built-in converter to `RGB3` / `BGR3`
#[derive(Debug, Default)]
pub struct PixelConverter;

impl PixelConverter {
    pub fn new() -> Self {
        PixelConverter
    }

    pub fn supports_source(fourcc: FourCC) -> bool {
        Layout::of(fourcc).is_some()
    }
}

/// Byte arrangement of a source format
#[derive(Debug, Clone, Copy)]
enum Layout {
    /// 4:2:2 packed, byte offsets of Y0, U, Y1, V within a macropixel
    Packed422 { y0: usize, u: usize, y1: usize, v: usize },
    /// 4:2:0 with an interleaved chroma plane, `u_first` for NV12
    SemiPlanar { u_first: bool },
    /// 4:2:0 with separate chroma planes, `u_first` for YU12
    Planar { u_first: bool },
    Grey,
    /// Packed RGB, byte offsets of R, G, B and bytes per pixel
    Rgb { r: usize, g: usize, b: usize, bpp: usize },
}

impl Layout {
    fn of(fourcc: FourCC) -> Option<Layout> {
        let layout = match fourcc {
            FourCC::YUYV => Layout::Packed422 { y0: 0, u: 1, y1: 2, v: 3 },
            FourCC::YVYU => Layout::Packed422 { y0: 0, v: 1, y1: 2, u: 3 },
            FourCC::UYVY => Layout::Packed422 { u: 0, y0: 1, v: 2, y1: 3 },
            FourCC::NV12 => Layout::SemiPlanar { u_first: true },
            FourCC::NV21 => Layout::SemiPlanar { u_first: false },
            FourCC::YU12 => Layout::Planar { u_first: true },
            FourCC::YV12 => Layout::Planar { u_first: false },
            FourCC::GREY => Layout::Grey,
            FourCC::RGB24 => Layout::Rgb { r: 0, g: 1, b: 2, bpp: 3 },
            FourCC::BGR24 => Layout::Rgb { r: 2, g: 1, b: 0, bpp: 3 },
            FourCC::BGR32 => Layout::Rgb { r: 2, g: 1, b: 0, bpp: 4 },
            FourCC::RGB32 => Layout::Rgb { r: 1, g: 2, b: 3, bpp: 4 },
            _ => return None,
        };
        Some(layout)
    }
}

/// Geometry of a source frame
struct Frame<'a> {
    buf: &'a [u8],
    layout: Layout,
    width: usize,
    height: usize,
    stride: usize,
}

impl<'a> Frame<'a> {
    fn new(fmt: &PixFormat, buf: &'a [u8]) -> Result<Self, ConversionError> {
        let layout = Layout::of(fmt.fourcc).ok_or(ConversionError::UnsupportedSource(fmt.fourcc))?;
        let width = fmt.width as usize;
        let height = fmt.height as usize;
        let min_stride = match layout {
            Layout::Packed422 { .. } => width.div_ceil(2) * 4,
            Layout::SemiPlanar { .. } | Layout::Planar { .. } | Layout::Grey => width,
            Layout::Rgb { bpp, .. } => width * bpp,
        };
        let stride = (fmt.bytes_per_line as usize).max(min_stride);

        let frame = Frame {
            buf,
            layout,
            width,
            height,
            stride,
        };
        let expected = frame.required();
        if buf.len() < expected {
            return Err(ConversionError::ShortSource {
                expected,
                actual: buf.len(),
            });
        }
        Ok(frame)
    }

    fn luma_size(&self) -> usize {
        self.stride * self.height
    }

    fn chroma_width(&self) -> usize {
        self.width.div_ceil(2)
    }

    /// Bytes between chroma rows: the luma stride for an interleaved plane,
    /// half of it for each separate plane.
    fn chroma_stride(&self) -> usize {
        match self.layout {
            Layout::SemiPlanar { .. } => self.stride.max(self.chroma_width() * 2),
            _ => self.stride.div_ceil(2),
        }
    }

    fn chroma_plane(&self) -> usize {
        self.chroma_stride() * self.height.div_ceil(2)
    }

    fn required(&self) -> usize {
        match self.layout {
            Layout::SemiPlanar { .. } => self.luma_size() + self.chroma_plane(),
            Layout::Planar { .. } => self.luma_size() + 2 * self.chroma_plane(),
            _ => self.luma_size(),
        }
    }

    fn rgb(&self, x: usize, y: usize) -> [u8; 3] {
        let b = self.buf;
        match self.layout {
            Layout::Packed422 { y0, u, y1, v } => {
                let base = y * self.stride + (x / 2) * 4;
                let luma = if x % 2 == 0 { b[base + y0] } else { b[base + y1] };
                yuv_to_rgb(luma, b[base + u], b[base + v])
            }
            Layout::SemiPlanar { u_first } => {
                let luma = b[y * self.stride + x];
                let base = self.luma_size() + (y / 2) * self.chroma_stride() + (x / 2) * 2;
                let (u, v) = if u_first {
                    (b[base], b[base + 1])
                } else {
                    (b[base + 1], b[base])
                };
                yuv_to_rgb(luma, u, v)
            }
            Layout::Planar { u_first } => {
                let luma = b[y * self.stride + x];
                let offset = self.luma_size() + (y / 2) * self.chroma_stride() + x / 2;
                let first = b[offset];
                let second = b[offset + self.chroma_plane()];
                if u_first {
                    yuv_to_rgb(luma, first, second)
                } else {
                    yuv_to_rgb(luma, second, first)
                }
            }
            Layout::Grey => {
                let luma = b[y * self.stride + x];
                [luma, luma, luma]
            }
            Layout::Rgb { r, g, b: blue, bpp } => {
                let base = y * self.stride + x * bpp;
                [b[base + r], b[base + g], b[base + blue]]
            }
        }
    }
}

fn clamp(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// ITU-R BT.601 limited range YCbCr to RGB
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = 298 * (i32::from(y) - 16);
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    [
        clamp((c + 409 * e + 128) >> 8),
        clamp((c - 100 * d - 208 * e + 128) >> 8),
        clamp((c + 516 * d + 128) >> 8),
    ]
}

impl Converter for PixelConverter {
    fn try_format(
        &mut self,
        dest: &mut PixFormat,
        src: &mut PixFormat,
    ) -> Result<(), ConversionError> {
        if dest.fourcc != FourCC::RGB24 && dest.fourcc != FourCC::BGR24 {
            dest.fourcc = DEFAULT_DESTINATION;
        }
        dest.width = src.width;
        dest.height = src.height;
        dest.update_stride();

        if Layout::of(src.fourcc).is_none() {
            // suggest a format this converter handles
            src.fourcc = FourCC::YUYV;
            src.update_stride();
        }
        Ok(())
    }

    fn convert(
        &mut self,
        src_fmt: &PixFormat,
        dst_fmt: &PixFormat,
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<usize, ConversionError> {
        let swap = match dst_fmt.fourcc {
            FourCC::RGB24 => false,
            FourCC::BGR24 => true,
            other => return Err(ConversionError::UnsupportedDestination(other)),
        };
        let frame = Frame::new(src_fmt, src)?;

        let width = frame.width.min(dst_fmt.width as usize);
        let height = frame.height.min(dst_fmt.height as usize);
        let dst_stride = (dst_fmt.bytes_per_line as usize).max(dst_fmt.width as usize * 3);
        let capacity = dst.len().min(dst_stride * dst_fmt.height as usize);
        let mut written = 0;

        'rows: for y in 0..height {
            let row = y * dst_stride;
            for x in 0..width {
                let at = row + x * 3;
                if at >= capacity {
                    break 'rows;
                }
                let [r, g, b] = frame.rgb(x, y);
                let px = if swap { [b, g, r] } else { [r, g, b] };
                let n = (capacity - at).min(3);
                dst[at..at + n].copy_from_slice(&px[..n]);
                written = at + n;
            }
        }

        Ok(written)
    }
}
