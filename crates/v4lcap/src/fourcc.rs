// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 v4lcap developers
#![forbid(unsafe_code)]

use core::{fmt, result::Result};

/// V4L2 four-character pixel format code.
///
/// V4L2 packs the code as `a | b << 8 | c << 16 | d << 24` independently of
/// host endianness, so the `u32` conversions always use little-endian order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(C)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub const YUYV: FourCC = FourCC(*b"YUYV");
    pub const YVYU: FourCC = FourCC(*b"YVYU");
    pub const UYVY: FourCC = FourCC(*b"UYVY");
    pub const NV12: FourCC = FourCC(*b"NV12");
    pub const NV21: FourCC = FourCC(*b"NV21");
    /// Planar YUV 4:2:0 (`V4L2_PIX_FMT_YUV420`)
    pub const YU12: FourCC = FourCC(*b"YU12");
    /// Planar YVU 4:2:0 (`V4L2_PIX_FMT_YVU420`)
    pub const YV12: FourCC = FourCC(*b"YV12");
    pub const GREY: FourCC = FourCC(*b"GREY");
    /// 24-bit RGB (`V4L2_PIX_FMT_RGB24`)
    pub const RGB24: FourCC = FourCC(*b"RGB3");
    /// 24-bit BGR (`V4L2_PIX_FMT_BGR24`)
    pub const BGR24: FourCC = FourCC(*b"BGR3");
    /// 32-bit BGRX (`V4L2_PIX_FMT_BGR32`)
    pub const BGR32: FourCC = FourCC(*b"BGR4");
    /// 32-bit XRGB (`V4L2_PIX_FMT_RGB32`)
    pub const RGB32: FourCC = FourCC(*b"RGB4");
    /// 16-bit RGB 5-6-5 (`V4L2_PIX_FMT_RGB565`)
    pub const RGB565: FourCC = FourCC(*b"RGBP");
    /// 16-bit RGB 5-5-5 (`V4L2_PIX_FMT_RGB555`)
    pub const RGB555: FourCC = FourCC(*b"RGBO");
    /// 16-bit RGB 4-4-4 (`V4L2_PIX_FMT_RGB444`)
    pub const RGB444: FourCC = FourCC(*b"R444");
    pub const MJPEG: FourCC = FourCC(*b"MJPG");

    pub const fn new(code: &[u8; 4]) -> FourCC {
        FourCC(*code)
    }

    pub const fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }
}

impl From<&[u8; 4]> for FourCC {
    fn from(buf: &[u8; 4]) -> FourCC {
        FourCC(*buf)
    }
}

impl From<u32> for FourCC {
    fn from(val: u32) -> FourCC {
        FourCC(val.to_le_bytes())
    }
}

impl From<FourCC> for u32 {
    fn from(val: FourCC) -> Self {
        val.to_u32()
    }
}

impl std::str::FromStr for FourCC {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        match bytes {
            [a, b, c, d] => Ok(FourCC([*a, *b, *c, *d])),
            _ => Err(format!("FOURCC must be exactly 4 characters: {}", s)),
        }
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match core::str::from_utf8(&self.0) {
            Ok(s) => f.write_str(s),
            Err(_) => {
                // If we return fmt::Error, then for example format!() will panic, so we choose
                // an alternative representation instead
                let b = &self.0;
                f.write_fmt(format_args!(
                    "{}{}{}{}",
                    core::ascii::escape_default(b[0]),
                    core::ascii::escape_default(b[1]),
                    core::ascii::escape_default(b[2]),
                    core::ascii::escape_default(b[3])
                ))
            }
        }
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_tuple("FourCC")
            .field(&format_args!("{}", self))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u32_layout() {
        // v4l2_fourcc('Y', 'U', 'Y', 'V')
        assert_eq!(FourCC::YUYV.to_u32(), 0x5659_5559);
        assert_eq!(FourCC::from(0x3231_564e), FourCC::NV12);
    }

    #[test]
    fn test_parse() {
        assert_eq!("RGB3".parse::<FourCC>(), Ok(FourCC::RGB24));
        assert!("RGB".parse::<FourCC>().is_err());
    }

    #[test]
    fn test_display_non_ascii() {
        assert_eq!(FourCC([b'A', 0xff, b'B', b'C']).to_string(), "A\\xffBC");
    }
}
