// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 v4lcap developers

// Layouts follow include/uapi/linux/videodev2.h for the capture subset used by
// v4lcap. Field names keep the kernel spelling so they can be cross-checked.

use libc::{c_int, c_ulong, timeval};

pub type v4l2_std_id = u64;

pub const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
pub const V4L2_BUF_TYPE_VBI_CAPTURE: u32 = 4;
pub const V4L2_BUF_TYPE_SLICED_VBI_CAPTURE: u32 = 6;

pub const V4L2_MEMORY_MMAP: u32 = 1;
pub const V4L2_MEMORY_USERPTR: u32 = 2;

pub const V4L2_FIELD_ANY: u32 = 0;
pub const V4L2_FIELD_NONE: u32 = 1;

pub const V4L2_CAP_VIDEO_CAPTURE: u32 = 0x0000_0001;
pub const V4L2_CAP_VBI_CAPTURE: u32 = 0x0000_0010;
pub const V4L2_CAP_SLICED_VBI_CAPTURE: u32 = 0x0000_0040;
pub const V4L2_CAP_TUNER: u32 = 0x0001_0000;
pub const V4L2_CAP_AUDIO: u32 = 0x0002_0000;
pub const V4L2_CAP_RADIO: u32 = 0x0004_0000;
pub const V4L2_CAP_READWRITE: u32 = 0x0100_0000;
pub const V4L2_CAP_STREAMING: u32 = 0x0400_0000;
pub const V4L2_CAP_DEVICE_CAPS: u32 = 0x8000_0000;

pub const V4L2_VBI_UNSYNC: u32 = 1 << 0;
pub const V4L2_VBI_INTERLACED: u32 = 1 << 1;

pub const V4L2_SLICED_TELETEXT_B: u16 = 0x0001;
pub const V4L2_SLICED_VPS: u16 = 0x0400;
pub const V4L2_SLICED_CAPTION_525: u16 = 0x1000;
pub const V4L2_SLICED_WSS_625: u16 = 0x4000;
pub const V4L2_SLICED_VBI_525: u16 = V4L2_SLICED_CAPTION_525;
pub const V4L2_SLICED_VBI_625: u16 =
    V4L2_SLICED_TELETEXT_B | V4L2_SLICED_VPS | V4L2_SLICED_WSS_625;

pub const V4L2_STD_PAL: v4l2_std_id = 0x0000_00ff;
pub const V4L2_STD_PAL_M: v4l2_std_id = 0x0000_0100;
pub const V4L2_STD_PAL_N: v4l2_std_id = 0x0000_0200;
pub const V4L2_STD_PAL_NC: v4l2_std_id = 0x0000_0400;
pub const V4L2_STD_PAL_60: v4l2_std_id = 0x0000_0800;
pub const V4L2_STD_NTSC: v4l2_std_id = 0x0000_b000;
pub const V4L2_STD_NTSC_443: v4l2_std_id = 0x0000_4000;
pub const V4L2_STD_SECAM: v4l2_std_id = 0x00ff_0000;
pub const V4L2_STD_525_60: v4l2_std_id =
    V4L2_STD_PAL_M | V4L2_STD_PAL_60 | V4L2_STD_NTSC | V4L2_STD_NTSC_443;
pub const V4L2_STD_625_50: v4l2_std_id =
    V4L2_STD_PAL | V4L2_STD_PAL_N | V4L2_STD_PAL_NC | V4L2_STD_SECAM;

pub const V4L2_ENC_CMD_STOP: u32 = 1;

pub const V4L2_CAP_TIMEPERFRAME: u32 = 0x1000;

/// libv4l2 `v4l2_fd_open` flag: keep the driver's native formats only.
pub const V4L2_DISABLE_CONVERSION: c_int = 0x01;
/// libv4l2 `v4l2_fd_open` flag: report emulated formats from VIDIOC_ENUM_FMT.
pub const V4L2_ENABLE_ENUM_FMT_EMULATION: c_int = 0x02;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_capability {
    pub driver: [u8; 16],
    pub card: [u8; 32],
    pub bus_info: [u8; 32],
    pub version: u32,
    pub capabilities: u32,
    pub device_caps: u32,
    pub reserved: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct v4l2_pix_format {
    pub width: u32,
    pub height: u32,
    pub pixelformat: u32,
    pub field: u32,
    pub bytesperline: u32,
    pub sizeimage: u32,
    pub colorspace: u32,
    pub priv_: u32,
    pub flags: u32,
    pub ycbcr_enc: u32,
    pub quantization: u32,
    pub xfer_func: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct v4l2_vbi_format {
    pub sampling_rate: u32,
    pub offset: u32,
    pub samples_per_line: u32,
    pub sample_format: u32,
    pub start: [i32; 2],
    pub count: [u32; 2],
    pub flags: u32,
    pub reserved: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct v4l2_sliced_vbi_format {
    pub service_set: u16,
    pub service_lines: [[u16; 24]; 2],
    pub io_size: u32,
    pub reserved: [u32; 2],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_format_fmt {
    pub pix: v4l2_pix_format,
    pub vbi: v4l2_vbi_format,
    pub sliced: v4l2_sliced_vbi_format,
    pub raw_data: [u8; 200],
    // struct v4l2_window carries pointers, which makes the kernel union
    // 8-byte aligned on 64-bit targets.
    _align: [u64; 25],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_format {
    pub type_: u32,
    pub fmt: v4l2_format_fmt,
}

impl v4l2_format {
    pub fn new(type_: u32) -> Self {
        v4l2_format {
            type_,
            fmt: v4l2_format_fmt { raw_data: [0; 200] },
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct v4l2_requestbuffers {
    pub count: u32,
    pub type_: u32,
    pub memory: u32,
    pub capabilities: u32,
    pub flags: u8,
    pub reserved: [u8; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct v4l2_timecode {
    pub type_: u32,
    pub flags: u32,
    pub frames: u8,
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub userbits: [u8; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_buffer_m {
    pub offset: u32,
    pub userptr: c_ulong,
    pub planes: *mut libc::c_void,
    pub fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_buffer {
    pub index: u32,
    pub type_: u32,
    pub bytesused: u32,
    pub flags: u32,
    pub field: u32,
    pub timestamp: timeval,
    pub timecode: v4l2_timecode,
    pub sequence: u32,
    pub memory: u32,
    pub m: v4l2_buffer_m,
    pub length: u32,
    pub reserved2: u32,
    pub request_fd: i32,
}

impl v4l2_buffer {
    pub fn new(type_: u32, memory: u32, index: u32) -> Self {
        v4l2_buffer {
            index,
            type_,
            bytesused: 0,
            flags: 0,
            field: 0,
            timestamp: timeval {
                tv_sec: 0,
                tv_usec: 0,
            },
            timecode: v4l2_timecode::default(),
            sequence: 0,
            memory,
            m: v4l2_buffer_m { userptr: 0 },
            length: 0,
            reserved2: 0,
            request_fd: 0,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct v4l2_encoder_cmd {
    pub cmd: u32,
    pub flags: u32,
    pub data: [u32; 8],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct v4l2_fract {
    pub numerator: u32,
    pub denominator: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct v4l2_captureparm {
    pub capability: u32,
    pub capturemode: u32,
    pub timeperframe: v4l2_fract,
    pub extendedmode: u32,
    pub readbuffers: u32,
    pub reserved: [u32; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_streamparm_parm {
    pub capture: v4l2_captureparm,
    pub raw_data: [u8; 200],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_streamparm {
    pub type_: u32,
    pub parm: v4l2_streamparm_parm,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_sliced_vbi_data {
    pub id: u32,
    pub field: u32,
    pub line: u32,
    pub reserved: u32,
    pub data: [u8; 48],
}

const IOC_NRBITS: u32 = 8;
const IOC_TYPEBITS: u32 = 8;
const IOC_SIZEBITS: u32 = 14;
const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: u32 = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + IOC_SIZEBITS;
const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

const fn ioc(dir: u32, nr: u32, size: usize) -> c_ulong {
    ((dir << IOC_DIRSHIFT)
        | ((b'V' as u32) << IOC_TYPESHIFT)
        | (nr << IOC_NRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)) as c_ulong
}

const fn ior<T>(nr: u32) -> c_ulong {
    ioc(IOC_READ, nr, std::mem::size_of::<T>())
}

const fn iow<T>(nr: u32) -> c_ulong {
    ioc(IOC_WRITE, nr, std::mem::size_of::<T>())
}

const fn iowr<T>(nr: u32) -> c_ulong {
    ioc(IOC_READ | IOC_WRITE, nr, std::mem::size_of::<T>())
}

pub const VIDIOC_QUERYCAP: c_ulong = ior::<v4l2_capability>(0);
pub const VIDIOC_G_FMT: c_ulong = iowr::<v4l2_format>(4);
pub const VIDIOC_S_FMT: c_ulong = iowr::<v4l2_format>(5);
pub const VIDIOC_REQBUFS: c_ulong = iowr::<v4l2_requestbuffers>(8);
pub const VIDIOC_QUERYBUF: c_ulong = iowr::<v4l2_buffer>(9);
pub const VIDIOC_QBUF: c_ulong = iowr::<v4l2_buffer>(15);
pub const VIDIOC_DQBUF: c_ulong = iowr::<v4l2_buffer>(17);
pub const VIDIOC_STREAMON: c_ulong = iow::<c_int>(18);
pub const VIDIOC_STREAMOFF: c_ulong = iow::<c_int>(19);
pub const VIDIOC_G_PARM: c_ulong = iowr::<v4l2_streamparm>(21);
pub const VIDIOC_S_PARM: c_ulong = iowr::<v4l2_streamparm>(22);
pub const VIDIOC_G_STD: c_ulong = ior::<v4l2_std_id>(23);
pub const VIDIOC_ENCODER_CMD: c_ulong = iowr::<v4l2_encoder_cmd>(77);
