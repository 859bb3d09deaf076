// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 v4lcap developers

//! Device Handle
//!
//! The [`Device`] trait is the control plane of a capture device: format
//! negotiation, buffer registration, queue/dequeue, streaming and reads. The
//! real implementation is [`crate::v4l2::V4l2Device`]; the buffer pools and the
//! acquisition loop only ever talk to the trait.
//!
//! Every primitive fails with a [`DeviceError`] naming the operation and the
//! errno. "No data yet" is not a failure: [`Device::dequeue_buffer`] and
//! [`Device::read`] report it as [`Dequeue::WouldBlock`] /
//! [`ReadOutcome::WouldBlock`].

use std::{error, fmt, io, ptr::NonNull, time::Duration};

use unix_ts::Timestamp;

use crate::format::{BufType, Format, Fraction, VideoStandard};
use crate::v4l2::Capabilities;
use v4lcap_sys as ffi;

/// Failure of a device primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceError {
    /// Primitive that failed, e.g. `"VIDIOC_DQBUF"`
    pub operation: &'static str,
    pub errno: i32,
}

impl DeviceError {
    pub fn new(operation: &'static str, errno: i32) -> Self {
        DeviceError { operation, errno }
    }

    /// Capture errno from the last failed system call
    pub fn last_os_error(operation: &'static str) -> Self {
        let errno = io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO);
        DeviceError { operation, errno }
    }

    /// Whether the error only means that no data is available right now
    pub fn would_block(&self) -> bool {
        self.errno == libc::EAGAIN || self.errno == libc::EWOULDBLOCK || self.errno == libc::EINTR
    }

    pub fn io_error(&self) -> io::Error {
        io::Error::from_raw_os_error(self.errno)
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} failed: {}", self.operation, self.io_error())
    }
}

impl error::Error for DeviceError {}

/// Buffer memory model used with the streaming ioctls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Memory {
    /// Driver allocates, application maps
    Mmap = ffi::V4L2_MEMORY_MMAP,
    /// Application allocates and passes a pointer
    UserPtr = ffi::V4L2_MEMORY_USERPTR,
}

impl Memory {
    pub fn raw(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Memory::Mmap => write!(f, "MMAP"),
            Memory::UserPtr => write!(f, "USERPTR"),
        }
    }
}

/// Result of VIDIOC_QUERYBUF for a mapped buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub index: u32,
    pub length: u32,
    /// Offset to pass to mmap
    pub offset: u32,
}

/// Device memory mapped into the application address space.
///
/// A region is not `Clone`; [`Device::unmap_buffer`] consumes it, so a region
/// can be unmapped at most once.
#[derive(Debug)]
pub struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl MappedRegion {
    /// # Safety
    ///
    /// `ptr` must point to `len` bytes that stay valid until the region is
    /// handed back to [`Device::unmap_buffer`].
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize) -> Self {
        MappedRegion { ptr, len }
    }

    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Safety
    ///
    /// The caller must own the buffer, i.e. it is dequeued and not yet queued
    /// back, so the device is not writing into it concurrently.
    pub unsafe fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

/// Storage handed to the device with VIDIOC_QBUF
#[derive(Debug, Clone, Copy)]
pub enum Storage {
    /// A buffer allocated by the device and identified by its index
    Mapped,
    /// An application region the device writes into
    User { ptr: NonNull<u8>, len: usize },
}

/// A buffer returned by VIDIOC_DQBUF
#[derive(Debug, Clone, Copy)]
pub struct DequeuedBuffer {
    pub index: u32,
    pub bytes_used: u32,
    /// Driver frame sequence number
    pub sequence: u32,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Copy)]
pub enum Dequeue {
    Ready(DequeuedBuffer),
    /// No filled buffer available yet
    WouldBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Number of bytes read
    Data(usize),
    /// No data available yet
    WouldBlock,
}

/// Control plane of an open capture device
pub trait Device {
    /// VIDIOC_QUERYCAP
    fn capabilities(&mut self) -> Result<Capabilities, DeviceError>;

    /// VIDIOC_G_FMT
    fn get_format(&mut self, kind: BufType) -> Result<Format, DeviceError>;

    /// VIDIOC_S_FMT, returning the format as adjusted by the driver
    fn set_format(&mut self, format: &Format) -> Result<Format, DeviceError>;

    /// VIDIOC_G_STD
    fn standard(&mut self) -> Result<VideoStandard, DeviceError>;

    /// VIDIOC_S_PARM time-per-frame, returning the interval the driver chose
    fn set_frame_interval(
        &mut self,
        kind: BufType,
        interval: Fraction,
    ) -> Result<Fraction, DeviceError>;

    /// VIDIOC_REQBUFS. `count == 0` releases every buffer of the queue.
    fn request_buffers(
        &mut self,
        kind: BufType,
        memory: Memory,
        count: u32,
    ) -> Result<u32, DeviceError>;

    /// VIDIOC_QUERYBUF for a mapped buffer
    fn query_buffer(&mut self, kind: BufType, index: u32) -> Result<BufferInfo, DeviceError>;

    fn map_buffer(&mut self, info: &BufferInfo) -> Result<MappedRegion, DeviceError>;

    fn unmap_buffer(&mut self, region: MappedRegion) -> Result<(), DeviceError>;

    /// VIDIOC_QBUF: ownership of the buffer passes to the device
    fn queue_buffer(&mut self, kind: BufType, index: u32, storage: Storage)
        -> Result<(), DeviceError>;

    /// VIDIOC_DQBUF: ownership of the returned buffer passes to the caller
    fn dequeue_buffer(&mut self, kind: BufType, memory: Memory) -> Result<Dequeue, DeviceError>;

    /// read(2) I/O
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, DeviceError>;

    fn stream_on(&mut self, kind: BufType) -> Result<(), DeviceError>;

    fn stream_off(&mut self, kind: BufType) -> Result<(), DeviceError>;

    /// VIDIOC_ENCODER_CMD stop
    fn encoder_stop(&mut self) -> Result<(), DeviceError>;

    /// Wait until the device is readable; `false` on timeout
    fn wait_readable(&mut self, timeout: Duration) -> Result<bool, DeviceError>;
}
