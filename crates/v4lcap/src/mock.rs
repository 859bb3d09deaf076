// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 v4lcap developers

//! In-memory [`Device`] used by the unit tests.
//!
//! Behaves like a well-mannered V4L2 driver: buffers must be registered
//! before they are queued, `VIDIOC_REQBUFS` is refused while buffers are
//! mapped or the queue is streaming, and `VIDIOC_DQBUF` hands out queued
//! buffers in FIFO order filled with the frames pushed by the test.

use std::{collections::VecDeque, ptr::NonNull, time::Duration};

use unix_ts::Timestamp;

use crate::device::{
    BufferInfo, Dequeue, DequeuedBuffer, Device, DeviceError, MappedRegion, Memory, ReadOutcome,
    Storage,
};
use crate::fourcc::FourCC;
use crate::format::{
    BufType, Format, Fraction, PixFormat, SlicedVbiFormat, VbiFormat, VideoStandard,
};
use crate::v4l2::Capabilities;
use v4lcap_sys as ffi;

const PAGE: u32 = 4096;

struct Chunk {
    ptr: NonNull<u8>,
    len: usize,
}

impl Chunk {
    fn alloc(len: usize) -> Chunk {
        let boxed = vec![0u8; len.max(1)].into_boxed_slice();
        let len = boxed.len();
        let ptr = NonNull::new(Box::into_raw(boxed) as *mut u8).unwrap();
        Chunk { ptr, len }
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        let slice = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
        drop(unsafe { Box::from_raw(slice) });
    }
}

pub(crate) struct MockDevice {
    video: Format,
    vbi: Format,
    sliced: Format,
    standard: VideoStandard,
    /// Buffers granted per request, the requested count when `None`
    grant: Option<u32>,
    map_failure: Option<u32>,
    /// fourccs accepted by S_FMT, any when empty
    supported: Vec<FourCC>,
    memory: Vec<Chunk>,
    registered: u32,
    mapped: usize,
    unmapped: usize,
    queue: VecDeque<(u32, Storage)>,
    frames: VecDeque<Vec<u8>>,
    read_error: Option<i32>,
    dequeue_error: Option<i32>,
    streaming: bool,
    encoder_stops: usize,
    sequence: u32,
    interval: Option<Fraction>,
    calls: Vec<String>,
}

impl MockDevice {
    fn new(video: Format, vbi: Format, sliced: Format, standard: VideoStandard) -> Self {
        MockDevice {
            video,
            vbi,
            sliced,
            standard,
            grant: None,
            map_failure: None,
            supported: Vec::new(),
            memory: Vec::new(),
            registered: 0,
            mapped: 0,
            unmapped: 0,
            queue: VecDeque::new(),
            frames: VecDeque::new(),
            read_error: None,
            dequeue_error: None,
            streaming: false,
            encoder_stops: 0,
            sequence: 0,
            interval: None,
            calls: Vec::new(),
        }
    }

    /// YUYV video device with 625-line raw and sliced VBI
    pub fn video(width: u32, height: u32) -> Self {
        MockDevice::new(
            Format::Video(PixFormat::new(width, height, FourCC::YUYV)),
            Format::Vbi(pal_vbi()),
            Format::SlicedVbi(SlicedVbiFormat {
                service_set: ffi::V4L2_SLICED_VBI_625,
                io_size: 64 * 36,
                ..Default::default()
            }),
            VideoStandard::PAL,
        )
    }

    pub fn with_vbi(mut self, vbi: VbiFormat, standard: VideoStandard) -> Self {
        self.vbi = Format::Vbi(vbi);
        self.standard = standard;
        self
    }

    pub fn with_sliced_io_size(mut self, io_size: u32) -> Self {
        if let Format::SlicedVbi(sliced) = &mut self.sliced {
            sliced.io_size = io_size;
        }
        self
    }

    pub fn with_grant(mut self, grant: u32) -> Self {
        self.grant = Some(grant);
        self
    }

    pub fn with_map_failure(mut self, index: u32) -> Self {
        self.map_failure = Some(index);
        self
    }

    pub fn with_supported(mut self, fourccs: &[FourCC]) -> Self {
        self.supported = fourccs.to_vec();
        self
    }

    pub fn push_frame(&mut self, frame: Vec<u8>) {
        self.frames.push_back(frame);
    }

    pub fn clear_frames(&mut self) {
        self.frames.clear();
    }

    pub fn fail_next_read(&mut self, errno: i32) {
        self.read_error = Some(errno);
    }

    pub fn fail_next_dequeue(&mut self, errno: i32) {
        self.dequeue_error = Some(errno);
    }

    pub fn registered(&self) -> u32 {
        self.registered
    }

    /// Regions currently mapped
    pub fn mapped(&self) -> usize {
        self.mapped
    }

    /// Total munmap calls
    pub fn unmapped(&self) -> usize {
        self.unmapped
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn encoder_stops(&self) -> usize {
        self.encoder_stops
    }

    pub fn interval(&self) -> Option<Fraction> {
        self.interval
    }

    pub fn calls(&self) -> &[String] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    fn format_of(&self, kind: BufType) -> &Format {
        match kind {
            BufType::VideoCapture => &self.video,
            BufType::VbiCapture => &self.vbi,
            BufType::SlicedVbiCapture => &self.sliced,
        }
    }

    fn call(&mut self, name: impl Into<String>) {
        self.calls.push(name.into());
    }
}

/// PAL raw VBI at 27 MHz: 1600 samples per line, lines 6-22 and 318-334
pub(crate) fn pal_vbi() -> VbiFormat {
    VbiFormat {
        sampling_rate: 27_000_000,
        offset: 128,
        samples_per_line: 1600,
        sample_format: FourCC::GREY,
        start: [6, 318],
        count: [17, 17],
        flags: 0,
    }
}

impl Device for MockDevice {
    fn capabilities(&mut self) -> Result<Capabilities, DeviceError> {
        Ok(Capabilities::new(
            "mock",
            "Mock Capture",
            "platform:mock",
            0x0006_0100,
            ffi::V4L2_CAP_VIDEO_CAPTURE
                | ffi::V4L2_CAP_VBI_CAPTURE
                | ffi::V4L2_CAP_SLICED_VBI_CAPTURE
                | ffi::V4L2_CAP_READWRITE
                | ffi::V4L2_CAP_STREAMING,
        ))
    }

    fn get_format(&mut self, kind: BufType) -> Result<Format, DeviceError> {
        Ok(*self.format_of(kind))
    }

    fn set_format(&mut self, format: &Format) -> Result<Format, DeviceError> {
        self.call("S_FMT");
        if self.registered > 0 {
            return Err(DeviceError::new("VIDIOC_S_FMT", libc::EBUSY));
        }
        match format {
            Format::Video(pix) => {
                let mut pix = *pix;
                if !self.supported.is_empty() && !self.supported.contains(&pix.fourcc) {
                    pix.fourcc = self.supported[0];
                }
                pix.update_stride();
                self.video = Format::Video(pix);
            }
            // raw VBI geometry is fixed by the hardware
            Format::Vbi(_) => {}
            Format::SlicedVbi(requested) => {
                if let Format::SlicedVbi(current) = &mut self.sliced {
                    current.service_set = requested.service_set & ffi::V4L2_SLICED_VBI_625;
                    current.service_lines = requested.service_lines;
                }
            }
        }
        Ok(*self.format_of(format.buf_type()))
    }

    fn standard(&mut self) -> Result<VideoStandard, DeviceError> {
        Ok(self.standard)
    }

    fn set_frame_interval(
        &mut self,
        _kind: BufType,
        interval: Fraction,
    ) -> Result<Fraction, DeviceError> {
        self.interval = Some(interval);
        Ok(interval)
    }

    fn request_buffers(
        &mut self,
        kind: BufType,
        memory: Memory,
        count: u32,
    ) -> Result<u32, DeviceError> {
        self.call(format!("REQBUFS({})", count));
        if self.mapped > 0 || self.streaming {
            return Err(DeviceError::new("VIDIOC_REQBUFS", libc::EBUSY));
        }

        self.queue.clear();
        self.memory.clear();
        self.registered = 0;
        if count == 0 {
            return Ok(0);
        }

        let granted = self.grant.unwrap_or(count);
        if memory == Memory::Mmap {
            let size = self.format_of(kind).size();
            self.memory = (0..granted).map(|_| Chunk::alloc(size)).collect();
        }
        self.registered = granted;
        Ok(granted)
    }

    fn query_buffer(&mut self, _kind: BufType, index: u32) -> Result<BufferInfo, DeviceError> {
        self.call("QUERYBUF");
        let chunk = self
            .memory
            .get(index as usize)
            .ok_or(DeviceError::new("VIDIOC_QUERYBUF", libc::EINVAL))?;
        Ok(BufferInfo {
            index,
            length: chunk.len as u32,
            offset: index * PAGE,
        })
    }

    fn map_buffer(&mut self, info: &BufferInfo) -> Result<MappedRegion, DeviceError> {
        self.call("mmap");
        let index = info.offset / PAGE;
        if self.map_failure == Some(index) {
            return Err(DeviceError::new("mmap", libc::ENOMEM));
        }
        let chunk = self
            .memory
            .get(index as usize)
            .ok_or(DeviceError::new("mmap", libc::EINVAL))?;
        self.mapped += 1;
        Ok(unsafe { MappedRegion::from_raw_parts(chunk.ptr, chunk.len) })
    }

    fn unmap_buffer(&mut self, _region: MappedRegion) -> Result<(), DeviceError> {
        self.call("munmap");
        self.mapped -= 1;
        self.unmapped += 1;
        Ok(())
    }

    fn queue_buffer(
        &mut self,
        _kind: BufType,
        index: u32,
        storage: Storage,
    ) -> Result<(), DeviceError> {
        if index >= self.registered || self.queue.iter().any(|(i, _)| *i == index) {
            return Err(DeviceError::new("VIDIOC_QBUF", libc::EINVAL));
        }
        self.queue.push_back((index, storage));
        Ok(())
    }

    fn dequeue_buffer(&mut self, _kind: BufType, _memory: Memory) -> Result<Dequeue, DeviceError> {
        if let Some(errno) = self.dequeue_error.take() {
            return Err(DeviceError::new("VIDIOC_DQBUF", errno));
        }
        if !self.streaming {
            return Err(DeviceError::new("VIDIOC_DQBUF", libc::EINVAL));
        }
        if self.frames.is_empty() || self.queue.is_empty() {
            return Ok(Dequeue::WouldBlock);
        }

        let (index, storage) = self.queue.pop_front().unwrap();
        let frame = self.frames.pop_front().unwrap();
        let (dst, capacity) = match storage {
            Storage::Mapped => {
                let chunk = &self.memory[index as usize];
                (chunk.ptr, chunk.len)
            }
            Storage::User { ptr, len } => (ptr, len),
        };
        let n = frame.len().min(capacity);
        unsafe { std::ptr::copy_nonoverlapping(frame.as_ptr(), dst.as_ptr(), n) };

        self.sequence += 1;
        Ok(Dequeue::Ready(DequeuedBuffer {
            index,
            bytes_used: n as u32,
            sequence: self.sequence - 1,
            timestamp: Timestamp::new(i64::from(self.sequence), 0),
        }))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, DeviceError> {
        self.call("read");
        if let Some(errno) = self.read_error.take() {
            return Err(DeviceError::new("read", errno));
        }
        match self.frames.pop_front() {
            Some(frame) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(ReadOutcome::Data(n))
            }
            None => Ok(ReadOutcome::WouldBlock),
        }
    }

    fn stream_on(&mut self, _kind: BufType) -> Result<(), DeviceError> {
        self.call("STREAMON");
        self.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self, _kind: BufType) -> Result<(), DeviceError> {
        self.call("STREAMOFF");
        self.streaming = false;
        self.queue.clear();
        Ok(())
    }

    fn encoder_stop(&mut self) -> Result<(), DeviceError> {
        self.call("ENCODER_CMD");
        self.encoder_stops += 1;
        // most capture drivers do not implement encoder commands
        Err(DeviceError::new("VIDIOC_ENCODER_CMD", libc::ENOTTY))
    }

    fn wait_readable(&mut self, _timeout: Duration) -> Result<bool, DeviceError> {
        Ok(!self.frames.is_empty())
    }
}
