// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 v4lcap developers

//! Kernel-backed [`Device`] implementation
//!
//! [`V4l2Device`] owns the file descriptor of a `/dev/video*`, `/dev/vbi*` or
//! `/dev/radio*` node opened non-blocking. Unless the device is opened in raw
//! mode, the descriptor is handed to libv4l2 (when it can be loaded) and every
//! primitive goes through the wrapper, which adds format emulation for
//! drivers that only produce exotic pixel formats.

use std::{
    fs::{File, OpenOptions},
    os::{
        fd::{AsRawFd, IntoRawFd, RawFd},
        unix::fs::OpenOptionsExt,
    },
    path::{Path, PathBuf},
    ptr::{self, NonNull},
    time::Duration,
};

use libc::{c_int, c_ulong, c_void};
use unix_ts::Timestamp;

use super::caps::Capabilities;
use crate::device::{
    BufferInfo, Dequeue, DequeuedBuffer, Device, DeviceError, MappedRegion, Memory, ReadOutcome,
    Storage,
};
use crate::fourcc::FourCC;
use crate::format::{BufType, Format, Fraction, PixFormat, SlicedVbiFormat, VbiFormat, VideoStandard};
use crate::Error;
use v4lcap_sys as ffi;

/// An open V4L2 device node
#[derive(Debug)]
pub struct V4l2Device {
    path: PathBuf,
    /// `None` only while dropping
    file: Option<File>,
    wrapper: Option<Wrapper>,
}

#[derive(Clone, Copy)]
struct Wrapper(&'static ffi::Libv4l2);

impl std::fmt::Debug for Wrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("libv4l2")
    }
}

impl V4l2Device {
    /// Open a device node.
    ///
    /// In raw mode the kernel interface is used directly. Otherwise libv4l2
    /// is tried first; a missing library falls back to the kernel interface.
    pub fn open<P: AsRef<Path>>(path: P, raw_mode: bool) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)?;

        let wrapper = if raw_mode {
            None
        } else {
            Self::wrap(file.as_raw_fd())
        };

        log::debug!(
            "Opened {} ({})",
            path.display(),
            if wrapper.is_some() { "libv4l2" } else { "raw" }
        );

        Ok(V4l2Device {
            path: path.to_owned(),
            file: Some(file),
            wrapper,
        })
    }

    fn wrap(fd: RawFd) -> Option<Wrapper> {
        let lib = match ffi::init() {
            Ok(lib) => lib,
            Err(err) => {
                log::debug!("libv4l2 not available, using kernel interface: {}", err);
                return None;
            }
        };

        let ret = unsafe { (lib.v4l2_fd_open)(fd, ffi::V4L2_ENABLE_ENUM_FMT_EMULATION) };
        if ret == -1 {
            log::warn!(
                "v4l2_fd_open failed, using kernel interface: {}",
                std::io::Error::last_os_error()
            );
            return None;
        }

        Some(Wrapper(lib))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the kernel interface is used directly
    pub fn is_raw(&self) -> bool {
        self.wrapper.is_none()
    }

    pub fn fd(&self) -> RawFd {
        self.file.as_ref().map_or(-1, |file| file.as_raw_fd())
    }

    fn ioctl<T>(&self, operation: &'static str, request: c_ulong, arg: &mut T) -> Result<(), DeviceError> {
        let fd = self.fd();
        let arg = arg as *mut T as *mut c_void;
        loop {
            let ret = match self.wrapper {
                Some(Wrapper(lib)) => unsafe { (lib.v4l2_ioctl)(fd, request, arg) },
                None => unsafe { libc::ioctl(fd, request as _, arg) },
            };
            if ret != -1 {
                return Ok(());
            }

            let err = DeviceError::last_os_error(operation);
            if err.errno != libc::EINTR {
                return Err(err);
            }
        }
    }
}

impl Drop for V4l2Device {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            match self.wrapper {
                Some(Wrapper(lib)) => {
                    let fd = file.into_raw_fd();
                    unsafe { (lib.v4l2_close)(fd) };
                }
                None => drop(file),
            }
        }
    }
}

impl Device for V4l2Device {
    fn capabilities(&mut self) -> Result<Capabilities, DeviceError> {
        let mut raw = ffi::v4l2_capability {
            driver: [0; 16],
            card: [0; 32],
            bus_info: [0; 32],
            version: 0,
            capabilities: 0,
            device_caps: 0,
            reserved: [0; 3],
        };
        self.ioctl("VIDIOC_QUERYCAP", ffi::VIDIOC_QUERYCAP, &mut raw)?;
        Ok(Capabilities::from_ffi(&raw))
    }

    fn get_format(&mut self, kind: BufType) -> Result<Format, DeviceError> {
        let mut raw = ffi::v4l2_format::new(kind.raw());
        self.ioctl("VIDIOC_G_FMT", ffi::VIDIOC_G_FMT, &mut raw)?;
        Ok(format_from_ffi(kind, &raw))
    }

    fn set_format(&mut self, format: &Format) -> Result<Format, DeviceError> {
        let mut raw = format_to_ffi(format);
        self.ioctl("VIDIOC_S_FMT", ffi::VIDIOC_S_FMT, &mut raw)?;
        Ok(format_from_ffi(format.buf_type(), &raw))
    }

    fn standard(&mut self) -> Result<VideoStandard, DeviceError> {
        let mut id: ffi::v4l2_std_id = 0;
        self.ioctl("VIDIOC_G_STD", ffi::VIDIOC_G_STD, &mut id)?;
        Ok(VideoStandard(id))
    }

    fn set_frame_interval(
        &mut self,
        kind: BufType,
        interval: Fraction,
    ) -> Result<Fraction, DeviceError> {
        let mut parm = ffi::v4l2_streamparm {
            type_: kind.raw(),
            parm: ffi::v4l2_streamparm_parm { raw_data: [0; 200] },
        };
        parm.parm.capture = ffi::v4l2_captureparm {
            timeperframe: ffi::v4l2_fract {
                numerator: interval.numerator,
                denominator: interval.denominator,
            },
            ..Default::default()
        };
        self.ioctl("VIDIOC_S_PARM", ffi::VIDIOC_S_PARM, &mut parm)?;

        let chosen = unsafe { parm.parm.capture.timeperframe };
        Ok(Fraction::new(chosen.numerator, chosen.denominator))
    }

    fn request_buffers(
        &mut self,
        kind: BufType,
        memory: Memory,
        count: u32,
    ) -> Result<u32, DeviceError> {
        let mut req = ffi::v4l2_requestbuffers {
            count,
            type_: kind.raw(),
            memory: memory.raw(),
            ..Default::default()
        };
        self.ioctl("VIDIOC_REQBUFS", ffi::VIDIOC_REQBUFS, &mut req)?;
        Ok(req.count)
    }

    fn query_buffer(&mut self, kind: BufType, index: u32) -> Result<BufferInfo, DeviceError> {
        let mut buf = ffi::v4l2_buffer::new(kind.raw(), Memory::Mmap.raw(), index);
        self.ioctl("VIDIOC_QUERYBUF", ffi::VIDIOC_QUERYBUF, &mut buf)?;
        Ok(BufferInfo {
            index,
            length: buf.length,
            offset: unsafe { buf.m.offset },
        })
    }

    fn map_buffer(&mut self, info: &BufferInfo) -> Result<MappedRegion, DeviceError> {
        let len = info.length as usize;
        let prot = libc::PROT_READ | libc::PROT_WRITE;
        let addr = match self.wrapper {
            Some(Wrapper(lib)) => unsafe {
                (lib.v4l2_mmap)(
                    ptr::null_mut(),
                    len,
                    prot,
                    libc::MAP_SHARED,
                    self.fd(),
                    i64::from(info.offset),
                )
            },
            None => unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    len,
                    prot,
                    libc::MAP_SHARED,
                    self.fd(),
                    info.offset as libc::off_t,
                )
            },
        };
        if addr == libc::MAP_FAILED {
            return Err(DeviceError::last_os_error("mmap"));
        }

        let ptr = NonNull::new(addr as *mut u8).ok_or(DeviceError::new("mmap", libc::EFAULT))?;
        // SAFETY: the kernel keeps the mapping valid until munmap
        Ok(unsafe { MappedRegion::from_raw_parts(ptr, len) })
    }

    fn unmap_buffer(&mut self, region: MappedRegion) -> Result<(), DeviceError> {
        let addr = region.as_ptr().as_ptr() as *mut c_void;
        let ret = match self.wrapper {
            Some(Wrapper(lib)) => unsafe { (lib.v4l2_munmap)(addr, region.len()) },
            None => unsafe { libc::munmap(addr, region.len()) },
        };
        if ret == -1 {
            return Err(DeviceError::last_os_error("munmap"));
        }
        Ok(())
    }

    fn queue_buffer(
        &mut self,
        kind: BufType,
        index: u32,
        storage: Storage,
    ) -> Result<(), DeviceError> {
        let mut buf = match storage {
            Storage::Mapped => ffi::v4l2_buffer::new(kind.raw(), Memory::Mmap.raw(), index),
            Storage::User { ptr, len } => {
                let mut buf = ffi::v4l2_buffer::new(kind.raw(), Memory::UserPtr.raw(), index);
                buf.m.userptr = ptr.as_ptr() as c_ulong;
                buf.length = u32::try_from(len).map_err(|_| DeviceError::new("VIDIOC_QBUF", libc::EINVAL))?;
                buf
            }
        };
        self.ioctl("VIDIOC_QBUF", ffi::VIDIOC_QBUF, &mut buf)
    }

    fn dequeue_buffer(&mut self, kind: BufType, memory: Memory) -> Result<Dequeue, DeviceError> {
        let mut buf = ffi::v4l2_buffer::new(kind.raw(), memory.raw(), 0);
        match self.ioctl("VIDIOC_DQBUF", ffi::VIDIOC_DQBUF, &mut buf) {
            Ok(()) => {}
            Err(err) if err.would_block() => return Ok(Dequeue::WouldBlock),
            Err(err) => return Err(err),
        }

        let usec = u32::try_from(buf.timestamp.tv_usec).unwrap_or(0);
        Ok(Dequeue::Ready(DequeuedBuffer {
            index: buf.index,
            bytes_used: buf.bytesused,
            sequence: buf.sequence,
            timestamp: Timestamp::new(buf.timestamp.tv_sec as i64, usec * 1000),
        }))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, DeviceError> {
        let fd = self.fd();
        let dst = buf.as_mut_ptr() as *mut c_void;
        let ret = match self.wrapper {
            Some(Wrapper(lib)) => unsafe { (lib.v4l2_read)(fd, dst, buf.len()) },
            None => unsafe { libc::read(fd, dst, buf.len()) },
        };
        if ret < 0 {
            let err = DeviceError::last_os_error("read");
            if err.would_block() {
                return Ok(ReadOutcome::WouldBlock);
            }
            return Err(err);
        }
        Ok(ReadOutcome::Data(ret as usize))
    }

    fn stream_on(&mut self, kind: BufType) -> Result<(), DeviceError> {
        let mut type_ = kind.raw() as c_int;
        self.ioctl("VIDIOC_STREAMON", ffi::VIDIOC_STREAMON, &mut type_)
    }

    fn stream_off(&mut self, kind: BufType) -> Result<(), DeviceError> {
        let mut type_ = kind.raw() as c_int;
        self.ioctl("VIDIOC_STREAMOFF", ffi::VIDIOC_STREAMOFF, &mut type_)
    }

    fn encoder_stop(&mut self) -> Result<(), DeviceError> {
        let mut cmd = ffi::v4l2_encoder_cmd {
            cmd: ffi::V4L2_ENC_CMD_STOP,
            ..Default::default()
        };
        self.ioctl("VIDIOC_ENCODER_CMD", ffi::VIDIOC_ENCODER_CMD, &mut cmd)
    }

    fn wait_readable(&mut self, timeout: Duration) -> Result<bool, DeviceError> {
        let mut pfd = libc::pollfd {
            fd: self.fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = c_int::try_from(timeout.as_millis()).unwrap_or(c_int::MAX);
        let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if ret < 0 {
            let err = DeviceError::last_os_error("poll");
            if err.errno == libc::EINTR {
                return Ok(false);
            }
            return Err(err);
        }
        Ok(ret > 0)
    }
}

fn format_from_ffi(kind: BufType, raw: &ffi::v4l2_format) -> Format {
    match kind {
        BufType::VideoCapture => {
            let pix = unsafe { raw.fmt.pix };
            Format::Video(PixFormat {
                width: pix.width,
                height: pix.height,
                fourcc: FourCC::from(pix.pixelformat),
                field: pix.field,
                bytes_per_line: pix.bytesperline,
                size_image: pix.sizeimage,
                colorspace: pix.colorspace,
            })
        }
        BufType::VbiCapture => {
            let vbi = unsafe { raw.fmt.vbi };
            Format::Vbi(VbiFormat {
                sampling_rate: vbi.sampling_rate,
                offset: vbi.offset,
                samples_per_line: vbi.samples_per_line,
                sample_format: FourCC::from(vbi.sample_format),
                start: vbi.start,
                count: vbi.count,
                flags: vbi.flags,
            })
        }
        BufType::SlicedVbiCapture => {
            let sliced = unsafe { raw.fmt.sliced };
            Format::SlicedVbi(SlicedVbiFormat {
                service_set: sliced.service_set,
                service_lines: sliced.service_lines,
                io_size: sliced.io_size,
            })
        }
    }
}

fn format_to_ffi(format: &Format) -> ffi::v4l2_format {
    let mut raw = ffi::v4l2_format::new(format.buf_type().raw());
    match format {
        Format::Video(pix) => {
            raw.fmt.pix = ffi::v4l2_pix_format {
                width: pix.width,
                height: pix.height,
                pixelformat: pix.fourcc.into(),
                field: pix.field,
                bytesperline: pix.bytes_per_line,
                sizeimage: pix.size_image,
                colorspace: pix.colorspace,
                ..Default::default()
            };
        }
        Format::Vbi(vbi) => {
            raw.fmt.vbi = ffi::v4l2_vbi_format {
                sampling_rate: vbi.sampling_rate,
                offset: vbi.offset,
                samples_per_line: vbi.samples_per_line,
                sample_format: vbi.sample_format.into(),
                start: vbi.start,
                count: vbi.count,
                flags: vbi.flags,
                reserved: [0; 2],
            };
        }
        Format::SlicedVbi(sliced) => {
            raw.fmt.sliced = ffi::v4l2_sliced_vbi_format {
                service_set: sliced.service_set,
                service_lines: sliced.service_lines,
                io_size: sliced.io_size,
                reserved: [0; 2],
            };
        }
    }
    raw
}
