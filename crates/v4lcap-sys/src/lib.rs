// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 v4lcap developers

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(clippy::missing_safety_doc)]

mod abi;

pub use abi::*;

// Re-export libloading for error handling
pub use libloading;

use libc::{c_int, c_ulong, c_void, size_t, ssize_t};
use std::sync::{Mutex, OnceLock};

type FdOpenFn = unsafe extern "C" fn(fd: c_int, v4l2_flags: c_int) -> c_int;
type CloseFn = unsafe extern "C" fn(fd: c_int) -> c_int;
type IoctlFn = unsafe extern "C" fn(fd: c_int, request: c_ulong, ...) -> c_int;
type ReadFn = unsafe extern "C" fn(fd: c_int, buffer: *mut c_void, n: size_t) -> ssize_t;
type MmapFn = unsafe extern "C" fn(
    start: *mut c_void,
    length: size_t,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    offset: i64,
) -> *mut c_void;
type MunmapFn = unsafe extern "C" fn(start: *mut c_void, length: size_t) -> c_int;

/// Entry points of libv4l2, resolved at runtime.
///
/// libv4l2 wraps a V4L2 file descriptor and emulates formats the driver does
/// not produce natively. Every symbol is required; a library missing any of
/// them is rejected by [`Libv4l2::new`].
pub struct Libv4l2 {
    __library: libloading::Library,
    pub v4l2_fd_open: FdOpenFn,
    pub v4l2_close: CloseFn,
    pub v4l2_ioctl: IoctlFn,
    pub v4l2_read: ReadFn,
    pub v4l2_mmap: MmapFn,
    pub v4l2_munmap: MunmapFn,
}

impl Libv4l2 {
    /// Load libv4l2 from `path` and resolve its entry points.
    pub unsafe fn new(path: &str) -> Result<Self, libloading::Error> {
        let library = unsafe { libloading::Library::new(path)? };
        unsafe { Self::from_library(library) }
    }

    pub unsafe fn from_library(library: libloading::Library) -> Result<Self, libloading::Error> {
        let v4l2_fd_open = unsafe { *library.get::<FdOpenFn>(b"v4l2_fd_open\0".as_slice())? };
        let v4l2_close = unsafe { *library.get::<CloseFn>(b"v4l2_close\0".as_slice())? };
        let v4l2_ioctl = unsafe { *library.get::<IoctlFn>(b"v4l2_ioctl\0".as_slice())? };
        let v4l2_read = unsafe { *library.get::<ReadFn>(b"v4l2_read\0".as_slice())? };
        let v4l2_mmap = unsafe { *library.get::<MmapFn>(b"v4l2_mmap\0".as_slice())? };
        let v4l2_munmap = unsafe { *library.get::<MunmapFn>(b"v4l2_munmap\0".as_slice())? };

        Ok(Libv4l2 {
            __library: library,
            v4l2_fd_open,
            v4l2_close,
            v4l2_ioctl,
            v4l2_read,
            v4l2_mmap,
            v4l2_munmap,
        })
    }
}

static LIBRARY: OnceLock<Libv4l2> = OnceLock::new();
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Load libv4l2 once for the whole process.
///
/// The environment variable `V4LCAP_LIBV4L2` can be used to specify a custom
/// path to the library. If not set, the versioned soname is searched in the
/// standard system paths.
pub fn init() -> Result<&'static Libv4l2, libloading::Error> {
    if let Some(lib) = LIBRARY.get() {
        return Ok(lib);
    }

    // A poisoned lock only means another thread panicked mid-load; the
    // OnceLock below is still consistent.
    let _guard = INIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    // Double-check after acquiring lock
    if let Some(lib) = LIBRARY.get() {
        return Ok(lib);
    }

    let lib_path = std::env::var("V4LCAP_LIBV4L2")
        .ok()
        .unwrap_or_else(|| "libv4l2.so.0".to_string());

    let lib = unsafe { Libv4l2::new(lib_path.as_str())? };

    Ok(LIBRARY.get_or_init(|| lib))
}

/// Try to get a reference to the loaded library without loading it
pub fn try_library() -> Option<&'static Libv4l2> {
    LIBRARY.get()
}
