// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 v4lcap developers

//! Buffer Pool
//!
//! One [`BufferPool`] implementation per I/O method, chosen once by
//! [`provision`]:
//!
//! | Method | Pool | Storage |
//! |--------|------|---------|
//! | [`IoMethod::Read`] | `ReadPool` | one scratch region filled by read(2) |
//! | [`IoMethod::Mmap`] | `MmapPool` | device buffers mapped into the process |
//! | [`IoMethod::UserPtr`] | `UserPool` | heap regions handed to the device |
//!
//! Every streaming slot carries an explicit [`Ownership`] tag. A slot is
//! [`Ownership::Device`] between `VIDIOC_QBUF` and `VIDIOC_DQBUF` and
//! [`Ownership::Application`] otherwise; the pool refuses to expose the bytes
//! of a device-owned slot and refuses to queue a slot twice.
//!
//! Provisioning failures unwind everything acquired so far and always end
//! with `request_buffers(0)` so the device drops its side before any memory
//! is freed.

use std::{fmt, ptr::NonNull, str::FromStr};

use unix_ts::Timestamp;

use crate::device::{
    Dequeue, DequeuedBuffer, Device, DeviceError, MappedRegion, Memory, ReadOutcome, Storage,
};
use crate::format::BufType;
use crate::Error;

/// Buffers requested when the caller does not ask for a count
pub const DEFAULT_BUFFERS: u32 = 3;

/// Fewest buffers a streaming pool can run with
pub const MIN_BUFFERS: u32 = 2;

/// Strategy used to move frames from the device into the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IoMethod {
    /// read(2) into a scratch region
    Read,
    /// Memory-mapped device buffers
    #[default]
    Mmap,
    /// Application-allocated buffers
    UserPtr,
}

impl IoMethod {
    pub fn name(&self) -> &'static str {
        match self {
            IoMethod::Read => "read",
            IoMethod::Mmap => "mmap",
            IoMethod::UserPtr => "user",
        }
    }

    /// Memory model for the streaming ioctls, `None` for read I/O
    pub fn memory(&self) -> Option<Memory> {
        match self {
            IoMethod::Read => None,
            IoMethod::Mmap => Some(Memory::Mmap),
            IoMethod::UserPtr => Some(Memory::UserPtr),
        }
    }
}

impl fmt::Display for IoMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IoMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(IoMethod::Read),
            "mmap" => Ok(IoMethod::Mmap),
            "user" | "userptr" => Ok(IoMethod::UserPtr),
            _ => Err(format!("unknown I/O method: {}", s)),
        }
    }
}

/// Which party may touch a buffer slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// Queued; the device may write into it at any time
    Device,
    /// Dequeued; the application may read it until queued back
    Application,
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ownership::Device => write!(f, "device"),
            Ownership::Application => write!(f, "application"),
        }
    }
}

/// A unit of data taken from the device
#[derive(Debug, Clone, Copy)]
pub struct Filled {
    /// Slot holding the data, always 0 for read I/O
    pub index: u32,
    /// Bytes the device wrote
    pub bytes_used: usize,
    /// Driver sequence number, streaming methods only
    pub device_sequence: Option<u32>,
    /// Driver timestamp, streaming methods only
    pub timestamp: Option<Timestamp>,
}

/// Set of buffers exchanged with a device under one I/O method
pub trait BufferPool {
    fn method(&self) -> IoMethod;

    /// Number of slots; 0 for read I/O and after release
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ownership of slot `index`, `None` when out of range
    fn ownership(&self, index: usize) -> Option<Ownership>;

    /// Take one filled buffer from the device; `None` when no data is ready.
    fn dequeue_one(&mut self, dev: &mut dyn Device) -> Result<Option<Filled>, Error>;

    /// Bytes of a dequeued buffer, bounded by the slot length.
    fn data(&self, filled: &Filled) -> Result<&[u8], Error>;

    /// Hand slot `index` back to the device. A no-op for read I/O.
    fn queue_back(&mut self, dev: &mut dyn Device, index: u32) -> Result<(), Error>;

    /// Stop the device and give up every buffer. Idempotent; errors along the
    /// way are logged and the remaining steps still run.
    fn release(&mut self, dev: &mut dyn Device);
}

/// Provision a pool for `method`.
///
/// Streaming methods request `requested` buffers (at least [`MIN_BUFFERS`]),
/// register them and queue every one, so all slots start device-owned.
/// `buffer_size` sizes the read scratch region and the user regions.
pub fn provision(
    dev: &mut dyn Device,
    method: IoMethod,
    kind: BufType,
    requested: u32,
    buffer_size: usize,
) -> Result<Box<dyn BufferPool>, Error> {
    let requested = requested.max(MIN_BUFFERS);
    log::debug!(
        "Provisioning {} pool for {} capture: {} x {} bytes",
        method,
        kind,
        requested,
        buffer_size
    );

    match method {
        IoMethod::Read => Ok(Box::new(ReadPool::new(buffer_size)?)),
        IoMethod::Mmap => Ok(Box::new(MmapPool::provision(dev, kind, requested)?)),
        IoMethod::UserPtr => Ok(Box::new(UserPool::provision(
            dev,
            kind,
            requested,
            buffer_size,
        )?)),
    }
}

fn alloc_zeroed(size: usize) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(size).map_err(|_| Error::OutOfMemory)?;
    buf.resize(size, 0);
    Ok(buf)
}

/// Release every registered buffer of a queue, logging failures.
fn release_registrations(dev: &mut dyn Device, kind: BufType, memory: Memory) -> bool {
    match dev.request_buffers(kind, memory, 0) {
        Ok(_) => true,
        Err(err) => {
            log::warn!("Releasing {} buffers failed: {}", memory, err);
            false
        }
    }
}

/// Device side of the release sequence shared by the streaming pools.
///
/// Returns whether the device relinquished its buffers, either by stopping
/// the stream or by dropping the registrations.
fn release_streaming(
    dev: &mut dyn Device,
    kind: BufType,
    memory: Memory,
    unmap: impl FnOnce(&mut dyn Device),
) -> bool {
    let stopped = match dev.stream_off(kind) {
        Ok(()) => true,
        Err(err) => {
            log::warn!("{}", err);
            false
        }
    };

    unmap(&mut *dev);

    // videobuf only frees its buffers when a non-zero count is requested
    // before the release
    if let Err(err) = dev.request_buffers(kind, memory, 1) {
        log::debug!("{}", err);
    }
    let released = release_registrations(dev, kind, memory);

    stopped || released
}

/// VIDIOC_DQBUF with the would-block class folded into `None`
fn dequeue(
    dev: &mut dyn Device,
    kind: BufType,
    memory: Memory,
) -> Result<Option<DequeuedBuffer>, Error> {
    match dev.dequeue_buffer(kind, memory) {
        Ok(Dequeue::Ready(buf)) => Ok(Some(buf)),
        Ok(Dequeue::WouldBlock) => Ok(None),
        Err(err) if err.would_block() => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Slot position for a buffer index the driver handed out
fn check_index(index: u32, len: usize) -> Result<usize, Error> {
    let i = index as usize;
    if i >= len {
        return Err(DeviceError::new("VIDIOC_DQBUF", libc::EINVAL).into());
    }
    Ok(i)
}

/// Scratch region for read I/O
struct ReadPool {
    scratch: Vec<u8>,
    released: bool,
}

impl ReadPool {
    fn new(size: usize) -> Result<Self, Error> {
        Ok(ReadPool {
            scratch: alloc_zeroed(size)?,
            released: false,
        })
    }
}

impl BufferPool for ReadPool {
    fn method(&self) -> IoMethod {
        IoMethod::Read
    }

    fn len(&self) -> usize {
        0
    }

    fn ownership(&self, _index: usize) -> Option<Ownership> {
        None
    }

    fn dequeue_one(&mut self, dev: &mut dyn Device) -> Result<Option<Filled>, Error> {
        if self.released {
            return Err(Error::NotStreaming);
        }
        match dev.read(&mut self.scratch) {
            Ok(ReadOutcome::WouldBlock) => Ok(None),
            Err(err) if err.would_block() => Ok(None),
            Err(err) => Err(err.into()),
            Ok(ReadOutcome::Data(n)) => Ok(Some(Filled {
                index: 0,
                bytes_used: n,
                device_sequence: None,
                timestamp: None,
            })),
        }
    }

    fn data(&self, filled: &Filled) -> Result<&[u8], Error> {
        let n = filled.bytes_used.min(self.scratch.len());
        Ok(&self.scratch[..n])
    }

    fn queue_back(&mut self, _dev: &mut dyn Device, _index: u32) -> Result<(), Error> {
        Ok(())
    }

    fn release(&mut self, dev: &mut dyn Device) {
        if self.released {
            return;
        }
        self.released = true;
        self.scratch = Vec::new();

        // MPEG encoder cards keep producing data until told to stop
        if let Err(err) = dev.encoder_stop() {
            log::debug!("{}", err);
        }
    }
}

struct MmapSlot {
    /// `None` once unmapped
    region: Option<MappedRegion>,
    owner: Ownership,
}

/// Device buffers mapped into the process
struct MmapPool {
    kind: BufType,
    slots: Vec<MmapSlot>,
    released: bool,
}

impl MmapPool {
    fn provision(dev: &mut dyn Device, kind: BufType, requested: u32) -> Result<Self, Error> {
        let granted = dev.request_buffers(kind, Memory::Mmap, requested)?;
        if granted < MIN_BUFFERS {
            release_registrations(dev, kind, Memory::Mmap);
            return Err(Error::InsufficientBuffers { granted });
        }

        let mut slots = Vec::with_capacity(granted as usize);
        for index in 0..granted {
            let mapped = dev
                .query_buffer(kind, index)
                .and_then(|info| dev.map_buffer(&info));
            match mapped {
                Ok(region) => slots.push(MmapSlot {
                    region: Some(region),
                    owner: Ownership::Application,
                }),
                Err(err) => {
                    log::warn!("Mapping buffer {} failed: {}", index, err);
                    Self::unwind(dev, kind, slots);
                    return Err(Error::OutOfMemory);
                }
            }
        }

        for index in 0..granted {
            if let Err(err) = dev.queue_buffer(kind, index, Storage::Mapped) {
                Self::unwind(dev, kind, slots);
                return Err(err.into());
            }
            slots[index as usize].owner = Ownership::Device;
        }

        log::debug!("Mapped {} buffers", granted);
        Ok(MmapPool {
            kind,
            slots,
            released: false,
        })
    }

    fn unwind(dev: &mut dyn Device, kind: BufType, slots: Vec<MmapSlot>) {
        for region in slots.into_iter().filter_map(|slot| slot.region) {
            if let Err(err) = dev.unmap_buffer(region) {
                log::warn!("{}", err);
            }
        }
        release_registrations(dev, kind, Memory::Mmap);
    }
}

impl BufferPool for MmapPool {
    fn method(&self) -> IoMethod {
        IoMethod::Mmap
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn ownership(&self, index: usize) -> Option<Ownership> {
        self.slots.get(index).map(|slot| slot.owner)
    }

    fn dequeue_one(&mut self, dev: &mut dyn Device) -> Result<Option<Filled>, Error> {
        if self.released {
            return Err(Error::NotStreaming);
        }
        let buf = match dequeue(dev, self.kind, Memory::Mmap)? {
            Some(buf) => buf,
            None => return Ok(None),
        };

        let i = check_index(buf.index, self.slots.len())?;
        let slot = &mut self.slots[i];
        if slot.owner != Ownership::Device {
            return Err(Error::Ownership {
                index: buf.index,
                owner: slot.owner,
            });
        }
        slot.owner = Ownership::Application;

        Ok(Some(Filled {
            index: buf.index,
            bytes_used: buf.bytes_used as usize,
            device_sequence: Some(buf.sequence),
            timestamp: Some(buf.timestamp),
        }))
    }

    fn data(&self, filled: &Filled) -> Result<&[u8], Error> {
        let slot = &self.slots[check_index(filled.index, self.slots.len())?];
        if slot.owner != Ownership::Application {
            return Err(Error::Ownership {
                index: filled.index,
                owner: slot.owner,
            });
        }
        let region = slot.region.as_ref().ok_or(Error::NotStreaming)?;
        // SAFETY: the slot is application-owned, the device is not writing
        let bytes = unsafe { region.as_slice() };
        Ok(&bytes[..filled.bytes_used.min(bytes.len())])
    }

    fn queue_back(&mut self, dev: &mut dyn Device, index: u32) -> Result<(), Error> {
        let i = check_index(index, self.slots.len())?;
        let slot = &mut self.slots[i];
        if slot.owner != Ownership::Application {
            return Err(Error::Ownership {
                index,
                owner: slot.owner,
            });
        }
        dev.queue_buffer(self.kind, index, Storage::Mapped)?;
        slot.owner = Ownership::Device;
        Ok(())
    }

    fn release(&mut self, dev: &mut dyn Device) {
        if self.released {
            return;
        }
        self.released = true;

        let slots = std::mem::take(&mut self.slots);
        release_streaming(dev, self.kind, Memory::Mmap, |dev| {
            for region in slots.into_iter().filter_map(|slot| slot.region) {
                if let Err(err) = dev.unmap_buffer(region) {
                    log::warn!("{}", err);
                }
            }
        });
        log::debug!("Released mapped buffers");
    }
}

/// Heap region whose address is handed to the device
struct UserRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl UserRegion {
    fn alloc(len: usize) -> Result<Self, Error> {
        let boxed = alloc_zeroed(len)?.into_boxed_slice();
        let ptr = NonNull::new(Box::into_raw(boxed) as *mut u8).ok_or(Error::OutOfMemory)?;
        Ok(UserRegion { ptr, len })
    }

    fn storage(&self) -> Storage {
        Storage::User {
            ptr: self.ptr,
            len: self.len,
        }
    }

    /// # Safety
    ///
    /// The device must not be writing into the region.
    unsafe fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for UserRegion {
    fn drop(&mut self) {
        let slice = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
        // SAFETY: allocated by Box in `alloc` and freed only here
        drop(unsafe { Box::from_raw(slice) });
    }
}

struct UserSlot {
    region: UserRegion,
    owner: Ownership,
}

/// Application-allocated buffers
struct UserPool {
    kind: BufType,
    slots: Vec<UserSlot>,
    released: bool,
}

impl UserPool {
    fn provision(
        dev: &mut dyn Device,
        kind: BufType,
        requested: u32,
        buffer_size: usize,
    ) -> Result<Self, Error> {
        let granted = dev.request_buffers(kind, Memory::UserPtr, requested)?;
        if granted < MIN_BUFFERS {
            release_registrations(dev, kind, Memory::UserPtr);
            return Err(Error::InsufficientBuffers { granted });
        }

        let mut slots = Vec::with_capacity(granted as usize);
        for index in 0..granted {
            match UserRegion::alloc(buffer_size) {
                Ok(region) => slots.push(UserSlot {
                    region,
                    owner: Ownership::Application,
                }),
                Err(err) => {
                    log::warn!("Allocating buffer {} of {} bytes failed", index, buffer_size);
                    release_registrations(dev, kind, Memory::UserPtr);
                    return Err(err);
                }
            }
        }

        for index in 0..granted {
            let storage = slots[index as usize].region.storage();
            if let Err(err) = dev.queue_buffer(kind, index, storage) {
                if !release_registrations(dev, kind, Memory::UserPtr) {
                    // the device may still hold the queued regions
                    std::mem::forget(slots);
                }
                return Err(err.into());
            }
            slots[index as usize].owner = Ownership::Device;
        }

        log::debug!("Queued {} user buffers", granted);
        Ok(UserPool {
            kind,
            slots,
            released: false,
        })
    }
}

impl BufferPool for UserPool {
    fn method(&self) -> IoMethod {
        IoMethod::UserPtr
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn ownership(&self, index: usize) -> Option<Ownership> {
        self.slots.get(index).map(|slot| slot.owner)
    }

    fn dequeue_one(&mut self, dev: &mut dyn Device) -> Result<Option<Filled>, Error> {
        if self.released {
            return Err(Error::NotStreaming);
        }
        let buf = match dequeue(dev, self.kind, Memory::UserPtr)? {
            Some(buf) => buf,
            None => return Ok(None),
        };

        let i = check_index(buf.index, self.slots.len())?;
        let slot = &mut self.slots[i];
        if slot.owner != Ownership::Device {
            return Err(Error::Ownership {
                index: buf.index,
                owner: slot.owner,
            });
        }
        slot.owner = Ownership::Application;

        Ok(Some(Filled {
            index: buf.index,
            bytes_used: buf.bytes_used as usize,
            device_sequence: Some(buf.sequence),
            timestamp: Some(buf.timestamp),
        }))
    }

    fn data(&self, filled: &Filled) -> Result<&[u8], Error> {
        let slot = &self.slots[check_index(filled.index, self.slots.len())?];
        if slot.owner != Ownership::Application {
            return Err(Error::Ownership {
                index: filled.index,
                owner: slot.owner,
            });
        }
        // SAFETY: the slot is application-owned, the device is not writing
        let bytes = unsafe { slot.region.as_slice() };
        Ok(&bytes[..filled.bytes_used.min(bytes.len())])
    }

    fn queue_back(&mut self, dev: &mut dyn Device, index: u32) -> Result<(), Error> {
        let i = check_index(index, self.slots.len())?;
        let slot = &mut self.slots[i];
        if slot.owner != Ownership::Application {
            return Err(Error::Ownership {
                index,
                owner: slot.owner,
            });
        }
        dev.queue_buffer(self.kind, index, slot.region.storage())?;
        slot.owner = Ownership::Device;
        Ok(())
    }

    fn release(&mut self, dev: &mut dyn Device) {
        if self.released {
            return;
        }
        self.released = true;

        let slots = std::mem::take(&mut self.slots);
        let relinquished = release_streaming(dev, self.kind, Memory::UserPtr, |_| {});
        if relinquished {
            drop(slots);
            log::debug!("Released user buffers");
        } else {
            log::error!(
                "Device did not relinquish {} user buffers, leaking them",
                slots.len()
            );
            std::mem::forget(slots);
        }
    }
}
