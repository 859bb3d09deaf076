// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 v4lcap developers
//
// Read I/O Pipeline Tests
//
// Drives a Session through the public API against a scripted device that
// only supports read(2): format commit, raw saving, snapshots, sliced VBI
// and the fatal error path.
//
// RUN:
//   cargo test --test read_pipeline

use std::{
    cell::RefCell,
    collections::VecDeque,
    fs,
    path::PathBuf,
    rc::Rc,
    time::Duration,
};

use v4lcap::capture::{AcquiredFrame, CaptureConfig, VbiSink};
use v4lcap::device::{
    BufferInfo, Dequeue, Device, DeviceError, MappedRegion, Memory, ReadOutcome, Storage,
};
use v4lcap::format::{BufType, Format, Fraction, PixFormat, SlicedVbiFormat, VideoStandard};
use v4lcap::fourcc::FourCC;
use v4lcap::pool::IoMethod;
use v4lcap::session::{CaptureEvents, Session};
use v4lcap::v4l2::Capabilities;
use v4lcap::vbi::{SlicedRecord, SLICED_RECORD_SIZE};
use v4lcap::{Error, ErrorKind};
use v4lcap_sys as ffi;

/// Device that serves queued reads and refuses streaming
struct ScriptedDevice {
    video: PixFormat,
    sliced: SlicedVbiFormat,
    reads: VecDeque<Result<Vec<u8>, i32>>,
    encoder_stops: Rc<RefCell<usize>>,
}

impl ScriptedDevice {
    fn new(width: u32, height: u32) -> Self {
        ScriptedDevice {
            video: PixFormat::new(width, height, FourCC::YUYV),
            sliced: SlicedVbiFormat {
                service_set: ffi::V4L2_SLICED_VBI_625,
                io_size: 2 * SLICED_RECORD_SIZE as u32,
                ..Default::default()
            },
            reads: VecDeque::new(),
            encoder_stops: Rc::default(),
        }
    }

    fn unsupported(operation: &'static str) -> DeviceError {
        DeviceError::new(operation, libc::ENOTTY)
    }
}

impl Device for ScriptedDevice {
    fn capabilities(&mut self) -> Result<Capabilities, DeviceError> {
        Ok(Capabilities::new(
            "scripted",
            "Scripted Reader",
            "virtual",
            0,
            ffi::V4L2_CAP_VIDEO_CAPTURE | ffi::V4L2_CAP_READWRITE,
        ))
    }

    fn get_format(&mut self, kind: BufType) -> Result<Format, DeviceError> {
        match kind {
            BufType::VideoCapture => Ok(Format::Video(self.video)),
            BufType::SlicedVbiCapture => Ok(Format::SlicedVbi(self.sliced)),
            BufType::VbiCapture => Err(DeviceError::new("VIDIOC_G_FMT", libc::EINVAL)),
        }
    }

    fn set_format(&mut self, format: &Format) -> Result<Format, DeviceError> {
        match format {
            Format::Video(pix) => {
                let mut pix = *pix;
                pix.update_stride();
                self.video = pix;
            }
            Format::SlicedVbi(sliced) => {
                self.sliced.service_set = sliced.service_set & ffi::V4L2_SLICED_VBI_625;
            }
            Format::Vbi(_) => return Err(DeviceError::new("VIDIOC_S_FMT", libc::EINVAL)),
        }
        self.get_format(format.buf_type())
    }

    fn standard(&mut self) -> Result<VideoStandard, DeviceError> {
        Ok(VideoStandard::PAL)
    }

    fn set_frame_interval(&mut self, _: BufType, _: Fraction) -> Result<Fraction, DeviceError> {
        Err(Self::unsupported("VIDIOC_S_PARM"))
    }

    fn request_buffers(&mut self, _: BufType, _: Memory, _: u32) -> Result<u32, DeviceError> {
        Err(DeviceError::new("VIDIOC_REQBUFS", libc::EINVAL))
    }

    fn query_buffer(&mut self, _: BufType, _: u32) -> Result<BufferInfo, DeviceError> {
        Err(Self::unsupported("VIDIOC_QUERYBUF"))
    }

    fn map_buffer(&mut self, _: &BufferInfo) -> Result<MappedRegion, DeviceError> {
        Err(Self::unsupported("mmap"))
    }

    fn unmap_buffer(&mut self, _: MappedRegion) -> Result<(), DeviceError> {
        Err(Self::unsupported("munmap"))
    }

    fn queue_buffer(&mut self, _: BufType, _: u32, _: Storage) -> Result<(), DeviceError> {
        Err(Self::unsupported("VIDIOC_QBUF"))
    }

    fn dequeue_buffer(&mut self, _: BufType, _: Memory) -> Result<Dequeue, DeviceError> {
        Err(Self::unsupported("VIDIOC_DQBUF"))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, DeviceError> {
        match self.reads.pop_front() {
            None => Ok(ReadOutcome::WouldBlock),
            Some(Err(errno)) => Err(DeviceError::new("read", errno)),
            Some(Ok(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(ReadOutcome::Data(n))
            }
        }
    }

    fn stream_on(&mut self, _: BufType) -> Result<(), DeviceError> {
        Err(Self::unsupported("VIDIOC_STREAMON"))
    }

    fn stream_off(&mut self, _: BufType) -> Result<(), DeviceError> {
        Err(Self::unsupported("VIDIOC_STREAMOFF"))
    }

    fn encoder_stop(&mut self) -> Result<(), DeviceError> {
        *self.encoder_stops.borrow_mut() += 1;
        Ok(())
    }

    fn wait_readable(&mut self, _: Duration) -> Result<bool, DeviceError> {
        Ok(!self.reads.is_empty())
    }
}

#[derive(Clone, Default)]
struct Events(Rc<RefCell<Vec<String>>>);

impl CaptureEvents for Events {
    fn on_frame(&mut self, frame: &AcquiredFrame) {
        self.0.borrow_mut().push(format!("frame {}", frame.sequence));
    }

    fn on_error(&mut self, kind: ErrorKind, _message: &str) {
        self.0.borrow_mut().push(format!("error {}", kind));
    }
}

#[derive(Clone, Default)]
struct Records(Rc<RefCell<Vec<SlicedRecord>>>);

impl VbiSink for Records {
    fn records(&mut self, records: &[SlicedRecord]) {
        self.0.borrow_mut().extend_from_slice(records);
    }
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("v4lcap-{}-{}", name, std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn session_with(reads: Vec<Result<Vec<u8>, i32>>) -> (Session<ScriptedDevice>, Rc<RefCell<usize>>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut device = ScriptedDevice::new(64, 32);
    device.reads = reads.into();
    let stops = device.encoder_stops.clone();
    (Session::with_device(device), stops)
}

#[test]
fn test_raw_save_two_frames() {
    let dir = scratch_dir("raw-save");
    let target = dir.join("capture.yuv");

    let first: Vec<u8> = (0..4096).map(|i| (i % 251) as u8).collect();
    let second: Vec<u8> = (0..4096).map(|i| (i % 13) as u8).collect();
    let (mut session, _) = session_with(vec![Ok(first.clone()), Ok(second.clone())]);

    session
        .start(CaptureConfig::new().with_method(IoMethod::Read))
        .unwrap();
    session.set_raw_save_target(Some(target.as_path())).unwrap();

    let mut frames = Vec::new();
    while session.wait_readable(Duration::ZERO).unwrap() {
        if let Some(frame) = session.on_data_ready().unwrap() {
            frames.push(frame.sequence);
        }
    }
    assert_eq!(frames, vec![1, 2]);
    session.stop();

    let saved = fs::read(&target).unwrap();
    assert_eq!(saved.len(), 8192);
    assert_eq!(&saved[..4096], &first[..]);
    assert_eq!(&saved[4096..], &second[..]);
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_snapshot_source_bytes_with_display() {
    let dir = scratch_dir("snapshot");
    let shot = dir.join("snapshot.yuv");
    let source = [16u8, 128].repeat(64 * 32);
    let (mut session, _) = session_with(vec![Ok(source.clone()), Ok(source.clone())]);

    session
        .start(
            CaptureConfig::new()
                .with_method(IoMethod::Read)
                .with_display_format(FourCC::BGR24),
        )
        .unwrap();
    let negotiated = *session.capture().unwrap().negotiated().unwrap();
    assert!(negotiated.must_convert);
    assert_eq!(negotiated.destination.fourcc, FourCC::BGR24);

    session.request_snapshot(&shot);
    let frame = session.on_data_ready().unwrap().unwrap();
    assert_eq!(frame.display_bytes, Some(64 * 32 * 3));
    session.on_data_ready().unwrap().unwrap();

    // the snapshot holds the untouched source, not the converted frame
    assert_eq!(fs::read(&shot).unwrap(), source);
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_sliced_vbi_records() {
    let mut record = SlicedRecord::new(ffi::V4L2_SLICED_TELETEXT_B, 0, 7);
    record.data[..4].copy_from_slice(&[0x15, 0x02, 0x49, 0x80]);
    let mut block = record.to_bytes().to_vec();
    block.extend_from_slice(&[0; SLICED_RECORD_SIZE]);

    let (mut session, stops) = session_with(vec![Ok(block), Ok(vec![0; 100])]);
    let events = Events::default();
    let records = Records::default();
    session.set_events(events.clone());
    session.set_vbi_sink(Some(Box::new(records.clone())));

    session
        .start(
            CaptureConfig::new()
                .with_kind(BufType::SlicedVbiCapture)
                .with_method(IoMethod::Read),
        )
        .unwrap();

    let frame = session.on_data_ready().unwrap().unwrap();
    assert_eq!(frame.records, 2);
    let err = session.on_data_ready().unwrap_err();
    assert!(matches!(err, Error::SizeMismatch { expected: 128, actual: 100 }));
    assert!(!session.is_capturing());
    assert_eq!(*stops.borrow(), 1);

    let received = records.0.borrow();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0], record);
    assert_eq!(received[0].service_name(), Some("Teletext System B"));
    assert_eq!(
        *events.0.borrow(),
        vec!["frame 1".to_owned(), "error size-mismatch".to_owned()]
    );
}

#[test]
fn test_would_block_and_fatal_read() {
    let (mut session, _) = session_with(vec![Err(libc::EAGAIN), Err(libc::EIO)]);
    session
        .start(CaptureConfig::new().with_method(IoMethod::Read))
        .unwrap();

    // EAGAIN is not an error
    assert!(session.on_data_ready().unwrap().is_none());
    assert!(session.is_capturing());

    let err = session.on_data_ready().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Device);
    assert!(!session.is_capturing());
    assert!(session.is_open());
}

#[test]
fn test_streaming_refused_keeps_device() {
    let (mut session, _) = session_with(Vec::new());
    let err = session.start(CaptureConfig::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Device);
    assert!(session.is_open());
    assert_eq!(session.capabilities().unwrap().card(), "Scripted Reader");
}
