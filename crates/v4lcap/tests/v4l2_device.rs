// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 v4lcap developers
//
// V4L2 Device Tests
//
// TESTING LAYERS:
//
// Layer 1 (No hardware required):
//   - Graceful handling of missing device nodes
//   - I/O method names and parsing
//   - Error kinds reported to hosts
//
// Layer 3 (Hardware Integration - Requires a V4L2 capture device):
//   - Capability query
//   - Streaming capture under each I/O method
//   - Raw VBI preparation on analog TV cards
//
// The device defaults to /dev/video0 and can be changed with
// V4LCAP_TEST_DEVICE (and V4LCAP_TEST_VBI for /dev/vbi0).
//
// RUN LAYER 1:
//   cargo test --test v4l2_device
//
// RUN LAYER 3 (on hardware):
//   cargo test --test v4l2_device -- --ignored --nocapture

use std::{env, io, time::Duration};

use serial_test::serial;
use v4lcap::capture::CaptureConfig;
use v4lcap::device::Device;
use v4lcap::format::BufType;
use v4lcap::pool::IoMethod;
use v4lcap::session::Session;
use v4lcap::v4l2::V4l2Device;
use v4lcap::{Error, ErrorKind};

fn test_device() -> String {
    env::var("V4LCAP_TEST_DEVICE").unwrap_or_else(|_| "/dev/video0".to_owned())
}

fn test_vbi_device() -> String {
    env::var("V4LCAP_TEST_VBI").unwrap_or_else(|_| "/dev/vbi0".to_owned())
}

// =============================================================================
// Layer 1: No Hardware Required
// =============================================================================

#[test]
fn test_open_missing_device() {
    for raw in [false, true] {
        match V4l2Device::open("/dev/v4lcap-does-not-exist", raw) {
            Err(Error::Io(err)) => assert_eq!(err.kind(), io::ErrorKind::NotFound),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("opened a missing device"),
        }
    }
}

#[test]
fn test_session_open_missing_device() {
    let mut session = Session::new();
    let err = session.open("/dev/v4lcap-does-not-exist", false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(!session.is_open());
    assert!(matches!(
        session.start(CaptureConfig::new()),
        Err(Error::NotOpen)
    ));
}

#[test]
fn test_io_method_names() {
    for method in [IoMethod::Read, IoMethod::Mmap, IoMethod::UserPtr] {
        assert_eq!(method.name().parse::<IoMethod>().unwrap(), method);
    }
    assert_eq!("userptr".parse::<IoMethod>().unwrap(), IoMethod::UserPtr);
    assert!("dmabuf".parse::<IoMethod>().is_err());
    assert_eq!(IoMethod::default(), IoMethod::Mmap);
}

#[test]
fn test_libv4l2_probe() {
    // informational: the wrapper library is optional
    match v4lcap::libv4l2_available() {
        Ok(()) => println!("libv4l2 loaded"),
        Err(err) => {
            assert_eq!(err.kind(), ErrorKind::Library);
            println!("libv4l2 not available: {}", err);
        }
    }
}

// =============================================================================
// Layer 3: Hardware Integration
// =============================================================================

#[test]
#[ignore = "requires a V4L2 capture device"]
#[serial]
fn test_hardware_capabilities() {
    let mut device = V4l2Device::open(test_device(), false).unwrap();
    let caps = device.capabilities().unwrap();
    println!("{}", caps);
    println!("io: {:?}", caps.io());
    assert!(caps.supports(BufType::VideoCapture) || caps.supports(BufType::VbiCapture));

    let format = device.get_format(BufType::VideoCapture).unwrap();
    println!("current format: {}", format);
    assert!(format.size() > 0);
}

fn capture_frames(method: IoMethod, raw: bool) {
    let mut session = Session::new();
    session.open(test_device(), raw).unwrap();
    session
        .start(CaptureConfig::new().with_method(method).with_display(true))
        .unwrap();

    let mut frames = 0;
    for _ in 0..100 {
        if !session.wait_readable(Duration::from_secs(2)).unwrap() {
            continue;
        }
        if let Some(frame) = session.on_data_ready().unwrap() {
            frames += 1;
            assert_eq!(frame.sequence, frames);
            if frames == 10 {
                break;
            }
        }
    }
    session.stop();
    assert_eq!(frames, 10, "{} capture delivered {} frames", method, frames);
}

#[test]
#[ignore = "requires a V4L2 capture device"]
#[serial]
fn test_hardware_capture_mmap() {
    capture_frames(IoMethod::Mmap, false);
}

#[test]
#[ignore = "requires a V4L2 capture device"]
#[serial]
fn test_hardware_capture_userptr_raw_mode() {
    capture_frames(IoMethod::UserPtr, true);
}

#[test]
#[ignore = "requires a V4L2 capture device with read support"]
#[serial]
fn test_hardware_capture_read() {
    capture_frames(IoMethod::Read, false);
}

#[test]
#[ignore = "requires an analog TV card with a VBI node"]
#[serial]
fn test_hardware_raw_vbi() {
    let mut session = Session::new();
    session.open(test_vbi_device(), false).unwrap();
    match session.start(
        CaptureConfig::new()
            .with_kind(BufType::VbiCapture)
            .with_method(IoMethod::Read),
    ) {
        Ok(()) => {
            let vbi = session.capture().unwrap().vbi();
            println!("VBI frame size: {:?}", vbi.frame_size());
            session.stop();
        }
        Err(Error::NoServicesPossible) => println!("no decodable services on this card"),
        Err(err) => panic!("{}", err),
    }
}
