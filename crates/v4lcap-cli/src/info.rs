// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 v4lcap developers

use crate::error::CliError;
use clap::Args as ClapArgs;
use serde::Serialize;
use v4lcap::device::Device;
use v4lcap::format::{BufType, Format};
use v4lcap::v4l2::V4l2Device;
use v4lcap::vbi::{self, VbiSession};

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Device node path
    #[arg(short, long, default_value = "/dev/video0")]
    device: String,

    /// Bypass libv4l2 and use the kernel interface directly
    #[arg(long)]
    raw: bool,
}

#[derive(Debug, Serialize)]
struct DeviceInfo {
    device: String,
    driver: String,
    card: String,
    bus_info: String,
    version: String,
    capabilities: CapabilityInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    standard: Option<String>,
    formats: Vec<FormatInfo>,
    libv4l2: bool,
}

#[derive(Debug, Serialize)]
struct CapabilityInfo {
    video_capture: bool,
    vbi_capture: bool,
    sliced_vbi_capture: bool,
    read: bool,
    streaming: bool,
    tuner: bool,
    audio: bool,
}

#[derive(Debug, Serialize)]
struct FormatInfo {
    kind: String,
    format: String,
    size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    services: Option<Vec<String>>,
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Executing info command: {:?}", args);

    let mut dev = V4l2Device::open(&args.device, args.raw)?;
    let caps = dev.capabilities().map_err(v4lcap::Error::from)?;
    let io = caps.io();
    let (major, minor, patch) = caps.version();

    let standard = dev.standard().ok();
    let mut formats = Vec::new();
    for kind in [
        BufType::VideoCapture,
        BufType::VbiCapture,
        BufType::SlicedVbiCapture,
    ] {
        if !caps.supports(kind) {
            continue;
        }
        match dev.get_format(kind) {
            Ok(format) => formats.push(describe(&format, standard)),
            Err(e) => log::warn!("Cannot query {} format: {}", kind, e),
        }
    }

    let info = DeviceInfo {
        device: args.device.clone(),
        driver: caps.driver().to_string(),
        card: caps.card().to_string(),
        bus_info: caps.bus_info().to_string(),
        version: format!("{}.{}.{}", major, minor, patch),
        capabilities: CapabilityInfo {
            video_capture: caps.is_video_capture(),
            vbi_capture: caps.is_vbi_capture(),
            sliced_vbi_capture: caps.is_sliced_vbi_capture(),
            read: io.read,
            streaming: io.streaming,
            tuner: caps.has_tuner(),
            audio: caps.has_audio(),
        },
        standard: standard.map(|std| format!("0x{:016x}", std.0)),
        formats,
        libv4l2: v4lcap::libv4l2_available().is_ok(),
    };

    if json {
        let json_str = serde_json::to_string_pretty(&info)
            .map_err(|e| CliError::General(format!("Failed to serialize JSON: {}", e)))?;
        println!("{}", json_str);
    } else {
        print_text_info(&info);
    }

    Ok(())
}

fn describe(format: &Format, standard: Option<v4lcap::format::VideoStandard>) -> FormatInfo {
    let services = match (format, standard) {
        (Format::Vbi(raw), Some(std)) => Some(match VbiSession::prepare(raw, std) {
            Ok(session) => service_names(session.services()),
            Err(e) => {
                log::debug!("Raw VBI decoding not possible: {}", e);
                Vec::new()
            }
        }),
        (Format::SlicedVbi(sliced), _) => Some(service_names(sliced.service_set)),
        _ => None,
    };

    FormatInfo {
        kind: format.buf_type().to_string(),
        format: format.to_string(),
        size: format.size(),
        services,
    }
}

fn service_names(set: u16) -> Vec<String> {
    vbi::SERVICES
        .iter()
        .filter(|svc| svc.id & set != 0)
        .map(|svc| svc.name.to_string())
        .collect()
}

fn print_text_info(info: &DeviceInfo) {
    println!("=== {} ===", info.device);
    println!("Card:      {}", info.card);
    println!("Driver:    {} {}", info.driver, info.version);
    println!("Bus:       {}", info.bus_info);
    if let Some(standard) = &info.standard {
        println!("Standard:  {}", standard);
    }
    println!(
        "libv4l2:   {}",
        if info.libv4l2 {
            "available"
        } else {
            "not available"
        }
    );

    let caps = &info.capabilities;
    println!("\nCapabilities:");
    println!("  Video capture:      {}", yes_no(caps.video_capture));
    println!("  Raw VBI capture:    {}", yes_no(caps.vbi_capture));
    println!("  Sliced VBI capture: {}", yes_no(caps.sliced_vbi_capture));
    println!("  read() I/O:         {}", yes_no(caps.read));
    println!("  Streaming I/O:      {}", yes_no(caps.streaming));
    println!("  Tuner:              {}", yes_no(caps.tuner));
    println!("  Audio:              {}", yes_no(caps.audio));

    if !info.formats.is_empty() {
        println!("\nCurrent formats:");
        for format in &info.formats {
            println!("  {}", format.format);
            if let Some(services) = &format.services {
                if services.is_empty() {
                    println!("    services: none");
                } else {
                    println!("    services: {}", services.join(", "));
                }
            }
        }
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}
