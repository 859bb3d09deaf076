// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 v4lcap developers

//! VBI Demultiplexer
//!
//! Raw VBI capture delivers the blanking-interval scan lines as 8-bit
//! samples. [`VbiSession::prepare`] decides once per capture which broadcast
//! services the device's line geometry can carry and assigns every captured
//! row to at most one of them. [`VbiSession::demux`] then slices each row:
//! the row is thresholded halfway between its darkest and brightest sample,
//! the service's clock run-in and framing code is searched for around its
//! nominal position, and the payload bits following it are sampled.
//!
//! Sliced VBI capture delivers [`SlicedRecord`]s already; the engine only
//! checks the size of each read against the device's `io_size`.
//!
//! Both modes go through [`VbiState`], which rejects data before a prepare
//! and after the capture is closed.

use std::fmt;

use crate::fourcc::FourCC;
use crate::format::{SlicedVbiFormat, VbiFormat, VideoStandard};
use crate::Error;
use v4lcap_sys as ffi;

/// Size of one sliced record on the wire (`struct v4l2_sliced_vbi_data`)
pub const SLICED_RECORD_SIZE: usize = 64;

/// Smallest peak-to-peak swing a row needs to be sliced
const MIN_AMPLITUDE: u8 = 32;

/// How far the run-in may sit from its nominal position, in nanoseconds
const SEARCH_SLACK_NS: u64 = 1_000;

/// Scanning system of a video standard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum System {
    /// 625 lines, 50 fields per second
    Pal625,
    /// 525 lines, 60 fields per second
    Ntsc525,
}

impl System {
    pub fn from_standard(std: VideoStandard) -> Self {
        if std.is_625_50() {
            System::Pal625
        } else {
            System::Ntsc525
        }
    }

    /// Absolute number of the line before the second field's first line
    pub fn field2_offset(&self) -> u32 {
        match self {
            System::Pal625 => 313,
            System::Ntsc525 => 263,
        }
    }
}

impl fmt::Display for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            System::Pal625 => write!(f, "625/50"),
            System::Ntsc525 => write!(f, "525/60"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coding {
    /// One level per bit, least significant bit first
    NrzLsb,
    /// Two half-bit levels per bit, `1` is high-low, most significant first
    BiphaseMsb,
    /// As [`Coding::BiphaseMsb`], least significant bit first
    BiphaseLsb,
}

/// A line service decodable from raw VBI
#[derive(Debug, Clone, Copy)]
pub struct Service {
    /// `V4L2_SLICED_*` identifier
    pub id: u16,
    pub name: &'static str,
    pub system: System,
    /// Inclusive absolute line range per field, `(0, 0)` when absent
    lines: [(u32, u32); 2],
    /// Start of the run-in, nanoseconds after 0H
    offset_ns: u64,
    sync_rate: u32,
    /// Run-in and framing code in transmission order, first symbol highest
    sync: u64,
    sync_bits: u32,
    bit_rate: u32,
    payload_bits: u32,
    coding: Coding,
}

impl Service {
    pub fn payload_bytes(&self) -> usize {
        (self.payload_bits as usize).div_ceil(8)
    }

    fn covers(&self, field: usize, line: u32) -> bool {
        let (first, last) = self.lines[field];
        first != 0 && (first..=last).contains(&line)
    }

    /// Highest level transition rate of the signal
    fn max_rate(&self) -> u32 {
        let payload = match self.coding {
            Coding::NrzLsb => self.bit_rate,
            Coding::BiphaseMsb | Coding::BiphaseLsb => self.bit_rate * 2,
        };
        self.sync_rate.max(payload)
    }
}

/// Services the raw demultiplexer knows, dedicated lines first
pub const SERVICES: [Service; 4] = [
    Service {
        id: ffi::V4L2_SLICED_VPS,
        name: "Video Programming System",
        system: System::Pal625,
        lines: [(16, 16), (0, 0)],
        offset_ns: 12_500,
        sync_rate: 5_000_000,
        sync: 0xAAAA_8A99,
        sync_bits: 32,
        bit_rate: 2_500_000,
        payload_bits: 13 * 8,
        coding: Coding::BiphaseMsb,
    },
    Service {
        id: ffi::V4L2_SLICED_WSS_625,
        name: "Wide Screen Signalling 625",
        system: System::Pal625,
        lines: [(23, 23), (0, 0)],
        offset_ns: 11_000,
        sync_rate: 5_000_000,
        // 29 element run-in followed by the 24 element start code
        sync: (0x1F1C_71C7_u64 << 24) | 0x1E_3C1F,
        sync_bits: 53,
        bit_rate: 833_333,
        payload_bits: 14,
        coding: Coding::BiphaseLsb,
    },
    Service {
        id: ffi::V4L2_SLICED_TELETEXT_B,
        name: "Teletext System B",
        system: System::Pal625,
        lines: [(6, 22), (318, 335)],
        offset_ns: 10_300,
        sync_rate: 6_937_500,
        // 0x55 0x55 clock run-in, 0x27 framing code, sent LSB first
        sync: 0x00AA_AAE4,
        sync_bits: 24,
        bit_rate: 6_937_500,
        payload_bits: 42 * 8,
        coding: Coding::NrzLsb,
    },
    Service {
        id: ffi::V4L2_SLICED_CAPTION_525,
        name: "Closed Caption 525",
        system: System::Ntsc525,
        lines: [(21, 21), (284, 284)],
        offset_ns: 10_500,
        // seven cycle run-in and the 001 start bits at twice the bit rate
        sync_rate: 1_006_992,
        sync: 0b1010_1010_1010_1000_0011,
        sync_bits: 20,
        bit_rate: 503_496,
        payload_bits: 16,
        coding: Coding::NrzLsb,
    },
];

/// Look up a service by its `V4L2_SLICED_*` identifier.
pub fn service(id: u16) -> Option<&'static Service> {
    SERVICES.iter().find(|s| s.id == id)
}

/// One decoded line (`struct v4l2_sliced_vbi_data`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlicedRecord {
    /// `V4L2_SLICED_*` service, 0 for an unused slot
    pub id: u32,
    /// 0 for the first field, 1 for the second
    pub field: u32,
    /// Line number within the field
    pub line: u32,
    pub data: [u8; 48],
}

impl SlicedRecord {
    pub fn new(id: u16, field: u32, line: u32) -> Self {
        SlicedRecord {
            id: u32::from(id),
            field,
            line,
            data: [0; 48],
        }
    }

    pub fn from_bytes(raw: &[u8; SLICED_RECORD_SIZE]) -> Self {
        let word = |i: usize| u32::from_ne_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
        let mut data = [0u8; 48];
        data.copy_from_slice(&raw[16..]);
        SlicedRecord {
            id: word(0),
            field: word(4),
            line: word(8),
            data,
        }
    }

    pub fn to_bytes(&self) -> [u8; SLICED_RECORD_SIZE] {
        let mut raw = [0u8; SLICED_RECORD_SIZE];
        raw[0..4].copy_from_slice(&self.id.to_ne_bytes());
        raw[4..8].copy_from_slice(&self.field.to_ne_bytes());
        raw[8..12].copy_from_slice(&self.line.to_ne_bytes());
        raw[16..].copy_from_slice(&self.data);
        raw
    }

    pub fn is_empty(&self) -> bool {
        self.id == 0
    }

    /// Name of the record's service, if known
    pub fn service_name(&self) -> Option<&'static str> {
        u16::try_from(self.id).ok().and_then(service).map(|s| s.name)
    }

    /// Meaningful payload bytes for the record's service
    pub fn payload(&self) -> &[u8] {
        let len = u16::try_from(self.id)
            .ok()
            .and_then(service)
            .map_or(self.data.len(), |s| s.payload_bytes());
        &self.data[..len]
    }
}

/// Split a sliced VBI read into its records.
pub fn parse_sliced(buf: &[u8]) -> Vec<SlicedRecord> {
    buf.chunks_exact(SLICED_RECORD_SIZE)
        .filter_map(|chunk| <&[u8; SLICED_RECORD_SIZE]>::try_from(chunk).ok())
        .map(SlicedRecord::from_bytes)
        .collect()
}

/// Format request for sliced capture of every service `std` carries.
///
/// The service lines are left empty so the driver fills in the lines it
/// uses for each service.
pub fn sliced_request(std: VideoStandard) -> SlicedVbiFormat {
    SlicedVbiFormat {
        service_set: std.sliced_service_set(),
        ..Default::default()
    }
}

/// Expand 8-bit VBI samples into RGB24 grey pixels, bounded by `dst`.
pub fn raw_to_rgb24(raw: &[u8], dst: &mut [u8]) -> usize {
    let mut written = 0;
    for (px, &sample) in dst.chunks_exact_mut(3).zip(raw) {
        px.fill(sample);
        written += 3;
    }
    written
}

#[derive(Debug, Clone, Copy)]
struct RowPlan {
    field: u32,
    /// Absolute line number
    line: u32,
    service: Option<usize>,
}

/// Parsing context for raw VBI, fixed for one capture
#[derive(Debug, Clone)]
pub struct VbiSession {
    format: VbiFormat,
    system: System,
    services: u16,
    rows: Vec<RowPlan>,
}

impl VbiSession {
    /// Work out which services the raw geometry in `fmt` can carry.
    pub fn prepare(fmt: &VbiFormat, std: VideoStandard) -> Result<Self, Error> {
        if fmt.sample_format != FourCC::GREY {
            return Err(Error::UnsupportedFormat(format!(
                "raw VBI sample format {}, expected {}",
                fmt.sample_format,
                FourCC::GREY
            )));
        }
        if fmt.sampling_rate == 0 || fmt.samples_per_line == 0 {
            return Err(Error::NoServicesPossible);
        }

        let system = System::from_standard(std);
        let rows = row_order(fmt);

        let possible: Vec<usize> = SERVICES
            .iter()
            .enumerate()
            .filter(|(_, svc)| svc.system == system && fits(svc, fmt))
            .map(|(i, _)| i)
            .collect();

        let rows: Vec<RowPlan> = rows
            .into_iter()
            .map(|(field, line)| RowPlan {
                field,
                line,
                service: possible
                    .iter()
                    .copied()
                    .find(|&i| SERVICES[i].covers(field as usize, line)),
            })
            .collect();

        let services = rows
            .iter()
            .filter_map(|row| row.service)
            .fold(0u16, |set, i| set | SERVICES[i].id);
        if services == 0 {
            return Err(Error::NoServicesPossible);
        }

        log::debug!(
            "Raw VBI {}: {} rows, services 0x{:04x}",
            system,
            rows.len(),
            services
        );
        Ok(VbiSession {
            format: *fmt,
            system,
            services,
            rows,
        })
    }

    /// `V4L2_SLICED_*` set of the services assigned to some row
    pub fn services(&self) -> u16 {
        self.services
    }

    pub fn system(&self) -> System {
        self.system
    }

    pub fn rows(&self) -> usize {
        self.rows.len()
    }

    /// Bytes of one raw capture
    pub fn frame_size(&self) -> usize {
        self.format.samples_per_line as usize * self.rows.len()
    }

    /// Service and field-relative line assigned to `row`
    pub fn row_service(&self, row: usize) -> Option<(&'static Service, u32, u32)> {
        let plan = self.rows.get(row)?;
        let svc = &SERVICES[plan.service?];
        Some((svc, plan.field, self.relative_line(plan)))
    }

    fn relative_line(&self, plan: &RowPlan) -> u32 {
        if plan.field == 0 {
            plan.line
        } else {
            plan.line.saturating_sub(self.system.field2_offset())
        }
    }

    /// Slice every assigned row of one raw capture.
    ///
    /// Yields one record per row whose run-in and framing code were found.
    pub fn demux(&self, raw: &[u8]) -> Vec<SlicedRecord> {
        let width = self.format.samples_per_line as usize;
        let mut records = Vec::new();

        for (plan, samples) in self.rows.iter().zip(raw.chunks_exact(width)) {
            let Some(index) = plan.service else {
                continue;
            };
            let svc = &SERVICES[index];
            if let Some(payload) = slice(svc, &self.format, samples) {
                let mut record = SlicedRecord::new(svc.id, plan.field, self.relative_line(plan));
                record.data[..payload.len()].copy_from_slice(&payload);
                records.push(record);
            }
        }

        log::trace!("Demultiplexed {} records", records.len());
        records
    }
}

/// Captured rows as `(field, absolute line)` in delivery order.
fn row_order(fmt: &VbiFormat) -> Vec<(u32, u32)> {
    let field = |f: usize| -> Vec<(u32, u32)> {
        let start = u32::try_from(fmt.start[f]).unwrap_or(0);
        (0..fmt.count[f])
            .map(|i| (f as u32, if start == 0 { 0 } else { start + i }))
            .collect()
    };
    let (first, second) = (field(0), field(1));

    if !fmt.is_interlaced() {
        return first.into_iter().chain(second).collect();
    }

    let mut rows = Vec::with_capacity(first.len() + second.len());
    let mut a = first.into_iter();
    let mut b = second.into_iter();
    loop {
        match (a.next(), b.next()) {
            (None, None) => break,
            (x, y) => rows.extend(x.into_iter().chain(y)),
        }
    }
    rows
}

/// Nominal sample position of the service run-in within a row
fn nominal_start(svc: &Service, fmt: &VbiFormat) -> f64 {
    svc.offset_ns as f64 * fmt.sampling_rate as f64 / 1e9 - fmt.offset as f64
}

fn signal_len(svc: &Service, fmt: &VbiFormat) -> f64 {
    let rate = fmt.sampling_rate as f64;
    svc.sync_bits as f64 * rate / svc.sync_rate as f64
        + svc.payload_bits as f64 * rate / svc.bit_rate as f64
}

/// Whether the sampling covers the service's rate and payload window
fn fits(svc: &Service, fmt: &VbiFormat) -> bool {
    if u64::from(svc.max_rate()) * 2 > u64::from(fmt.sampling_rate) {
        return false;
    }
    let start = nominal_start(svc, fmt);
    start >= 0.0 && start + signal_len(svc, fmt) <= fmt.samples_per_line as f64
}

fn level(samples: &[u8], at: f64, threshold: u8) -> Option<bool> {
    samples.get(at as usize).map(|&s| s > threshold)
}

fn sync_matches(svc: &Service, samples: &[u8], start: f64, step: f64, threshold: u8) -> bool {
    (0..svc.sync_bits).all(|i| {
        let expected = (svc.sync >> (svc.sync_bits - 1 - i)) & 1 == 1;
        level(samples, start + (f64::from(i) + 0.5) * step, threshold) == Some(expected)
    })
}

/// Decode one row of samples for `svc`.
fn slice(svc: &Service, fmt: &VbiFormat, samples: &[u8]) -> Option<Vec<u8>> {
    let (lo, hi) = samples
        .iter()
        .fold((u8::MAX, u8::MIN), |(lo, hi), &s| (lo.min(s), hi.max(s)));
    if hi.saturating_sub(lo) < MIN_AMPLITUDE {
        return None;
    }
    let threshold = ((u16::from(lo) + u16::from(hi)) / 2) as u8;

    let rate = fmt.sampling_rate as f64;
    let sync_step = rate / svc.sync_rate as f64;
    let bit_step = rate / svc.bit_rate as f64;
    let nominal = nominal_start(svc, fmt);
    let slack = SEARCH_SLACK_NS as f64 * rate / 1e9;

    // centre of the run of start positions where the sync pattern matches
    let first = nominal - slack;
    let mut matched: Option<(f64, f64)> = None;
    let mut pos = first.max(0.0).floor();
    while pos <= nominal + slack {
        if sync_matches(svc, samples, pos, sync_step, threshold) {
            matched = Some(match matched {
                Some((from, _)) => (from, pos),
                None => (pos, pos),
            });
        } else if matched.is_some() {
            break;
        }
        pos += 1.0;
    }
    let (from, to) = matched?;
    let start = (from + to) / 2.0 + svc.sync_bits as f64 * sync_step;

    let mut payload = vec![0u8; svc.payload_bytes()];
    for j in 0..svc.payload_bits as usize {
        let at = start + j as f64 * bit_step;
        let bit = match svc.coding {
            Coding::NrzLsb => level(samples, at + 0.5 * bit_step, threshold)?,
            Coding::BiphaseMsb | Coding::BiphaseLsb => {
                let first = level(samples, at + 0.25 * bit_step, threshold)?;
                let second = level(samples, at + 0.75 * bit_step, threshold)?;
                first && !second
            }
        };
        if bit {
            let shift = match svc.coding {
                Coding::BiphaseMsb => 7 - j % 8,
                _ => j % 8,
            };
            payload[j / 8] |= 1 << shift;
        }
    }
    Some(payload)
}

/// What a VBI capture has been prepared for
#[derive(Debug, Clone)]
pub enum VbiMode {
    Raw(VbiSession),
    Sliced(SlicedVbiFormat),
}

/// Lifecycle of the VBI parsing context of one capture
#[derive(Debug, Clone, Default)]
pub enum VbiState {
    #[default]
    Uninitialized,
    Prepared(VbiMode),
    Closed,
}

impl VbiState {
    pub fn prepare_raw(&mut self, fmt: &VbiFormat, std: VideoStandard) -> Result<(), Error> {
        let session = VbiSession::prepare(fmt, std)?;
        *self = VbiState::Prepared(VbiMode::Raw(session));
        Ok(())
    }

    pub fn prepare_sliced(&mut self, fmt: SlicedVbiFormat) {
        log::debug!(
            "Sliced VBI: services 0x{:04x}, {} bytes per read",
            fmt.service_set,
            fmt.io_size
        );
        *self = VbiState::Prepared(VbiMode::Sliced(fmt));
    }

    pub fn is_prepared(&self) -> bool {
        matches!(self, VbiState::Prepared(_))
    }

    /// Bytes expected per capture
    pub fn frame_size(&self) -> Option<usize> {
        match self {
            VbiState::Prepared(VbiMode::Raw(session)) => Some(session.frame_size()),
            VbiState::Prepared(VbiMode::Sliced(fmt)) => Some(fmt.io_size as usize),
            _ => None,
        }
    }

    /// Size-check one capture and turn it into records.
    pub fn process(&self, data: &[u8]) -> Result<Vec<SlicedRecord>, Error> {
        let VbiState::Prepared(mode) = self else {
            return Err(Error::NotStreaming);
        };
        let expected = match mode {
            VbiMode::Raw(session) => session.frame_size(),
            VbiMode::Sliced(fmt) => fmt.io_size as usize,
        };
        if data.len() != expected {
            return Err(Error::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }

        Ok(match mode {
            VbiMode::Raw(session) => session.demux(data),
            VbiMode::Sliced(_) => parse_sliced(data),
        })
    }

    pub fn close(&mut self) {
        *self = VbiState::Closed;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::mock::pal_vbi;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const LOW: u8 = 40;
    const HIGH: u8 = 200;

    fn ntsc_vbi() -> VbiFormat {
        VbiFormat {
            sampling_rate: 27_000_000,
            offset: 128,
            samples_per_line: 1600,
            sample_format: FourCC::GREY,
            start: [10, 273],
            count: [12, 12],
            flags: 0,
        }
    }

    /// Render `payload` for `svc` as one row of samples.
    pub(crate) fn synthesize(svc: &Service, fmt: &VbiFormat, payload: &[u8]) -> Vec<u8> {
        let rate = fmt.sampling_rate as f64;
        let t0 = svc.offset_ns as f64 / 1e9;
        let sync_len = svc.sync_bits as f64 / svc.sync_rate as f64;
        let bit_len = 1.0 / svc.bit_rate as f64;

        (0..fmt.samples_per_line)
            .map(|s| {
                let t = (s as f64 + fmt.offset as f64 + 0.5) / rate - t0;
                let high = if t < 0.0 {
                    false
                } else if t < sync_len {
                    let i = (t * svc.sync_rate as f64) as u32;
                    (svc.sync >> (svc.sync_bits - 1 - i)) & 1 == 1
                } else {
                    let p = (t - sync_len) / bit_len;
                    let j = p as usize;
                    if j >= svc.payload_bits as usize {
                        false
                    } else {
                        let shift = match svc.coding {
                            Coding::BiphaseMsb => 7 - j % 8,
                            _ => j % 8,
                        };
                        let bit = payload[j / 8] >> shift & 1 == 1;
                        match svc.coding {
                            Coding::NrzLsb => bit,
                            _ => bit == (p.fract() < 0.5),
                        }
                    }
                };
                if high {
                    HIGH
                } else {
                    LOW
                }
            })
            .collect()
    }

    /// Raw capture with `svc` carrying `payload` on `row`, other rows flat
    pub(crate) fn raw_frame(fmt: &VbiFormat, row: usize, svc: &Service, payload: &[u8]) -> Vec<u8> {
        let width = fmt.samples_per_line as usize;
        let mut frame = vec![LOW; width * fmt.rows() as usize];
        frame[row * width..(row + 1) * width].copy_from_slice(&synthesize(svc, fmt, payload));
        frame
    }

    #[test]
    fn test_prepare_pal() {
        let session = VbiSession::prepare(&pal_vbi(), VideoStandard::PAL).unwrap();
        // line 23 is not captured, so no WSS
        assert_eq!(
            session.services(),
            ffi::V4L2_SLICED_TELETEXT_B | ffi::V4L2_SLICED_VPS
        );
        assert_eq!(session.rows(), 34);
        assert_eq!(session.frame_size(), 1600 * 34);

        // row 0 is line 6, row 10 is line 16
        assert_eq!(session.row_service(0).map(|(s, f, l)| (s.id, f, l)), Some((1, 0, 6)));
        let (vps, _, line) = session.row_service(10).unwrap();
        assert_eq!((vps.id, line), (ffi::V4L2_SLICED_VPS, 16));
        // row 17 is line 318, the first line of field 2
        let (ttx, field, line) = session.row_service(17).unwrap();
        assert_eq!((ttx.id, field, line), (ffi::V4L2_SLICED_TELETEXT_B, 1, 5));
    }

    #[test]
    fn test_prepare_interlaced_rows() {
        let mut fmt = pal_vbi();
        fmt.flags = ffi::V4L2_VBI_INTERLACED;
        let session = VbiSession::prepare(&fmt, VideoStandard::PAL).unwrap();
        assert_eq!(session.rows(), 34);
        assert_eq!(session.row_service(1).map(|(_, f, l)| (f, l)), Some((1, 5)));
        assert_eq!(session.row_service(2).map(|(_, f, l)| (f, l)), Some((0, 7)));
    }

    #[test]
    fn test_prepare_failures() {
        let mut fmt = pal_vbi();
        fmt.sample_format = FourCC::YUYV;
        assert!(matches!(
            VbiSession::prepare(&fmt, VideoStandard::PAL),
            Err(Error::UnsupportedFormat(_))
        ));

        // too slow for any 625 service
        let mut fmt = pal_vbi();
        fmt.sampling_rate = 4_000_000;
        fmt.samples_per_line = 256;
        assert!(matches!(
            VbiSession::prepare(&fmt, VideoStandard::PAL),
            Err(Error::NoServicesPossible)
        ));

        // lines that carry nothing
        let mut fmt = ntsc_vbi();
        fmt.start = [10, 273];
        fmt.count = [5, 5];
        assert!(matches!(
            VbiSession::prepare(&fmt, VideoStandard::NTSC),
            Err(Error::NoServicesPossible)
        ));
    }

    #[test]
    fn test_demux_teletext() {
        let fmt = pal_vbi();
        let session = VbiSession::prepare(&fmt, VideoStandard::PAL).unwrap();
        let ttx = service(ffi::V4L2_SLICED_TELETEXT_B).unwrap();

        let mut rng = StdRng::seed_from_u64(42);
        let payload: Vec<u8> = (0..42).map(|_| rng.random()).collect();
        let frame = raw_frame(&fmt, 3, ttx, &payload);

        let records = session.demux(&frame);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.id, u32::from(ffi::V4L2_SLICED_TELETEXT_B));
        assert_eq!((record.field, record.line), (0, 9));
        assert_eq!(record.payload(), &payload[..]);
        assert_eq!(record.service_name(), Some("Teletext System B"));
    }

    #[test]
    fn test_demux_vps_and_wss() {
        let fmt = pal_vbi();
        let session = VbiSession::prepare(&fmt, VideoStandard::PAL).unwrap();

        let vps = service(ffi::V4L2_SLICED_VPS).unwrap();
        let payload: Vec<u8> = (0..13).map(|i| i * 19 + 7).collect();
        let records = session.demux(&raw_frame(&fmt, 10, vps, &payload));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].line, 16);
        assert_eq!(records[0].payload(), &payload[..]);

        let wss = service(ffi::V4L2_SLICED_WSS_625).unwrap();
        let mut fmt23 = fmt;
        fmt23.start = [23, 318];
        fmt23.count = [1, 1];
        let session = VbiSession::prepare(&fmt23, VideoStandard::PAL).unwrap();
        let records = session.demux(&raw_frame(&fmt23, 0, wss, &[0x08, 0x26]));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload(), &[0x08, 0x26]);
    }

    #[test]
    fn test_demux_caption_field2() {
        let fmt = ntsc_vbi();
        let session = VbiSession::prepare(&fmt, VideoStandard::NTSC).unwrap();
        assert_eq!(session.services(), ffi::V4L2_SLICED_CAPTION_525);

        let cc = service(ffi::V4L2_SLICED_CAPTION_525).unwrap();
        // line 284 is row 12 + (284 - 273)
        let records = session.demux(&raw_frame(&fmt, 23, cc, &[0xc1, 0x20]));
        assert_eq!(records.len(), 1);
        assert_eq!((records[0].field, records[0].line), (1, 21));
        assert_eq!(records[0].payload(), &[0xc1, 0x20]);
    }

    #[test]
    fn test_demux_noise_yields_nothing() {
        let fmt = pal_vbi();
        let session = VbiSession::prepare(&fmt, VideoStandard::PAL).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let frame: Vec<u8> = (0..session.frame_size()).map(|_| rng.random()).collect();
        assert!(session.demux(&frame).is_empty());
        assert!(session.demux(&vec![LOW; session.frame_size()]).is_empty());
    }

    #[test]
    fn test_sliced_records() {
        let mut record = SlicedRecord::new(ffi::V4L2_SLICED_WSS_625, 0, 23);
        record.data[0] = 0x08;
        let mut buf = record.to_bytes().to_vec();
        buf.extend_from_slice(&[0u8; SLICED_RECORD_SIZE]);

        let records = parse_sliced(&buf);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], record);
        assert!(records[1].is_empty());
    }

    #[test]
    fn test_state_machine() {
        let mut state = VbiState::default();
        assert!(matches!(state.process(&[]), Err(Error::NotStreaming)));

        state.prepare_sliced(SlicedVbiFormat {
            service_set: ffi::V4L2_SLICED_VBI_625,
            io_size: 128,
            ..Default::default()
        });
        assert_eq!(state.frame_size(), Some(128));
        assert_eq!(state.process(&[0u8; 128]).unwrap().len(), 2);
        assert!(matches!(
            state.process(&[0u8; 127]),
            Err(Error::SizeMismatch {
                expected: 128,
                actual: 127
            })
        ));

        state.close();
        assert!(!state.is_prepared());
        assert!(matches!(state.process(&[0u8; 128]), Err(Error::NotStreaming)));
    }

    #[test]
    fn test_raw_to_rgb24() {
        let mut dst = [0u8; 7];
        assert_eq!(raw_to_rgb24(&[1, 2, 3], &mut dst), 6);
        assert_eq!(dst, [1, 1, 1, 2, 2, 2, 0]);
    }

    #[test]
    fn test_sliced_request() {
        assert_eq!(sliced_request(VideoStandard::PAL).service_set, 0x4401);
        assert_eq!(sliced_request(VideoStandard::NTSC).service_set, 0x1000);
    }
}
