// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 v4lcap developers

use std::time::Instant;

/// Frame sequence and rate bookkeeping for one capture session.
///
/// The rate is sampled coarsely: it is recomputed only once at least one
/// whole second has passed since the previous sample, as
/// `100 * frames / elapsed_centiseconds`, and holds its value in between.
#[derive(Debug, Clone, Default)]
pub struct FrameCounters {
    frame: u32,
    last_frame: u32,
    last_sample: Option<Instant>,
    fps: u32,
}

impl FrameCounters {
    pub fn new() -> Self {
        FrameCounters::default()
    }

    pub fn reset(&mut self) {
        *self = FrameCounters::default();
    }

    /// Account for one acquired frame at `now`, returning its sequence
    /// number (starting at 1) and the current frames per second.
    pub fn tick(&mut self, now: Instant) -> (u32, u32) {
        let last = match self.last_sample {
            Some(last) if self.frame != 0 => last,
            _ => {
                self.last_sample = Some(now);
                now
            }
        };

        let elapsed = now.saturating_duration_since(last);
        if elapsed.as_secs() >= 1 {
            let centis = elapsed.as_secs() * 100 + u64::from(elapsed.subsec_micros() / 10_000);
            let frames = u64::from(self.frame.wrapping_sub(self.last_frame));
            self.fps = u32::try_from(100 * frames / centis).unwrap_or(u32::MAX);
            self.last_frame = self.frame;
            self.last_sample = Some(now);
        }

        self.frame = self.frame.wrapping_add(1);
        (self.frame, self.fps)
    }

    /// Sequence number of the last frame, 0 before the first
    pub fn sequence(&self) -> u32 {
        self.frame
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }
}
