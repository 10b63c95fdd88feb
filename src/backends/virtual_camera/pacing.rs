// SPDX-License-Identifier: GPL-3.0-only

//! Output pacing at the sink's declared frame rate

use std::thread;
use std::time::{Duration, Instant};

/// Sleeps between writes so frames leave at a steady rate
///
/// Deadlines advance by one interval per frame. When the caller falls more
/// than an interval behind, the schedule restarts from now instead of
/// bursting to catch up.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Option<Duration>,
    anchor: Option<Instant>,
}

impl FramePacer {
    /// Pace at `fps` frames per second; 0 disables pacing
    pub fn new(fps: u32) -> Self {
        let interval = (fps > 0).then(|| Duration::from_secs_f64(1.0 / fps as f64));
        Self {
            interval,
            anchor: None,
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Block until the next frame slot
    pub fn sleep_until_next_frame(&mut self) {
        if let Some(delay) = self.delay_at(Instant::now()) {
            thread::sleep(delay);
        }
    }

    /// Advance the schedule as of `now` and return how long to wait
    pub fn delay_at(&mut self, now: Instant) -> Option<Duration> {
        let interval = self.interval?;

        let Some(anchor) = self.anchor else {
            self.anchor = Some(now);
            return None;
        };

        let target = anchor + interval;
        if now < target {
            self.anchor = Some(target);
            Some(target - now)
        } else {
            self.anchor = Some(now);
            None
        }
    }
}
