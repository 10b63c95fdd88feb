// SPDX-License-Identifier: GPL-3.0-only

//! Per-frame decision between full processing and reuse

use crate::backends::camera::Framerate;

/// Frames between two fully processed frames
///
/// `max(1, round(native / target))`, with `target` clamped down to `native`.
/// Unknown native rate or a zero target processes every frame.
pub fn frame_interval(native_fps: Option<f64>, target_fps: u32) -> u64 {
    let Some(native) = native_fps.filter(|fps| *fps > 0.0) else {
        return 1;
    };
    if target_fps == 0 {
        return 1;
    }
    let target = (target_fps as f64).min(native);
    ((native / target).round() as u64).max(1)
}

/// Decides which captured frames go through segmentation
#[derive(Debug, Clone)]
pub struct FrameRateGovernor {
    interval: u64,
    effective_fps: u32,
    counter: u64,
}

impl FrameRateGovernor {
    pub fn new(target_fps: u32, native_fps: Option<Framerate>) -> Self {
        let native = native_fps.map(|f| f.as_f64()).filter(|fps| *fps > 0.0);
        let effective_fps = match native {
            Some(native) if target_fps > 0 => target_fps.min(native.round().max(1.0) as u32),
            Some(native) => native.round().max(1.0) as u32,
            None => target_fps,
        };
        Self {
            interval: frame_interval(native, target_fps),
            effective_fps,
            counter: 0,
        }
    }

    /// Frames per processed frame
    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Target fps after clamping to the native rate
    pub fn effective_fps(&self) -> u32 {
        self.effective_fps
    }

    /// Whether the next captured frame is due for full processing
    pub fn next_is_due(&mut self) -> bool {
        let due = self.counter % self.interval == 0;
        self.counter += 1;
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_halves_rate() {
        assert_eq!(frame_interval(Some(30.0), 15), 2);
        assert_eq!(frame_interval(Some(30.0), 10), 3);
        assert_eq!(frame_interval(Some(29.97), 15), 2);
    }

    #[test]
    fn test_target_above_native_clamps() {
        assert_eq!(frame_interval(Some(30.0), 60), 1);
        let governor = FrameRateGovernor::new(60, Some(Framerate::from_int(30)));
        assert_eq!(governor.effective_fps(), 30);
        assert_eq!(governor.interval(), 1);
    }

    #[test]
    fn test_unknown_rates_process_everything() {
        assert_eq!(frame_interval(None, 15), 1);
        assert_eq!(frame_interval(Some(0.0), 15), 1);
        assert_eq!(frame_interval(Some(30.0), 0), 1);
        assert_eq!(FrameRateGovernor::new(15, None).effective_fps(), 15);
    }

    #[test]
    fn test_every_other_frame_due() {
        let mut governor = FrameRateGovernor::new(15, Some(Framerate::from_int(30)));
        let due: Vec<bool> = (0..6).map(|_| governor.next_is_due()).collect();
        assert_eq!(due, vec![true, false, true, false, true, false]);
    }
}
