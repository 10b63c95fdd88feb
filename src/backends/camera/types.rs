// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for camera backends

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// A single frame from the camera
///
/// Pixels are always packed RGB8; capture backends convert whatever the
/// device produces before handing the frame to the stream worker.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// RGB pixel data at the capture resolution
    pub pixels: RgbImage,
    /// Capture sequence number within the current run
    pub sequence: u64,
    /// Timestamp when frame was captured (for latency diagnostics)
    pub captured_at: Instant,
}

impl VideoFrame {
    /// Wrap an RGB image captured just now
    pub fn new(pixels: RgbImage, sequence: u64) -> Self {
        Self {
            pixels,
            sequence,
            captured_at: Instant::now(),
        }
    }
}

/// Framerate as a fraction (numerator/denominator)
/// Stores exact framerate to handle NTSC rates like 59.94fps (60000/1001)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Framerate {
    pub num: u32,
    pub denom: u32,
}

impl Framerate {
    /// Create a new framerate from numerator and denominator
    pub fn new(num: u32, denom: u32) -> Self {
        Self {
            num,
            denom: if denom == 0 { 1 } else { denom },
        }
    }

    /// Create a framerate from an integer (e.g., 30 becomes 30/1)
    pub fn from_int(fps: u32) -> Self {
        Self { num: fps, denom: 1 }
    }

    /// Get the framerate as a floating point value
    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.denom as f64
    }

    /// Get the rounded integer framerate (59.94 becomes 60)
    pub fn as_int(&self) -> u32 {
        self.as_f64().round() as u32
    }
}

impl std::fmt::Display for Framerate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show decimal for non-integer framerates (NTSC)
        if self.denom != 1 {
            write!(f, "{:.2}", self.as_f64())
        } else {
            write!(f, "{}", self.num)
        }
    }
}

/// A camera that delivered at least one frame during enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Device index (`/dev/video{id}`)
    pub id: u32,
    /// Human-readable name
    pub name: String,
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for capture and sink operations
///
/// Startup failures (`DeviceUnavailable`, `NoSupportedFormat`,
/// `InitializationFailed`) keep a run from ever starting. `ReadFailed` and
/// `WriteFailed` end the run that hit them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Capture device could not be opened
    DeviceUnavailable(String),
    /// Capture handle failed to deliver a frame
    ReadFailed(String),
    /// Every sink pixel format was rejected by the output device
    NoSupportedFormat(String),
    /// Sink handle failed to accept a frame
    WriteFailed(String),
    /// Failed to initialize backend (missing GStreamer plugins, etc.)
    InitializationFailed(String),
    /// Other errors
    Other(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::DeviceUnavailable(msg) => write!(f, "Device unavailable: {}", msg),
            BackendError::ReadFailed(msg) => write!(f, "Failed to read frame: {}", msg),
            BackendError::NoSupportedFormat(msg) => {
                write!(f, "No supported virtual camera format: {}", msg)
            }
            BackendError::WriteFailed(msg) => write!(f, "Failed to write frame: {}", msg),
            BackendError::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            BackendError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framerate_rounding() {
        assert_eq!(Framerate::new(60000, 1001).as_int(), 60);
        assert_eq!(Framerate::from_int(30).as_int(), 30);
        assert_eq!(Framerate::new(15, 0).denom, 1);
    }

    #[test]
    fn test_framerate_display() {
        assert_eq!(Framerate::from_int(30).to_string(), "30");
        assert_eq!(Framerate::new(30000, 1001).to_string(), "29.97");
    }

    #[test]
    fn test_device_descriptor_json_shape() {
        let device = DeviceDescriptor {
            id: 2,
            name: "Camera 2".into(),
        };
        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json, serde_json::json!({ "id": 2, "name": "Camera 2" }));
    }
}
