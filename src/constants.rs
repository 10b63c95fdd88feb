// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use crate::backends::camera::v4l2_utils;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// GStreamer pipeline constants
pub mod pipeline {
    /// Maximum buffer queue size (keep small for low latency)
    pub const MAX_BUFFERS: u32 = 2;

    /// Get number of threads for videoconvert based on available CPU threads
    pub fn videoconvert_threads() -> u32 {
        std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(4) // Fallback to 4 if detection fails
    }

    /// Pixel format requested from the capture appsink
    pub const CAPTURE_FORMAT: &str = "RGB";

    /// Quality used by jpegenc when the sink falls back to MJPEG
    pub const JPEG_QUALITY: i32 = 85;
}

/// Timing constants
pub mod timing {
    use super::Duration;

    /// Occurrence modulo for rate-limited per-frame logging
    pub const FRAME_LOG_INTERVAL: u64 = 30;

    /// How long a freshly opened camera may take to deliver its first frame
    pub const FIRST_FRAME_TIMEOUT_SECS: u64 = 5;

    /// How long a running camera may go without delivering a frame
    pub const FRAME_TIMEOUT_SECS: u64 = 2;

    /// Sink pipeline playing state timeout on start
    pub const START_TIMEOUT_SECS: u64 = 5;

    /// Upper bound on waiting for the worker to open its devices
    pub const STARTUP_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

    /// Upper bound on waiting for the worker to exit after a stop request
    pub const STOP_WAIT_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Virtual camera identity as seen by other applications
pub mod virtual_camera {
    /// PipeWire node name
    pub const NODE_NAME: &str = "backdrop-virtual";

    /// PipeWire node description (shown in camera pickers)
    pub const NODE_DESCRIPTION: &str = "Backdrop (Virtual)";
}

/// Fallback background used when the configured image cannot be loaded
pub mod background {
    /// Fallback background width
    pub const FALLBACK_WIDTH: u32 = 640;

    /// Fallback background height
    pub const FALLBACK_HEIGHT: u32 = 480;
}

/// Virtual camera output device type
///
/// Determines which sink to use for virtual camera output:
/// - PipeWire: Modern Linux multimedia framework (default)
/// - V4L2Loopback: Traditional V4L2 loopback device (better app compatibility)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VirtualCameraOutput {
    /// PipeWire virtual camera (pipewiresink)
    #[default]
    PipeWire,
    /// V4L2 loopback device (v4l2sink)
    /// Works with applications that expect /dev/video* devices (e.g., Discord, Chrome)
    V4L2Loopback,
}

impl VirtualCameraOutput {
    /// Get display name for the output type
    pub fn display_name(&self) -> &'static str {
        match self {
            VirtualCameraOutput::PipeWire => "PipeWire",
            VirtualCameraOutput::V4L2Loopback => "V4L2 Loopback",
        }
    }

    /// GStreamer sink element used for this output
    pub fn sink_element(&self) -> &'static str {
        match self {
            VirtualCameraOutput::PipeWire => "pipewiresink",
            VirtualCameraOutput::V4L2Loopback => "v4l2sink",
        }
    }

    /// Check if this output type is available on the system
    pub fn is_available(&self) -> bool {
        match self {
            VirtualCameraOutput::PipeWire => is_pipewire_available(),
            VirtualCameraOutput::V4L2Loopback => v4l2_utils::find_v4l2loopback_device().is_some(),
        }
    }

    /// Get a description of why this output might not be available
    pub fn unavailable_reason(&self) -> Option<&'static str> {
        if self.is_available() {
            return None;
        }
        match self {
            VirtualCameraOutput::PipeWire => {
                Some("PipeWire not running or pipewiresink plugin not found")
            }
            VirtualCameraOutput::V4L2Loopback => Some("v4l2loopback module not loaded"),
        }
    }
}

/// Check if PipeWire is available (GStreamer plugin present)
fn is_pipewire_available() -> bool {
    if gstreamer::init().is_err() {
        return false;
    }
    gstreamer::ElementFactory::find("pipewiresink").is_some()
}

/// Application information utilities
pub mod app_info {
    /// Get the application version from build-time environment
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }
}
