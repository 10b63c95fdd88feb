// SPDX-License-Identifier: GPL-3.0-only

//! Camera capture abstraction
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │   Stream worker     │
//! └──────────┬──────────┘
//!            │ open / read_frame
//!            ▼
//! ┌─────────────────────┐
//! │ CaptureBackend trait│  ← Opens handles by device index
//! └──────────┬──────────┘
//!            │
//!            ▼
//!     ┌──────────────┐
//!     │  GStreamer   │  ← v4l2src → videoconvert → appsink (RGB)
//!     └──────────────┘
//! ```
//!
//! Handles are owned by whichever thread opened them and are released when
//! dropped.

pub mod capture;
pub mod enumeration;
pub mod frame_loop;
pub mod types;
pub mod v4l2_utils;

pub use capture::GstCaptureBackend;
pub use enumeration::DeviceEnumerator;
pub use types::*;

/// Opens capture handles for camera devices
///
/// Implementations must be shareable across threads: the stream engine and
/// the device enumerator both hold the backend while a worker thread owns
/// the handle it opened.
pub trait CaptureBackend: Send + Sync {
    /// Open the camera with the given index
    ///
    /// # Returns
    /// * `Ok(handle)` - Device opened and ready to deliver frames
    /// * `Err(BackendError::DeviceUnavailable)` - Device missing, busy, or unusable
    fn open(&self, source: u32) -> BackendResult<Box<dyn CaptureHandle>>;
}

/// An open camera device
pub trait CaptureHandle: Send {
    /// Block until the next frame is available
    ///
    /// # Returns
    /// * `Ok(VideoFrame)` - Next captured frame
    /// * `Err(BackendError::ReadFailed)` - Device stopped delivering frames
    fn read_frame(&mut self) -> BackendResult<VideoFrame>;

    /// Capture resolution (width, height)
    fn resolution(&self) -> (u32, u32);

    /// Native capture rate reported by the device, if known
    fn native_fps(&self) -> Option<Framerate>;

    /// Device name reported by the driver, if known
    fn device_name(&self) -> Option<String> {
        None
    }
}
