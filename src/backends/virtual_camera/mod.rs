// SPDX-License-Identifier: GPL-3.0-only

//! Virtual camera sink for publishing composited video
//!
//! # Architecture
//!
//! ```text
//! Composited frames (RGB)
//!        │
//!        ▼
//! ┌──────────────────┐
//! │ Format           │  ← Ordered preference: BGRx, RGBA, MJPEG
//! │ negotiation      │    First format the output accepts wins
//! └──────────────────┘
//!        │
//!        ▼
//! ┌──────────────────┐
//! │ GStreamer Sink   │  ← appsrc → [jpegenc] → pipewiresink / v4l2sink
//! └──────────────────┘
//!        │
//!        ▼
//!   Video Apps (Zoom, Teams, etc.)
//! ```

pub mod pacing;
pub mod pipeline;

pub use pacing::FramePacer;
pub use pipeline::VirtualCameraPipeline;

use crate::backends::camera::types::{BackendError, BackendResult};
use crate::backends::camera::v4l2_utils;
use crate::constants::VirtualCameraOutput;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Pixel formats the sink can publish, in preference order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SinkPixelFormat {
    /// 32-bit BGR with padding byte
    Bgrx,
    /// 32-bit RGBA, alpha always opaque
    Rgba,
    /// Motion JPEG
    Mjpeg,
}

impl SinkPixelFormat {
    /// Formats tried when opening a sink, most preferred first
    pub const PREFERENCE: [SinkPixelFormat; 3] = [
        SinkPixelFormat::Bgrx,
        SinkPixelFormat::Rgba,
        SinkPixelFormat::Mjpeg,
    ];

    /// Short name used in logs and status output
    pub fn name(&self) -> &'static str {
        match self {
            SinkPixelFormat::Bgrx => "BGRx",
            SinkPixelFormat::Rgba => "RGBA",
            SinkPixelFormat::Mjpeg => "MJPG",
        }
    }

    /// Bytes per row of a packed frame of the given width
    ///
    /// Raw RGB rows handed to GStreamer are padded to 4 bytes.
    pub fn row_stride(&self, width: u32) -> usize {
        match self {
            SinkPixelFormat::Bgrx | SinkPixelFormat::Rgba => width as usize * 4,
            SinkPixelFormat::Mjpeg => (width as usize * 3).next_multiple_of(4),
        }
    }

    /// Convert an RGB frame to the byte layout pushed into the sink
    ///
    /// MJPEG frames are pushed as RGB and encoded inside the pipeline.
    pub fn pack(&self, image: &RgbImage) -> Vec<u8> {
        let stride = self.row_stride(image.width());
        let mut out = Vec::with_capacity(stride * image.height() as usize);

        for row in image.rows() {
            let row_start = out.len();
            for pixel in row {
                let [r, g, b] = pixel.0;
                match self {
                    SinkPixelFormat::Bgrx => out.extend_from_slice(&[b, g, r, 255]),
                    SinkPixelFormat::Rgba => out.extend_from_slice(&[r, g, b, 255]),
                    SinkPixelFormat::Mjpeg => out.extend_from_slice(&[r, g, b]),
                }
            }
            out.resize(row_start + stride, 0);
        }
        out
    }
}

impl fmt::Display for SinkPixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opens virtual camera outputs
pub trait SinkBackend: Send + Sync {
    /// Open an output for frames of the given size, paced at `fps`
    ///
    /// # Returns
    /// * `Ok(handle)` - Output accepted one of the preferred pixel formats
    /// * `Err(BackendError::NoSupportedFormat)` - Every format was rejected
    fn open(&self, width: u32, height: u32, fps: u32) -> BackendResult<Box<dyn SinkHandle>>;
}

/// An open virtual camera output
pub trait SinkHandle: Send {
    /// Publish one frame
    ///
    /// # Returns
    /// * `Err(BackendError::WriteFailed)` - Output stopped accepting frames
    fn write_frame(&mut self, frame: &RgbImage) -> BackendResult<()>;

    /// Block until the next output slot at the declared fps
    fn sleep_until_next_frame(&mut self);

    /// Pixel format committed to during negotiation
    fn pixel_format(&self) -> SinkPixelFormat;
}

/// Try each format in order and keep the first one `try_open` accepts
///
/// Logs every rejection and the committed format. When all formats are
/// rejected the returned `NoSupportedFormat` error names each attempt.
pub fn negotiate<T, F>(formats: &[SinkPixelFormat], mut try_open: F) -> BackendResult<T>
where
    F: FnMut(SinkPixelFormat) -> BackendResult<T>,
{
    let mut rejected = Vec::new();

    for &format in formats {
        match try_open(format) {
            Ok(opened) => {
                info!(format = %format, "Virtual camera format negotiated");
                return Ok(opened);
            }
            Err(e) => {
                debug!(format = %format, error = %e, "Virtual camera rejected format");
                rejected.push(format!("{}: {}", format, e));
            }
        }
    }

    warn!(attempts = rejected.len(), "No virtual camera format accepted");
    Err(BackendError::NoSupportedFormat(if rejected.is_empty() {
        "no formats to try".to_string()
    } else {
        rejected.join("; ")
    }))
}

/// Sink backend publishing through GStreamer
#[derive(Debug, Clone, Default)]
pub struct GstSinkBackend {
    output: VirtualCameraOutput,
    device: Option<String>,
}

impl GstSinkBackend {
    /// Create a backend for the given output type
    ///
    /// `device` selects the loopback node for `V4L2Loopback`; when absent the
    /// first loopback device found is used.
    pub fn new(output: VirtualCameraOutput, device: Option<String>) -> Self {
        Self { output, device }
    }

    fn resolve_device(&self) -> BackendResult<Option<String>> {
        match self.output {
            VirtualCameraOutput::PipeWire => Ok(None),
            VirtualCameraOutput::V4L2Loopback => self
                .device
                .clone()
                .or_else(v4l2_utils::find_v4l2loopback_device)
                .map(Some)
                .ok_or_else(|| {
                    BackendError::InitializationFailed("No v4l2loopback device found".into())
                }),
        }
    }
}

impl SinkBackend for GstSinkBackend {
    fn open(&self, width: u32, height: u32, fps: u32) -> BackendResult<Box<dyn SinkHandle>> {
        let device = self.resolve_device()?;
        info!(
            output = self.output.display_name(),
            device = ?device,
            width,
            height,
            fps,
            "Opening virtual camera"
        );

        let pipeline = negotiate(&SinkPixelFormat::PREFERENCE, |format| {
            let pipeline = VirtualCameraPipeline::new(
                self.output,
                device.as_deref(),
                format,
                width,
                height,
                fps,
            )?;
            pipeline.start()?;
            Ok(pipeline)
        })?;

        Ok(Box::new(GstSink {
            pipeline,
            pacer: FramePacer::new(fps),
        }))
    }
}

/// Open GStreamer output with its pacer
struct GstSink {
    pipeline: VirtualCameraPipeline,
    pacer: FramePacer,
}

impl SinkHandle for GstSink {
    fn write_frame(&mut self, frame: &RgbImage) -> BackendResult<()> {
        self.pipeline.push_frame(frame)
    }

    fn sleep_until_next_frame(&mut self) {
        self.pacer.sleep_until_next_frame();
    }

    fn pixel_format(&self) -> SinkPixelFormat {
        self.pipeline.format()
    }
}

impl Drop for GstSink {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.stop() {
            warn!(error = %e, "Failed to stop virtual camera pipeline");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_negotiate_takes_first_accepted() {
        let mut tried = Vec::new();
        let result = negotiate(&SinkPixelFormat::PREFERENCE, |format| {
            tried.push(format);
            if format == SinkPixelFormat::Rgba {
                Ok(format)
            } else {
                Err(BackendError::Other("rejected".into()))
            }
        });

        assert_eq!(result, Ok(SinkPixelFormat::Rgba));
        assert_eq!(tried, vec![SinkPixelFormat::Bgrx, SinkPixelFormat::Rgba]);
    }

    #[test]
    fn test_negotiate_exhausted() {
        let result: BackendResult<()> = negotiate(&SinkPixelFormat::PREFERENCE, |_| {
            Err(BackendError::Other("rejected".into()))
        });

        match result {
            Err(BackendError::NoSupportedFormat(msg)) => {
                assert!(msg.contains("BGRx"));
                assert!(msg.contains("MJPG"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_pack_layouts() {
        let image = RgbImage::from_pixel(1, 1, Rgb([10, 20, 30]));
        assert_eq!(SinkPixelFormat::Bgrx.pack(&image), vec![30, 20, 10, 255]);
        assert_eq!(SinkPixelFormat::Rgba.pack(&image), vec![10, 20, 30, 255]);
        // RGB row padded to 4 bytes
        assert_eq!(SinkPixelFormat::Mjpeg.pack(&image), vec![10, 20, 30, 0]);
    }

    #[test]
    fn test_row_stride() {
        assert_eq!(SinkPixelFormat::Bgrx.row_stride(3), 12);
        assert_eq!(SinkPixelFormat::Mjpeg.row_stride(3), 12);
        assert_eq!(SinkPixelFormat::Mjpeg.row_stride(4), 12);
        assert_eq!(SinkPixelFormat::Mjpeg.row_stride(5), 16);
    }
}
