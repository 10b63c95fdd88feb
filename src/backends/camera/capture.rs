// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer pipeline for camera capture
//!
//! Builds `v4l2src → videoconvert → appsink` with RGB output caps and pulls
//! samples synchronously from the worker thread that owns the handle.

use super::types::*;
use super::{CaptureBackend, CaptureHandle, v4l2_utils};
use crate::constants::{pipeline, timing};
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use image::RgbImage;
use tracing::{debug, info, warn};

/// Capture backend backed by V4L2 devices through GStreamer
#[derive(Debug, Clone, Default)]
pub struct GstCaptureBackend;

impl GstCaptureBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureBackend for GstCaptureBackend {
    fn open(&self, source: u32) -> BackendResult<Box<dyn CaptureHandle>> {
        Ok(Box::new(GstCapture::open(source)?))
    }
}

/// Open camera pipeline
///
/// The first sample is pulled while opening so that resolution and native
/// framerate are known before the sink is created; it is handed out by the
/// first `read_frame` call.
pub struct GstCapture {
    pipeline: gstreamer::Pipeline,
    appsink: AppSink,
    width: u32,
    height: u32,
    framerate: Option<Framerate>,
    name: Option<String>,
    pending: Option<RgbImage>,
    sequence: u64,
}

impl GstCapture {
    /// Start capturing from `/dev/video{source}`
    pub fn open(source: u32) -> BackendResult<Self> {
        let device = v4l2_utils::device_path(source);
        info!(device = %device, "Opening camera");

        gstreamer::init().map_err(|e| {
            BackendError::InitializationFailed(format!("GStreamer init failed: {}", e))
        })?;

        if !std::path::Path::new(&device).exists() {
            return Err(BackendError::DeviceUnavailable(format!(
                "{} does not exist",
                device
            )));
        }

        let description = format!(
            "v4l2src device={device} ! videoconvert n-threads={threads} \
             ! video/x-raw,format={format} ! appsink name=sink",
            device = device,
            threads = pipeline::videoconvert_threads(),
            format = pipeline::CAPTURE_FORMAT,
        );
        debug!(description = %description, "Capture pipeline");

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?
            .dynamic_cast::<gstreamer::Pipeline>()
            .map_err(|_| {
                BackendError::InitializationFailed("Capture launch line is not a pipeline".into())
            })?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| BackendError::InitializationFailed("Failed to get appsink".into()))?
            .dynamic_cast::<AppSink>()
            .map_err(|_| BackendError::InitializationFailed("Failed to cast appsink".into()))?;

        appsink.set_property("sync", false);
        appsink.set_property("max-buffers", pipeline::MAX_BUFFERS);
        appsink.set_property("drop", true);
        appsink.set_property("enable-last-sample", false);

        pipeline.set_state(gstreamer::State::Playing).map_err(|e| {
            BackendError::DeviceUnavailable(format!("{}: failed to start capture: {}", device, e))
        })?;

        let mut capture = Self {
            pipeline,
            appsink,
            width: 0,
            height: 0,
            framerate: None,
            name: v4l2_utils::query_caps(source).map(|caps| caps.card),
            pending: None,
            sequence: 0,
        };

        // Prime with the first frame to learn the negotiated caps
        let (first, video_info) = capture
            .pull(timing::FIRST_FRAME_TIMEOUT_SECS)
            .map_err(|e| BackendError::DeviceUnavailable(format!("{}: {}", device, e)))?;

        capture.width = video_info.width();
        capture.height = video_info.height();
        let fps = video_info.fps();
        capture.framerate = (fps.numer() > 0 && fps.denom() > 0)
            .then(|| Framerate::new(fps.numer() as u32, fps.denom() as u32));
        capture.pending = Some(first);

        info!(
            device = %device,
            width = capture.width,
            height = capture.height,
            framerate = ?capture.framerate.map(|f| f.to_string()),
            "Camera opened"
        );
        Ok(capture)
    }

    /// Pull one sample and convert it to a tightly packed RGB image
    fn pull(&self, timeout_secs: u64) -> BackendResult<(RgbImage, VideoInfo)> {
        let sample = self
            .appsink
            .try_pull_sample(gstreamer::ClockTime::from_seconds(timeout_secs))
            .ok_or_else(|| BackendError::ReadFailed(self.bus_error()))?;

        let buffer = sample
            .buffer()
            .ok_or_else(|| BackendError::ReadFailed("No buffer in sample".into()))?;
        let caps = sample
            .caps()
            .ok_or_else(|| BackendError::ReadFailed("No caps in sample".into()))?;
        let video_info = VideoInfo::from_caps(caps)
            .map_err(|e| BackendError::ReadFailed(format!("Failed to get video info: {}", e)))?;
        let map = buffer
            .map_readable()
            .map_err(|e| BackendError::ReadFailed(format!("Failed to map buffer: {}", e)))?;

        let image = pack_rgb(
            map.as_slice(),
            video_info.width(),
            video_info.height(),
            video_info.stride()[0] as usize,
        )?;
        Ok((image, video_info))
    }

    /// Describe the most recent pipeline error, if one was posted
    fn bus_error(&self) -> String {
        self.pipeline
            .bus()
            .and_then(|bus| bus.pop_filtered(&[gstreamer::MessageType::Error]))
            .and_then(|msg| match msg.view() {
                gstreamer::MessageView::Error(err) => Some(err.error().to_string()),
                _ => None,
            })
            .unwrap_or_else(|| "No frame received before timeout".to_string())
    }
}

impl CaptureHandle for GstCapture {
    fn read_frame(&mut self) -> BackendResult<VideoFrame> {
        let pixels = match self.pending.take() {
            Some(first) => first,
            None => self.pull(timing::FRAME_TIMEOUT_SECS)?.0,
        };
        let frame = VideoFrame::new(pixels, self.sequence);
        self.sequence += 1;
        Ok(frame)
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn native_fps(&self) -> Option<Framerate> {
        self.framerate
    }

    fn device_name(&self) -> Option<String> {
        self.name.clone()
    }
}

impl Drop for GstCapture {
    fn drop(&mut self) {
        debug!("Releasing camera pipeline");
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!(?e, "Failed to set capture pipeline to Null on drop");
        }
    }
}

/// Copy RGB rows out of a (possibly padded) GStreamer buffer
fn pack_rgb(data: &[u8], width: u32, height: u32, stride: usize) -> BackendResult<RgbImage> {
    let row_bytes = width as usize * 3;
    let needed = stride * height.saturating_sub(1) as usize + row_bytes;
    if stride < row_bytes || data.len() < needed {
        return Err(BackendError::ReadFailed(format!(
            "Buffer of {} bytes too small for {}x{} RGB (stride {})",
            data.len(),
            width,
            height,
            stride
        )));
    }

    let mut packed = Vec::with_capacity(row_bytes * height as usize);
    for row in data.chunks(stride).take(height as usize) {
        packed.extend_from_slice(&row[..row_bytes]);
    }

    RgbImage::from_raw(width, height, packed)
        .ok_or_else(|| BackendError::ReadFailed("Frame size mismatch".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_rgb_strips_row_padding() {
        // 2x2 RGB with 8-byte stride (2 bytes of padding per row)
        let data = [
            1, 2, 3, 4, 5, 6, 0, 0, //
            7, 8, 9, 10, 11, 12, 0, 0,
        ];
        let image = pack_rgb(&data, 2, 2, 8).unwrap();
        assert_eq!(image.as_raw(), &vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_pack_rgb_rejects_short_buffer() {
        let data = [0u8; 10];
        assert!(matches!(
            pack_rgb(&data, 2, 2, 6),
            Err(BackendError::ReadFailed(_))
        ));
    }
}
