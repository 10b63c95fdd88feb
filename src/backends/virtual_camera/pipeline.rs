// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer pipeline for virtual camera output
//!
//! Creates a pipeline that:
//! 1. Receives packed frames from the stream worker (via appsrc)
//! 2. Encodes to JPEG when publishing MJPEG (via videoconvert + jpegenc)
//! 3. Outputs to a PipeWire node or a v4l2loopback device
//!
//! Raw formats are linked straight into the sink without a converter, so a
//! sink that cannot take the format is detected while opening rather than
//! silently converted.

use super::SinkPixelFormat;
use crate::backends::camera::types::{BackendError, BackendResult};
use crate::constants::{VirtualCameraOutput, pipeline, timing, virtual_camera};
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use image::RgbImage;
use tracing::{debug, error, info, warn};

/// Virtual camera GStreamer pipeline
pub struct VirtualCameraPipeline {
    pipeline: gstreamer::Pipeline,
    appsrc: AppSrc,
    format: SinkPixelFormat,
    width: u32,
    height: u32,
    frames_pushed: u64,
}

fn make_element(factory: &str) -> BackendResult<gstreamer::Element> {
    gstreamer::ElementFactory::make(factory)
        .build()
        .map_err(|e| BackendError::InitializationFailed(format!("Failed to create {}: {}", factory, e)))
}

impl VirtualCameraPipeline {
    /// Create a pipeline publishing `format` at the given size and rate
    ///
    /// The sink is brought to Ready so that device-backed outputs report
    /// the caps they accept; a sink that cannot take `format` is rejected
    /// here with `NoSupportedFormat`.
    pub fn new(
        output: VirtualCameraOutput,
        device: Option<&str>,
        format: SinkPixelFormat,
        width: u32,
        height: u32,
        fps: u32,
    ) -> BackendResult<Self> {
        info!(width, height, fps, format = %format, "Creating virtual camera pipeline");

        gstreamer::init().map_err(|e| {
            BackendError::InitializationFailed(format!("GStreamer init failed: {}", e))
        })?;

        let gst_pipeline = gstreamer::Pipeline::new();

        let appsrc = make_element("appsrc")?
            .downcast::<AppSrc>()
            .map_err(|_| {
                BackendError::InitializationFailed("Failed to downcast to AppSrc".into())
            })?;

        let raw_format = match format {
            SinkPixelFormat::Bgrx => "BGRx",
            SinkPixelFormat::Rgba => "RGBA",
            SinkPixelFormat::Mjpeg => "RGB",
        };
        let framerate = gstreamer::Fraction::new(fps.max(1) as i32, 1);
        let input_caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", raw_format)
            .field("width", width as i32)
            .field("height", height as i32)
            .field("framerate", framerate)
            .build();

        appsrc.set_caps(Some(&input_caps));
        appsrc.set_format(gstreamer::Format::Time);
        appsrc.set_is_live(true);
        appsrc.set_do_timestamp(true);
        appsrc.set_max_buffers(pipeline::MAX_BUFFERS as u64);

        let sink = make_element(output.sink_element())?;
        match output {
            VirtualCameraOutput::PipeWire => {
                // "provide" mode creates a video source that other applications can use
                sink.set_property_from_str("mode", "provide");
                let stream_props = gstreamer::Structure::builder("props")
                    .field("media.class", "Video/Source")
                    .field("media.role", "Camera")
                    .field("node.name", virtual_camera::NODE_NAME)
                    .field("node.description", virtual_camera::NODE_DESCRIPTION)
                    .build();
                sink.set_property("stream-properties", &stream_props);
            }
            VirtualCameraOutput::V4L2Loopback => {
                if let Some(device) = device {
                    sink.set_property("device", device);
                }
            }
        }
        sink.set_property("sync", false);

        let mut chain: Vec<gstreamer::Element> = vec![appsrc.clone().upcast()];
        let sink_caps = if format == SinkPixelFormat::Mjpeg {
            let convert = make_element("videoconvert")?;
            convert.set_property("n-threads", pipeline::videoconvert_threads());
            let encoder = make_element("jpegenc")?;
            encoder.set_property("quality", pipeline::JPEG_QUALITY);
            chain.push(convert);
            chain.push(encoder);
            gstreamer::Caps::builder("image/jpeg")
                .field("width", width as i32)
                .field("height", height as i32)
                .field("framerate", framerate)
                .build()
        } else {
            input_caps
        };
        chain.push(sink.clone());

        gst_pipeline.add_many(chain.iter()).map_err(|e| {
            BackendError::InitializationFailed(format!("Failed to add elements: {}", e))
        })?;
        gstreamer::Element::link_many(chain.iter()).map_err(|e| {
            BackendError::NoSupportedFormat(format!("Failed to link elements: {}", e))
        })?;

        let pipeline = Self {
            pipeline: gst_pipeline,
            appsrc,
            format,
            width,
            height,
            frames_pushed: 0,
        };

        // Ready opens the device so its supported caps can be queried
        pipeline
            .pipeline
            .set_state(gstreamer::State::Ready)
            .map_err(|e| BackendError::InitializationFailed(format!("Failed to open output: {}", e)))?;

        let accepted = sink
            .static_pad("sink")
            .map(|pad| pad.query_caps(None).can_intersect(&sink_caps))
            .unwrap_or(false);
        if !accepted {
            return Err(BackendError::NoSupportedFormat(format!(
                "{} does not accept {}",
                output.display_name(),
                format
            )));
        }

        debug!(format = %format, "Virtual camera pipeline created");
        Ok(pipeline)
    }

    /// Start the pipeline
    pub fn start(&self) -> BackendResult<()> {
        debug!("Starting virtual camera pipeline");

        self.pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| {
                BackendError::InitializationFailed(format!("Failed to start pipeline: {}", e))
            })?;

        let (result, _state, _pending) = self
            .pipeline
            .state(gstreamer::ClockTime::from_seconds(timing::START_TIMEOUT_SECS));
        if result.is_err() {
            return Err(BackendError::InitializationFailed(
                "Pipeline failed to reach Playing state".into(),
            ));
        }

        info!(format = %self.format, "Virtual camera pipeline started");
        Ok(())
    }

    /// Stop the pipeline
    pub fn stop(&self) -> BackendResult<()> {
        debug!("Stopping virtual camera pipeline");

        if let Err(e) = self.appsrc.end_of_stream() {
            debug!(?e, "EOS not accepted by virtual camera pipeline");
        }

        self.pipeline
            .set_state(gstreamer::State::Null)
            .map_err(|e| BackendError::Other(format!("Failed to stop pipeline: {}", e)))?;

        info!(frames = self.frames_pushed, "Virtual camera pipeline stopped");
        Ok(())
    }

    /// Format committed to for this pipeline
    pub fn format(&self) -> SinkPixelFormat {
        self.format
    }

    /// Push an RGB frame to the virtual camera
    pub fn push_frame(&mut self, frame: &RgbImage) -> BackendResult<()> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(BackendError::WriteFailed(format!(
                "Frame size {}x{} doesn't match pipeline {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }

        if let Some(message) = self.pending_error() {
            return Err(BackendError::WriteFailed(message));
        }

        let buffer = gstreamer::Buffer::from_mut_slice(self.format.pack(frame));
        match self.appsrc.push_buffer(buffer) {
            Ok(_) => {
                self.frames_pushed += 1;
                if self.frames_pushed % timing::FRAME_LOG_INTERVAL == 0 {
                    debug!(frames = self.frames_pushed, "Virtual camera frames pushed");
                }
                Ok(())
            }
            Err(e) => {
                warn!(?e, "Failed to push frame to virtual camera");
                Err(BackendError::WriteFailed(format!(
                    "Failed to push frame: {:?}",
                    e
                )))
            }
        }
    }

    /// Error posted on the bus since the last check, if any
    fn pending_error(&self) -> Option<String> {
        let message = self
            .pipeline
            .bus()?
            .pop_filtered(&[gstreamer::MessageType::Error])?;
        match message.view() {
            gstreamer::MessageView::Error(err) => Some(err.error().to_string()),
            _ => None,
        }
    }
}

impl Drop for VirtualCameraPipeline {
    fn drop(&mut self) {
        debug!("Dropping virtual camera pipeline");
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            error!(?e, "Failed to set pipeline to Null on drop");
        }
    }
}
