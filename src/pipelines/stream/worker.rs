// SPDX-License-Identifier: GPL-3.0-only

//! Frame loop body run on the worker thread

use super::governor::FrameRateGovernor;
use super::{OutputInfo, Shared, StreamConfiguration};
use crate::backends::camera::frame_loop::LoopAction;
use crate::backends::camera::{BackendResult, CaptureBackend, CaptureHandle};
use crate::backends::virtual_camera::{SinkBackend, SinkHandle};
use crate::constants::timing;
use crate::pipelines::compositor::Compositor;
use crate::segmentation::{MaskExtractor, Segmenter};
use image::RgbImage;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

/// Collaborators handed to a worker at start
pub(super) struct WorkerContext {
    pub capture: Arc<dyn CaptureBackend>,
    pub sink: Arc<dyn SinkBackend>,
    pub segmenter: Arc<dyn Segmenter>,
    pub extractor: MaskExtractor,
    pub compositor: Compositor,
    pub shared: Arc<Shared>,
    pub generation: u64,
}

/// Everything one run owns
pub(super) struct StreamWorker {
    capture: Box<dyn CaptureHandle>,
    sink: Box<dyn SinkHandle>,
    governor: FrameRateGovernor,
    config: StreamConfiguration,
    segmenter: Arc<dyn Segmenter>,
    extractor: MaskExtractor,
    compositor: Compositor,
    shared: Arc<Shared>,
    last_composited: Option<RgbImage>,
    inference_failures: u64,
}

impl StreamWorker {
    /// Open the camera, then a sink matching its resolution
    ///
    /// Runs on the worker thread so the handles live there.
    pub fn open(ctx: WorkerContext, config: StreamConfiguration) -> BackendResult<Self> {
        let capture = ctx.capture.open(config.input_source)?;
        let (width, height) = capture.resolution();
        let native_fps = capture.native_fps();
        let governor = FrameRateGovernor::new(config.target_fps, native_fps);

        // The sink runs at the capture rate; the governor thins out inference
        let sink_fps = native_fps
            .map(|f| f.as_int())
            .filter(|fps| *fps > 0)
            .unwrap_or_else(|| governor.effective_fps());
        let sink = ctx.sink.open(width, height, sink_fps)?;

        let output = OutputInfo {
            width,
            height,
            fps: sink_fps,
            native_fps: native_fps.map(|f| f.as_f64()),
            effective_fps: governor.effective_fps(),
            frame_interval: governor.interval(),
            pixel_format: sink.pixel_format(),
        };
        info!(
            source = config.input_source,
            width,
            height,
            sink_fps,
            effective_fps = output.effective_fps,
            frame_interval = output.frame_interval,
            format = %output.pixel_format,
            "Video feed started"
        );
        ctx.shared.publish_output(ctx.generation, output);

        Ok(Self {
            capture,
            sink,
            governor,
            config,
            segmenter: ctx.segmenter,
            extractor: ctx.extractor,
            compositor: ctx.compositor,
            shared: ctx.shared,
            last_composited: None,
            inference_failures: 0,
        })
    }

    /// One iteration: read, maybe composite, write, pace
    pub fn step(&mut self) -> LoopAction {
        let frame = match self.capture.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Failed to read frame from camera");
                return LoopAction::Stop;
            }
        };

        if self.governor.next_is_due() || self.last_composited.is_none() {
            let composited = self.process(&frame.pixels);
            self.last_composited = Some(composited);
        }
        let output = self.last_composited.as_ref().unwrap_or(&frame.pixels);

        if let Err(e) = self.sink.write_frame(output) {
            warn!(error = %e, "Error sending frame to virtual camera");
            return LoopAction::Stop;
        }

        let frames = self.shared.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if frames % timing::FRAME_LOG_INTERVAL == 0 {
            debug!(
                frames,
                sequence = frame.sequence,
                latency_ms = frame.captured_at.elapsed().as_millis() as u64,
                "Frames published"
            );
        }

        self.sink.sleep_until_next_frame();
        LoopAction::Continue
    }

    /// Segment and composite, degrading to passthrough on inference errors
    fn process(&mut self, pixels: &RgbImage) -> RgbImage {
        match self.segmenter.segment(pixels) {
            Ok(result) => {
                let mask = self.extractor.extract(&result);
                self.compositor.composite(
                    pixels,
                    mask.as_ref(),
                    self.config.background_mode,
                    self.config.blur_strength,
                )
            }
            Err(e) => {
                self.inference_failures += 1;
                if self.inference_failures % timing::FRAME_LOG_INTERVAL == 1 {
                    warn!(
                        error = %e,
                        failures = self.inference_failures,
                        "Error processing frame, passing it through"
                    );
                }
                pixels.clone()
            }
        }
    }
}
