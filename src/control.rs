// SPDX-License-Identifier: GPL-3.0-only

//! Request handling for the streaming engine
//!
//! [`StreamController`] validates requests against the configured bounds,
//! delegates to the engine, and shapes responses as serde structs so any
//! transport (the console driver, an HTTP layer) can expose it unchanged.

use crate::backends::camera::{DeviceDescriptor, DeviceEnumerator, GstCaptureBackend};
use crate::backends::virtual_camera::GstSinkBackend;
use crate::config::Config;
use crate::constants::app_info;
use crate::errors::AppResult;
use crate::pipelines::compositor::{BackgroundAsset, BackgroundMode, Compositor};
use crate::pipelines::stream::{
    OutputInfo, RunState, StopOutcome, StreamConfiguration, StreamError, StreamingEngine,
};
use crate::segmentation::{MaskExtractor, YoloSegmenter};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const MSG_STARTED: &str = "Video feed started.";
pub const MSG_ALREADY_ACTIVE: &str = "Video feed is already active. Please stop it first.";
pub const MSG_STILL_STOPPING: &str = "Video feed is still stopping. Please try again shortly.";
pub const MSG_STOPPED: &str = "Video feed stopped.";
pub const MSG_STOPPING: &str = "Video feed stopping.";
pub const MSG_NOT_ACTIVE: &str = "Video feed is not active.";

/// Start request; omitted values take the configured defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    pub source: u32,
    #[serde(default)]
    pub fps: Option<u32>,
    #[serde(default)]
    pub blur_strength: Option<u32>,
    /// One of `none` (black), `blur`, `default` (background image)
    #[serde(default)]
    pub background: Option<String>,
}

/// Plain acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// Current run, flattened for clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
    pub state: RunState,
    pub input_source: Option<u32>,
    pub fps: Option<u32>,
    pub blur_strength: Option<u32>,
    pub background: Option<BackgroundMode>,
    pub output: Option<OutputInfo>,
    pub frames: u64,
}

/// Liveness, independent of run state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Request errors, grouped by how a transport should report them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    /// Request values outside the configured bounds
    BadRequest(String),
    /// Request conflicts with the current run state
    Conflict(String),
    /// Devices could not be opened
    Unavailable(String),
}

impl ControlError {
    /// Matching HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ControlError::BadRequest(_) => 400,
            ControlError::Conflict(_) => 409,
            ControlError::Unavailable(_) => 503,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ControlError::BadRequest(msg)
            | ControlError::Conflict(msg)
            | ControlError::Unavailable(msg) => msg,
        }
    }
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ControlError {}

impl From<StreamError> for ControlError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::AlreadyRunning => ControlError::Conflict(MSG_ALREADY_ACTIVE.into()),
            StreamError::Stopping => ControlError::Conflict(MSG_STILL_STOPPING.into()),
            StreamError::NotRunning => ControlError::Conflict(MSG_NOT_ACTIVE.into()),
            StreamError::InvalidConfig(msg) => ControlError::BadRequest(msg),
            e @ (StreamError::Startup(_) | StreamError::StartupTimeout) => {
                ControlError::Unavailable(e.to_string())
            }
        }
    }
}

/// Front door to one streaming engine
pub struct StreamController {
    engine: StreamingEngine,
    enumerator: DeviceEnumerator,
    config: Config,
}

impl StreamController {
    pub fn new(engine: StreamingEngine, enumerator: DeviceEnumerator, config: Config) -> Self {
        Self {
            engine,
            enumerator,
            config,
        }
    }

    /// Build the controller with GStreamer devices and the configured model
    pub fn from_config(config: Config) -> AppResult<Self> {
        let segmenter = YoloSegmenter::load(
            &config.model.model_path,
            config.model.input_size,
            config.model.confidence_threshold,
            config.model.iou_threshold,
        )?;
        let extractor = MaskExtractor::new(
            config.model.person_class_id,
            config.stream.erode_size,
            config.stream.erode_iterations,
        );
        let compositor = Compositor::new(Arc::new(BackgroundAsset::load(&config.background_image)));

        let capture = Arc::new(GstCaptureBackend::new());
        let sink = Arc::new(GstSinkBackend::new(
            config.output.output,
            config.output.device.clone(),
        ));

        let engine =
            StreamingEngine::new(capture.clone(), sink, Arc::new(segmenter), extractor, compositor);
        let enumerator = DeviceEnumerator::new(capture, config.stream.max_camera_check_range);

        if let Some(reason) = config.output.output.unavailable_reason() {
            warn!(
                output = config.output.output.display_name(),
                reason, "Virtual camera output unavailable, start will fail until it is"
            );
        }

        info!(output = config.output.output.display_name(), "Stream controller ready");
        Ok(Self::new(engine, enumerator, config))
    }

    pub fn engine(&self) -> &StreamingEngine {
        &self.engine
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start streaming
    pub fn start(&self, request: StartRequest) -> Result<MessageResponse, ControlError> {
        let stream = &self.config.stream;
        let fps = request.fps.unwrap_or(stream.default_fps);
        let blur_strength = request.blur_strength.unwrap_or(stream.default_blur_strength);

        if !self.config.fps_in_range(fps) {
            return Err(ControlError::BadRequest(format!(
                "FPS must be between {} and {}",
                stream.min_fps, stream.max_fps
            )));
        }
        if !self.config.blur_in_range(blur_strength) {
            return Err(ControlError::BadRequest(format!(
                "Blur strength must be between {} and {}",
                stream.min_blur_strength, stream.max_blur_strength
            )));
        }

        let background_mode = request
            .background
            .as_deref()
            .map(BackgroundMode::parse)
            .unwrap_or_default();

        self.engine.start(StreamConfiguration {
            input_source: request.source,
            target_fps: fps,
            blur_strength,
            background_mode,
        })?;
        Ok(MessageResponse::new(MSG_STARTED))
    }

    /// Stop streaming, waiting briefly for the worker to exit
    pub fn stop(&self) -> Result<MessageResponse, ControlError> {
        match self.engine.stop(true) {
            Ok(StopOutcome::Stopped) => Ok(MessageResponse::new(MSG_STOPPED)),
            Ok(StopOutcome::Stopping) => Ok(MessageResponse::new(MSG_STOPPING)),
            Err(StreamError::NotRunning) => Ok(MessageResponse::new(MSG_NOT_ACTIVE)),
            Err(e) => Err(e.into()),
        }
    }

    /// Cameras that opened and delivered a frame
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        debug!(range = self.enumerator.range(), "Listing devices");
        self.enumerator.list_devices()
    }

    pub fn status(&self) -> StatusResponse {
        let status = self.engine.status();
        let config = status.config.as_ref();
        StatusResponse {
            running: status.running,
            state: status.state,
            input_source: config.map(|c| c.input_source),
            // Clamped to the camera's native rate while a run is active
            fps: status
                .output
                .as_ref()
                .map(|o| o.effective_fps)
                .or(config.map(|c| c.target_fps)),
            blur_strength: config.map(|c| c.blur_strength),
            background: config.map(|c| c.background_mode),
            output: status.output,
            frames: status.frames,
        }
    }

    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "ok".to_string(),
            version: app_info::version().to_string(),
        }
    }
}
