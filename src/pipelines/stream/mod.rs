// SPDX-License-Identifier: GPL-3.0-only

//! Streaming engine: run/stop state machine around the frame loop
//!
//! # State machine
//!
//! ```text
//!            start()                 stop()
//!   ┌──────┐ ───────▶ ┌─────────┐ ───────▶ ┌──────────┐
//!   │ Idle │          │ Running │          │ Stopping │
//!   └──────┘ ◀─────── └─────────┘          └──────────┘
//!      ▲     worker exits  │                     │
//!      │     on its own    │                     │
//!      └───────────────────┴─────────────────────┘
//!                   worker exit (any reason)
//! ```
//!
//! One worker thread per run. It opens the capture and sink handles itself
//! and reports the outcome through a handshake, so `start` can return
//! startup errors without ever waiting on the steady-state loop. Each run has
//! its own stop flag and generation number; a late exit of an old worker can
//! never reset the state of a newer run.

mod governor;
mod worker;

pub use governor::{FrameRateGovernor, frame_interval};

use crate::backends::camera::frame_loop::CaptureLoopController;
use crate::backends::camera::{BackendError, CaptureBackend};
use crate::backends::virtual_camera::{SinkBackend, SinkPixelFormat};
use crate::constants::timing;
use crate::pipelines::compositor::{BackgroundMode, Compositor, ensure_odd};
use crate::segmentation::{MaskExtractor, Segmenter};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};
use worker::{StreamWorker, WorkerContext};

/// Settings for one run; immutable once the run starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfiguration {
    /// Camera index (`/dev/video{n}`)
    pub input_source: u32,
    /// Requested processing rate; clamped to the camera's native rate
    pub target_fps: u32,
    /// Blur kernel size; normalized to odd
    pub blur_strength: u32,
    pub background_mode: BackgroundMode,
}

impl StreamConfiguration {
    /// Check the fields the engine itself depends on
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.target_fps == 0 {
            return Err(StreamError::InvalidConfig(
                "target fps must be positive".into(),
            ));
        }
        if self.blur_strength == 0 {
            return Err(StreamError::InvalidConfig(
                "blur strength must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Copy with the blur strength made odd
    pub fn normalized(mut self) -> Self {
        self.blur_strength = ensure_odd(self.blur_strength);
        self
    }
}

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Stopping,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Running => write!(f, "running"),
            RunState::Stopping => write!(f, "stopping"),
        }
    }
}

/// What the active run negotiated with its devices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputInfo {
    pub width: u32,
    pub height: u32,
    /// Rate the sink paces at
    pub fps: u32,
    /// Capture rate reported by the camera
    pub native_fps: Option<f64>,
    /// Processing rate after clamping
    pub effective_fps: u32,
    /// Captured frames per segmented frame
    pub frame_interval: u64,
    pub pixel_format: SinkPixelFormat,
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStatus {
    pub state: RunState,
    pub running: bool,
    /// Configuration of the current or most recent run
    pub config: Option<StreamConfiguration>,
    /// Negotiated output of the current run
    pub output: Option<OutputInfo>,
    /// Frames published by the current or most recent run
    pub frames: u64,
}

/// Result of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Worker exited and the engine is idle
    Stopped,
    /// Stop requested; worker still shutting down
    Stopping,
}

/// Error type for engine operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// A run is already active
    AlreadyRunning,
    /// The previous run is still shutting down
    Stopping,
    /// No run is active
    NotRunning,
    /// Configuration rejected before any state change
    InvalidConfig(String),
    /// Worker failed to open its devices
    Startup(BackendError),
    /// Worker did not finish opening its devices in time
    StartupTimeout,
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::AlreadyRunning => write!(f, "Video feed is already active"),
            StreamError::Stopping => write!(f, "Video feed is still stopping"),
            StreamError::NotRunning => write!(f, "Video feed is not active"),
            StreamError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            StreamError::Startup(e) => write!(f, "Failed to start video feed: {}", e),
            StreamError::StartupTimeout => {
                write!(f, "Timed out waiting for the video feed to start")
            }
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StreamError::Startup(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BackendError> for StreamError {
    fn from(e: BackendError) -> Self {
        StreamError::Startup(e)
    }
}

/// State guarded by the engine mutex
#[derive(Debug, Default)]
struct Inner {
    run_state: RunState,
    config: Option<StreamConfiguration>,
    output: Option<OutputInfo>,
    /// Incremented on every start
    generation: u64,
    /// Stop flag of the current run
    stop_signal: Option<Arc<AtomicBool>>,
}

/// State shared between the engine and its worker
#[derive(Debug, Default)]
pub(crate) struct Shared {
    inner: Mutex<Inner>,
    changed: Condvar,
    frames: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record negotiated output for `generation` if it is still current
    fn publish_output(&self, generation: u64, output: OutputInfo) {
        let mut inner = self.lock();
        if inner.generation == generation {
            inner.output = Some(output);
        }
    }

    /// Return to Idle if `generation` is still the current run
    fn finish_run(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation && inner.run_state != RunState::Idle {
            inner.run_state = RunState::Idle;
            inner.stop_signal = None;
            inner.output = None;
            info!(generation, "Video feed stopped");
        }
        drop(inner);
        self.changed.notify_all();
    }
}

/// Owns the run state and drives one worker thread at a time
pub struct StreamingEngine {
    capture: Arc<dyn CaptureBackend>,
    sink: Arc<dyn SinkBackend>,
    segmenter: Arc<dyn Segmenter>,
    extractor: MaskExtractor,
    compositor: Compositor,
    shared: Arc<Shared>,
    worker: Mutex<Option<CaptureLoopController>>,
    handshake_timeout: Duration,
    stop_timeout: Duration,
}

impl StreamingEngine {
    pub fn new(
        capture: Arc<dyn CaptureBackend>,
        sink: Arc<dyn SinkBackend>,
        segmenter: Arc<dyn Segmenter>,
        extractor: MaskExtractor,
        compositor: Compositor,
    ) -> Self {
        Self {
            capture,
            sink,
            segmenter,
            extractor,
            compositor,
            shared: Arc::new(Shared::default()),
            worker: Mutex::new(None),
            handshake_timeout: timing::STARTUP_HANDSHAKE_TIMEOUT,
            stop_timeout: timing::STOP_WAIT_TIMEOUT,
        }
    }

    /// Override the startup handshake and stop wait bounds
    pub fn with_timeouts(mut self, handshake: Duration, stop: Duration) -> Self {
        self.handshake_timeout = handshake;
        self.stop_timeout = stop;
        self
    }

    /// Start a run with `config`
    ///
    /// Returns once the worker has opened the camera and the sink. Startup
    /// failures are returned here and leave the engine Idle.
    pub fn start(&self, config: StreamConfiguration) -> Result<(), StreamError> {
        config.validate()?;
        let config = config.normalized();

        let (generation, stop_signal) = {
            let mut inner = self.shared.lock();
            match inner.run_state {
                RunState::Running => return Err(StreamError::AlreadyRunning),
                RunState::Stopping => return Err(StreamError::Stopping),
                RunState::Idle => {}
            }
            let stop_signal = Arc::new(AtomicBool::new(false));
            inner.run_state = RunState::Running;
            inner.generation += 1;
            inner.config = Some(config.clone());
            inner.output = None;
            inner.stop_signal = Some(Arc::clone(&stop_signal));
            self.shared.frames.store(0, Ordering::Relaxed);
            (inner.generation, stop_signal)
        };
        self.shared.changed.notify_all();

        info!(
            source = config.input_source,
            fps = config.target_fps,
            blur_strength = config.blur_strength,
            background = %config.background_mode,
            "Retrieving feed from source"
        );

        let ctx = WorkerContext {
            capture: Arc::clone(&self.capture),
            sink: Arc::clone(&self.sink),
            segmenter: Arc::clone(&self.segmenter),
            extractor: self.extractor.clone(),
            compositor: self.compositor.clone(),
            shared: Arc::clone(&self.shared),
            generation,
        };
        let exit_shared = Arc::clone(&self.shared);

        let ready = {
            let mut slot = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
            // The previous run already reached Idle; reap its thread
            if let Some(mut previous) = slot.take() {
                previous.join();
            }
            let (controller, ready) = CaptureLoopController::start_with_init(
                "stream-worker",
                stop_signal,
                move || StreamWorker::open(ctx, config),
                |worker: &mut StreamWorker| worker.step(),
                move || exit_shared.finish_run(generation),
            );
            *slot = Some(controller);
            ready
        };

        match ready.recv_timeout(self.handshake_timeout) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(error = %e, "Video feed failed to start");
                self.shared.finish_run(generation);
                Err(StreamError::Startup(e))
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Stream worker exited before reporting startup");
                self.shared.finish_run(generation);
                Err(StreamError::Startup(BackendError::Other(
                    "stream worker exited during startup".into(),
                )))
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = self.handshake_timeout.as_millis() as u64,
                    "Stream worker startup timed out, stopping it"
                );
                let mut inner = self.shared.lock();
                if inner.generation == generation && inner.run_state == RunState::Running {
                    inner.run_state = RunState::Stopping;
                    if let Some(signal) = &inner.stop_signal {
                        signal.store(true, Ordering::SeqCst);
                    }
                }
                drop(inner);
                self.shared.changed.notify_all();
                Err(StreamError::StartupTimeout)
            }
        }
    }

    /// Request the active run to stop
    ///
    /// With `wait`, blocks up to the stop timeout for the worker to exit.
    pub fn stop(&self, wait: bool) -> Result<StopOutcome, StreamError> {
        let mut inner = self.shared.lock();
        if inner.run_state != RunState::Running {
            debug!(state = %inner.run_state, "Stop requested while not running");
            return Err(StreamError::NotRunning);
        }

        inner.run_state = RunState::Stopping;
        if let Some(signal) = &inner.stop_signal {
            signal.store(true, Ordering::SeqCst);
        }
        let generation = inner.generation;
        info!(generation, "Stopping video feed");
        self.shared.changed.notify_all();

        if !wait {
            return Ok(StopOutcome::Stopping);
        }

        let (inner, _timeout) = self
            .shared
            .changed
            .wait_timeout_while(inner, self.stop_timeout, |inner| {
                inner.generation == generation && inner.run_state != RunState::Idle
            })
            .unwrap_or_else(PoisonError::into_inner);

        if inner.generation == generation && inner.run_state != RunState::Idle {
            warn!(
                timeout_ms = self.stop_timeout.as_millis() as u64,
                "Stream worker still stopping after timeout"
            );
            Ok(StopOutcome::Stopping)
        } else {
            Ok(StopOutcome::Stopped)
        }
    }

    /// Snapshot of the current state
    pub fn status(&self) -> StreamStatus {
        let inner = self.shared.lock();
        StreamStatus {
            state: inner.run_state,
            running: inner.run_state == RunState::Running,
            config: inner.config.clone(),
            output: inner.output.clone(),
            frames: self.shared.frames.load(Ordering::Relaxed),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().run_state == RunState::Running
    }

    /// Block until the engine is Idle or `timeout` elapses
    ///
    /// Returns true if the engine is Idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let inner = self.shared.lock();
        let (inner, _timeout) = self
            .shared
            .changed
            .wait_timeout_while(inner, timeout, |inner| {
                inner.run_state != RunState::Idle
            })
            .unwrap_or_else(PoisonError::into_inner);
        inner.run_state == RunState::Idle
    }
}

impl Drop for StreamingEngine {
    fn drop(&mut self) {
        let slot = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(mut controller) = slot.take() {
            debug!("StreamingEngine dropped, stopping worker");
            controller.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StreamConfiguration {
        StreamConfiguration {
            input_source: 0,
            target_fps: 15,
            blur_strength: 20,
            background_mode: BackgroundMode::Blur,
        }
    }

    #[test]
    fn test_validate_rejects_zero_fps() {
        let config = StreamConfiguration {
            target_fps: 0,
            ..config()
        };
        assert!(matches!(
            config.validate(),
            Err(StreamError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_normalized_blur_is_odd() {
        assert_eq!(config().normalized().blur_strength, 21);
    }

    #[test]
    fn test_finish_run_ignores_stale_generation() {
        let shared = Shared::default();
        {
            let mut inner = shared.lock();
            inner.run_state = RunState::Running;
            inner.generation = 2;
        }
        shared.finish_run(1);
        assert_eq!(shared.lock().run_state, RunState::Running);
        shared.finish_run(2);
        assert_eq!(shared.lock().run_state, RunState::Idle);
    }

    #[test]
    fn test_status_serializes_lowercase_state() {
        let status = StreamStatus {
            state: RunState::Stopping,
            running: false,
            config: None,
            output: None,
            frames: 0,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "stopping");
    }
}
