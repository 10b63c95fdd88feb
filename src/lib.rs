// SPDX-License-Identifier: GPL-3.0-only

//! Backdrop - background blur, removal and replacement for a virtual camera
//!
//! Frames are read from a V4L2 camera, the person is segmented with a
//! YOLOv8-seg model, the background is rewritten according to the selected
//! mode and the result is published to a PipeWire or v4l2loopback virtual
//! camera.
//!
//! # Architecture
//!
//! - [`backends`]: Camera capture, device enumeration and virtual camera sinks
//! - [`segmentation`]: Model inference and subject mask extraction
//! - [`pipelines`]: Compositing and the streaming engine
//! - [`control`]: Request handling on top of the engine
//! - [`config`]: User configuration handling

pub mod backends;
pub mod config;
pub mod constants;
pub mod control;
pub mod errors;
pub mod pipelines;
pub mod segmentation;

// Re-export commonly used types
pub use config::Config;
pub use control::{StartRequest, StreamController};
pub use errors::{AppError, AppResult};
pub use pipelines::stream::{RunState, StreamConfiguration, StreamingEngine};
