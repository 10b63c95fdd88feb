// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer for camera capture and virtual camera output
//!
//! # Architecture
//!
//! The backend layer abstracts hardware access so the streaming engine can be
//! driven by real devices or by in-memory doubles:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               Streaming Engine              │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                   │
//! │  ┌─────────────┐    ┌──────────────────┐   │
//! │  │   Camera    │    │ Virtual Camera   │   │
//! │  │ (v4l2src)   │    │ (pipewiresink /  │   │
//! │  │             │    │  v4l2sink)       │   │
//! │  └─────────────┘    └──────────────────┘   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`camera`]: Capture trait, device enumeration and worker thread control
//! - [`virtual_camera`]: Sink trait, pixel format negotiation and pacing

pub mod camera;
pub mod virtual_camera;
