// SPDX-License-Identifier: GPL-3.0-only

//! Frame processing pipelines
//!
//! # Pipeline Architecture
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ Camera Frame │ ──▶ │  Stream worker    │ ──▶ │   Virtual    │
//! │    (RGB)     │     │  - Governor       │     │   camera     │
//! │              │     │  - Segmentation   │     │              │
//! │              │     │  - Compositor     │     │              │
//! └──────────────┘     └───────────────────┘     └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`compositor`]: Background policies (blur, remove, replace)
//! - [`stream`]: Streaming engine, its state machine and frame loop

pub mod compositor;
pub mod stream;
