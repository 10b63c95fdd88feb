// SPDX-License-Identifier: GPL-3.0-only

//! Subject segmentation
//!
//! A [`Segmenter`] turns a frame into class-tagged instance masks; the
//! [`MaskExtractor`] reduces those to one binary subject mask. The shipped
//! segmenter runs a YOLOv8-seg ONNX export on the CPU via tract.

pub mod mask;
pub mod yolo;

pub use mask::{MaskExtractor, SubjectMask};
pub use yolo::YoloSegmenter;

use image::{GrayImage, RgbImage};
use std::fmt;

/// One detected object with its pixel mask
#[derive(Debug, Clone)]
pub struct Instance {
    /// Class index in the model's label set (COCO: 0 = person)
    pub class_id: u32,
    /// Detection confidence in [0, 1]
    pub confidence: f32,
    /// Mask at frame resolution; non-zero pixels belong to the instance
    pub mask: GrayImage,
}

/// Output of one segmentation call
#[derive(Debug, Clone, Default)]
pub struct SegmentationResult {
    /// Width of the frame that was segmented
    pub width: u32,
    /// Height of the frame that was segmented
    pub height: u32,
    pub instances: Vec<Instance>,
}

impl SegmentationResult {
    /// Empty result for a frame of the given size
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            instances: Vec::new(),
        }
    }
}

/// Error type for segmentation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentationError {
    /// Model file missing or not loadable
    ModelLoad(String),
    /// Inference call failed
    Inference(String),
    /// Model produced tensors of an unexpected shape
    InvalidOutput(String),
}

impl fmt::Display for SegmentationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentationError::ModelLoad(msg) => write!(f, "Failed to load model: {}", msg),
            SegmentationError::Inference(msg) => write!(f, "Inference failed: {}", msg),
            SegmentationError::InvalidOutput(msg) => write!(f, "Invalid model output: {}", msg),
        }
    }
}

impl std::error::Error for SegmentationError {}

/// Produces instance masks for a frame
///
/// Calls may be slow (hundreds of milliseconds on CPU) and have no timeout.
pub trait Segmenter: Send + Sync {
    fn segment(&self, frame: &RgbImage) -> Result<SegmentationResult, SegmentationError>;
}
