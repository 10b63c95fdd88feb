// SPDX-License-Identifier: GPL-3.0-only

//! Binary subject mask extraction

use super::SegmentationResult;
use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology;
use tracing::warn;

/// Mask value for subject pixels
pub const SUBJECT: u8 = 255;
/// Mask value for background pixels
pub const BACKGROUND: u8 = 0;

/// Single-channel mask whose pixels are exactly [`SUBJECT`] or [`BACKGROUND`]
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectMask(GrayImage);

impl SubjectMask {
    /// Wrap a mask, mapping any non-zero pixel to [`SUBJECT`]
    pub fn from_gray(mut image: GrayImage) -> Self {
        for pixel in image.pixels_mut() {
            if pixel.0[0] != BACKGROUND {
                pixel.0[0] = SUBJECT;
            }
        }
        Self(image)
    }

    /// Mask marking every pixel as subject or as background
    pub fn filled(width: u32, height: u32, subject: bool) -> Self {
        let value = if subject { SUBJECT } else { BACKGROUND };
        Self(GrayImage::from_pixel(width, height, Luma([value])))
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    /// Whether the pixel at (x, y) belongs to the subject
    pub fn is_subject(&self, x: u32, y: u32) -> bool {
        self.0.get_pixel(x, y).0[0] == SUBJECT
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.0
    }
}

/// Reduces a segmentation result to one eroded subject mask
#[derive(Debug, Clone)]
pub struct MaskExtractor {
    target_class: u32,
    erode_size: u32,
    erode_iterations: u32,
}

impl MaskExtractor {
    /// Create an extractor for `target_class`
    ///
    /// Erosion uses a square structuring element of side `erode_size`,
    /// applied `erode_iterations` times. A size of 0 or 1 disables erosion.
    pub fn new(target_class: u32, erode_size: u32, erode_iterations: u32) -> Self {
        Self {
            target_class,
            erode_size,
            erode_iterations,
        }
    }

    pub fn target_class(&self) -> u32 {
        self.target_class
    }

    /// Merge all target-class instances into one mask
    ///
    /// Returns None when no instance of the target class was found or the
    /// result is malformed (an instance mask not matching the frame size).
    pub fn extract(&self, result: &SegmentationResult) -> Option<SubjectMask> {
        let (width, height) = (result.width, result.height);
        let mut merged: Option<GrayImage> = None;

        for instance in result
            .instances
            .iter()
            .filter(|i| i.class_id == self.target_class)
        {
            if instance.mask.dimensions() != (width, height) {
                warn!(
                    expected_width = width,
                    expected_height = height,
                    mask_width = instance.mask.width(),
                    mask_height = instance.mask.height(),
                    "Malformed segmentation result, ignoring masks"
                );
                return None;
            }

            let target = merged.get_or_insert_with(|| GrayImage::new(width, height));
            for (out, src) in target.pixels_mut().zip(instance.mask.pixels()) {
                if src.0[0] != BACKGROUND {
                    out.0[0] = SUBJECT;
                }
            }
        }

        merged.map(|mask| SubjectMask(self.erode(mask)))
    }

    /// Shrink the subject region to trim halo pixels at its edge
    fn erode(&self, mut mask: GrayImage) -> GrayImage {
        if self.erode_size <= 1 {
            return mask;
        }
        // LInf radius k erodes with a (2k + 1) square
        let radius = (self.erode_size / 2).min(u8::MAX as u32) as u8;
        for _ in 0..self.erode_iterations {
            mask = morphology::erode(&mask, Norm::LInf, radius);
        }
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::Instance;

    fn instance(class_id: u32, mask: GrayImage) -> Instance {
        Instance {
            class_id,
            confidence: 0.9,
            mask,
        }
    }

    /// Mask with a filled rectangle [x0, x1) x [y0, y1)
    fn rect_mask(w: u32, h: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            if x >= x0 && x < x1 && y >= y0 && y < y1 {
                Luma([1])
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn test_no_target_instances() {
        let extractor = MaskExtractor::new(0, 5, 2);
        let result = SegmentationResult {
            width: 8,
            height: 8,
            instances: vec![instance(2, rect_mask(8, 8, 0, 0, 8, 8))],
        };
        assert!(extractor.extract(&result).is_none());
        assert!(extractor.extract(&SegmentationResult::empty(8, 8)).is_none());
    }

    #[test]
    fn test_union_scaled_to_binary() {
        let extractor = MaskExtractor::new(0, 1, 0);
        let result = SegmentationResult {
            width: 4,
            height: 1,
            instances: vec![
                instance(0, rect_mask(4, 1, 0, 0, 1, 1)),
                instance(0, rect_mask(4, 1, 3, 0, 4, 1)),
                instance(5, rect_mask(4, 1, 1, 0, 2, 1)),
            ],
        };

        let mask = extractor.extract(&result).unwrap();
        assert_eq!(mask.as_image().as_raw(), &vec![255, 0, 0, 255]);
    }

    #[test]
    fn test_erosion_shrinks_region() {
        // 3x3 square erodes to its center pixel with a 3x3 element
        let extractor = MaskExtractor::new(0, 3, 1);
        let result = SegmentationResult {
            width: 7,
            height: 7,
            instances: vec![instance(0, rect_mask(7, 7, 2, 2, 5, 5))],
        };

        let mask = extractor.extract(&result).unwrap();
        let subject: Vec<(u32, u32)> = (0..7)
            .flat_map(|y| (0..7).map(move |x| (x, y)))
            .filter(|&(x, y)| mask.is_subject(x, y))
            .collect();
        assert_eq!(subject, vec![(3, 3)]);
    }

    #[test]
    fn test_values_stay_binary_after_erosion() {
        let extractor = MaskExtractor::new(0, 5, 2);
        let result = SegmentationResult {
            width: 32,
            height: 32,
            instances: vec![instance(0, rect_mask(32, 32, 4, 4, 28, 28))],
        };

        let mask = extractor.extract(&result).unwrap();
        assert!(mask
            .as_image()
            .pixels()
            .all(|p| p.0[0] == SUBJECT || p.0[0] == BACKGROUND));
        assert!(mask.is_subject(16, 16));
        assert!(!mask.is_subject(5, 5));
    }

    #[test]
    fn test_wrong_size_instance_is_malformed() {
        let extractor = MaskExtractor::new(0, 5, 2);
        let result = SegmentationResult {
            width: 8,
            height: 8,
            instances: vec![instance(0, rect_mask(4, 4, 0, 0, 4, 4))],
        };
        assert!(extractor.extract(&result).is_none());
    }

    #[test]
    fn test_from_gray_normalizes() {
        let mask = SubjectMask::from_gray(GrayImage::from_raw(3, 1, vec![0, 1, 200]).unwrap());
        assert_eq!(mask.as_image().as_raw(), &vec![0, 255, 255]);
    }
}
