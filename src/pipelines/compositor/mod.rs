// SPDX-License-Identifier: GPL-3.0-only

//! Background compositing policies
//!
//! Every policy keeps subject pixels (mask == 255) from the original frame
//! and differs only in what fills the background:
//!
//! | Mode      | Background pixels                        |
//! |-----------|------------------------------------------|
//! | Mode          | Request value | Background pixels                     |
//! |---------------|---------------|---------------------------------------|
//! | `Remove`      | `none`        | black                                 |
//! | `Blur`        | `blur`        | Gaussian-blurred original             |
//! | `Replace`     | `default`     | background image resized to the frame |
//! | `Passthrough` | anything else | untouched                             |
//!
//! Inputs are never mutated. A missing mask or a mask whose size differs
//! from the frame yields an unmodified copy of the frame.

pub mod background;

pub use background::BackgroundAsset;

use crate::segmentation::SubjectMask;
use image::{Rgb, RgbImage};
use imageproc::filter::gaussian_blur_f32;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Make a kernel size odd by rounding even values up
pub fn ensure_odd(value: u32) -> u32 {
    if value % 2 == 0 { value + 1 } else { value }
}

/// Gaussian sigma conventionally paired with an odd kernel size
fn sigma_for_kernel(kernel: u32) -> f32 {
    0.3 * ((kernel as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// How background pixels are replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BackgroundMode {
    /// Background becomes black, leaving no background at all
    #[default]
    #[serde(rename = "none", alias = "black", alias = "remove")]
    Remove,
    /// Background is blurred
    #[serde(rename = "blur")]
    Blur,
    /// Background comes from the background image
    #[serde(rename = "default", alias = "replace", alias = "image")]
    Replace,
    /// Frame passes through unchanged
    #[serde(rename = "passthrough")]
    Passthrough,
}

impl BackgroundMode {
    /// Parse a request value, case-insensitively
    ///
    /// Unrecognized values map to `Passthrough`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "black" | "remove" => BackgroundMode::Remove,
            "blur" => BackgroundMode::Blur,
            "default" | "replace" | "image" => BackgroundMode::Replace,
            other => {
                warn!(mode = other, "Unrecognized background mode, passing frames through");
                BackgroundMode::Passthrough
            }
        }
    }

    /// Canonical request value
    pub fn as_str(&self) -> &'static str {
        match self {
            BackgroundMode::Remove => "none",
            BackgroundMode::Blur => "blur",
            BackgroundMode::Replace => "default",
            BackgroundMode::Passthrough => "passthrough",
        }
    }
}

impl fmt::Display for BackgroundMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Take subject pixels from `frame` and the rest from `fill(x, y)`
fn select<F>(frame: &RgbImage, mask: &SubjectMask, fill: F) -> RgbImage
where
    F: Fn(u32, u32) -> Rgb<u8>,
{
    RgbImage::from_fn(frame.width(), frame.height(), |x, y| {
        if mask.is_subject(x, y) {
            *frame.get_pixel(x, y)
        } else {
            fill(x, y)
        }
    })
}

/// Keep the subject sharp and blur everything else
///
/// `blur_strength` is the Gaussian kernel size; even values are rounded up.
pub fn blur(frame: &RgbImage, mask: &SubjectMask, blur_strength: u32) -> RgbImage {
    let sigma = sigma_for_kernel(ensure_odd(blur_strength));
    let blurred = gaussian_blur_f32(frame, sigma);
    select(frame, mask, |x, y| *blurred.get_pixel(x, y))
}

/// Keep the subject on a black background
pub fn remove(frame: &RgbImage, mask: &SubjectMask) -> RgbImage {
    select(frame, mask, |_, _| Rgb([0, 0, 0]))
}

/// Keep the subject in front of `asset`
pub fn replace(frame: &RgbImage, mask: &SubjectMask, asset: &BackgroundAsset) -> RgbImage {
    let background = asset.resized(frame.width(), frame.height());
    select(frame, mask, |x, y| *background.get_pixel(x, y))
}

/// Applies a background policy to frames
#[derive(Debug, Clone)]
pub struct Compositor {
    asset: Arc<BackgroundAsset>,
}

impl Compositor {
    pub fn new(asset: Arc<BackgroundAsset>) -> Self {
        Self { asset }
    }

    pub fn asset(&self) -> &BackgroundAsset {
        &self.asset
    }

    /// Composite one frame
    ///
    /// Returns an unmodified copy of `frame` for `BackgroundMode::Passthrough`, when
    /// there is no mask, or when the mask size does not match the frame.
    pub fn composite(
        &self,
        frame: &RgbImage,
        mask: Option<&SubjectMask>,
        mode: BackgroundMode,
        blur_strength: u32,
    ) -> RgbImage {
        let Some(mask) = mask else {
            return frame.clone();
        };

        if (mask.width(), mask.height()) != frame.dimensions() {
            warn!(
                frame_width = frame.width(),
                frame_height = frame.height(),
                mask_width = mask.width(),
                mask_height = mask.height(),
                "Mask does not match frame, passing frame through"
            );
            return frame.clone();
        }

        debug!(mode = %mode, "Compositing frame");
        match mode {
            BackgroundMode::Remove => remove(frame, mask),
            BackgroundMode::Blur => blur(frame, mask, blur_strength),
            BackgroundMode::Replace => replace(frame, mask, &self.asset),
            BackgroundMode::Passthrough => frame.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GrayImage;

    /// Frame with a horizontal gradient so blurring changes it
    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 20) as u8, (y * 30) as u8, ((x + y) * 10) as u8])
        })
    }

    /// Left half subject, right half background
    fn half_mask(width: u32, height: u32) -> SubjectMask {
        SubjectMask::from_gray(GrayImage::from_fn(width, height, |x, _| {
            image::Luma([if x < width / 2 { 255 } else { 0 }])
        }))
    }

    fn compositor() -> Compositor {
        Compositor::new(Arc::new(BackgroundAsset::from_image(RgbImage::from_pixel(
            2,
            2,
            Rgb([0, 0, 200]),
        ))))
    }

    #[test]
    fn test_ensure_odd() {
        assert_eq!(ensure_odd(20), 21);
        assert_eq!(ensure_odd(21), 21);
        assert_eq!(ensure_odd(0), 1);
        for x in 0..100 {
            assert_eq!(ensure_odd(ensure_odd(x)), ensure_odd(x));
        }
    }

    #[test]
    fn test_sigma_for_default_kernel() {
        assert!((sigma_for_kernel(21) - 3.5).abs() < 1e-5);
        assert!(sigma_for_kernel(1) > 0.0);
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!(BackgroundMode::parse("none"), BackgroundMode::Remove);
        assert_eq!(BackgroundMode::parse("NONE"), BackgroundMode::Remove);
        assert_eq!(BackgroundMode::parse("black"), BackgroundMode::Remove);
        assert_eq!(BackgroundMode::parse("blur"), BackgroundMode::Blur);
        assert_eq!(BackgroundMode::parse("default"), BackgroundMode::Replace);
        assert_eq!(BackgroundMode::parse("sparkles"), BackgroundMode::Passthrough);
        assert_eq!(BackgroundMode::parse(""), BackgroundMode::Passthrough);
    }

    #[test]
    fn test_mode_serde_names() {
        assert_eq!(
            serde_json::to_string(&BackgroundMode::Remove).unwrap(),
            "\"none\""
        );
        let mode: BackgroundMode = serde_json::from_str("\"black\"").unwrap();
        assert_eq!(mode, BackgroundMode::Remove);
        let mode: BackgroundMode = serde_json::from_str("\"replace\"").unwrap();
        assert_eq!(mode, BackgroundMode::Replace);
    }

    #[test]
    fn test_remove_blacks_out_background() {
        let frame = gradient(8, 4);
        let out = remove(&frame, &half_mask(8, 4));

        assert_eq!(out.get_pixel(1, 1), frame.get_pixel(1, 1));
        assert_eq!(out.get_pixel(6, 1).0, [0, 0, 0]);
    }

    #[test]
    fn test_replace_uses_resized_asset() {
        let frame = gradient(8, 4);
        let out = compositor().composite(
            &frame,
            Some(&half_mask(8, 4)),
            BackgroundMode::Replace,
            21,
        );

        assert_eq!(out.get_pixel(0, 0), frame.get_pixel(0, 0));
        assert_eq!(out.get_pixel(7, 3).0, [0, 0, 200]);
    }

    #[test]
    fn test_blur_keeps_subject_pixels() {
        let frame = gradient(8, 4);
        let out = blur(&frame, &half_mask(8, 4), 5);
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(out.get_pixel(x, y), frame.get_pixel(x, y));
            }
        }
    }

    #[test]
    fn test_missing_mask_passes_through() {
        let frame = gradient(4, 4);
        let out = compositor().composite(&frame, None, BackgroundMode::Blur, 21);
        assert_eq!(out, frame);
    }

    #[test]
    fn test_none_request_blacks_out_background() {
        let frame = gradient(8, 4);
        let out = compositor().composite(
            &frame,
            Some(&half_mask(8, 4)),
            BackgroundMode::parse("none"),
            21,
        );
        assert_eq!(out.get_pixel(1, 1), frame.get_pixel(1, 1));
        assert_eq!(out.get_pixel(6, 1).0, [0, 0, 0]);
    }

    #[test]
    fn test_unrecognized_mode_passes_through() {
        let frame = gradient(8, 4);
        let out = compositor().composite(
            &frame,
            Some(&half_mask(8, 4)),
            BackgroundMode::parse("sparkles"),
            21,
        );
        assert_eq!(out, frame);
    }

    #[test]
    fn test_size_mismatch_passes_through() {
        let frame = gradient(4, 4);
        let out = compositor().composite(
            &frame,
            Some(&SubjectMask::filled(2, 2, false)),
            BackgroundMode::Remove,
            21,
        );
        assert_eq!(out, frame);
    }
}
