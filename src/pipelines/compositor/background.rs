// SPDX-License-Identifier: GPL-3.0-only

//! Replacement background image

use crate::constants::background::{FALLBACK_HEIGHT, FALLBACK_WIDTH};
use image::{RgbImage, imageops};
use std::borrow::Cow;
use std::path::Path;
use tracing::{info, warn};

/// Background image shared read-only by every run of an engine
#[derive(Debug, Clone)]
pub struct BackgroundAsset {
    image: RgbImage,
}

impl BackgroundAsset {
    /// Load the image at `path`
    ///
    /// A missing or unreadable file yields an all-black 640x480 image.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            warn!(path = %path.display(), "Background image not found, using black background");
            return Self::fallback();
        }

        match image::open(path) {
            Ok(img) => {
                let image = img.to_rgb8();
                info!(
                    path = %path.display(),
                    width = image.width(),
                    height = image.height(),
                    "Loaded background image"
                );
                Self { image }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read background image, using black background");
                Self::fallback()
            }
        }
    }

    /// All-black stand-in for a missing image
    pub fn fallback() -> Self {
        Self {
            image: RgbImage::new(FALLBACK_WIDTH, FALLBACK_HEIGHT),
        }
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// The image stretched to exactly `width` x `height`
    pub fn resized(&self, width: u32, height: u32) -> Cow<'_, RgbImage> {
        if self.image.dimensions() == (width, height) {
            Cow::Borrowed(&self.image)
        } else {
            Cow::Owned(imageops::resize(
                &self.image,
                width,
                height,
                imageops::FilterType::Triangle,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_missing_file_falls_back_to_black() {
        let asset = BackgroundAsset::load(Path::new("/nonexistent/background.png"));
        assert_eq!(asset.dimensions(), (640, 480));
        assert!(asset.resized(640, 480).pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn test_unreadable_file_falls_back_to_black() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not an image").unwrap();

        let asset = BackgroundAsset::load(&path);
        assert_eq!(asset.dimensions(), (640, 480));
    }

    #[test]
    fn test_loads_real_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bg.png");
        RgbImage::from_pixel(8, 4, Rgb([10, 200, 30])).save(&path).unwrap();

        let asset = BackgroundAsset::load(&path);
        assert_eq!(asset.dimensions(), (8, 4));
    }

    #[test]
    fn test_resized_matches_requested_size() {
        let asset = BackgroundAsset::from_image(RgbImage::from_pixel(8, 4, Rgb([7, 7, 7])));
        assert!(matches!(asset.resized(8, 4), Cow::Borrowed(_)));

        let resized = asset.resized(3, 5);
        assert_eq!(resized.dimensions(), (3, 5));
        assert!(resized.pixels().all(|p| p.0 == [7, 7, 7]));
    }
}
