// SPDX-License-Identifier: GPL-3.0-only

//! Camera discovery by index probing
//!
//! A device only counts as available if it both opens and delivers a real
//! frame; some nodes (metadata nodes, busy devices) open fine but never
//! produce anything.

use super::CaptureBackend;
use super::types::DeviceDescriptor;
use std::sync::Arc;
use tracing::{debug, info};

/// Probes camera indices `0..range` for working devices
#[derive(Clone)]
pub struct DeviceEnumerator {
    backend: Arc<dyn CaptureBackend>,
    range: u32,
}

impl DeviceEnumerator {
    /// Create an enumerator probing indices `0..range`
    pub fn new(backend: Arc<dyn CaptureBackend>, range: u32) -> Self {
        Self { backend, range }
    }

    /// Number of indices probed
    pub fn range(&self) -> u32 {
        self.range
    }

    /// List devices that opened and delivered at least one frame
    ///
    /// Each handle is dropped before the next index is probed, so nothing is
    /// held open once this returns. Results are in ascending index order.
    pub fn list_devices(&self) -> Vec<DeviceDescriptor> {
        let mut devices = Vec::new();

        for id in 0..self.range {
            let mut handle = match self.backend.open(id) {
                Ok(handle) => handle,
                Err(e) => {
                    debug!(id, error = %e, "Camera index not available");
                    continue;
                }
            };

            if let Err(e) = handle.read_frame() {
                debug!(id, error = %e, "Camera opened but delivered no frame");
                continue;
            }

            let name = match handle.device_name() {
                Some(card) if !card.is_empty() => format!("Camera {} ({})", id, card),
                _ => format!("Camera {}", id),
            };
            devices.push(DeviceDescriptor { id, name });
        }

        info!(count = devices.len(), range = self.range, "Camera enumeration complete");
        devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::{BackendError, BackendResult, Framerate, VideoFrame};
    use crate::backends::camera::CaptureHandle;
    use image::RgbImage;

    /// Index 0 works, 1 opens but never delivers, 2 is missing, 3 works with a name
    struct ProbeBackend;

    struct ProbeHandle {
        delivers: bool,
        name: Option<String>,
    }

    impl CaptureBackend for ProbeBackend {
        fn open(&self, source: u32) -> BackendResult<Box<dyn CaptureHandle>> {
            match source {
                0 => Ok(Box::new(ProbeHandle {
                    delivers: true,
                    name: None,
                })),
                1 => Ok(Box::new(ProbeHandle {
                    delivers: false,
                    name: None,
                })),
                3 => Ok(Box::new(ProbeHandle {
                    delivers: true,
                    name: Some("USB Camera".into()),
                })),
                _ => Err(BackendError::DeviceUnavailable(format!("video{}", source))),
            }
        }
    }

    impl CaptureHandle for ProbeHandle {
        fn read_frame(&mut self) -> BackendResult<VideoFrame> {
            if self.delivers {
                Ok(VideoFrame::new(RgbImage::new(4, 4), 0))
            } else {
                Err(BackendError::ReadFailed("timeout".into()))
            }
        }

        fn resolution(&self) -> (u32, u32) {
            (4, 4)
        }

        fn native_fps(&self) -> Option<Framerate> {
            None
        }

        fn device_name(&self) -> Option<String> {
            self.name.clone()
        }
    }

    #[test]
    fn test_excludes_devices_without_frames() {
        let enumerator = DeviceEnumerator::new(Arc::new(ProbeBackend), 10);
        let devices = enumerator.list_devices();

        let ids: Vec<u32> = devices.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![0, 3]);
        assert_eq!(devices[0].name, "Camera 0");
        assert_eq!(devices[1].name, "Camera 3 (USB Camera)");
    }

    #[test]
    fn test_respects_range() {
        let enumerator = DeviceEnumerator::new(Arc::new(ProbeBackend), 1);
        let ids: Vec<u32> = enumerator.list_devices().iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![0]);
    }
}
