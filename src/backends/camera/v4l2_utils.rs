// SPDX-License-Identifier: GPL-3.0-only

//! Shared V4L2 utility functions
//!
//! Device index to path mapping, driver/card queries, and v4l2loopback
//! discovery used by both the capture and the sink backends.

use std::fs;
use std::path::Path;
use tracing::debug;

/// V4L2 driver name reported by the v4l2loopback kernel module
const LOOPBACK_DRIVER: &str = "v4l2 loopback";

/// Device node for a camera index
pub fn device_path(index: u32) -> String {
    format!("/dev/video{}", index)
}

/// Capability strings reported by `VIDIOC_QUERYCAP`
#[derive(Debug, Clone, Default)]
pub struct DeviceCaps {
    /// Name of the device (V4L2 card)
    pub card: String,
    /// Driver name (V4L2 driver)
    pub driver: String,
}

/// Query card and driver names for a camera index
///
/// Returns None if the device cannot be opened or the ioctl fails.
pub fn query_caps(index: u32) -> Option<DeviceCaps> {
    let device = v4l::Device::new(index as usize).ok()?;
    let caps = device.query_caps().ok()?;

    debug!(index, card = %caps.card, driver = %caps.driver, "Got V4L2 capabilities");
    Some(DeviceCaps {
        card: caps.card,
        driver: caps.driver,
    })
}

/// Check whether a device index belongs to the v4l2loopback module
pub fn is_loopback(index: u32) -> bool {
    if let Some(caps) = query_caps(index) {
        return caps.driver == LOOPBACK_DRIVER;
    }
    sysfs_name(index)
        .map(|name| looks_like_loopback(&name))
        .unwrap_or(false)
}

/// Read the device name from sysfs
fn sysfs_name(index: u32) -> Option<String> {
    let path = format!("/sys/class/video4linux/video{}/name", index);
    fs::read_to_string(path)
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

/// v4l2loopback default names or common virtual camera labels
fn looks_like_loopback(name: &str) -> bool {
    let lower = name.to_lowercase();
    name.contains("Dummy video device")
        || lower.contains("loopback")
        || lower.contains("virtual")
        || name.contains("OBS")
}

/// Find a v4l2loopback device
///
/// Scans /dev/video* devices in index order and returns the first one whose
/// driver or sysfs name identifies it as a loopback device.
pub fn find_v4l2loopback_device() -> Option<String> {
    let dev_path = Path::new("/dev");
    if !dev_path.exists() {
        return None;
    }

    let mut indices: Vec<u32> = fs::read_dir(dev_path)
        .ok()?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            e.file_name()
                .to_string_lossy()
                .strip_prefix("video")
                .and_then(|n| n.parse().ok())
        })
        .collect();
    indices.sort_unstable();

    indices
        .into_iter()
        .find(|&index| is_loopback(index))
        .map(device_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_path() {
        assert_eq!(device_path(0), "/dev/video0");
        assert_eq!(device_path(12), "/dev/video12");
    }

    #[test]
    fn test_loopback_names() {
        assert!(looks_like_loopback("Dummy video device (0x0000)"));
        assert!(looks_like_loopback("OBS Virtual Camera"));
        assert!(looks_like_loopback("My Loopback"));
        assert!(!looks_like_loopback("Integrated Camera: Integrated C"));
    }
}
