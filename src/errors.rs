// SPDX-License-Identifier: GPL-3.0-only

//! Top-level error type for the application

use crate::backends::camera::BackendError;
use crate::config::ConfigError;
use crate::control::ControlError;
use crate::pipelines::stream::StreamError;
use crate::segmentation::SegmentationError;
use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main application error type
#[derive(Debug, Clone)]
pub enum AppError {
    /// Configuration could not be loaded or is inconsistent
    Config(ConfigError),
    /// Segmentation model errors
    Segmentation(SegmentationError),
    /// Capture or virtual camera errors
    Backend(BackendError),
    /// Streaming engine errors
    Stream(StreamError),
    /// Control request errors
    Control(ControlError),
    /// Generic error with message
    Other(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(e) => write!(f, "Configuration error: {}", e),
            AppError::Segmentation(e) => write!(f, "Segmentation error: {}", e),
            AppError::Backend(e) => write!(f, "Device error: {}", e),
            AppError::Stream(e) => write!(f, "Stream error: {}", e),
            AppError::Control(e) => write!(f, "{}", e),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(e) => Some(e),
            AppError::Segmentation(e) => Some(e),
            AppError::Backend(e) => Some(e),
            AppError::Stream(e) => Some(e),
            AppError::Control(e) => Some(e),
            AppError::Other(_) => None,
        }
    }
}

// Conversions from sub-errors to AppError
impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

impl From<SegmentationError> for AppError {
    fn from(err: SegmentationError) -> Self {
        AppError::Segmentation(err)
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        AppError::Backend(err)
    }
}

impl From<StreamError> for AppError {
    fn from(err: StreamError) -> Self {
        AppError::Stream(err)
    }
}

impl From<ControlError> for AppError {
    fn from(err: ControlError) -> Self {
        AppError::Control(err)
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Other(err.to_string())
    }
}
