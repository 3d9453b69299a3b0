//! Error types for every layer of the capture stack.
//!
//! Hardware-adjacent errors ([`MuxError`], [`CaptureError`]) are contained by
//! the camera manager; only [`ManagerError`] reaches callers of the public
//! orchestration API.

use crate::mux::CameraSelector;
use crate::traits::Format;
use thiserror::Error;

/// Errors raised while driving the I2C camera multiplexer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MuxError {
    /// The selector has no entry in the command table.
    #[error("invalid camera selector: {0}")]
    InvalidSelector(CameraSelector),
    /// The register write failed on the bus.
    #[error("I2C bus failure: {0}")]
    BusFailure(String),
    /// The bus handle was already released.
    #[error("I2C bus has been released")]
    Released,
}

/// Errors raised by the capture device or the capture session.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Device with given index was not found.
    #[error("device {0} not found")]
    DeviceNotFound(u32),
    /// Failed to open device.
    #[error("failed to open device: {0}")]
    DeviceOpenFailed(String),
    /// Requested format is not supported.
    #[error("format not supported: {0:?}")]
    FormatNotSupported(Format),
    /// Error during a streaming operation.
    #[error("stream error: {0}")]
    StreamError(String),
    /// The device is not streaming.
    #[error("device is not streaming")]
    NotStreaming,
    /// Raw frame could not be converted to RGB.
    #[error("frame conversion failed: {0}")]
    Conversion(String),
    /// The multiplexer could not be switched to the requested camera.
    #[error("camera selection failed: {0}")]
    Selection(#[from] MuxError),
    /// The session has been shut down.
    #[error("capture session is closed")]
    Closed,
}

/// Errors from the pure image post-processing functions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImagingError {
    /// Wrong number or shape of input images.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// JPEG encoding failed.
    #[error("encoding failed: {0}")]
    Encoding(String),
}

impl From<image::ImageError> for ImagingError {
    fn from(err: image::ImageError) -> Self {
        Self::Encoding(err.to_string())
    }
}

/// Errors in loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file is not valid JSON for [`crate::Config`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    /// A value is out of its accepted range.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid {
        /// Offending field name.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Errors from persisting captures.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem error.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Image could not be encoded.
    #[error(transparent)]
    Imaging(#[from] ImagingError),
}

/// Errors surfaced by [`crate::CameraManager`].
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The selector is not valid for this rig.
    #[error("invalid camera selector: {0}")]
    InvalidSelector(CameraSelector),
    /// Bad input to a pure operation.
    #[error(transparent)]
    Imaging(#[from] ImagingError),
    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The I2C bus device could not be opened.
    #[error("failed to open I2C bus: {0}")]
    BusOpen(String),
    /// Hardware could not be brought up.
    #[error("hardware initialization failed: {0}")]
    Init(#[from] CaptureError),
}
