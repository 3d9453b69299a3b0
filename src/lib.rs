//! Quadcam-mux: capture from four cameras behind one I2C multiplexer.
//!
//! The [`CameraManager`] owns the multiplexer bus and the V4L2 capture device.
//! It serves a continuous Video-mode preview and on-demand Still-mode
//! captures of one or all cameras, and always leaves the device back in
//! Video mode. Hardware sits behind the `embedded-hal` [`I2c`] trait and the
//! [`CameraDevice`] trait so the whole state machine runs against mocks in
//! tests.
//!
//! [`I2c`]: embedded_hal::i2c::I2c

pub mod config;
pub mod device;
pub mod error;
pub mod imaging;
pub mod manager;
pub mod mux;
pub mod overlay;
pub mod preview;
pub mod session;
pub mod storage;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use config::{Config, PreviewSettings};
pub use device::V4L2Device;
pub use error::{CaptureError, ConfigError, ImagingError, ManagerError, MuxError, StorageError};
pub use manager::{CameraManager, CaptureOutcome, CapturedImage, ManagerStatus};
pub use mux::{CameraSelector, MuxCommands, MuxController};
pub use preview::{spawn_preview, FrameSource, PreviewFrame, PreviewHandle};
pub use session::CaptureSession;
pub use storage::{CaptureStore, SavedCapture};
pub use traits::{CameraDevice, CaptureMode, Format, FourCC, Frame, FrameMetadata, Resolution};
