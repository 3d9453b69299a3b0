//! Core traits and types for the capture device abstraction.

use crate::error::CaptureError;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Pixel format representation (e.g., YUYV, MJPG, RGB3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");

    /// Bytes per pixel for packed formats, `None` for compressed ones.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> Option<u32> {
        match self.0 {
            [b'Y', b'U', b'Y', b'V'] => Some(2),
            [b'R', b'G', b'B', b'3'] => Some(3),
            _ => None,
        }
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Video format specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a new format specification with a tightly packed stride.
    ///
    /// Stride and size saturate at `u32::MAX` for dimensions no driver
    /// reports; frame conversion rejects such formats.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        let bpp = match fourcc.bytes_per_pixel() {
            Some(bpp) => bpp,
            None => 0,
        };
        let stride = width.saturating_mul(bpp);
        let size = stride.saturating_mul(height);
        Self {
            width,
            height,
            fourcc,
            stride,
            size,
        }
    }
}

/// Width and height of a frame or image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Resolution {
    /// Create a resolution.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// Metadata for a captured frame.
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Actual bytes used in the frame buffer.
    pub bytes_used: u32,
}

/// A raw frame as delivered by the capture device.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw frame data.
    pub data: Vec<u8>,
    /// Format the frame was captured in.
    pub format: Format,
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

impl Frame {
    /// Convert the raw buffer into an 8-bit RGB image.
    ///
    /// YUYV is converted with BT.601, RGB3 is copied verbatim and MJPG is
    /// decoded. Stride padding is skipped. Dimensions whose buffer size
    /// does not fit in memory are rejected as conversion errors.
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        let Format {
            width,
            height,
            fourcc,
            stride,
            ..
        } = self.format;

        match fourcc.bytes_per_pixel() {
            Some(bpp) => {
                let too_large = || {
                    CaptureError::Conversion(format!(
                        "{fourcc} frame {width}x{height} is too large"
                    ))
                };
                let rows = height as usize;
                let row_bytes = (width as usize)
                    .checked_mul(bpp as usize)
                    .ok_or_else(too_large)?;
                let stride = (stride as usize).max(row_bytes);
                let needed = stride
                    .checked_mul(rows.saturating_sub(1))
                    .and_then(|bytes| bytes.checked_add(row_bytes))
                    .ok_or_else(too_large)?;
                if rows > 0 && self.data.len() < needed {
                    return Err(CaptureError::Conversion(format!(
                        "{fourcc} buffer too short for {width}x{height}: {} < {needed} bytes",
                        self.data.len()
                    )));
                }

                let capacity = (width as usize)
                    .checked_mul(rows)
                    .and_then(|pixels| pixels.checked_mul(3))
                    .ok_or_else(too_large)?;
                let mut rgb = Vec::with_capacity(capacity);
                for row in self.data.chunks(stride).take(rows) {
                    let row = row.get(..row_bytes).unwrap_or(row);
                    if fourcc == FourCC::YUYV {
                        for quad in row.chunks_exact(4) {
                            if let [y0, u, y1, v] = *quad {
                                rgb.extend_from_slice(&<[u8; 3]>::from(yuv_to_rgb(y0, u, v)));
                                rgb.extend_from_slice(&<[u8; 3]>::from(yuv_to_rgb(y1, u, v)));
                            }
                        }
                    } else {
                        rgb.extend_from_slice(row);
                    }
                }

                RgbImage::from_raw(width, height, rgb).ok_or_else(|| {
                    CaptureError::Conversion(format!(
                        "{fourcc} row layout does not fill {width}x{height}"
                    ))
                })
            }
            None if fourcc == FourCC::MJPG => {
                image::load_from_memory_with_format(&self.data, image::ImageFormat::Jpeg)
                    .map(|decoded| decoded.to_rgb8())
                    .map_err(|err| CaptureError::Conversion(err.to_string()))
            }
            None => Err(CaptureError::FormatNotSupported(self.format.clone())),
        }
    }
}

/// Convert YUV values to RGB.
///
/// Uses the ITU-R BT.601 conversion formula and clamps every channel to
/// the 0-255 range.
#[must_use]
#[allow(clippy::many_single_char_names)]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    let clamp = |val: f32| -> u8 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            val.clamp(0.0, 255.0) as u8
        }
    };

    (clamp(r), clamp(g), clamp(b))
}

/// Capture configuration the device can be put in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Low resolution, continuous autofocus; used for preview.
    Video,
    /// Full sensor resolution, single-shot autofocus; used for captures.
    Still,
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Still => write!(f, "still"),
        }
    }
}

/// Autofocus behaviour of a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusMode {
    /// Lens refocuses continuously.
    Continuous,
    /// Lens focuses once when the mode is applied.
    SingleShot,
}

/// Fixed white-balance gain pair applied instead of auto white balance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColourGains {
    /// Red channel gain.
    pub red: f32,
    /// Blue channel gain.
    pub blue: f32,
}

/// Sensor controls applied alongside a format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Controls {
    /// Autofocus behaviour.
    pub focus: FocusMode,
    /// Fixed white balance.
    pub gains: ColourGains,
}

/// Complete configuration for one [`CaptureMode`].
#[derive(Debug, Clone, PartialEq)]
pub struct ModeSettings {
    /// Requested capture format.
    pub format: Format,
    /// Sensor controls.
    pub controls: Controls,
}

/// Result type for device operations.
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Abstraction over a streaming capture device.
///
/// Implementations hold at most one active stream. Formats and controls are
/// only changed while stopped.
pub trait CameraDevice {
    /// Get device capabilities.
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Get current format.
    fn format(&self) -> Result<Format>;

    /// Set capture format. Returns the actual format set by the driver.
    fn set_format(&mut self, format: &Format) -> Result<Format>;

    /// Apply autofocus and white-balance controls.
    fn apply_controls(&mut self, controls: &Controls) -> Result<()>;

    /// Start streaming with the specified number of buffers.
    fn start(&mut self, buffer_count: u32) -> Result<()>;

    /// Stop streaming. A no-op when already stopped.
    fn stop(&mut self) -> Result<()>;

    /// Whether a stream is active.
    fn is_streaming(&self) -> bool;

    /// Capture the next frame from the active stream.
    fn next_frame(&mut self) -> Result<Frame>;
}
