//! V4L2 device implementation using the v4l crate.

use v4l::buffer::Type;
use v4l::control::{Control, Value};
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::Device;

use crate::error::CaptureError;
use crate::traits::{
    CameraDevice, Controls, DeviceCapabilities, FocusMode, Format, FourCC, Frame, FrameMetadata,
    Result,
};
use std::time::Duration;
use tracing::{debug, info};

const V4L2_CID_BASE: u32 = 0x0098_0900;
const V4L2_CID_CAMERA_CLASS_BASE: u32 = 0x009a_0900;

const V4L2_CID_AUTO_WHITE_BALANCE: u32 = V4L2_CID_BASE + 12;
const V4L2_CID_RED_BALANCE: u32 = V4L2_CID_BASE + 14;
const V4L2_CID_BLUE_BALANCE: u32 = V4L2_CID_BASE + 15;
const V4L2_CID_FOCUS_AUTO: u32 = V4L2_CID_CAMERA_CLASS_BASE + 12;
const V4L2_CID_AUTO_FOCUS_START: u32 = V4L2_CID_CAMERA_CLASS_BASE + 28;

/// Balance controls take integer gains scaled by this factor.
const GAIN_SCALE: f32 = 1000.0;

/// V4L2 device implementation wrapping the v4l crate.
pub struct V4L2Device {
    device: Device,
    capabilities: DeviceCapabilities,
    stream: Option<Stream<'static>>,
    format: Format,
}

impl V4L2Device {
    /// Open a V4L2 device by index (e.g., 0 for /dev/video0).
    pub fn open(index: u32) -> Result<Self> {
        let device = Device::new(index as usize)
            .map_err(|err| CaptureError::DeviceOpenFailed(err.to_string()))?;

        let caps = device
            .query_caps()
            .map_err(|err| CaptureError::DeviceOpenFailed(err.to_string()))?;

        let capabilities = DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        };
        if !capabilities.can_capture {
            return Err(CaptureError::DeviceNotFound(index));
        }

        let fmt = device
            .format()
            .map_err(|err| CaptureError::DeviceOpenFailed(err.to_string()))?;
        info!(card = %capabilities.card, driver = %capabilities.driver, "opened capture device");

        Ok(Self {
            device,
            capabilities,
            stream: None,
            format: from_v4l(&fmt),
        })
    }

    /// Write one control, skipping controls the driver does not expose.
    fn set_control(&self, id: u32, value: Value) {
        if let Err(err) = self.device.set_control(Control { id, value }) {
            debug!(id = format_args!("{id:#x}"), %err, "control not applied");
        }
    }
}

fn from_v4l(fmt: &v4l::Format) -> Format {
    Format {
        width: fmt.width,
        height: fmt.height,
        fourcc: FourCC::from(fmt.fourcc),
        stride: fmt.stride,
        size: fmt.size,
    }
}

impl CameraDevice for V4L2Device {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn format(&self) -> Result<Format> {
        let fmt = self
            .device
            .format()
            .map_err(|err| CaptureError::StreamError(err.to_string()))?;

        Ok(from_v4l(&fmt))
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        let mut fmt = self
            .device
            .format()
            .map_err(|err| CaptureError::StreamError(err.to_string()))?;

        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.fourcc.into();

        let fmt = self
            .device
            .set_format(&fmt)
            .map_err(|err| CaptureError::StreamError(err.to_string()))?;

        let actual = from_v4l(&fmt);
        if actual.fourcc != format.fourcc {
            return Err(CaptureError::FormatNotSupported(format.clone()));
        }
        self.format = actual.clone();
        Ok(actual)
    }

    fn apply_controls(&mut self, controls: &Controls) -> Result<()> {
        #[allow(clippy::cast_possible_truncation)]
        let scale = |gain: f32| i64::from((gain * GAIN_SCALE).round() as i32);

        self.set_control(V4L2_CID_AUTO_WHITE_BALANCE, Value::Boolean(false));
        self.set_control(V4L2_CID_RED_BALANCE, Value::Integer(scale(controls.gains.red)));
        self.set_control(V4L2_CID_BLUE_BALANCE, Value::Integer(scale(controls.gains.blue)));

        match controls.focus {
            FocusMode::Continuous => {
                self.set_control(V4L2_CID_FOCUS_AUTO, Value::Boolean(true));
            }
            FocusMode::SingleShot => {
                self.set_control(V4L2_CID_FOCUS_AUTO, Value::Boolean(false));
                self.set_control(V4L2_CID_AUTO_FOCUS_START, Value::Integer(1));
            }
        }
        Ok(())
    }

    fn start(&mut self, buffer_count: u32) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = Stream::with_buffers(&self.device, Type::VideoCapture, buffer_count)
            .map_err(|err| CaptureError::StreamError(err.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        // Dropping the stream issues STREAMOFF and unmaps the buffers.
        self.stream = None;
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let stream = self.stream.as_mut().ok_or(CaptureError::NotStreaming)?;
        let (buf, meta) = stream
            .next()
            .map_err(|err| CaptureError::StreamError(err.to_string()))?;

        // Safe conversions: V4L2 timestamps are always non-negative in practice
        #[allow(clippy::cast_sign_loss)]
        let secs = meta.timestamp.sec.max(0) as u64;
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let nanos = (meta.timestamp.usec.max(0) as u32).saturating_mul(1000);

        let used = (meta.bytesused as usize).min(buf.len());
        let data = buf.get(..used).unwrap_or(buf).to_vec();

        Ok(Frame {
            data,
            format: self.format.clone(),
            metadata: FrameMetadata {
                sequence: meta.sequence,
                timestamp: Duration::new(secs, nanos),
                bytes_used: meta.bytesused,
            },
        })
    }
}
