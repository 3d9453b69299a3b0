//! Mock hardware for testing without the multiplexer HAT or sensors.
//!
//! A [`MockRig`] holds one simulated multiplexer. Its [`MockBus`] decodes
//! register writes into the routed camera and its [`MockDevice`] renders a
//! frame for whichever camera is currently routed, so captures from
//! different cameras are distinguishable. Both record into a shared event
//! log for ordering assertions.

use crate::config::{Config, PreviewSettings};
use crate::error::CaptureError;
use crate::mux::{CameraSelector, MuxCommands};
use crate::traits::{
    CameraDevice, CaptureMode, Controls, DeviceCapabilities, FocusMode, Format, FourCC, Frame,
    FrameMetadata, Resolution, Result,
};
use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// YUV values of the solid frame each camera renders.
const CAMERA_COLOURS: [(u8, u8, u8); 4] = [
    (81, 90, 240),  // Red
    (145, 54, 34),  // Green
    (41, 240, 110), // Blue
    (210, 16, 146), // Yellow
];

/// YUV black, rendered when nothing is routed.
const BLACK: (u8, u8, u8) = (16, 128, 128);

/// Hardware interaction recorded by the rig.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Multiplexer switched.
    Select(CameraSelector),
    /// Format applied with the given resolution.
    SetFormat(Resolution),
    /// Controls applied with the given focus mode.
    Controls(FocusMode),
    /// Streaming started.
    Start,
    /// Streaming stopped.
    Stop,
    /// Frame grabbed (or attempted) while `camera` was routed.
    Grab {
        /// Routed camera at grab time.
        camera: Option<CameraSelector>,
        /// Whether the grab succeeded.
        ok: bool,
    },
}

#[derive(Debug)]
struct RigState {
    commands: MuxCommands,
    routed: Option<CameraSelector>,
    bus_writes: Vec<(u8, Vec<u8>)>,
    fail_bus: bool,
    fail_select: Vec<CameraSelector>,
    events: Vec<DeviceEvent>,
    format: Format,
    streaming: bool,
    frame_count: u32,
    grab_count: usize,
    fail_grabs: Vec<usize>,
    fail_all_grabs: bool,
    fail_start: bool,
}

/// Shared simulated multiplexer, bus and sensor.
#[derive(Debug, Clone)]
pub struct MockRig {
    state: Arc<Mutex<RigState>>,
}

impl Default for MockRig {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRig {
    /// Create a rig with four cameras and nothing routed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RigState {
                commands: MuxCommands::arducam(4),
                routed: None,
                bus_writes: Vec::new(),
                fail_bus: false,
                fail_select: Vec::new(),
                events: Vec::new(),
                format: Format::new(640, 480, FourCC::YUYV),
                streaming: false,
                frame_count: 0,
                grab_count: 0,
                fail_grabs: Vec::new(),
                fail_all_grabs: false,
                fail_start: false,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, RigState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A bus handle attached to this rig.
    #[must_use]
    pub fn bus(&self) -> MockBus {
        MockBus { rig: self.clone() }
    }

    /// A capture device attached to this rig.
    #[must_use]
    pub fn device(&self) -> MockDevice {
        MockDevice {
            rig: self.clone(),
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Quad Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
        }
    }

    /// Make every bus write fail.
    pub fn fail_bus(&self, fail: bool) {
        self.state().fail_bus = fail;
    }

    /// Make bus writes selecting `selector` fail.
    pub fn fail_select(&self, selector: CameraSelector) {
        self.state().fail_select.push(selector);
    }

    /// Let every selector switch again.
    pub fn clear_select_failures(&self) {
        self.state().fail_select.clear();
    }

    /// Fail the grab with the given zero-based index (counted over the rig's lifetime).
    pub fn fail_grab(&self, index: usize) {
        self.state().fail_grabs.push(index);
    }

    /// Make every grab fail.
    pub fn fail_all_grabs(&self, fail: bool) {
        self.state().fail_all_grabs = fail;
    }

    /// Make starting the stream fail.
    pub fn fail_start(&self, fail: bool) {
        self.state().fail_start = fail;
    }

    /// Raw bus writes as `(address, bytes)`.
    #[must_use]
    pub fn bus_writes(&self) -> Vec<(u8, Vec<u8>)> {
        self.state().bus_writes.clone()
    }

    /// Camera currently routed by the simulated multiplexer.
    #[must_use]
    pub fn routed(&self) -> Option<CameraSelector> {
        self.state().routed
    }

    /// Recorded hardware events.
    #[must_use]
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.state().events.clone()
    }

    /// Forget recorded events and bus writes.
    pub fn clear_events(&self) {
        let mut state = self.state();
        state.events.clear();
        state.bus_writes.clear();
    }

    /// Mode implied by the last applied focus control.
    #[must_use]
    pub fn mode(&self) -> Option<CaptureMode> {
        self.state().events.iter().rev().find_map(|event| match event {
            DeviceEvent::Controls(FocusMode::Continuous) => Some(CaptureMode::Video),
            DeviceEvent::Controls(FocusMode::SingleShot) => Some(CaptureMode::Still),
            _ => None,
        })
    }

    /// Whether the simulated sensor is streaming.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.state().streaming
    }

    /// RGB colour a successful grab from `camera` decodes to.
    #[must_use]
    pub fn expected_rgb(camera: u8) -> [u8; 3] {
        let (y, u, v) = CAMERA_COLOURS
            .get(usize::from(camera))
            .copied()
            .unwrap_or(BLACK);
        crate::traits::yuv_to_rgb(y, u, v).into()
    }
}

/// Mock I2C bus.
#[derive(Debug)]
pub struct MockBus {
    rig: MockRig,
}

impl ErrorType for MockBus {
    type Error = ErrorKind;
}

impl I2c for MockBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> std::result::Result<(), Self::Error> {
        let mut state = self.rig.state();
        if state.fail_bus {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }

        for operation in operations.iter() {
            if let Operation::Write(bytes) = operation {
                let selector = bytes.get(1).and_then(|&command| {
                    std::iter::once(CameraSelector::Composite)
                        .chain(state.commands.cameras())
                        .find(|&s| state.commands.command(s) == Some(command))
                });
                if let Some(selector) = selector {
                    if state.fail_select.contains(&selector) {
                        return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data));
                    }
                    state.routed = Some(selector);
                    state.events.push(DeviceEvent::Select(selector));
                }
                state.bus_writes.push((address, bytes.to_vec()));
            }
        }
        Ok(())
    }
}

/// Mock capture device.
#[derive(Debug)]
pub struct MockDevice {
    rig: MockRig,
    capabilities: DeviceCapabilities,
}

impl CameraDevice for MockDevice {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn format(&self) -> Result<Format> {
        Ok(self.rig.state().format.clone())
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        let mut state = self.rig.state();
        if state.streaming {
            return Err(CaptureError::StreamError("format change while streaming".to_owned()));
        }
        state.format = format.clone();
        state
            .events
            .push(DeviceEvent::SetFormat(Resolution::new(format.width, format.height)));
        Ok(state.format.clone())
    }

    fn apply_controls(&mut self, controls: &Controls) -> Result<()> {
        self.rig.state().events.push(DeviceEvent::Controls(controls.focus));
        Ok(())
    }

    fn start(&mut self, _buffer_count: u32) -> Result<()> {
        let mut state = self.rig.state();
        if state.fail_start {
            return Err(CaptureError::StreamError("injected start failure".to_owned()));
        }
        state.streaming = true;
        state.events.push(DeviceEvent::Start);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut state = self.rig.state();
        if state.streaming {
            state.streaming = false;
            state.events.push(DeviceEvent::Stop);
        }
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.rig.state().streaming
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let mut state = self.rig.state();
        if !state.streaming {
            return Err(CaptureError::NotStreaming);
        }

        let index = state.grab_count;
        state.grab_count += 1;
        let camera = state.routed;
        let fail = state.fail_all_grabs || state.fail_grabs.contains(&index);
        state.events.push(DeviceEvent::Grab { camera, ok: !fail });
        if fail {
            return Err(CaptureError::StreamError(format!("injected failure on grab {index}")));
        }

        let pattern = match camera {
            Some(CameraSelector::Camera(index)) => {
                let (y, u, v) = CAMERA_COLOURS.get(usize::from(index)).copied().unwrap_or(BLACK);
                TestPattern::Solid(y, u, v)
            }
            Some(CameraSelector::Composite) => TestPattern::ColorBars,
            None => TestPattern::Solid(BLACK.0, BLACK.1, BLACK.2),
        };
        let format = state.format.clone();
        let data = generate_test_frame(&format, pattern);

        let seq = state.frame_count;
        state.frame_count += 1;

        Ok(Frame {
            data,
            metadata: FrameMetadata {
                sequence: seq,
                timestamp: Duration::from_millis(u64::from(seq) * 33), // ~30fps
                bytes_used: format.size,
            },
            format,
        })
    }
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// Generate YUYV test frame data based on pattern.
fn generate_test_frame(format: &Format, pattern: TestPattern) -> Vec<u8> {
    let size = (format.width * format.height * 2) as usize;
    let mut data = vec![0u8; size];

    match pattern {
        TestPattern::ColorBars => generate_color_bars(&mut data, format.width),
        TestPattern::Solid(y, u, v) => generate_solid(&mut data, y, u, v),
    }

    data
}

/// Generate YUYV color bars pattern.
fn generate_color_bars(data: &mut [u8], width: u32) {
    // White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    let bars: [(u8, u8, u8); 8] = [
        (235, 128, 128),
        (210, 16, 146),
        (170, 166, 16),
        (145, 54, 34),
        (106, 202, 222),
        (81, 90, 240),
        (41, 240, 110),
        (16, 128, 128),
    ];

    let bar_width = (width / 8).max(1);
    let row_bytes = (width * 2) as usize;
    for row in data.chunks_mut(row_bytes) {
        for (pair, quad) in row.chunks_exact_mut(4).enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let x = pair as u32 * 2;
            let bar = (x / bar_width).min(7) as usize;
            let (y, u, v) = bars.get(bar).copied().unwrap_or(BLACK);
            quad.copy_from_slice(&[y, u, y, v]);
        }
    }
}

/// Generate solid color YUYV frame.
fn generate_solid(data: &mut [u8], y: u8, u: u8, v: u8) {
    for quad in data.chunks_exact_mut(4) {
        quad.copy_from_slice(&[y, u, y, v]);
    }
}

/// Configuration with tiny resolutions and no delays.
#[must_use]
pub fn test_config() -> Config {
    Config {
        switch_delay: Duration::ZERO,
        video_settle_delay: Duration::ZERO,
        stabilization_delay: Duration::ZERO,
        video_resolution: Resolution::new(32, 24),
        still_resolution: Resolution::new(64, 48),
        crop_resolution: Resolution::new(48, 32),
        preview: PreviewSettings {
            frame_interval: Duration::from_millis(5),
            error_backoff: Duration::from_millis(10),
            jpeg_quality: 80,
        },
        ..Config::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_creation() {
        let device = MockRig::new().device();
        assert_eq!(device.capabilities().driver, "mock");
        assert!(device.capabilities().can_capture);
        assert!(device.capabilities().can_stream);
    }

    #[test]
    fn test_frames_follow_routed_camera() {
        let rig = MockRig::new();
        let mut bus = rig.bus();
        let mut device = rig.device();
        device
            .set_format(&Format::new(16, 8, FourCC::YUYV))
            .expect("set_format should succeed");
        device.start(2).expect("start should succeed");

        bus.write(0x24, &[0x24, 0x22]).expect("write should succeed");
        let frame = device.next_frame().expect("next_frame should succeed");
        let image = frame.to_rgb_image().expect("conversion should succeed");
        assert_eq!(image.get_pixel(5, 5).0, MockRig::expected_rgb(2));
        assert_eq!(rig.routed(), Some(CameraSelector::Camera(2)));
    }

    #[test]
    fn test_grab_requires_streaming() {
        let rig = MockRig::new();
        let mut device = rig.device();
        assert!(matches!(device.next_frame(), Err(CaptureError::NotStreaming)));
    }

    #[test]
    fn test_injected_grab_failure() {
        let rig = MockRig::new();
        rig.fail_grab(1);
        let mut device = rig.device();
        device.start(1).expect("start should succeed");

        assert!(device.next_frame().is_ok());
        assert!(device.next_frame().is_err());
        assert!(device.next_frame().is_ok());
    }

    #[test]
    fn test_color_bars_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::ColorBars);

        assert_eq!(data.len(), 640 * 480 * 2);
        // First bar is white
        assert_eq!(data.first(), Some(&235));
        // Last bar is black
        assert_eq!(data.get(638 * 2), Some(&16));
    }

    #[test]
    fn test_solid_pattern() {
        let format = Format::new(64, 64, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::Solid(128, 64, 192));

        assert_eq!(data.get(..4), Some(&[128, 64, 128, 192][..]));
    }

    #[test]
    fn test_bus_write_is_logged() {
        let rig = MockRig::new();
        let mut bus = rig.bus();
        bus.write(0x24, &[0x24, 0x00]).expect("write should succeed");

        assert_eq!(rig.events(), vec![DeviceEvent::Select(CameraSelector::Composite)]);
        assert_eq!(rig.bus_writes(), vec![(0x24, vec![0x24, 0x00])]);
    }
}
