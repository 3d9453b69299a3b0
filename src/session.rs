//! Capture session: sole owner of the capture device.
//!
//! Holds the Video and Still configurations and switches between them with an
//! explicit stop, reconfigure, start cycle. Which mode the device should be
//! in after an operation is the orchestrator's decision, not the session's.

use crate::config::Config;
use crate::error::CaptureError;
use crate::traits::{
    CameraDevice, CaptureMode, Controls, FocusMode, Format, FourCC, Frame, ModeSettings, Result,
};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Owns the capture device and its two mode configurations.
pub struct CaptureSession<D> {
    device: D,
    video: ModeSettings,
    still: ModeSettings,
    video_settle: Duration,
    still_settle: Duration,
    buffer_count: u32,
    /// Mode the device is known to be in; `None` after a failed reconfiguration.
    active: Option<CaptureMode>,
    closed: bool,
}

impl<D: CameraDevice> CaptureSession<D> {
    /// Create a session from rig configuration. The device is left untouched
    /// until the first [`CaptureSession::configure`].
    pub fn new(device: D, config: &Config) -> Self {
        let gains = config.white_balance;
        let settings = |resolution: crate::traits::Resolution, focus| ModeSettings {
            format: Format::new(resolution.width, resolution.height, FourCC::YUYV),
            controls: Controls { focus, gains },
        };

        Self {
            device,
            video: settings(config.video_resolution, FocusMode::Continuous),
            still: settings(config.still_resolution, FocusMode::SingleShot),
            video_settle: config.video_settle_delay,
            still_settle: config.stabilization_delay,
            buffer_count: config.buffer_count,
            active: None,
            closed: false,
        }
    }

    /// Settings used for `mode`.
    pub const fn settings(&self, mode: CaptureMode) -> &ModeSettings {
        match mode {
            CaptureMode::Video => &self.video,
            CaptureMode::Still => &self.still,
        }
    }

    /// Stabilization wait after entering `mode`.
    pub const fn settle_delay(&self, mode: CaptureMode) -> Duration {
        match mode {
            CaptureMode::Video => self.video_settle,
            CaptureMode::Still => self.still_settle,
        }
    }

    /// Mode the device is currently configured in.
    pub const fn mode(&self) -> Option<CaptureMode> {
        self.active
    }

    /// Whether [`CaptureSession::shutdown`] has run.
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Put the device in `mode`: stop, apply format and controls, start.
    ///
    /// Skips the cycle when `mode` is already active and streaming. On
    /// failure the active mode becomes unknown so the next call always
    /// performs the full cycle.
    pub fn configure(&mut self, mode: CaptureMode) -> Result<()> {
        if self.closed {
            return Err(CaptureError::Closed);
        }
        if self.active == Some(mode) && self.device.is_streaming() {
            debug!(%mode, "mode already active");
            return Ok(());
        }

        self.active = None;
        let settings = match mode {
            CaptureMode::Video => &self.video,
            CaptureMode::Still => &self.still,
        };

        self.device.stop()?;
        let actual = self.device.set_format(&settings.format)?;
        if actual.width != settings.format.width || actual.height != settings.format.height {
            warn!(
                %mode,
                requested = format_args!("{}x{}", settings.format.width, settings.format.height),
                actual = format_args!("{}x{}", actual.width, actual.height),
                "driver adjusted resolution"
            );
        }
        self.device.apply_controls(&settings.controls)?;
        self.device.start(self.buffer_count)?;

        self.active = Some(mode);
        info!(%mode, "capture mode configured");
        Ok(())
    }

    /// Block for the stabilization delay of the active mode.
    pub fn wait_for_stabilization(&self) {
        if let Some(mode) = self.active {
            let delay = self.settle_delay(mode);
            if !delay.is_zero() {
                debug!(%mode, ?delay, "waiting for sensor to settle");
                thread::sleep(delay);
            }
        }
    }

    /// Pull one frame in the active configuration.
    pub fn capture_frame(&mut self) -> Result<Frame> {
        if self.closed {
            return Err(CaptureError::Closed);
        }
        if self.active.is_none() {
            return Err(CaptureError::NotStreaming);
        }
        self.device.next_frame()
    }

    /// Stop the device and refuse further work. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.active = None;
        match self.device.stop() {
            Ok(()) => info!("capture device stopped"),
            Err(err) => warn!(%err, "failed to stop capture device"),
        }
    }
}
