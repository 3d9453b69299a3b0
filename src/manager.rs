//! Camera manager: the single owner of the multiplexer and capture device.
//!
//! Every hardware operation runs under one lock. Still-mode work is wrapped in
//! a capture envelope that suspends the composite preview on entry and, on
//! every exit path, puts the device back in Video mode and resumes the
//! composite if it was active. Hardware failures stop at this boundary: they
//! come back as `false` from selection or as placeholder images.

use crate::config::Config;
use crate::device::V4L2Device;
use crate::error::{CaptureError, ManagerError, MuxError};
use crate::imaging;
use crate::mux::{CameraSelector, MuxCommands, MuxController};
use crate::overlay;
use crate::session::CaptureSession;
use crate::traits::{CameraDevice, CaptureMode, Resolution};
use embedded_hal::i2c::I2c;
use image::RgbImage;
use linux_embedded_hal::I2cdev;
use serde::Serialize;
use std::borrow::Cow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, instrument, warn};

/// Whether an image came from the sensor or stands in for a failure.
#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    /// Real sensor data.
    Captured,
    /// Synthetic error image; carries the failure it replaces.
    Placeholder(Arc<CaptureError>),
}

/// An annotated image produced by the manager.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    /// Camera the image was taken from, if known.
    pub camera: Option<CameraSelector>,
    /// RGB pixels, overlay included.
    pub image: RgbImage,
    /// How the image was obtained.
    pub outcome: CaptureOutcome,
}

impl CapturedImage {
    /// Placeholders keep their own size; sensor images are cropped to `crop`
    /// before the overlay is drawn so labels stay inside the frame.
    fn new(
        camera: Option<CameraSelector>,
        result: Result<RgbImage, Arc<CaptureError>>,
        crop: Option<Resolution>,
    ) -> Self {
        let (mut image, outcome) = match result {
            Ok(image) => {
                let image = match crop {
                    Some(size) => imaging::center_crop(image, size.width, size.height),
                    None => image,
                };
                (image, CaptureOutcome::Captured)
            }
            Err(err) => (
                imaging::error_image(&err.to_string()),
                CaptureOutcome::Placeholder(err),
            ),
        };
        overlay::annotate(&mut image, camera);
        Self {
            camera,
            image,
            outcome,
        }
    }

    /// Whether this is a placeholder for a failed capture.
    pub const fn is_placeholder(&self) -> bool {
        matches!(self.outcome, CaptureOutcome::Placeholder(_))
    }

    /// The failure behind a placeholder.
    pub fn error(&self) -> Option<&CaptureError> {
        match &self.outcome {
            CaptureOutcome::Captured => None,
            CaptureOutcome::Placeholder(err) => Some(&**err),
        }
    }
}

/// Read-only view of the manager state, published after each critical section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagerStatus {
    /// Number of addressable cameras.
    pub camera_count: u8,
    /// Selector last routed by the multiplexer.
    pub current_selector: Option<CameraSelector>,
    /// Whether the four-in-one preview is on.
    pub composite_active: bool,
    /// Mode the capture device is configured in.
    pub mode: Option<CaptureMode>,
    /// Whether a Still-mode capture holds the hardware.
    pub capture_in_progress: bool,
}

/// Orchestrator state, only mutated with the hardware lock held.
#[derive(Debug, Default)]
struct ViewState {
    current: Option<CameraSelector>,
    composite_active: bool,
}

struct Hardware<B, D> {
    mux: MuxController<B>,
    session: CaptureSession<D>,
    state: ViewState,
}

impl<B: I2c, D: CameraDevice> Hardware<B, D> {
    fn select(&mut self, selector: CameraSelector) -> Result<(), MuxError> {
        match self.mux.select(selector) {
            Ok(()) => {
                self.state.current = Some(selector);
                self.state.composite_active = selector == CameraSelector::Composite;
                Ok(())
            }
            Err(err) => {
                warn!(%selector, %err, "camera selection failed");
                Err(err)
            }
        }
    }

    fn grab(&mut self) -> Result<RgbImage, CaptureError> {
        self.session.capture_frame()?.to_rgb_image()
    }

    /// Switch to `camera`, let it settle, grab one frame. Assumes Still mode.
    fn capture_from(&mut self, camera: CameraSelector) -> Result<RgbImage, CaptureError> {
        self.select(camera)?;
        self.session.wait_for_stabilization();
        self.grab()
    }
}

/// Scope guard for Still-mode work.
///
/// Records whether the composite preview was active when opened. Dropping it
/// reconfigures Video mode and re-selects the composite if needed, so this
/// runs on early returns and failures alike.
struct CaptureEnvelope<'a, B: I2c, D: CameraDevice> {
    hw: &'a mut Hardware<B, D>,
    resume_composite: bool,
}

impl<'a, B: I2c, D: CameraDevice> CaptureEnvelope<'a, B, D> {
    fn begin(hw: &'a mut Hardware<B, D>) -> Self {
        let resume_composite = hw.state.composite_active;
        if resume_composite {
            debug!("suspending composite preview");
        }
        Self {
            hw,
            resume_composite,
        }
    }

    /// One Still capture. Leaving the composite and selecting the requested
    /// camera is a single switch; without a request the composite falls back
    /// to camera 0.
    fn single(
        &mut self,
        requested: Option<CameraSelector>,
    ) -> (Option<CameraSelector>, Result<RgbImage, CaptureError>) {
        let target =
            requested.or_else(|| self.resume_composite.then_some(CameraSelector::Camera(0)));
        let camera = target.or(self.hw.state.current);

        let result = self.still_capture(target);
        (camera, result)
    }

    fn still_capture(&mut self, target: Option<CameraSelector>) -> Result<RgbImage, CaptureError> {
        if let Some(target) = target {
            self.hw.select(target)?;
        }
        self.hw.session.configure(CaptureMode::Still)?;
        self.hw.session.wait_for_stabilization();
        self.hw.grab()
    }

    /// Every camera in index order under one Still configuration.
    fn burst(&mut self) -> Vec<(CameraSelector, Result<RgbImage, Arc<CaptureError>>)> {
        let cameras: Vec<CameraSelector> = self.hw.mux.commands().cameras().collect();

        if let Err(err) = self.hw.session.configure(CaptureMode::Still) {
            error!(%err, "still mode unavailable, burst yields placeholders");
            let err = Arc::new(err);
            return cameras
                .into_iter()
                .map(|camera| (camera, Err(Arc::clone(&err))))
                .collect();
        }

        cameras
            .into_iter()
            .map(|camera| {
                let result = self.hw.capture_from(camera).map_err(|err| {
                    warn!(%camera, %err, "capture failed, substituting placeholder");
                    Arc::new(err)
                });
                (camera, result)
            })
            .collect()
    }
}

impl<B: I2c, D: CameraDevice> Drop for CaptureEnvelope<'_, B, D> {
    fn drop(&mut self) {
        if let Err(err) = self.hw.session.configure(CaptureMode::Video) {
            error!(%err, "failed to restore video mode");
        }
        if self.resume_composite {
            match self.hw.select(CameraSelector::Composite) {
                Ok(()) => debug!("composite preview resumed"),
                Err(_) => error!("failed to resume composite preview"),
            }
        }
    }
}

/// Lock-guarded orchestrator over a multiplexer bus `B` and capture device `D`.
pub struct CameraManager<B, D> {
    hardware: Mutex<Hardware<B, D>>,
    snapshot: Mutex<ManagerStatus>,
    commands: MuxCommands,
    crop: Resolution,
}

impl CameraManager<I2cdev, V4L2Device> {
    /// Open the I2C bus and V4L2 device named by `config`.
    pub fn open(config: &Config) -> Result<Self, ManagerError> {
        config.validate()?;
        let path = config.i2c_path();
        let bus = I2cdev::new(&path)
            .map_err(|err| ManagerError::BusOpen(format!("{}: {err}", path.display())))?;
        let device = V4L2Device::open(config.video_device)?;
        Self::new(config, bus, device)
    }
}

impl<B: I2c, D: CameraDevice> CameraManager<B, D> {
    /// Take ownership of the hardware, start Video mode and select the composite.
    ///
    /// A failed composite selection is logged and leaves nothing selected.
    /// Failing to start the device releases both handles before returning.
    pub fn new(config: &Config, bus: B, device: D) -> Result<Self, ManagerError> {
        config.validate()?;
        let commands = MuxCommands::arducam(config.camera_count);
        let mut hw = Hardware {
            mux: MuxController::new(
                bus,
                config.mux_address,
                config.mux_register,
                commands.clone(),
                config.switch_delay,
            ),
            session: CaptureSession::new(device, config),
            state: ViewState::default(),
        };

        if let Err(err) = hw.session.configure(CaptureMode::Video) {
            error!(%err, "failed to start capture device");
            hw.session.shutdown();
            hw.mux.release();
            return Err(err.into());
        }
        // logged by `select`
        let _ = hw.select(CameraSelector::Composite);

        let status = ManagerStatus {
            camera_count: commands.camera_count(),
            current_selector: hw.state.current,
            composite_active: hw.state.composite_active,
            mode: hw.session.mode(),
            capture_in_progress: false,
        };
        info!(cameras = status.camera_count, "camera manager ready");

        Ok(Self {
            hardware: Mutex::new(hw),
            snapshot: Mutex::new(status),
            commands,
            crop: config.crop_resolution,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Hardware<B, D>> {
        self.hardware.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, hw: &Hardware<B, D>, capture_in_progress: bool) {
        let status = ManagerStatus {
            camera_count: self.commands.camera_count(),
            current_selector: hw.state.current,
            composite_active: hw.state.composite_active,
            mode: hw.session.mode(),
            capture_in_progress,
        };
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Number of addressable cameras.
    pub fn camera_count(&self) -> u8 {
        self.commands.camera_count()
    }

    /// Latest state snapshot. Does not wait for hardware operations.
    pub fn status(&self) -> ManagerStatus {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Route `selector`. Returns `false` on an invalid selector or bus failure,
    /// in which case the recorded selector is unchanged.
    #[instrument(skip(self))]
    pub fn select_camera(&self, selector: CameraSelector) -> bool {
        if !self.commands.contains(selector) {
            warn!(%selector, "rejecting invalid selector");
            return false;
        }
        let mut hw = self.lock();
        let ok = hw.select(selector).is_ok();
        self.publish(&hw, false);
        drop(hw);
        ok
    }

    /// Switch to the four-in-one view. Returns whether it is active afterwards.
    ///
    /// Only skips the bus write when the multiplexer is known to be routed
    /// to the composite.
    #[instrument(skip(self))]
    pub fn start_composite_preview(&self) -> bool {
        let mut hw = self.lock();
        if hw.state.composite_active && hw.state.current == Some(CameraSelector::Composite) {
            return true;
        }
        let ok = hw.select(CameraSelector::Composite).is_ok();
        self.publish(&hw, false);
        drop(hw);
        ok
    }

    /// Leave the four-in-one view and select `default_index`.
    #[instrument(skip(self))]
    pub fn stop_composite_preview(&self, default_index: u8) -> bool {
        let selector = CameraSelector::Camera(default_index);
        let mut hw = self.lock();
        hw.state.composite_active = false;

        let ok = if self.commands.contains(selector) {
            hw.select(selector).is_ok()
        } else {
            warn!(%selector, "invalid default camera");
            false
        };
        self.publish(&hw, false);
        drop(hw);
        ok
    }

    /// Still capture from `selector`, or from the current camera when `None`.
    ///
    /// Only an invalid selector is an error. Any hardware failure produces a
    /// placeholder image; either way the device is back in Video mode and
    /// the composite preview is resumed if it was active.
    #[instrument(skip(self))]
    pub fn capture_image(
        &self,
        selector: Option<CameraSelector>,
    ) -> Result<CapturedImage, ManagerError> {
        if let Some(selector) = selector.filter(|s| !self.commands.contains(*s)) {
            return Err(ManagerError::InvalidSelector(selector));
        }

        let mut hw = self.lock();
        self.publish(&hw, true);
        let (camera, result) = CaptureEnvelope::begin(&mut *hw).single(selector);
        self.publish(&hw, false);
        drop(hw);

        if let Err(err) = &result {
            warn!(%err, "capture failed, substituting placeholder");
        }
        Ok(CapturedImage::new(camera, result.map_err(Arc::new), None))
    }

    /// Still capture from every camera in index order.
    ///
    /// Always returns one image per camera; failed slots hold placeholders.
    #[instrument(skip(self))]
    pub fn capture_all_cameras(&self) -> Vec<CapturedImage> {
        self.burst(None)
    }

    /// [`CameraManager::capture_all_cameras`] with every sensor image
    /// center-cropped to the configured crop resolution.
    #[instrument(skip(self))]
    pub fn capture_all_cropped(&self) -> Vec<CapturedImage> {
        self.burst(Some(self.crop))
    }

    fn burst(&self, crop: Option<Resolution>) -> Vec<CapturedImage> {
        let mut hw = self.lock();
        self.publish(&hw, true);
        let results = CaptureEnvelope::begin(&mut *hw).burst();
        self.publish(&hw, false);
        drop(hw);

        let images: Vec<CapturedImage> = results
            .into_iter()
            .map(|(camera, result)| CapturedImage::new(Some(camera), result, crop))
            .collect();
        let failed = images.iter().filter(|image| image.is_placeholder()).count();
        info!(total = images.len(), failed, "burst complete");
        images
    }

    /// Compose four captures into a 2x2 grid. Does not touch hardware.
    pub fn build_grid(&self, images: &[CapturedImage]) -> Result<RgbImage, ManagerError> {
        let tiles: Vec<Cow<'_, RgbImage>> = images
            .iter()
            .map(|captured| Cow::Borrowed(&captured.image))
            .collect();
        Ok(imaging::compose_grid(&tiles)?)
    }

    /// One annotated Video-mode frame of the current view.
    ///
    /// Never reconfigures Still mode; re-enters Video mode if an earlier
    /// restoration failed.
    pub fn preview_frame(&self) -> Result<RgbImage, CaptureError> {
        let mut hw = self.lock();
        let view = hw.state.current;
        let result = hw
            .session
            .configure(CaptureMode::Video)
            .and_then(|()| hw.grab());
        self.publish(&hw, false);
        drop(hw);

        let mut image = result?;
        overlay::annotate(&mut image, view);
        Ok(image)
    }

    /// Stop the device and release the bus. Later calls are no-ops.
    #[instrument(skip(self))]
    pub fn shutdown(&self) {
        let mut hw = self.lock();
        if hw.session.is_closed() && !hw.mux.is_open() {
            return;
        }
        hw.session.shutdown();
        hw.mux.release();
        self.publish(&hw, false);
        drop(hw);
        info!("camera manager shut down");
    }
}
