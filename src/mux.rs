//! I2C camera multiplexer control.
//!
//! The multiplexer exposes one register; writing a command byte to it routes
//! a single sensor (or the four-in-one composite) to the capture pipeline.

use crate::error::MuxError;
use embedded_hal::i2c::I2c;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};

/// Largest camera count supported by the multiplexer HAT.
pub const MAX_CAMERAS: u8 = 4;

/// Command bytes of the Arducam camarray HAT, indexed by camera.
const ARDUCAM_CHANNELS: [u8; MAX_CAMERAS as usize] = [0x02, 0x12, 0x22, 0x32];

/// Command byte for the four-in-one composite mode.
const ARDUCAM_COMPOSITE: u8 = 0x00;

/// Logical address of a sensor, or the composite of all sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraSelector {
    /// A single camera by zero-based index.
    Camera(u8),
    /// All cameras in one quadrant view (hardware four-in-one mode).
    Composite,
}

impl fmt::Display for CameraSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Camera(index) => write!(f, "{index}"),
            Self::Composite => write!(f, "all"),
        }
    }
}

impl FromStr for CameraSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::Composite);
        }
        s.parse::<u8>()
            .map(Self::Camera)
            .map_err(|_| format!("expected a camera index or \"all\", got {s:?}"))
    }
}

impl Serialize for CameraSelector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Camera(index) => serializer.serialize_u8(*index),
            Self::Composite => serializer.serialize_str("all"),
        }
    }
}

/// Static mapping from selector to multiplexer command byte.
///
/// Every camera index in `0..camera_count` has exactly one entry, the
/// composite has one entry, and no two entries share a byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxCommands {
    channels: Vec<u8>,
    composite: u8,
}

impl MuxCommands {
    /// Build a table from per-camera bytes and the composite byte.
    ///
    /// Returns `None` if any byte repeats or the table is empty.
    #[must_use]
    pub fn new(channels: Vec<u8>, composite: u8) -> Option<Self> {
        if channels.is_empty() || channels.len() > usize::from(u8::MAX) {
            return None;
        }
        let mut seen = channels.clone();
        seen.push(composite);
        seen.sort_unstable();
        seen.dedup();
        (seen.len() == channels.len() + 1).then_some(Self { channels, composite })
    }

    /// The Arducam camarray table truncated to `camera_count` cameras.
    #[must_use]
    pub fn arducam(camera_count: u8) -> Self {
        let count = usize::from(camera_count.clamp(1, MAX_CAMERAS));
        Self {
            channels: ARDUCAM_CHANNELS.iter().copied().take(count).collect(),
            composite: ARDUCAM_COMPOSITE,
        }
    }

    /// Number of individually addressable cameras.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn camera_count(&self) -> u8 {
        // bounded by `new`
        self.channels.len() as u8
    }

    /// Command byte for `selector`, or `None` when it is not in the table.
    #[must_use]
    pub fn command(&self, selector: CameraSelector) -> Option<u8> {
        match selector {
            CameraSelector::Camera(index) => self.channels.get(usize::from(index)).copied(),
            CameraSelector::Composite => Some(self.composite),
        }
    }

    /// Whether `selector` is addressable.
    #[must_use]
    pub fn contains(&self, selector: CameraSelector) -> bool {
        self.command(selector).is_some()
    }

    /// All single-camera selectors in index order.
    pub fn cameras(&self) -> impl Iterator<Item = CameraSelector> {
        (0..self.camera_count()).map(CameraSelector::Camera)
    }
}

/// Drives the multiplexer over an I2C bus.
///
/// Owns the bus handle until [`MuxController::release`] is called.
pub struct MuxController<B> {
    bus: Option<B>,
    address: u8,
    register: u8,
    commands: MuxCommands,
    settle_delay: Duration,
}

impl<B: I2c> MuxController<B> {
    /// Create a controller for the device at `address`.
    pub const fn new(
        bus: B,
        address: u8,
        register: u8,
        commands: MuxCommands,
        settle_delay: Duration,
    ) -> Self {
        Self {
            bus: Some(bus),
            address,
            register,
            commands,
            settle_delay,
        }
    }

    /// The command table.
    pub const fn commands(&self) -> &MuxCommands {
        &self.commands
    }

    /// Route `selector` to the capture pipeline.
    ///
    /// Issues exactly one register write, then blocks for the settle delay.
    /// Switching again before the sensor settles was observed to freeze the
    /// device.
    pub fn select(&mut self, selector: CameraSelector) -> Result<(), MuxError> {
        let command = self
            .commands
            .command(selector)
            .ok_or(MuxError::InvalidSelector(selector))?;
        let bus = self.bus.as_mut().ok_or(MuxError::Released)?;

        debug!(
            address = self.address,
            register = self.register,
            command,
            "writing mux command"
        );
        bus.write(self.address, &[self.register, command])
            .map_err(|err| {
                error!(%selector, ?err, "I2C write failed");
                MuxError::BusFailure(format!("{err:?}"))
            })?;

        if !self.settle_delay.is_zero() {
            thread::sleep(self.settle_delay);
        }
        info!(%selector, "camera selected");
        Ok(())
    }

    /// Drop the bus handle. Safe to call repeatedly.
    pub fn release(&mut self) {
        if self.bus.take().is_some() {
            info!("I2C bus released");
        }
    }

    /// Whether the bus handle is still held.
    pub const fn is_open(&self) -> bool {
        self.bus.is_some()
    }
}
