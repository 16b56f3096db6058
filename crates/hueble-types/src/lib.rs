//! Shared types for hueble components.
//!
//! This crate provides the domain types used across hueble-core, hueble-rpc,
//! hueble-daemon and hueble-cli. All types are serializable for IPC transport.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest brightness percentage a bulb accepts.
pub const MIN_BRIGHTNESS: u8 = 1;

/// Highest brightness percentage a bulb accepts.
pub const MAX_BRIGHTNESS: u8 = 100;

/// Span of the firmware brightness range above its reserved floor (1..=254).
const WIRE_SPAN: f64 = 253.0;

/// Transport address naming one physical bulb (e.g. `AA:BB:CC:DD:EE:FF`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeripheralId(String);

impl PeripheralId {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive address comparison; adapters disagree on hex case.
    #[must_use]
    pub fn matches(&self, address: &str) -> bool {
        self.0.eq_ignore_ascii_case(address)
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PeripheralId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PeripheralId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Power state of a bulb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Power {
    On,
    Off,
}

impl Power {
    /// Byte written to the power characteristic.
    #[must_use]
    pub fn to_wire(self) -> u8 {
        match self {
            Power::On => 0x01,
            Power::Off => 0x00,
        }
    }

    /// Decode a power characteristic read. Anything but a leading `0x01` is off.
    #[must_use]
    pub fn from_wire(data: &[u8]) -> Self {
        match data.first() {
            Some(0x01) => Power::On,
            _ => Power::Off,
        }
    }

    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Power::On => Power::Off,
            Power::Off => Power::On,
        }
    }

    #[must_use]
    pub fn is_on(self) -> bool {
        self == Power::On
    }
}

impl fmt::Display for Power {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Power::On => f.write_str("on"),
            Power::Off => f.write_str("off"),
        }
    }
}

/// Brightness as a percentage in `1..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Brightness(u8);

/// Rejected brightness value, carrying what the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrightnessOutOfRange(pub i64);

impl fmt::Display for BrightnessOutOfRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "brightness must be between {MIN_BRIGHTNESS} and {MAX_BRIGHTNESS}, got {}",
            self.0
        )
    }
}

impl std::error::Error for BrightnessOutOfRange {}

impl Brightness {
    pub const MIN: Self = Self(MIN_BRIGHTNESS);
    pub const MAX: Self = Self(MAX_BRIGHTNESS);

    /// Validate a caller-supplied percentage.
    ///
    /// # Errors
    ///
    /// Returns `BrightnessOutOfRange` if `percent` is outside `1..=100`.
    pub fn new(percent: i64) -> Result<Self, BrightnessOutOfRange> {
        u8::try_from(percent)
            .ok()
            .filter(|p| (MIN_BRIGHTNESS..=MAX_BRIGHTNESS).contains(p))
            .map(Self)
            .ok_or(BrightnessOutOfRange(percent))
    }

    /// Build from any percentage, clamping into `1..=100`.
    #[must_use]
    pub fn clamped(percent: i64) -> Self {
        // Clamped into 1..=100 first, so the cast is lossless
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Self(percent.clamp(i64::from(MIN_BRIGHTNESS), i64::from(MAX_BRIGHTNESS)) as u8)
    }

    #[must_use]
    pub fn percent(self) -> u8 {
        self.0
    }

    /// Firmware value for this percentage, in `1..=254`.
    #[must_use]
    pub fn to_wire(self) -> u8 {
        wire_value(self.0)
    }

    /// Percentage for a raw firmware value.
    #[must_use]
    pub fn from_wire(raw: u8) -> Self {
        Self(percent_from_wire(raw))
    }
}

impl fmt::Display for Brightness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Map a percentage onto the firmware range: `round(p / 100 * 253) + 1`.
///
/// Input is clamped to `1..=100` first.
#[must_use]
pub fn wire_value(percent: u8) -> u8 {
    let percent = f64::from(percent.clamp(MIN_BRIGHTNESS, MAX_BRIGHTNESS));
    let scaled = (percent / 100.0 * WIRE_SPAN).round();
    // scaled is in 3.0..=253.0
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let scaled = scaled as u8;
    scaled + 1
}

/// Inverse of [`wire_value`]: `clamp(round((raw - 1) / 253 * 100), 1, 100)`.
// Clamped into 1.0..=100.0 before the cast
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[must_use]
pub fn percent_from_wire(raw: u8) -> u8 {
    let percent = ((f64::from(raw) - 1.0) / WIRE_SPAN * 100.0).round();
    percent.clamp(f64::from(MIN_BRIGHTNESS), f64::from(MAX_BRIGHTNESS)) as u8
}

/// Snapshot of a bulb, read on demand and never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulbState {
    pub power: Power,
    pub brightness: Brightness,
}

/// A bulb seen during a Bluetooth scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredBulb {
    pub address: PeripheralId,
    pub name: String,
}
