//! Build-time configuration of the resident image.

use core::ops::RangeInclusive;

/// Software interrupts reserved for packet drivers.
pub const PACKET_DRIVER_INTERRUPTS: RangeInclusive<u8> = 0x60..=0x80;

/// Default packet-driver API software interrupt.
pub const DEFAULT_API_INTERRUPT: u8 = 0x60;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("interrupt {0:#04x} lies outside the packet driver range 0x60..=0x80")]
    ApiInterruptOutOfRange(u8),
}

/// Settings the image builder takes from the driver configuration.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BuildConfig {
    api_interrupt: u8,
}

impl BuildConfig {
    /// # Errors
    /// [`ConfigError::ApiInterruptOutOfRange`] if `api_interrupt` is not a
    /// packet-driver interrupt.
    pub fn new(api_interrupt: u8) -> Result<Self, ConfigError> {
        if !PACKET_DRIVER_INTERRUPTS.contains(&api_interrupt) {
            return Err(ConfigError::ApiInterruptOutOfRange(api_interrupt));
        }
        Ok(Self { api_interrupt })
    }

    /// Software interrupt the packet-driver API is installed on.
    #[must_use]
    pub const fn api_interrupt(&self) -> u8 {
        self.api_interrupt
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            api_interrupt: DEFAULT_API_INTERRUPT,
        }
    }
}
