//! Error taxonomy for the LoRa modem core.

/// Raised by `configure()` when a requested modulation parameter has no
/// supported representation on the active chip. Never raised asynchronously.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum ConfigError {
    UnsupportedBandwidth,
    UnsupportedSpreadingFactor,
    UnsupportedPaRamp,
    InvalidArgument,
}

/// Chip-driver-level failure. `UnexpectedStatus` carries the raw status byte
/// for diagnosis; it is not meant to be pattern-matched on by callers.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum RadioError {
    Spi,
    Busy,
    UnexpectedStatus(u8),
}

/// Top-level error surfaced by the modem state core's application API.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum ModemError {
    Config(ConfigError),
    Radio(RadioError),
    /// An operation was requested while an incompatible one was already
    /// in flight. The caller may retry.
    Busy,
}

impl From<ConfigError> for ModemError {
    fn from(e: ConfigError) -> Self {
        ModemError::Config(e)
    }
}

impl From<RadioError> for ModemError {
    fn from(e: RadioError) -> Self {
        ModemError::Radio(e)
    }
}
