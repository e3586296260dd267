//! LoRa modulation configuration. Immutable once handed to `configure()`.

use super::error::ConfigError;

/// LoRa channel bandwidth, restricted to the set both supported chip
/// families recognize. The base crate the chip drivers here grew out of
/// kept a separate bandwidth enum per chip (`LoraBandwidth6x`,
/// `LoraBandwidth8x`); this crate only targets sub-GHz LoRa chips whose
/// bandwidth sets coincide, so one enum suffices.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum Bandwidth {
    Bw7_8,
    Bw10_4,
    Bw15_6,
    Bw20_8,
    Bw31_25,
    Bw41_7,
    Bw62_5,
    Bw125,
    Bw250,
    Bw500,
}

impl Bandwidth {
    pub const fn hz(self) -> u32 {
        match self {
            Self::Bw7_8 => 7_800,
            Self::Bw10_4 => 10_400,
            Self::Bw15_6 => 15_600,
            Self::Bw20_8 => 20_800,
            Self::Bw31_25 => 31_250,
            Self::Bw41_7 => 41_700,
            Self::Bw62_5 => 62_500,
            Self::Bw125 => 125_000,
            Self::Bw250 => 250_000,
            Self::Bw500 => 500_000,
        }
    }
}

/// Power-amplifier ramp time, picked as the smallest chip-supported value
/// at or above the caller's request. `table` is chip-specific and supplied
/// by the driver; ordering matters (ascending).
pub fn pick_pa_ramp_us(requested_us: u16, table: &[u16]) -> Result<u16, ConfigError> {
    table
        .iter()
        .copied()
        .find(|&supported| supported >= requested_us)
        .ok_or(ConfigError::UnsupportedPaRamp)
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub struct LoraConfig {
    pub freq_khz: u32,
    pub sf: u8,
    pub bw: Bandwidth,
    /// Coding-rate denominator; payload gets a `4 / coding_rate` code.
    pub coding_rate: u8,
    pub preamble_len: u16,
    pub implicit_header: bool,
    pub crc_en: bool,
    pub invert_iq_rx: bool,
    pub invert_iq_tx: bool,
    pub output_power_dbm: i8,
    pub pa_ramp_us: u16,
    pub syncword: u8,
    /// SX127x only: request automatic image calibration at the configured
    /// frequency.
    pub auto_image_cal: bool,
    /// SX126x only: TCXO supply voltage in millivolts, if the module has
    /// one.
    pub tcxo_millivolts: Option<u16>,
    /// SX126x only: drive the RF switch from the chip's DIO2 pin instead
    /// of an external collaborator.
    pub dio2_rf_sw: bool,
    /// Chip-specific LNA boost.
    pub rx_boost: bool,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            freq_khz: 915_000,
            sf: 7,
            bw: Bandwidth::Bw125,
            coding_rate: 5,
            preamble_len: 8,
            implicit_header: false,
            crc_en: true,
            invert_iq_rx: false,
            invert_iq_tx: false,
            output_power_dbm: 14,
            pa_ramp_us: 40,
            syncword: 0x34,
            auto_image_cal: false,
            tcxo_millivolts: None,
            dio2_rf_sw: false,
            rx_boost: false,
        }
    }
}

impl LoraConfig {
    /// Validation shared by both chip drivers. Chip-specific rules (e.g.
    /// SF5/SF6 only existing on SX126x, the PA ramp table) are layered on
    /// top by each driver's `configure()`.
    pub fn validate_common(&self) -> Result<(), ConfigError> {
        if !(5..=12).contains(&self.sf) {
            return Err(ConfigError::UnsupportedSpreadingFactor);
        }
        if !(5..=8).contains(&self.coding_rate) {
            return Err(ConfigError::InvalidArgument);
        }
        Ok(())
    }
}
