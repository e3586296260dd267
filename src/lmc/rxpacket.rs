//! Received-packet value type.

use heapless::Vec;

/// Maximum LoRa payload this crate will buffer for a single receive. The
/// LoRa PHY itself caps payloads at 255 bytes.
pub const MAX_PAYLOAD_LEN: usize = 255;

/// A received packet plus the metadata captured alongside it.
#[derive(Clone, Debug, defmt::Format)]
pub struct RxPacket {
    pub payload: Vec<u8, MAX_PAYLOAD_LEN>,
    /// Monotonic millisecond tick at which the ISR observed completion.
    pub ticks_ms: u32,
    /// Signal-to-noise ratio, in 0.25 dB units, signed.
    pub snr: i16,
    /// RSSI in dBm, signed.
    pub rssi: i16,
    pub valid_crc: bool,
}
