//! Radio chip driver capability contract. The modem state core is
//! polymorphic over this trait; `sx126x` and `sx127x` each provide one
//! implementation. Chip-specific symbol offsets are part of the capability
//! set because the timing calculator (`super::timing`) needs them and they
//! differ by chip family (and, on SX126x, by spreading factor).

use super::{config::LoraConfig, error::RadioError, rxpacket::RxPacket};

/// Minimum operation set the modem state core requires of a chip driver.
pub trait RadioChipDriver {
    /// Bit(s) in the IRQ status register meaning "receive complete."
    const IRQ_RX_COMPLETE: u16;
    /// Bit(s) in the IRQ status register meaning "transmit complete."
    const IRQ_TX_COMPLETE: u16;
    /// Smallest spreading factor this chip family supports. SX126x goes
    /// down to 5; SX127x only down to 7.
    const MIN_SF: u8;

    fn standby(&mut self) -> Result<(), RadioError>;
    fn sleep(&mut self) -> Result<(), RadioError>;
    fn configure(&mut self, cfg: &LoraConfig) -> Result<(), RadioError>;

    fn prepare_send(&mut self, payload: &[u8]) -> Result<(), RadioError>;
    /// Starts a transmission already staged by `prepare_send`. Returns
    /// whether the chip will raise an IRQ on completion (it always does on
    /// both supported families, but the contract leaves room for
    /// polling-only backends).
    fn start_send(&mut self) -> Result<bool, RadioError>;

    /// Arms the radio for continuous hardware receive. Software (the modem
    /// state core) is solely responsible for timeouts and for deciding when
    /// to stop receiving; the hardware timeout register is never used, so
    /// this takes no timeout argument.
    fn start_recv(&mut self) -> Result<(), RadioError>;

    fn get_irq_flags(&mut self) -> Result<u16, RadioError>;
    fn clear_irq(&mut self, mask: u16) -> Result<(), RadioError>;

    /// Reads out a completed receive. `flags` is the IRQ status read that
    /// triggered the call, used to decide whether the reported CRC is
    /// trustworthy. The modem state core (not the driver) is responsible
    /// for reusing a caller-supplied buffer.
    fn read_packet(&mut self, flags: u16) -> Result<RxPacket, RadioError>;

    /// Whether `flags` represents a packet the driver trusts (valid CRC,
    /// or CRC checking disabled).
    fn rx_flags_success(&self, flags: u16) -> bool;

    fn is_idle(&mut self) -> Result<bool, RadioError>;

    /// `(s_o, b_o)` for the *current* configuration (SX126x's pair depends
    /// on the configured spreading factor).
    fn symbol_offsets(&self) -> (i8, i8);
}
