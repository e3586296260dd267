//! LoRa Modem Core (LMC): a half-duplex, interrupt-driven driver layer for
//! SX127x/SX126x-family sub-GHz radios. See `modem::Modem` for the state
//! core this module exists to support.

#[cfg(not(any(feature = "sx126x", feature = "sx127x")))]
compile_error!("enable at least one of the `sx126x` or `sx127x` features");

pub mod antenna;
pub mod async_modem;
pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod modem;
pub mod rxpacket;
#[cfg(feature = "sx126x")]
pub mod sx126x;
#[cfg(feature = "sx127x")]
pub mod sx127x;
pub mod timing;

pub use antenna::{AntennaState, AntennaSwitch, NoAntennaSwitch};
pub use async_modem::AsyncModem;
pub use clock::MonotonicClock;
pub use config::{Bandwidth, LoraConfig};
pub use driver::RadioChipDriver;
pub use error::{ConfigError, ModemError, RadioError};
pub use modem::{Modem, PollRecv, PollSend, RxMode};
pub use rxpacket::RxPacket;
#[cfg(feature = "sx126x")]
pub use sx126x::Sx126x;
#[cfg(feature = "sx127x")]
pub use sx127x::Sx127x;
