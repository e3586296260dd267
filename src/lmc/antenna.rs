//! Optional antenna-switch collaborator. Many boards tie RX/TX antenna
//! selection to a GPIO pin or two; some route it entirely through the
//! chip's own DIO2-as-RF-switch feature and need no external switch at
//! all. This is a contract only — no implementation is provided here.

#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum AntennaState {
    Idle,
    Rx,
    Tx,
}

/// A two-state (really three: idle/rx/tx) external RF switch. Implementors
/// are expected to be infallible at this level; if the underlying GPIO
/// write can fail, map the failure to a panic or a logged best-effort, the
/// same way the modem state core treats antenna switching as part of
/// `standby`/`start_recv`/`poll_send` bookkeeping rather than a fallible
/// operation of its own.
pub trait AntennaSwitch {
    fn set(&mut self, state: AntennaState);
}

/// Used when a board drives antenna selection entirely through the chip's
/// own DIO2-as-RF-switch pin and needs no external collaborator.
pub struct NoAntennaSwitch;

impl AntennaSwitch for NoAntennaSwitch {
    fn set(&mut self, _state: AntennaState) {}
}
