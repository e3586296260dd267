//! MSC-side error taxonomy. Unlike `lmc::error`, almost none of these ever
//! reach a caller as a Rust `Err` that bubbles out of the subsystem: they are
//! converted into a CSW status byte at the transport boundary (BBB never
//! surfaces a protocol error to the host except through the CSW/stall it
//! already defines). They exist as a distinct type mainly so internal
//! dispatch code can use `?`.

use super::csw::CswStatus;

#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum McsError {
    /// CBW failed shape validation (wrong length or bad signature).
    BadCbw,
    /// A bulk transfer arrived in a transport state that didn't expect it.
    PhaseError,
    /// A SCSI command failed; carries the CSW status it should produce.
    Storage { status: CswStatus },
}

impl McsError {
    pub fn storage_failed() -> Self {
        McsError::Storage {
            status: CswStatus::Failed,
        }
    }
}
