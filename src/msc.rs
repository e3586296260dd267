//! USB Mass-Storage Class (Bulk-Only Transport) core: CBW/CSW framing, the
//! transaction state machine, and a small SCSI command set sufficient to
//! present a read-only LUN to a host.

pub mod block;
pub mod cbw;
pub mod csw;
pub mod error;
pub mod scsi;
pub mod transport;

pub use block::{BlockBackend, Storage, DEFAULT_BLOCK_SIZE};
pub use cbw::{Cbw, CBW_LEN, CBW_SIGNATURE};
pub use csw::{Csw, CswStatus, CSW_LEN, CSW_SIGNATURE};
pub use error::McsError;
pub use scsi::{Dispatcher, ReadContinuation, SenseState};
pub use transport::{Emit, Event, Transport, TransportState};
