//! Two small, independent `no_std` cores for resource-constrained
//! firmware: a half-duplex LoRa modem state machine (`lmc`), and a
//! read-only USB Mass-Storage Class Bulk-Only Transport (`msc`).
//!
//! Neither module touches hardware directly; both are driven by a thin
//! trait boundary (`lmc::RadioChipDriver`, `msc::block::BlockBackend`) so
//! the state machines themselves stay host-testable.

#![cfg_attr(not(test), no_std)]

pub mod lmc;
pub mod msc;
