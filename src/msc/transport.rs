//! Bulk-Only Transport (BBB) state machine. Deliberately modeled as a pure
//! function from `(state, Event) -> Emit`: the transport never touches an
//! endpoint itself. The caller (the actual USB peripheral driver) owns the
//! hardware and is told what to do next; this keeps the state machine
//! testable without any USB stack at all, and avoids the tangled
//! callback-chases-callback structure of the original event-driven design.

use heapless::Vec;

use super::block::{BlockBackend, Storage, DEFAULT_BLOCK_SIZE};
use super::cbw::Cbw;
use super::csw::{Csw, CswStatus};
use super::error::McsError;
use super::scsi::{Dispatcher, DispatchOutcome, ReadContinuation};

#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum TransportState {
    Cmd,
    Data,
    Status,
    StatusSent,
    NeedReset,
}

/// Things that happen to the transport from outside: a bulk transfer
/// completing, or a class-specific control request arriving.
pub enum Event<'a> {
    /// The device has just been configured; arm the first CBW read.
    EndpointsReady,
    /// 31 raw bytes arrived on the bulk-OUT endpoint while CMD was armed.
    CbwReceived(&'a [u8]),
    /// The queued bulk-IN transfer (data or CSW) finished sending.
    InComplete,
    /// Bulk-Only Mass Storage Reset (class request 0xFF).
    ClassReset,
    /// GET_MAX_LUN (class request 0xFE).
    GetMaxLun,
}

/// What the caller should do in response to a `step`.
#[derive(Debug, PartialEq, Eq)]
pub enum Emit {
    None,
    /// Arm a 31-byte read on bulk-OUT.
    SubmitOutCbw,
    /// Send `data()[..len]` on bulk-IN.
    SubmitIn { len: usize },
    /// Send `pending_csw()` (now `Some`) on bulk-IN.
    SubmitInCsw,
    /// Stall both bulk endpoints; wait for Reset Recovery.
    StallBoth,
    /// Clear any stall and arm a fresh CBW read.
    ClearStallsAndArmCbw,
    /// Reply to GET_MAX_LUN with this LUN number.
    MaxLunResponse(u8),
    /// Reply to GET_MAX_LUN, and also arm the first CBW read (covers the
    /// case where GET_MAX_LUN is the very first request the host sends).
    MaxLunResponseAndArmCbw(u8),
}

/// The Bulk-Only Transport state machine plus the one LUN's backing store.
///
/// `BUF_CAP` bounds the data-stage scratch buffer; it is the hard ceiling
/// on how many bytes a single READ_10 chunk can carry; `free_bytes_budget`
/// is a softer, externally supplied figure (this is `no_std`, there's no
/// allocator to query) used to throttle that further so one big transfer
/// doesn't starve whatever else is sharing RAM.
pub struct Transport<'a, B: BlockBackend, const BUF_CAP: usize> {
    pub state: TransportState,
    pub storage: Option<Storage<'a, B>>,
    dispatcher: Dispatcher,
    device_lun: u8,
    free_bytes_budget: u32,
    cbw: Option<Cbw>,
    transferred_length: u32,
    continuation: Option<ReadContinuation>,
    data_buf: Vec<u8, BUF_CAP>,
    pending_csw: Option<Csw>,
    armed: bool,
}

impl<'a, B: BlockBackend, const BUF_CAP: usize> Transport<'a, B, BUF_CAP> {
    pub fn new(storage: Option<Storage<'a, B>>, free_bytes_budget: u32) -> Self {
        Self {
            state: TransportState::Cmd,
            storage,
            dispatcher: Dispatcher::new(),
            device_lun: 0,
            free_bytes_budget,
            cbw: None,
            transferred_length: 0,
            continuation: None,
            data_buf: Vec::new(),
            pending_csw: None,
            armed: false,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data_buf
    }

    pub fn pending_csw(&self) -> Option<Csw> {
        self.pending_csw
    }

    fn max_blocks(&self, block_size: u32) -> u32 {
        let bs = block_size.max(1);
        let by_budget = (self.free_bytes_budget / bs / 10).max(1);
        let by_buf = (BUF_CAP as u32 / bs).max(1);
        by_budget.min(by_buf)
    }

    pub fn step(&mut self, event: Event<'_>) -> Emit {
        match event {
            Event::EndpointsReady => {
                self.armed = true;
                self.state = TransportState::Cmd;
                Emit::SubmitOutCbw
            }
            Event::ClassReset => {
                if let Some(s) = &mut self.storage {
                    s.reset();
                }
                self.transferred_length = 0;
                self.continuation = None;
                self.pending_csw = None;
                self.armed = true;
                self.state = TransportState::Cmd;
                Emit::ClearStallsAndArmCbw
            }
            Event::GetMaxLun => {
                if !self.armed {
                    self.armed = true;
                    self.state = TransportState::Cmd;
                    Emit::MaxLunResponseAndArmCbw(self.device_lun)
                } else {
                    Emit::MaxLunResponse(self.device_lun)
                }
            }
            Event::CbwReceived(bytes) => self.on_cbw(bytes),
            Event::InComplete => self.on_in_complete(),
        }
    }

    fn on_cbw(&mut self, bytes: &[u8]) -> Emit {
        let cbw = match Cbw::parse(bytes) {
            Some(c) => c,
            None => {
                self.state = TransportState::NeedReset;
                return Emit::StallBoth;
            }
        };
        if self.state != TransportState::Cmd {
            // Valid shape, but a previous transaction's data/status phase
            // was still outstanding: a phase error, not a shape violation,
            // so it is recovered with a PHASE_ERROR CSW rather than a stall.
            return self.queue_csw(cbw.tag, cbw.data_transfer_length, 0, CswStatus::PhaseError);
        }
        if !cbw.is_meaningful(self.device_lun) {
            return self.queue_csw(cbw.tag, cbw.data_transfer_length, 0, CswStatus::Failed);
        }

        self.transferred_length = 0;
        let block_size = self
            .storage
            .as_ref()
            .map(|s| s.block_size())
            .unwrap_or(DEFAULT_BLOCK_SIZE);
        let max_blocks = self.max_blocks(block_size);

        self.data_buf.clear();
        let _ = self.data_buf.resize_default(BUF_CAP);
        let outcome = {
            let buf = self.data_buf.as_mut_slice();
            self.dispatcher
                .dispatch(cbw.command_block(), &mut self.storage, buf, max_blocks)
        };
        self.handle_dispatch_outcome(outcome, cbw)
    }

    fn handle_dispatch_outcome(
        &mut self,
        outcome: Result<DispatchOutcome, McsError>,
        cbw: Cbw,
    ) -> Emit {
        match outcome {
            Err(McsError::Storage { status }) => {
                self.data_buf.clear();
                self.queue_csw(cbw.tag, cbw.data_transfer_length, 0, status)
            }
            Err(_) => {
                self.data_buf.clear();
                self.queue_csw(cbw.tag, cbw.data_transfer_length, 0, CswStatus::Failed)
            }
            Ok(DispatchOutcome::Empty) => {
                self.data_buf.clear();
                if cbw.data_transfer_length == 0 {
                    self.queue_csw(cbw.tag, 0, 0, CswStatus::Passed)
                } else {
                    // Host expected data; device has none. One zero-filled
                    // padding IN xfer, then CSW.
                    let pad = (cbw.data_transfer_length as usize).min(BUF_CAP);
                    let _ = self.data_buf.resize_default(pad);
                    self.transferred_length = pad as u32;
                    self.continuation = None;
                    self.cbw = Some(cbw);
                    self.state = TransportState::Data;
                    Emit::SubmitIn { len: pad }
                }
            }
            Ok(DispatchOutcome::Data(len)) => {
                if len as u32 > cbw.data_transfer_length {
                    self.data_buf.clear();
                    return self.queue_csw(cbw.tag, cbw.data_transfer_length, 0, CswStatus::Failed);
                }
                self.data_buf.truncate(len);
                self.transferred_length = len as u32;
                self.continuation = None;
                self.cbw = Some(cbw);
                self.state = TransportState::Data;
                Emit::SubmitIn { len }
            }
            Ok(DispatchOutcome::DataWithContinuation { len, continuation }) => {
                self.data_buf.truncate(len);
                self.transferred_length = len as u32;
                self.continuation = Some(continuation);
                self.cbw = Some(cbw);
                self.state = TransportState::Data;
                Emit::SubmitIn { len }
            }
        }
    }

    fn on_in_complete(&mut self) -> Emit {
        match self.state {
            TransportState::Data => {
                let cbw = match self.cbw {
                    Some(c) => c,
                    None => return Emit::None,
                };
                if let Some(cont) = self.continuation.take() {
                    let block_size = self
                        .storage
                        .as_ref()
                        .map(|s| s.block_size())
                        .unwrap_or(DEFAULT_BLOCK_SIZE);
                    let max_blocks = self.max_blocks(block_size);
                    self.data_buf.clear();
                    let _ = self.data_buf.resize_default(BUF_CAP);
                    let outcome = {
                        let buf = self.data_buf.as_mut_slice();
                        self.dispatcher
                            .continue_read(&mut self.storage, cont, buf, max_blocks)
                    };
                    match outcome {
                        Ok(DispatchOutcome::DataWithContinuation { len, continuation }) => {
                            self.data_buf.truncate(len);
                            self.transferred_length += len as u32;
                            self.continuation = Some(continuation);
                            Emit::SubmitIn { len }
                        }
                        Ok(DispatchOutcome::Data(len)) => {
                            self.data_buf.truncate(len);
                            self.transferred_length += len as u32;
                            self.queue_csw(
                                cbw.tag,
                                cbw.data_transfer_length,
                                self.transferred_length,
                                CswStatus::Passed,
                            )
                        }
                        Ok(DispatchOutcome::Empty) => self.queue_csw(
                            cbw.tag,
                            cbw.data_transfer_length,
                            self.transferred_length,
                            CswStatus::Passed,
                        ),
                        Err(McsError::Storage { status }) => self.queue_csw(
                            cbw.tag,
                            cbw.data_transfer_length,
                            self.transferred_length,
                            status,
                        ),
                        Err(_) => self.queue_csw(
                            cbw.tag,
                            cbw.data_transfer_length,
                            self.transferred_length,
                            CswStatus::Failed,
                        ),
                    }
                } else {
                    self.queue_csw(
                        cbw.tag,
                        cbw.data_transfer_length,
                        self.transferred_length,
                        CswStatus::Passed,
                    )
                }
            }
            TransportState::StatusSent => {
                self.state = TransportState::Cmd;
                self.pending_csw = None;
                self.cbw = None;
                Emit::SubmitOutCbw
            }
            _ => Emit::None,
        }
    }

    fn queue_csw(&mut self, tag: u32, data_transfer_length: u32, transferred: u32, status: CswStatus) -> Emit {
        let residue = data_transfer_length.saturating_sub(transferred);
        self.pending_csw = Some(Csw {
            tag,
            data_residue: residue,
            status,
        });
        self.state = TransportState::StatusSent;
        Emit::SubmitInCsw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msc::cbw::CBW_LEN;

    struct NullBackend;
    impl BlockBackend for NullBackend {
        fn block_count(&self) -> u32 {
            0
        }
        fn block_size(&self) -> u32 {
            DEFAULT_BLOCK_SIZE
        }
        fn read_blocks(&mut self, _lba: u32, _buf: &mut [u8]) -> Result<(), ()> {
            Err(())
        }
    }

    fn cbw_bytes(tag: u32, data_transfer_length: u32, cb: [u8; 16], cb_len: u8) -> [u8; CBW_LEN] {
        Cbw {
            tag,
            data_transfer_length,
            flags: Cbw::DIRECTION_IN,
            lun: 0,
            cb_len,
            cb,
        }
        .to_bytes()
    }

    fn read10_cb(lba: u32, blocks: u16) -> [u8; 16] {
        let mut cb = [0u8; 16];
        cb[0] = super::super::scsi::OP_READ_10;
        cb[2..6].copy_from_slice(&lba.to_be_bytes());
        cb[7..9].copy_from_slice(&blocks.to_be_bytes());
        cb
    }

    #[test]
    fn bad_signature_stalls_and_needs_reset() {
        let mut t: Transport<'_, NullBackend, 512> = Transport::new(None, 4096);
        let mut bytes = cbw_bytes(1, 0, [0u8; 16], 6);
        bytes[0] ^= 0xFF;
        let emit = t.step(Event::CbwReceived(&bytes));
        assert_eq!(emit, Emit::StallBoth);
        assert_eq!(t.state, TransportState::NeedReset);

        let emit = t.step(Event::ClassReset);
        assert_eq!(emit, Emit::ClearStallsAndArmCbw);
        assert_eq!(t.state, TransportState::Cmd);
    }

    #[test]
    fn test_unit_ready_with_no_medium_reports_failed_csw() {
        let mut t: Transport<'_, NullBackend, 512> = Transport::new(None, 4096);
        let mut cb = [0u8; 16];
        cb[0] = super::super::scsi::OP_TEST_UNIT_READY;
        let bytes = cbw_bytes(42, 0, cb, 6);
        let emit = t.step(Event::CbwReceived(&bytes));
        assert_eq!(emit, Emit::SubmitInCsw);
        let csw = t.pending_csw().unwrap();
        assert_eq!(csw.tag, 42);
        assert_eq!(csw.status, CswStatus::Failed);
    }

    #[test]
    fn read_capacity_10_completes_in_one_data_phase_then_csw() {
        let data = [0u8; 512 * 8];
        let mut t: Transport<'_, NullBackend, 512> =
            Transport::new(Some(Storage::ByteImage(&data)), 65536);
        let mut cb = [0u8; 16];
        cb[0] = super::super::scsi::OP_READ_CAPACITY_10;
        let bytes = cbw_bytes(7, 8, cb, 10);

        let emit = t.step(Event::CbwReceived(&bytes));
        assert_eq!(emit, Emit::SubmitIn { len: 8 });
        assert_eq!(t.state, TransportState::Data);

        let emit = t.step(Event::InComplete);
        assert_eq!(emit, Emit::SubmitInCsw);
        assert_eq!(t.pending_csw().unwrap().status, CswStatus::Passed);
        assert_eq!(t.pending_csw().unwrap().data_residue, 0);

        let emit = t.step(Event::InComplete);
        assert_eq!(emit, Emit::SubmitOutCbw);
        assert_eq!(t.state, TransportState::Cmd);
    }

    #[test]
    fn read_10_streams_multiple_chunks_before_csw() {
        let data = [0xCDu8; 512 * 4];
        // BUF_CAP and budget both force a 2-block chunk size.
        let mut t: Transport<'_, NullBackend, 1024> =
            Transport::new(Some(Storage::ByteImage(&data)), 10_240);
        let bytes = cbw_bytes(9, 2048, read10_cb(0, 4), 10);

        let emit = t.step(Event::CbwReceived(&bytes));
        assert_eq!(emit, Emit::SubmitIn { len: 1024 });
        assert_eq!(t.data(), &data[0..1024]);

        let emit = t.step(Event::InComplete);
        assert_eq!(emit, Emit::SubmitIn { len: 1024 });
        assert_eq!(t.data(), &data[1024..2048]);

        let emit = t.step(Event::InComplete);
        assert_eq!(emit, Emit::SubmitInCsw);
        assert_eq!(t.pending_csw().unwrap().status, CswStatus::Passed);
        assert_eq!(t.pending_csw().unwrap().data_residue, 0);
    }

    #[test]
    fn cbw_while_mid_transaction_is_a_phase_error() {
        let data = [0u8; 512 * 8];
        let mut t: Transport<'_, NullBackend, 512> =
            Transport::new(Some(Storage::ByteImage(&data)), 65536);
        let mut cb = [0u8; 16];
        cb[0] = super::super::scsi::OP_READ_CAPACITY_10;
        let bytes = cbw_bytes(1, 8, cb, 10);
        let _ = t.step(Event::CbwReceived(&bytes));
        assert_eq!(t.state, TransportState::Data);

        // Shape-valid CBW arriving mid-transaction: a phase error, queued
        // as a CSW, not a stall -- only shape-invalid CBWs (bad signature
        // or length) stall and force Reset Recovery.
        let emit = t.step(Event::CbwReceived(&bytes));
        assert_eq!(emit, Emit::SubmitInCsw);
        assert_eq!(t.state, TransportState::StatusSent);
        assert_eq!(t.pending_csw().unwrap().status, CswStatus::PhaseError);
        assert_eq!(t.pending_csw().unwrap().tag, 1);
    }

    #[test]
    fn get_max_lun_arms_cbw_only_on_first_request() {
        let mut t: Transport<'_, NullBackend, 512> = Transport::new(None, 4096);
        let emit = t.step(Event::GetMaxLun);
        assert_eq!(emit, Emit::MaxLunResponseAndArmCbw(0));

        let emit = t.step(Event::GetMaxLun);
        assert_eq!(emit, Emit::MaxLunResponse(0));
    }
}
