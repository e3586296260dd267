//! SCSI command dispatch. `Dispatcher` maps the opcode byte of a command
//! block to a handler; each handler either writes a fixed-size response
//! into the caller's buffer or streams a `ReadContinuation` for multi-chunk
//! reads (READ_10 against a backing store larger than one USB-transfer
//! worth of buffer).

use super::block::{Storage, DEFAULT_BLOCK_SIZE};
use super::csw::CswStatus;
use super::error::McsError;
use crate::msc::block::BlockBackend;

pub const OP_TEST_UNIT_READY: u8 = 0x00;
pub const OP_REQUEST_SENSE: u8 = 0x03;
pub const OP_INQUIRY: u8 = 0x12;
pub const OP_MODE_SENSE_6: u8 = 0x1A;
pub const OP_MODE_SENSE_10: u8 = 0x5A;
pub const OP_READ_FORMAT_CAPACITY: u8 = 0x23;
pub const OP_READ_CAPACITY_10: u8 = 0x25;
pub const OP_READ_10: u8 = 0x28;
// Recognized by opcode but never implemented: this device is read-only and
// has no ejectable medium to start/stop or lock.
pub const OP_WRITE_10: u8 = 0x2A;
pub const OP_START_STOP_UNIT: u8 = 0x1B;
pub const OP_PREVENT_ALLOW_MEDIUM_REMOVAL: u8 = 0x1E;
pub const OP_MODE_SELECT_6: u8 = 0x15;

/// Tracks the device's one byte of SCSI sense state. A non-`REQUEST_SENSE`
/// command always resets this to `NoSense` before it runs; `REQUEST_SENSE`
/// itself is the one opcode exempt from that reset, since its entire job is
/// to report whatever the previous command left behind.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum SenseState {
    NoSense,
    MediumNotPresent,
    InvalidCommand,
}

impl SenseState {
    /// (sense key, additional sense code, additional sense code qualifier).
    fn kcq(self) -> (u8, u8, u8) {
        match self {
            SenseState::NoSense => (0x00, 0x00, 0x00),
            SenseState::MediumNotPresent => (0x02, 0x3A, 0x00),
            SenseState::InvalidCommand => (0x05, 0x20, 0x00),
        }
    }
}

/// Where a chunked READ_10 picks back up on the next bulk-IN completion.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub struct ReadContinuation {
    pub next_lba: u32,
    pub remaining_blocks: u32,
}

#[derive(Debug)]
pub enum DispatchOutcome {
    /// No data phase.
    Empty,
    /// `out[..len]` holds the full response.
    Data(usize),
    /// `out[..len]` holds the first chunk; more blocks remain.
    DataWithContinuation {
        len: usize,
        continuation: ReadContinuation,
    },
}

pub struct Dispatcher {
    sense: SenseState,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            sense: SenseState::NoSense,
        }
    }

    pub fn dispatch<B: BlockBackend>(
        &mut self,
        cb: &[u8],
        storage: &mut Option<Storage<'_, B>>,
        out: &mut [u8],
        max_blocks: u32,
    ) -> Result<DispatchOutcome, McsError> {
        let opcode = cb[0];
        if opcode != OP_REQUEST_SENSE {
            self.sense = SenseState::NoSense;
        }

        match opcode {
            OP_TEST_UNIT_READY => {
                if storage.is_none() {
                    self.sense = SenseState::MediumNotPresent;
                    return Err(McsError::storage_failed());
                }
                Ok(DispatchOutcome::Empty)
            }
            OP_REQUEST_SENSE => {
                let (key, asc, ascq) = self.sense.kcq();
                let mut buf = [0u8; 18];
                buf[0] = 0x70;
                buf[2] = key;
                buf[7] = 18 - 8;
                buf[12] = asc;
                buf[13] = ascq;
                out[..18].copy_from_slice(&buf);
                Ok(DispatchOutcome::Data(18))
            }
            OP_INQUIRY => self.inquiry(cb, out),
            OP_MODE_SENSE_6 => {
                // Mode data length (bytes following this one): 3.
                let buf = [3u8, 0, 0x80, 0];
                out[..4].copy_from_slice(&buf);
                Ok(DispatchOutcome::Data(4))
            }
            OP_MODE_SENSE_10 => {
                // Mode data length is a big-endian u16 (bytes following it): 6.
                let buf = [0u8, 6, 0, 0x80, 0, 0, 0, 0];
                out[..8].copy_from_slice(&buf);
                Ok(DispatchOutcome::Data(8))
            }
            OP_READ_FORMAT_CAPACITY => self.read_format_capacity(storage, out),
            OP_READ_CAPACITY_10 => self.read_capacity_10(storage, out),
            OP_READ_10 => {
                let lba = u32::from_be_bytes(cb[2..6].try_into().unwrap());
                let len_blocks = u16::from_be_bytes(cb[7..9].try_into().unwrap()) as u32;
                let s = storage.as_mut().ok_or_else(|| {
                    self.sense = SenseState::MediumNotPresent;
                    McsError::storage_failed()
                })?;
                self.read10(s, lba, len_blocks, out, max_blocks)
            }
            OP_WRITE_10 | OP_START_STOP_UNIT | OP_PREVENT_ALLOW_MEDIUM_REMOVAL | OP_MODE_SELECT_6 => {
                self.sense = SenseState::InvalidCommand;
                Err(McsError::storage_failed())
            }
            _ => {
                self.sense = SenseState::InvalidCommand;
                Err(McsError::storage_failed())
            }
        }
    }

    /// Resumes a chunked READ_10 after the previous chunk's IN xfer
    /// completed. Does not touch sense state (only a fresh CBW dispatch
    /// does that).
    pub fn continue_read<B: BlockBackend>(
        &mut self,
        storage: &mut Option<Storage<'_, B>>,
        cont: ReadContinuation,
        out: &mut [u8],
        max_blocks: u32,
    ) -> Result<DispatchOutcome, McsError> {
        let s = storage.as_mut().ok_or_else(McsError::storage_failed)?;
        self.read10(s, cont.next_lba, cont.remaining_blocks, out, max_blocks)
    }

    fn inquiry(&mut self, cb: &[u8], out: &mut [u8]) -> Result<DispatchOutcome, McsError> {
        let evpd = cb[1] & 0x01;
        if evpd == 0 {
            let mut buf = [0u8; 36];
            buf[0] = 0x00; // direct-access block device
            buf[1] = 0x80; // removable
            buf[3] = 2; // response data format
            buf[4] = 31; // additional length
            buf[8..16].copy_from_slice(b"MPython ");
            buf[16..32].copy_from_slice(b"MicroPython MSC ");
            buf[32..36].copy_from_slice(b"0000");
            out[..36].copy_from_slice(&buf);
            Ok(DispatchOutcome::Data(36))
        } else if cb[2] == 0x80 {
            // Unit serial number page: header plus a 10-byte all-zero
            // serial number (no persistent identity to report).
            let mut buf = [0u8; 14];
            buf[1] = 0x80; // page code
            buf[3] = 10; // page length
            out[..14].copy_from_slice(&buf);
            Ok(DispatchOutcome::Data(14))
        } else {
            self.sense = SenseState::InvalidCommand;
            Err(McsError::storage_failed())
        }
    }

    fn read_format_capacity<B: BlockBackend>(
        &mut self,
        storage: &mut Option<Storage<'_, B>>,
        out: &mut [u8],
    ) -> Result<DispatchOutcome, McsError> {
        let mut buf = [0u8; 12];
        buf[3] = 0x08;
        match storage {
            Some(s) => {
                let count = s.block_count();
                buf[4..8].copy_from_slice(&count.to_be_bytes());
                buf[8] = 2; // formatted media
                let bs = s.block_size().to_be_bytes();
                buf[9..12].copy_from_slice(&bs[1..4]);
            }
            None => buf[8] = 3, // no media present
        }
        out[..12].copy_from_slice(&buf);
        Ok(DispatchOutcome::Data(12))
    }

    fn read_capacity_10<B: BlockBackend>(
        &mut self,
        storage: &mut Option<Storage<'_, B>>,
        out: &mut [u8],
    ) -> Result<DispatchOutcome, McsError> {
        let s = storage.as_ref().ok_or_else(|| {
            self.sense = SenseState::MediumNotPresent;
            McsError::storage_failed()
        })?;
        let max_lba = s.block_count().saturating_sub(1);
        let bs = s.block_size();
        let mut buf = [0u8; 8];
        buf[0..4].copy_from_slice(&max_lba.to_be_bytes());
        buf[4..8].copy_from_slice(&bs.to_be_bytes());
        out[..8].copy_from_slice(&buf);
        Ok(DispatchOutcome::Data(8))
    }

    fn read10<B: BlockBackend>(
        &mut self,
        s: &mut Storage<'_, B>,
        lba: u32,
        len_blocks: u32,
        out: &mut [u8],
        max_blocks: u32,
    ) -> Result<DispatchOutcome, McsError> {
        if len_blocks == 0 {
            return Ok(DispatchOutcome::Empty);
        }
        let bs = s.block_size().max(DEFAULT_BLOCK_SIZE);
        let by_out_buf = (out.len() as u32 / bs).max(1);
        let chunk_blocks = len_blocks.min(max_blocks).min(by_out_buf);
        let bytes = (chunk_blocks * bs) as usize;
        s.read_blocks(lba, &mut out[..bytes])?;
        let consumed = chunk_blocks;
        if consumed < len_blocks {
            Ok(DispatchOutcome::DataWithContinuation {
                len: bytes,
                continuation: ReadContinuation {
                    next_lba: lba + consumed,
                    remaining_blocks: len_blocks - consumed,
                },
            })
        } else {
            Ok(DispatchOutcome::Data(bytes))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msc::block::BlockBackend;

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

    fn cb(opcode: u8) -> [u8; 16] {
        let mut b = [0u8; 16];
        b[0] = opcode;
        b
    }

    #[test]
    fn test_unit_ready_fails_with_no_medium_and_sets_sense() {
        let mut d = Dispatcher::new();
        let mut storage: Option<Storage<'_, NullBackend>> = None;
        let mut out = [0u8; 4];
        let err = d
            .dispatch(&cb(OP_TEST_UNIT_READY), &mut storage, &mut out, 8)
            .unwrap_err();
        assert_eq!(err, McsError::storage_failed());
        assert_eq!(d.sense, SenseState::MediumNotPresent);
    }

    #[test]
    fn request_sense_reports_prior_failure_without_resetting_it() {
        let mut d = Dispatcher::new();
        let mut storage: Option<Storage<'_, NullBackend>> = None;
        let mut out = [0u8; 32];
        let _ = d.dispatch(&cb(OP_TEST_UNIT_READY), &mut storage, &mut out, 8);

        let outcome = d
            .dispatch(&cb(OP_REQUEST_SENSE), &mut storage, &mut out, 8)
            .unwrap();
        match outcome {
            DispatchOutcome::Data(18) => {
                assert_eq!(out[2], 0x02); // NOT READY key
                assert_eq!(out[12], 0x3A);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn unimplemented_opcode_sets_invalid_command_sense() {
        let mut d = Dispatcher::new();
        let mut storage: Option<Storage<'_, NullBackend>> = None;
        let mut out = [0u8; 8];
        let err = d
            .dispatch(&cb(OP_PREVENT_ALLOW_MEDIUM_REMOVAL), &mut storage, &mut out, 8)
            .unwrap_err();
        assert_eq!(err, McsError::storage_failed());
        assert_eq!(d.sense, SenseState::InvalidCommand);
    }

    #[test]
    fn inquiry_standard_reports_fixed_identification_strings() {
        let mut d = Dispatcher::new();
        let mut storage: Option<Storage<'_, NullBackend>> = None;
        let mut out = [0u8; 36];
        let outcome = d.dispatch(&cb(OP_INQUIRY), &mut storage, &mut out, 8).unwrap();
        assert!(matches!(outcome, DispatchOutcome::Data(36)));
        assert_eq!(out[0], 0x00);
        assert_eq!(out[1] & 0x80, 0x80);
        assert_eq!(out[3], 2);
        assert_eq!(&out[8..16], b"MPython ");
        assert_eq!(&out[16..32], b"MicroPython MSC ");
        assert_eq!(&out[32..36], b"0000");
    }

    #[test]
    fn inquiry_evpd_serial_number_page_is_ten_zero_bytes() {
        let mut d = Dispatcher::new();
        let mut storage: Option<Storage<'_, NullBackend>> = None;
        let mut out = [0u8; 14];
        let mut cb_bytes = cb(OP_INQUIRY);
        cb_bytes[1] = 0x01; // EVPD
        cb_bytes[2] = 0x80;
        let outcome = d.dispatch(&cb_bytes, &mut storage, &mut out, 8).unwrap();
        assert!(matches!(outcome, DispatchOutcome::Data(14)));
        assert_eq!(out[1], 0x80);
        assert_eq!(out[3], 10);
        assert_eq!(&out[4..14], &[0u8; 10]);
    }

    #[test]
    fn inquiry_other_evpd_pages_are_invalid_command() {
        let mut d = Dispatcher::new();
        let mut storage: Option<Storage<'_, NullBackend>> = None;
        let mut out = [0u8; 36];
        let mut cb_bytes = cb(OP_INQUIRY);
        cb_bytes[1] = 0x01;
        cb_bytes[2] = 0x83; // device identification page, not supported
        let err = d.dispatch(&cb_bytes, &mut storage, &mut out, 8).unwrap_err();
        assert_eq!(err, McsError::storage_failed());
        assert_eq!(d.sense, SenseState::InvalidCommand);
    }

    #[test]
    fn read_capacity_10_packs_max_lba_and_block_size_big_endian() {
        let mut d = Dispatcher::new();
        let data = [0u8; 512 * 4];
        let mut storage: Option<Storage<'_, NullBackend>> = Some(Storage::ByteImage(&data));
        let mut out = [0u8; 8];
        let outcome = d
            .dispatch(&cb(OP_READ_CAPACITY_10), &mut storage, &mut out, 8)
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Data(8)));
        assert_eq!(u32::from_be_bytes(out[0..4].try_into().unwrap()), 3);
        assert_eq!(u32::from_be_bytes(out[4..8].try_into().unwrap()), 512);
    }

    #[test]
    fn read_10_against_byte_image_returns_exact_bytes() {
        let mut d = Dispatcher::new();
        let mut data = [0u8; 1024];
        for (i, b) in data.iter_mut().enumerate() {
            *b = i as u8;
        }
        let mut storage: Option<Storage<'_, NullBackend>> = Some(Storage::ByteImage(&data));
        let mut cb_bytes = cb(OP_READ_10);
        cb_bytes[2..6].copy_from_slice(&0u32.to_be_bytes());
        cb_bytes[7..9].copy_from_slice(&2u16.to_be_bytes());
        let mut out = [0u8; 1024];
        let outcome = d.dispatch(&cb_bytes, &mut storage, &mut out, 8).unwrap();
        match outcome {
            DispatchOutcome::Data(len) => {
                assert_eq!(len, 1024);
                assert_eq!(&out[..1024], &data[..]);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn read_10_chunked_when_over_max_blocks_budget() {
        let mut d = Dispatcher::new();
        let data = [0xAB_u8; 512 * 4];
        let mut storage: Option<Storage<'_, NullBackend>> = Some(Storage::ByteImage(&data));
        let mut cb_bytes = cb(OP_READ_10);
        cb_bytes[2..6].copy_from_slice(&0u32.to_be_bytes());
        cb_bytes[7..9].copy_from_slice(&4u16.to_be_bytes());
        let mut out = [0u8; 512 * 4];
        // max_blocks = 2: first chunk covers 2 blocks, leaves a continuation.
        let outcome = d.dispatch(&cb_bytes, &mut storage, &mut out, 2).unwrap();
        match outcome {
            DispatchOutcome::DataWithContinuation { len, continuation } => {
                assert_eq!(len, 1024);
                assert_eq!(continuation.next_lba, 2);
                assert_eq!(continuation.remaining_blocks, 2);
            }
            other => panic!("expected continuation, got {:?}", other),
        }

        let cont = ReadContinuation {
            next_lba: 2,
            remaining_blocks: 2,
        };
        let outcome = d.continue_read(&mut storage, cont, &mut out, 2).unwrap();
        assert!(matches!(outcome, DispatchOutcome::Data(1024)));
    }
}
