//! Block-device abstraction. The SCSI dispatcher is generic over whichever
//! shape the backing store has; the choice is a tagged variant fixed at
//! construction, not a runtime capability probe (spec.md §9: "optional
//! parts / dynamic attribute probing -> tagged variant over {ByteImage,
//! BlockBackend} decided at construction").

use super::error::McsError;

/// Block size assumed for a byte-addressable image. Not configurable: the
/// image's own length, divided by this, is its capacity.
pub const DEFAULT_BLOCK_SIZE: u32 = 512;

/// A block-oriented backing store: anything that can answer "how many
/// blocks, how big" and read a run of them. Writes are out of scope
/// (spec.md §1 Non-goals: reads only).
pub trait BlockBackend {
    fn block_count(&self) -> u32;
    fn block_size(&self) -> u32;
    /// Reads `buf.len() / block_size()` blocks starting at `lba` into
    /// `buf`. `buf.len()` is always a multiple of `block_size()`.
    fn read_blocks(&mut self, lba: u32, buf: &mut [u8]) -> Result<(), ()>;
    /// Called on Mass-Storage Reset recovery. Most backends have nothing
    /// to do here; the default is a no-op.
    fn reset(&mut self) {}
}

/// Either shape of backing store the dispatcher recognizes.
pub enum Storage<'a, B: BlockBackend> {
    /// A flat byte-addressable image (e.g. a RAM disk or a slice over
    /// flash), treated as `DEFAULT_BLOCK_SIZE`-byte blocks.
    ByteImage(&'a [u8]),
    Block(B),
}

impl<'a, B: BlockBackend> Storage<'a, B> {
    pub fn block_size(&self) -> u32 {
        match self {
            Storage::ByteImage(_) => DEFAULT_BLOCK_SIZE,
            Storage::Block(b) => b.block_size(),
        }
    }

    pub fn block_count(&self) -> u32 {
        match self {
            Storage::ByteImage(data) => data.len() as u32 / DEFAULT_BLOCK_SIZE,
            Storage::Block(b) => b.block_count(),
        }
    }

    pub fn read_blocks(&mut self, lba: u32, buf: &mut [u8]) -> Result<(), McsError> {
        match self {
            Storage::ByteImage(data) => {
                let bs = DEFAULT_BLOCK_SIZE as usize;
                let start = lba as usize * bs;
                let end = start.checked_add(buf.len()).ok_or(McsError::storage_failed())?;
                if end > data.len() {
                    return Err(McsError::storage_failed());
                }
                buf.copy_from_slice(&data[start..end]);
                Ok(())
            }
            Storage::Block(b) => b.read_blocks(lba, buf).map_err(|_| McsError::storage_failed()),
        }
    }

    pub fn reset(&mut self) {
        if let Storage::Block(b) = self {
            b.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeBlockBackend {
        blocks: heapless::Vec<u8, 4096>,
        bs: u32,
        reset_calls: u32,
    }

    impl BlockBackend for FakeBlockBackend {
        fn block_count(&self) -> u32 {
            self.blocks.len() as u32 / self.bs
        }
        fn block_size(&self) -> u32 {
            self.bs
        }
        fn read_blocks(&mut self, lba: u32, buf: &mut [u8]) -> Result<(), ()> {
            let start = (lba * self.bs) as usize;
            let end = start + buf.len();
            if end > self.blocks.len() {
                return Err(());
            }
            buf.copy_from_slice(&self.blocks[start..end]);
            Ok(())
        }
        fn reset(&mut self) {
            self.reset_calls += 1;
        }
    }

    #[test]
    fn byte_image_capacity_is_len_over_block_size() {
        let data = [0u8; 1024];
        let s: Storage<'_, FakeBlockBackend> = Storage::ByteImage(&data);
        assert_eq!(s.block_count(), 2);
        assert_eq!(s.block_size(), DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn byte_image_read_out_of_range_fails() {
        let data = [0u8; 512];
        let mut s: Storage<'_, FakeBlockBackend> = Storage::ByteImage(&data);
        let mut buf = [0u8; 512];
        assert!(s.read_blocks(1, &mut buf).is_err());
    }

    #[test]
    fn block_backend_chosen_over_byte_image_when_constructed_as_block() {
        let mut blocks = heapless::Vec::new();
        let _ = blocks.resize(2048, 0xAA);
        let backend = FakeBlockBackend {
            blocks,
            bs: 512,
            reset_calls: 0,
        };
        let s: Storage<'_, FakeBlockBackend> = Storage::Block(backend);
        assert_eq!(s.block_count(), 4);
    }

    #[test]
    fn reset_forwards_only_to_block_backend() {
        let backend = FakeBlockBackend {
            blocks: heapless::Vec::new(),
            bs: 512,
            reset_calls: 0,
        };
        let mut s: Storage<'_, FakeBlockBackend> = Storage::Block(backend);
        s.reset();
        if let Storage::Block(b) = &s {
            assert_eq!(b.reset_calls, 1);
        }
    }
}
