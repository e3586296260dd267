//! Command Block Wrapper (BBB §5.1): the fixed 31-byte frame the host sends
//! on the bulk-OUT endpoint to start every transaction.

pub const CBW_SIGNATURE: u32 = 0x4342_5355;
pub const CBW_LEN: usize = 31;

#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub struct Cbw {
    pub tag: u32,
    pub data_transfer_length: u32,
    pub flags: u8,
    pub lun: u8,
    pub cb_len: u8,
    pub cb: [u8; 16],
}

impl Cbw {
    pub const DIRECTION_IN: u8 = 0x80;

    pub fn is_device_to_host(&self) -> bool {
        self.flags & Self::DIRECTION_IN != 0
    }

    pub fn command_block(&self) -> &[u8] {
        &self.cb[..self.cb_len as usize]
    }

    /// Parses a raw 31-byte CBW. Returns `None` on anything that fails
    /// shape validation (wrong length or bad signature) -- the caller
    /// stalls both endpoints and waits for Reset Recovery.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != CBW_LEN {
            return None;
        }
        let signature = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if signature != CBW_SIGNATURE {
            return None;
        }
        let tag = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let data_transfer_length = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let flags = bytes[12];
        let lun = bytes[13] & 0x0F;
        let cb_len = bytes[14] & 0x1F;
        let mut cb = [0u8; 16];
        cb.copy_from_slice(&bytes[15..31]);
        Some(Self {
            tag,
            data_transfer_length,
            flags,
            lun,
            cb_len,
            cb,
        })
    }

    /// Meaningfulness, as distinct from shape validity: CB length in
    /// 1..=16 and the LUN matches the device's single fixed LUN. A CBW
    /// that fails this still gets a CSW (status FAILED), not a stall.
    pub fn is_meaningful(&self, device_lun: u8) -> bool {
        (1..=16).contains(&self.cb_len) && self.lun == device_lun
    }

    pub fn to_bytes(&self) -> [u8; CBW_LEN] {
        let mut out = [0u8; CBW_LEN];
        out[0..4].copy_from_slice(&CBW_SIGNATURE.to_le_bytes());
        out[4..8].copy_from_slice(&self.tag.to_le_bytes());
        out[8..12].copy_from_slice(&self.data_transfer_length.to_le_bytes());
        out[12] = self.flags;
        out[13] = self.lun;
        out[14] = self.cb_len;
        out[15..31].copy_from_slice(&self.cb);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Cbw {
        let mut cb = [0u8; 16];
        cb[0] = 0x28; // READ_10
        Cbw {
            tag: 0x1234_5678,
            data_transfer_length: 512,
            flags: Cbw::DIRECTION_IN,
            lun: 0,
            cb_len: 10,
            cb,
        }
    }

    #[test]
    fn round_trips_through_bytes() {
        let cbw = sample();
        let bytes = cbw.to_bytes();
        assert_eq!(bytes.len(), CBW_LEN);
        assert_eq!(Cbw::parse(&bytes), Some(cbw));
    }

    #[test]
    fn rejects_bad_signature() {
        let mut bytes = sample().to_bytes();
        bytes[0] ^= 0xFF;
        assert_eq!(Cbw::parse(&bytes), None);
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(Cbw::parse(&[0u8; 30]), None);
    }

    #[test]
    fn meaningfulness_checks_lun_and_cb_len() {
        let cbw = sample();
        assert!(cbw.is_meaningful(0));
        assert!(!cbw.is_meaningful(1));

        let mut zero_len = cbw;
        zero_len.cb_len = 0;
        assert!(!zero_len.is_meaningful(0));
    }

    #[test]
    fn command_block_is_truncated_to_cb_len() {
        let cbw = sample();
        assert_eq!(cbw.command_block().len(), 10);
        assert_eq!(cbw.command_block()[0], 0x28);
    }
}
