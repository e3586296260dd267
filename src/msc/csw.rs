//! Command Status Wrapper (BBB §5.4): the 13-byte reply that ends every
//! transaction on the bulk-IN endpoint.

pub const CSW_SIGNATURE: u32 = 0x5342_5355;
pub const CSW_LEN: usize = 13;

#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum CswStatus {
    Passed = 0,
    Failed = 1,
    PhaseError = 2,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub struct Csw {
    pub tag: u32,
    pub data_residue: u32,
    pub status: CswStatus,
}

impl Csw {
    pub fn to_bytes(&self) -> [u8; CSW_LEN] {
        let mut out = [0u8; CSW_LEN];
        out[0..4].copy_from_slice(&CSW_SIGNATURE.to_le_bytes());
        out[4..8].copy_from_slice(&self.tag.to_le_bytes());
        out[8..12].copy_from_slice(&self.data_residue.to_le_bytes());
        out[12] = self.status as u8;
        out
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != CSW_LEN {
            return None;
        }
        let signature = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if signature != CSW_SIGNATURE {
            return None;
        }
        let tag = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let data_residue = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let status = match bytes[12] {
            0 => CswStatus::Passed,
            1 => CswStatus::Failed,
            2 => CswStatus::PhaseError,
            _ => return None,
        };
        Some(Self {
            tag,
            data_residue,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let csw = Csw {
            tag: 0xDEAD_BEEF,
            data_residue: 12,
            status: CswStatus::Failed,
        };
        let bytes = csw.to_bytes();
        assert_eq!(bytes.len(), CSW_LEN);
        assert_eq!(Csw::parse(&bytes), Some(csw));
    }

    #[test]
    fn rejects_bad_signature() {
        let mut bytes = Csw {
            tag: 1,
            data_residue: 0,
            status: CswStatus::Passed,
        }
        .to_bytes();
        bytes[0] ^= 0xFF;
        assert_eq!(Csw::parse(&bytes), None);
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(Csw::parse(&[0u8; 12]), None);
    }
}
