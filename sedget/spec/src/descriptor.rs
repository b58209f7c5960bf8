//! Secure descriptor: the record returned to the normal world after a load.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Size of the descriptor on the wire.
pub const SECURE_DESCRIPTOR_LEN: usize = core::mem::size_of::<RawSecureDescriptor>();

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct RawSecureDescriptor {
    major: u8,
    minor: u8,
    reserved: [u8; 2],
    l2pages: u32,
}

/// Firmware host-interface protocol version.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
}

/// Output of a successful firmware load.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureDescriptor {
    /// Protocol version declared by the firmware header.
    pub fw_version: FirmwareVersion,
    /// Physical address of the first per-core page table.
    pub l2pages: u32,
}

impl SecureDescriptor {
    /// Encode to the on-wire layout.
    pub fn to_bytes(&self) -> [u8; SECURE_DESCRIPTOR_LEN] {
        let raw = RawSecureDescriptor {
            major: self.fw_version.major,
            minor: self.fw_version.minor,
            reserved: [0; 2],
            l2pages: self.l2pages.to_le(),
        };
        let mut out = [0u8; SECURE_DESCRIPTOR_LEN];
        out.copy_from_slice(bytemuck::bytes_of(&raw));
        out
    }

    /// Decode from the start of `bytes`, if long enough.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: RawSecureDescriptor =
            bytemuck::pod_read_unaligned(bytes.get(..SECURE_DESCRIPTOR_LEN)?);
        Some(Self {
            fw_version: FirmwareVersion {
                major: raw.major,
                minor: raw.minor,
            },
            l2pages: u32::from_le(raw.l2pages),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_layout() {
        let desc = SecureDescriptor {
            fw_version: FirmwareVersion { major: 3, minor: 1 },
            l2pages: 0x8040_0000,
        };
        assert_eq!(
            desc.to_bytes(),
            [3, 1, 0, 0, 0x00, 0x00, 0x40, 0x80]
        );
        assert_eq!(SecureDescriptor::from_bytes(&desc.to_bytes()), Some(desc));
    }

    #[test]
    fn short_input_does_not_decode() {
        assert_eq!(SecureDescriptor::from_bytes(&[0u8; 7]), None);
    }
}
