//! Wire contract for the secure video firmware service.
//!
//! Both sides of the trust boundary link this crate: the secure-world
//! service (`sedget-ta`) and the normal-world library (`sedget-video`).
//! Nothing in here performs I/O; it only fixes layouts, identifiers and
//! numeric codes so the two sides cannot drift apart.
#![deny(missing_docs)]

pub mod descriptor;
pub mod header;
pub mod mmu;
pub mod params;
pub mod status;

use core::fmt;

pub use descriptor::{FirmwareVersion, SecureDescriptor, SECURE_DESCRIPTOR_LEN};
pub use header::{FirmwareHeader, HeaderError, BSS_BITMAP_CAPACITY, BSS_BITMAP_WORDS, FW_HEADER_LEN};
pub use params::{ParamType, ParamTypes};
pub use status::Status;

/// Length in bytes of the digest appended to every firmware image.
pub const SIGNATURE_LEN: usize = 32;

/// Block size of the firmware cipher; ciphertexts are a whole number of blocks.
pub const CIPHER_BLOCK_LEN: usize = 16;

/// Length of the provisioned firmware key (AES-128).
pub const FIRMWARE_KEY_LEN: usize = 16;

/// Largest firmware file the host will hand to the secure service.
pub const MAX_FIRMWARE_FILE_SIZE: usize = 0x10_0000;

/// Size of the protected buffer reserved for one firmware load. This is the
/// range one second-level MMU table can address.
pub const FIRMWARE_BUFFER_SIZE: usize = 0x40_0000;

/// Handle to a protected memory region as it travels across the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemFd(pub i32);

/// Command identifiers understood by the secure video service.
pub mod command {
    /// Decrypt, authenticate and map a firmware image.
    pub const LOAD_FIRMWARE: u32 = 0;
}

/// Identity of a trusted service, laid out the way TEE clients address it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Uuid {
    /// First group.
    pub time_low: u32,
    /// Second group.
    pub time_mid: u16,
    /// Third group.
    pub time_hi_and_version: u16,
    /// Final eight bytes.
    pub clock_seq_and_node: [u8; 8],
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = &self.clock_seq_and_node;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.time_low,
            self.time_mid,
            self.time_hi_and_version,
            n[0],
            n[1],
            n[2],
            n[3],
            n[4],
            n[5],
            n[6],
            n[7]
        )
    }
}

/// UUID of the secure video service.
pub const SEDGET_VIDEO_UUID: Uuid = Uuid {
    time_low: 0x0b7a_14e0,
    time_mid: 0xb667,
    time_hi_and_version: 0x4b3d,
    clock_seq_and_node: [0x84, 0x04, 0xc3, 0xd0, 0xf8, 0xdc, 0x12, 0x44],
};
