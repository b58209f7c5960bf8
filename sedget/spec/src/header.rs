//! Firmware image header.
//!
//! The header occupies the first [`FW_HEADER_LEN`] bytes of every decrypted
//! firmware image. All multi-byte fields are little-endian.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use thiserror::Error;

/// Words of BSS bitmap storage in the header.
pub const BSS_BITMAP_WORDS: usize = 16;

/// Maximum number of BSS pages the bitmap can describe.
pub const BSS_BITMAP_CAPACITY: usize = BSS_BITMAP_WORDS * 32;

/// Size of the header on the wire.
pub const FW_HEADER_LEN: usize = core::mem::size_of::<RawFwHeader>();

/// Header exactly as it sits in memory.
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct RawFwHeader {
    rasc_jmp: u32,
    protocol_minor: u8,
    protocol_major: u8,
    reserved: [u8; 2],
    info_string: [u8; 56],
    part_number: [u8; 8],
    svn_revision: [u8; 8],
    version_string: [u8; 16],
    text_length: u32,
    bss_start_address: u32,
    bss_bitmap_size: u32,
    bss_bitmap: [u32; BSS_BITMAP_WORDS],
    master_rw_start_address: u32,
    master_rw_size: u32,
}

/// Errors raised while reading a header.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    /// Fewer bytes than a header.
    #[error("image of {0} bytes cannot hold a {FW_HEADER_LEN}-byte header")]
    Truncated(usize),
    /// Bitmap size exceeds the bitmap storage.
    #[error("bss bitmap size {0} exceeds capacity {BSS_BITMAP_CAPACITY}")]
    BitmapOverflow(u32),
}

/// Decoded firmware header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareHeader {
    /// Jump instruction to the real entry point.
    pub rasc_jmp: u32,
    /// Host interface protocol major version.
    pub protocol_major: u8,
    /// Host interface protocol minor version.
    pub protocol_minor: u8,
    /// Human readable codec information.
    #[serde(with = "BigArray")]
    pub info_string: [u8; 56],
    /// Part number.
    pub part_number: [u8; 8],
    /// Source revision.
    pub svn_revision: [u8; 8],
    /// Firmware version string.
    pub version_string: [u8; 16],
    /// Length in bytes of the read-only text region.
    pub text_length: u32,
    /// Page-aligned virtual start of BSS.
    pub bss_start_address: u32,
    /// Number of valid bits in `bss_bitmap`.
    pub bss_bitmap_size: u32,
    /// One bit per BSS page; set means the page is backed.
    pub bss_bitmap: [u32; BSS_BITMAP_WORDS],
    /// Start of the region shared by all cores.
    pub master_rw_start_address: u32,
    /// Size of the region shared by all cores.
    pub master_rw_size: u32,
}

impl Default for FirmwareHeader {
    fn default() -> Self {
        Self {
            rasc_jmp: 0,
            protocol_major: 0,
            protocol_minor: 0,
            info_string: [0; 56],
            part_number: [0; 8],
            svn_revision: [0; 8],
            version_string: [0; 16],
            text_length: 0,
            bss_start_address: 0,
            bss_bitmap_size: 0,
            bss_bitmap: [0; BSS_BITMAP_WORDS],
            master_rw_start_address: 0,
            master_rw_size: 0,
        }
    }
}

impl FirmwareHeader {
    /// Read the header at the start of `image`.
    ///
    /// The bitmap size is checked against storage capacity before anything
    /// else looks at the bitmap.
    pub fn parse(image: &[u8]) -> Result<Self, HeaderError> {
        let bytes = image
            .get(..FW_HEADER_LEN)
            .ok_or(HeaderError::Truncated(image.len()))?;
        let raw: RawFwHeader = bytemuck::pod_read_unaligned(bytes);

        let bss_bitmap_size = u32::from_le(raw.bss_bitmap_size);
        if bss_bitmap_size as usize > BSS_BITMAP_CAPACITY {
            return Err(HeaderError::BitmapOverflow(bss_bitmap_size));
        }

        Ok(Self {
            rasc_jmp: u32::from_le(raw.rasc_jmp),
            protocol_major: raw.protocol_major,
            protocol_minor: raw.protocol_minor,
            info_string: raw.info_string,
            part_number: raw.part_number,
            svn_revision: raw.svn_revision,
            version_string: raw.version_string,
            text_length: u32::from_le(raw.text_length),
            bss_start_address: u32::from_le(raw.bss_start_address),
            bss_bitmap_size,
            bss_bitmap: raw.bss_bitmap.map(u32::from_le),
            master_rw_start_address: u32::from_le(raw.master_rw_start_address),
            master_rw_size: u32::from_le(raw.master_rw_size),
        })
    }

    /// Encode to the on-wire layout.
    pub fn to_bytes(&self) -> [u8; FW_HEADER_LEN] {
        let raw = RawFwHeader {
            rasc_jmp: self.rasc_jmp.to_le(),
            protocol_minor: self.protocol_minor,
            protocol_major: self.protocol_major,
            reserved: [0; 2],
            info_string: self.info_string,
            part_number: self.part_number,
            svn_revision: self.svn_revision,
            version_string: self.version_string,
            text_length: self.text_length.to_le(),
            bss_start_address: self.bss_start_address.to_le(),
            bss_bitmap_size: self.bss_bitmap_size.to_le(),
            bss_bitmap: self.bss_bitmap.map(u32::to_le),
            master_rw_start_address: self.master_rw_start_address.to_le(),
            master_rw_size: self.master_rw_size.to_le(),
        };
        let mut out = [0u8; FW_HEADER_LEN];
        out.copy_from_slice(bytemuck::bytes_of(&raw));
        out
    }

    /// Whether BSS page `index` is marked as backed. Callers must keep
    /// `index` below `bss_bitmap_size`.
    pub fn bss_page_backed(&self, index: usize) -> bool {
        let word = index >> 5;
        let bit = index & 0x1f;
        self.bss_bitmap
            .get(word)
            .map_or(false, |w| w & (1 << bit) != 0)
    }

    /// Mark BSS page `index` as backed and grow the bitmap size to cover it.
    pub fn set_bss_page(&mut self, index: usize) {
        assert!(index < BSS_BITMAP_CAPACITY, "bss page index out of range");
        self.bss_bitmap[index >> 5] |= 1 << (index & 0x1f);
        let needed = index as u32 + 1;
        if self.bss_bitmap_size < needed {
            self.bss_bitmap_size = needed;
        }
    }

    /// Whether virtual address `addr` falls inside the shared read-write range.
    pub fn in_master_rw(&self, addr: u32) -> bool {
        let start = u64::from(self.master_rw_start_address);
        let end = start + u64::from(self.master_rw_size);
        (start..end).contains(&u64::from(addr))
    }

    /// `info_string` up to its first NUL, lossily decoded.
    pub fn info(&self) -> String {
        c_string(&self.info_string)
    }

    /// `version_string` up to its first NUL, lossily decoded.
    pub fn version(&self) -> String {
        c_string(&self.version_string)
    }
}

fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
