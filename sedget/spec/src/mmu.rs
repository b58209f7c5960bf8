//! Second-level MMU format of the video accelerator.
//!
//! The accelerator uses 4 KiB pages and a 32-bit virtual address space. A
//! second-level table is one page of 4-byte entries.

/// log2 of the page size.
pub const PAGE_SHIFT: u32 = 12;

/// Page size in bytes.
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Size of one table entry in bytes.
pub const ENTRY_SIZE: usize = 4;

/// Entries in one table page.
pub const ENTRIES_PER_TABLE: usize = PAGE_SIZE / ENTRY_SIZE;

const PADDR_MASK: u32 = 0x3FFF_FFFC;
const PADDR_SHIFT: u32 = 2;
const ATTRIBUTE_MASK: u32 = 0xC000_0000;
const ATTRIBUTE_SHIFT: u32 = 30;
const ACCESS_MASK: u32 = 0x3;
const ACCESS_SHIFT: u32 = 0;

/// Memory attribute tag carried by each entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Attribute {
    /// Private to the session.
    Private = 0,
    /// Reference frame memory.
    RefFrame = 1,
    /// Shared read-only.
    SharedRo = 2,
    /// Shared read-write.
    SharedRw = 3,
}

/// Access permission carried by each entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Access {
    /// Not accessible; an all-zero entry decodes to this.
    No = 0,
    /// Read only.
    ReadOnly = 1,
    /// Executable (text).
    Executable = 2,
    /// Read and write.
    ReadWrite = 3,
}

impl Attribute {
    fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => Self::Private,
            1 => Self::RefFrame,
            2 => Self::SharedRo,
            _ => Self::SharedRw,
        }
    }
}

impl Access {
    fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => Self::No,
            1 => Self::ReadOnly,
            2 => Self::Executable,
            _ => Self::ReadWrite,
        }
    }
}

/// Encode one table entry for the page at physical address `paddr`.
pub const fn make_entry(attribute: Attribute, paddr: u32, access: Access) -> u32 {
    (((attribute as u32) << ATTRIBUTE_SHIFT) & ATTRIBUTE_MASK)
        | ((paddr >> (PAGE_SHIFT - PADDR_SHIFT)) & PADDR_MASK)
        | (((access as u32) << ACCESS_SHIFT) & ACCESS_MASK)
}

/// Fields of a decoded entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Entry {
    /// Attribute tag.
    pub attribute: Attribute,
    /// Page-aligned physical address.
    pub paddr: u32,
    /// Access permission.
    pub access: Access,
}

impl Entry {
    /// Decode a raw entry. Zero decodes to an inaccessible page at 0.
    pub fn decode(raw: u32) -> Self {
        Self {
            attribute: Attribute::from_bits((raw & ATTRIBUTE_MASK) >> ATTRIBUTE_SHIFT),
            paddr: (raw & PADDR_MASK) << (PAGE_SHIFT - PADDR_SHIFT),
            access: Access::from_bits((raw & ACCESS_MASK) >> ACCESS_SHIFT),
        }
    }

    /// True if the entry maps a page.
    pub fn is_mapped(&self) -> bool {
        self.access != Access::No
    }
}

/// Number of pages needed to hold `bytes`, rounded up.
pub const fn pages_for(bytes: usize) -> usize {
    (bytes + PAGE_SIZE - 1) >> PAGE_SHIFT
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn executable_private_entry() {
        let raw = make_entry(Attribute::Private, 0x8000_1000, Access::Executable);
        assert_eq!(raw, (0x8000_1000 >> 10) | 2);
    }

    #[test]
    fn shared_attribute_lands_in_top_bits() {
        let raw = make_entry(Attribute::SharedRw, 0, Access::No);
        assert_eq!(raw, 0xC000_0000);
    }

    #[test]
    fn zero_entry_is_unmapped() {
        assert!(!Entry::decode(0).is_mapped());
    }

    #[test]
    fn page_rounding() {
        assert_eq!(pages_for(0), 0);
        assert_eq!(pages_for(1), 1);
        assert_eq!(pages_for(PAGE_SIZE), 1);
        assert_eq!(pages_for(PAGE_SIZE + 1), 2);
    }

    proptest! {
        #[test]
        fn decode_recovers_page_address(page in 0u32..0x000F_FFFF) {
            let paddr = page << PAGE_SHIFT;
            let entry = Entry::decode(make_entry(Attribute::Private, paddr, Access::ReadWrite));
            prop_assert_eq!(entry.paddr, paddr);
            prop_assert_eq!(entry.access, Access::ReadWrite);
            prop_assert_eq!(entry.attribute, Attribute::Private);
        }
    }
}
