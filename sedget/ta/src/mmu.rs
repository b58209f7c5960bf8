//! Second-level page tables for the video accelerator.
//!
//! Physical layout, starting at the firmware's physical base:
//!
//! ```text
//! | image pages | shared pool | private pool (core 0, core 1, ...) | ... | tables |
//! ```
//!
//! Every core's table maps the same text pages and the same shared pool;
//! private BSS pages are handed out from one pool in core order. Table
//! slot `n` maps virtual page `n`: slot 0 stays blank, text follows, then
//! one slot per BSS bitmap position. Positions inside the shared range are
//! always mapped; outside it, slots for clear bitmap bits stay zero.

use sedget_spec::mmu::{
    make_entry, pages_for, Access, Attribute, ENTRIES_PER_TABLE, ENTRY_SIZE, PAGE_SHIFT, PAGE_SIZE,
};
use sedget_spec::{FirmwareHeader, FirmwareVersion, HeaderError, SecureDescriptor};
use thiserror::Error;
use tracing::debug;

use crate::platform::{addr_of, PhysResolver};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error("at least one core is required")]
    NoCores,
    #[error("bss start {0:#x} is not page aligned")]
    MisalignedBss(u32),
    #[error("text length {text_length} exceeds the {image_len}-byte image")]
    TextOverrun { text_length: u32, image_len: usize },
    #[error("{entries} entries per core exceed the {ENTRIES_PER_TABLE}-entry table")]
    TableOverflow { entries: usize },
    #[error("bss page {index} lies outside the 32-bit address space")]
    AddressOverflow { index: usize },
    #[error("table region of {got} bytes cannot hold {needed}")]
    TableRegionTooSmall { needed: usize, got: usize },
    #[error("table region is not physically addressable")]
    UnresolvedTables,
    #[error("{what} at {addr:#x} is not page aligned")]
    Misaligned { what: &'static str, addr: u32 },
    #[error("backing pages need {needed} bytes, only {available} lie below the tables")]
    PoolOverflow { needed: u64, available: u64 },
}

/// What a BSS bitmap position maps to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BssSlot {
    /// Clear bit outside the shared range: nothing is mapped.
    Unbacked,
    /// Inside the shared range, set bit or not: one page shared by every core.
    Shared,
    /// Set bit outside the shared range: one page per core.
    Private,
}

/// Page counts derived from a firmware header. They depend only on the
/// image, never on the core count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirmwareLayout {
    pub header: FirmwareHeader,
    /// Pages spanned by the whole image.
    pub num_pages: usize,
    pub num_text_pages: usize,
    pub num_shared_pages: usize,
    /// Private pages each core needs.
    pub num_bss_pages: usize,
    slots: Vec<BssSlot>,
}

/// Physical placement of the pools for one build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhysicalLayout {
    pub image_base: u32,
    pub shared_base: u32,
    pub private_base: u32,
}

impl FirmwareLayout {
    /// Parse and check the header at the start of `image`, then classify
    /// every bitmap position in one pass.
    pub fn scan(image: &[u8]) -> Result<Self, LayoutError> {
        let header = FirmwareHeader::parse(image)?;

        if header.bss_start_address as usize % PAGE_SIZE != 0 {
            return Err(LayoutError::MisalignedBss(header.bss_start_address));
        }
        if header.text_length as usize > image.len() {
            return Err(LayoutError::TextOverrun {
                text_length: header.text_length,
                image_len: image.len(),
            });
        }

        let num_pages = pages_for(image.len());
        let num_text_pages = pages_for(header.text_length as usize);
        let bitmap_size = header.bss_bitmap_size as usize;
        let entries = 1 + num_text_pages + bitmap_size;
        if entries > ENTRIES_PER_TABLE {
            return Err(LayoutError::TableOverflow { entries });
        }

        let first_page = u64::from(header.bss_start_address >> PAGE_SHIFT);
        let mut slots = Vec::with_capacity(bitmap_size);
        for index in 0..bitmap_size {
            let backed = header.bss_page_backed(index);
            let slot = match u32::try_from((first_page + index as u64) << PAGE_SHIFT) {
                Ok(vaddr) if header.in_master_rw(vaddr) => BssSlot::Shared,
                Ok(_) if backed => BssSlot::Private,
                Ok(_) => BssSlot::Unbacked,
                Err(_) if backed => return Err(LayoutError::AddressOverflow { index }),
                Err(_) => BssSlot::Unbacked,
            };
            slots.push(slot);
        }

        let num_shared_pages = slots.iter().filter(|s| **s == BssSlot::Shared).count();
        let num_bss_pages = slots.iter().filter(|s| **s == BssSlot::Private).count();
        debug!(
            num_pages,
            num_text_pages, num_shared_pages, num_bss_pages, "firmware layout"
        );

        Ok(Self {
            header,
            num_pages,
            num_text_pages,
            num_shared_pages,
            num_bss_pages,
            slots,
        })
    }

    pub fn slots(&self) -> &[BssSlot] {
        &self.slots
    }

    pub fn version(&self) -> FirmwareVersion {
        FirmwareVersion {
            major: self.header.protocol_major,
            minor: self.header.protocol_minor,
        }
    }

    /// Bytes of physical memory the image and its pools occupy for
    /// `ncores` cores.
    pub fn backing_bytes(&self, ncores: usize) -> u64 {
        let pages = self.num_pages as u64
            + self.num_shared_pages as u64
            + self.num_bss_pages as u64 * ncores as u64;
        pages << PAGE_SHIFT
    }

    /// Pool bases for an image placed at `image_phys`. Callers check
    /// [`FirmwareLayout::backing_bytes`] against the window first.
    fn physical(&self, image_phys: u32) -> PhysicalLayout {
        let shared_base = image_phys + ((self.num_pages as u32) << PAGE_SHIFT);
        let private_base = shared_base + ((self.num_shared_pages as u32) << PAGE_SHIFT);
        PhysicalLayout {
            image_base: image_phys,
            shared_base,
            private_base,
        }
    }

    /// Write one table per core into the front of `tables`.
    ///
    /// Everything is validated before the first byte is written. The pools
    /// must fit between `image_phys` and the physical address of `tables`.
    pub fn write_tables<R: PhysResolver + ?Sized>(
        &self,
        resolver: &R,
        image_phys: u32,
        ncores: u32,
        tables: &mut [u8],
    ) -> Result<SecureDescriptor, LayoutError> {
        if ncores == 0 {
            return Err(LayoutError::NoCores);
        }
        let ncores = ncores as usize;
        let needed = ncores
            .checked_mul(PAGE_SIZE)
            .filter(|n| *n <= tables.len())
            .ok_or(LayoutError::TableRegionTooSmall {
                needed: ncores.saturating_mul(PAGE_SIZE),
                got: tables.len(),
            })?;
        if image_phys as usize % PAGE_SIZE != 0 {
            return Err(LayoutError::Misaligned {
                what: "firmware image",
                addr: image_phys,
            });
        }

        let tables = &mut tables[..needed];
        let tables_phys = resolver
            .virt_to_phys(addr_of(tables), needed)
            .ok_or(LayoutError::UnresolvedTables)?;
        if tables_phys as usize % PAGE_SIZE != 0 {
            return Err(LayoutError::Misaligned {
                what: "table region",
                addr: tables_phys,
            });
        }

        let available = u64::from(tables_phys.saturating_sub(image_phys));
        let needed_bytes = self.backing_bytes(ncores);
        if needed_bytes > available {
            return Err(LayoutError::PoolOverflow {
                needed: needed_bytes,
                available,
            });
        }

        let phys = self.physical(image_phys);
        let mut private_page = phys.private_base;
        for (core, table) in tables.chunks_exact_mut(PAGE_SIZE).enumerate() {
            table.fill(0);
            let mut entries = table.chunks_exact_mut(ENTRY_SIZE).skip(1);

            for (page, entry) in (0..self.num_text_pages as u32).zip(entries.by_ref()) {
                let paddr = phys.image_base + (page << PAGE_SHIFT);
                put(entry, make_entry(Attribute::Private, paddr, Access::Executable));
            }

            // shared pages restart for every core, private pages never do
            let mut shared_page = phys.shared_base;
            for (entry, slot) in entries.zip(&self.slots) {
                match slot {
                    BssSlot::Shared => {
                        put(entry, make_entry(Attribute::Private, shared_page, Access::ReadWrite));
                        shared_page += PAGE_SIZE as u32;
                    }
                    BssSlot::Private => {
                        put(entry, make_entry(Attribute::Private, private_page, Access::ReadWrite));
                        private_page += PAGE_SIZE as u32;
                    }
                    BssSlot::Unbacked => debug!(core, "bss position left unmapped"),
                }
            }
        }

        debug!(
            ncores,
            l2pages = format_args!("{tables_phys:#x}"),
            "page tables written"
        );
        Ok(SecureDescriptor {
            fw_version: self.version(),
            l2pages: tables_phys,
        })
    }
}

fn put(entry: &mut [u8], raw: u32) {
    entry.copy_from_slice(&raw.to_le_bytes());
}

/// Build per-core tables for the decrypted `image` placed at `image_phys`.
pub fn build<R: PhysResolver + ?Sized>(
    resolver: &R,
    image: &[u8],
    image_phys: u32,
    ncores: u32,
    tables: &mut [u8],
) -> Result<SecureDescriptor, LayoutError> {
    FirmwareLayout::scan(image)?.write_tables(resolver, image_phys, ncores, tables)
}

/// Read entry `index` of a table.
pub fn table_entry(table: &[u8], index: usize) -> Option<u32> {
    let bytes = table.get(index * ENTRY_SIZE..(index + 1) * ENTRY_SIZE)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}
