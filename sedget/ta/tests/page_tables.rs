use std::collections::HashSet;

use proptest::prelude::*;
use sedget_spec::mmu::{Entry, PAGE_SIZE};
use sedget_spec::{FirmwareHeader, BSS_BITMAP_CAPACITY, FW_HEADER_LEN};
use sedget_ta::mmu::{build, table_entry, BssSlot, FirmwareLayout, LayoutError};
use sedget_ta::platform::PhysResolver;

const IMAGE_PHYS: u32 = 0x8000_0000;
const TABLES_PHYS: u32 = 0x8040_0000;
const BSS_START: u32 = 0x0020_0000;

struct FixedPhys(u32);

impl PhysResolver for FixedPhys {
    fn virt_to_phys(&self, _addr: usize, _len: usize) -> Option<u32> {
        Some(self.0)
    }
}

#[derive(Debug, Clone)]
struct Firmware {
    text_pages: u32,
    bits: Vec<bool>,
    shared_first: u32,
    shared_pages: u32,
}

impl Firmware {
    fn header(&self) -> FirmwareHeader {
        let mut h = FirmwareHeader {
            text_length: self.text_pages * PAGE_SIZE as u32,
            bss_start_address: BSS_START,
            bss_bitmap_size: self.bits.len() as u32,
            master_rw_start_address: BSS_START + self.shared_first * PAGE_SIZE as u32,
            master_rw_size: self.shared_pages * PAGE_SIZE as u32,
            ..FirmwareHeader::default()
        };
        for (i, set) in self.bits.iter().enumerate() {
            if *set {
                h.set_bss_page(i);
            }
        }
        h
    }

    fn image(&self) -> Vec<u8> {
        let len = (self.text_pages as usize).max(1) * PAGE_SIZE;
        let mut image = vec![0u8; len];
        image[..FW_HEADER_LEN].copy_from_slice(&self.header().to_bytes());
        image
    }
}

fn firmware() -> impl Strategy<Value = Firmware> {
    (
        1u32..4,
        prop::collection::vec(any::<bool>(), 0..64),
        0u32..64,
        0u32..32,
    )
        .prop_map(|(text_pages, bits, shared_first, shared_pages)| Firmware {
            text_pages,
            bits,
            shared_first,
            shared_pages,
        })
}

fn tables_for(fw: &Firmware, ncores: u32) -> Vec<u8> {
    let mut tables = vec![0u8; ncores as usize * PAGE_SIZE];
    build(&FixedPhys(TABLES_PHYS), &fw.image(), IMAGE_PHYS, ncores, &mut tables).unwrap();
    tables
}

fn entry(tables: &[u8], core: usize, index: usize) -> Entry {
    let table = &tables[core * PAGE_SIZE..][..PAGE_SIZE];
    Entry::decode(table_entry(table, index).unwrap())
}

proptest! {
    #[test]
    fn shared_range_and_set_bits_decide_the_counts(fw in firmware()) {
        let layout = FirmwareLayout::scan(&fw.image()).unwrap();
        let shared = fw.shared_first..fw.shared_first + fw.shared_pages;
        let in_range = (0..fw.bits.len() as u32).filter(|i| shared.contains(i)).count();
        let private = fw
            .bits
            .iter()
            .enumerate()
            .filter(|(i, set)| **set && !shared.contains(&(*i as u32)))
            .count();
        prop_assert_eq!(layout.num_shared_pages, in_range);
        prop_assert_eq!(layout.num_bss_pages, private);
        prop_assert_eq!(layout.num_text_pages, fw.text_pages as usize);
    }

    #[test]
    fn every_backing_page_is_mapped_exactly_where_expected(fw in firmware(), ncores in 1u32..5) {
        let layout = FirmwareLayout::scan(&fw.image()).unwrap();
        let tables = tables_for(&fw, ncores);

        let mut pages = HashSet::new();
        for core in 0..ncores as usize {
            for index in 0..1 + layout.num_text_pages + layout.slots().len() {
                let e = entry(&tables, core, index);
                if e.is_mapped() {
                    pages.insert(e.paddr);
                }
            }
        }
        prop_assert_eq!(
            pages.len(),
            layout.num_text_pages
                + layout.num_shared_pages
                + layout.num_bss_pages * ncores as usize
        );
    }

    #[test]
    fn private_pages_never_overlap_between_cores(fw in firmware(), ncores in 2u32..5) {
        let layout = FirmwareLayout::scan(&fw.image()).unwrap();
        let tables = tables_for(&fw, ncores);
        let base = 1 + layout.num_text_pages;

        let mut seen = HashSet::new();
        for core in 0..ncores as usize {
            for (i, slot) in layout.slots().iter().enumerate() {
                if *slot == BssSlot::Private {
                    prop_assert!(seen.insert(entry(&tables, core, base + i).paddr));
                }
            }
        }
        prop_assert_eq!(seen.len(), layout.num_bss_pages * ncores as usize);
    }

    #[test]
    fn shared_and_text_entries_match_across_cores(fw in firmware(), ncores in 2u32..5) {
        let layout = FirmwareLayout::scan(&fw.image()).unwrap();
        let tables = tables_for(&fw, ncores);
        let base = 1 + layout.num_text_pages;

        for core in 1..ncores as usize {
            for index in 0..base {
                prop_assert_eq!(entry(&tables, core, index), entry(&tables, 0, index));
            }
            for (i, slot) in layout.slots().iter().enumerate() {
                if *slot == BssSlot::Shared {
                    prop_assert_eq!(entry(&tables, core, base + i), entry(&tables, 0, base + i));
                }
            }
        }
    }

    #[test]
    fn unbacked_positions_stay_unmapped(fw in firmware()) {
        let layout = FirmwareLayout::scan(&fw.image()).unwrap();
        let tables = tables_for(&fw, 1);
        let base = 1 + layout.num_text_pages;
        prop_assert!(!entry(&tables, 0, 0).is_mapped());
        for (i, slot) in layout.slots().iter().enumerate() {
            prop_assert_eq!(entry(&tables, 0, base + i).is_mapped(), *slot != BssSlot::Unbacked);
        }
    }

    #[test]
    fn rebuilding_into_another_region_is_identical(fw in firmware(), ncores in 1u32..5) {
        let a = tables_for(&fw, ncores);
        let b = tables_for(&fw, ncores);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn first_core_table_ignores_core_count(fw in firmware(), ncores in 2u32..5) {
        let one = tables_for(&fw, 1);
        let many = tables_for(&fw, ncores);
        prop_assert_eq!(&one[..], &many[..PAGE_SIZE]);
    }

    #[test]
    fn oversized_bitmap_fails_without_writes(size in (BSS_BITMAP_CAPACITY as u32 + 1)..u32::MAX) {
        let fw = Firmware { text_pages: 1, bits: Vec::new(), shared_first: 0, shared_pages: 0 };
        let mut image = fw.image();
        image[104..108].copy_from_slice(&size.to_le_bytes());

        let mut tables = vec![0x5Au8; PAGE_SIZE];
        let err = build(&FixedPhys(TABLES_PHYS), &image, IMAGE_PHYS, 1, &mut tables).unwrap_err();
        prop_assert!(matches!(err, LayoutError::Header(_)));
        prop_assert!(tables.iter().all(|&b| b == 0x5A));
    }
}
