//! Hosted platform: protected heaps carved out of ordinary memory.
//!
//! Each heap owns a window of simulated physical address space. Regions are
//! allocated first-fit, page-granular, inside their window and backed by a
//! heap allocation whose host address doubles as the region's "virtual"
//! address. Any range that overlaps no region counts as normal-world memory.
//!
//! Region metadata and region bytes sit behind separate locks. The loopback
//! transport holds the byte lock for the whole of an invocation while the
//! service queries metadata, so no path may hold both.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::{Mutex, RwLock};
use sedget_spec::mmu::{pages_for, PAGE_SIZE};
use sedget_spec::MemFd;
use thiserror::Error;
use tracing::{debug, trace};

use super::{
    AccessDenied, AccessRights, CacheError, CacheMaintenance, Classification, Direction,
    MemoryAccess, PhysResolver,
};

/// Protected heaps the simulated carve-out provides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeapId {
    /// Private memory of the video accelerator; firmware lands here.
    MvePrivate,
    /// Protected memory the accelerator reads input from.
    MveProtected,
    /// Protected memory shared between multimedia blocks.
    MultimediaProtected,
}

/// A window of physical address space reserved for one heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapWindow {
    pub phys_base: u32,
    pub size: usize,
}

/// Carve-out geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimConfig {
    pub mve_private: HeapWindow,
    pub mve_protected: HeapWindow,
    pub multimedia_protected: HeapWindow,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            mve_private: HeapWindow {
                phys_base: 0x8000_0000,
                size: 32 << 20,
            },
            mve_protected: HeapWindow {
                phys_base: 0x9000_0000,
                size: 32 << 20,
            },
            multimedia_protected: HeapWindow {
                phys_base: 0xA000_0000,
                size: 64 << 20,
            },
        }
    }
}

impl SimConfig {
    fn window(&self, heap: HeapId) -> HeapWindow {
        match heap {
            HeapId::MvePrivate => self.mve_private,
            HeapId::MveProtected => self.mve_protected,
            HeapId::MultimediaProtected => self.multimedia_protected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    #[error("zero-sized allocation")]
    ZeroSize,
    #[error("heap {heap:?} cannot fit {size} more bytes")]
    Exhausted { heap: HeapId, size: usize },
    #[error("no region for {0:?}")]
    UnknownRegion(MemFd),
}

/// Cache requests kept for inspection; older ones are dropped.
pub const CACHE_JOURNAL_LEN: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheOpKind {
    Invalidate,
    Flush,
}

/// One recorded cache maintenance request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheOp {
    pub kind: CacheOpKind,
    pub addr: usize,
    pub len: usize,
}

#[derive(Clone, Copy, Debug)]
struct Region {
    fd: MemFd,
    heap: HeapId,
    offset: usize,
    len: usize,
    host_addr: usize,
    phys: u32,
    writable: bool,
}

impl Region {
    fn host_end(&self) -> usize {
        self.host_addr + self.len
    }

    fn contains(&self, addr: usize) -> bool {
        (self.host_addr..self.host_end()).contains(&addr)
    }

    fn overlaps(&self, start: usize, end: usize) -> bool {
        self.host_addr < end && start < self.host_end()
    }
}

/// Simulated secure platform.
pub struct SimPlatform {
    config: SimConfig,
    regions: RwLock<Vec<Region>>,
    storage: Mutex<HashMap<MemFd, Box<[u8]>>>,
    cache_ops: Mutex<VecDeque<CacheOp>>,
    next_fd: AtomicI32,
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl SimPlatform {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            regions: RwLock::new(Vec::new()),
            storage: Mutex::new(HashMap::new()),
            cache_ops: Mutex::new(VecDeque::with_capacity(CACHE_JOURNAL_LEN)),
            next_fd: AtomicI32::new(3),
        }
    }

    /// Reserve `size` bytes (rounded up to whole pages) from `heap`. The
    /// region starts zeroed.
    pub fn allocate(&self, heap: HeapId, size: usize) -> Result<MemFd, SimError> {
        if size == 0 {
            return Err(SimError::ZeroSize);
        }
        let len = pages_for(size)
            .checked_mul(PAGE_SIZE)
            .ok_or(SimError::Exhausted { heap, size })?;
        let window = self.config.window(heap);

        let bytes = vec![0u8; len].into_boxed_slice();
        let host_addr = bytes.as_ptr() as usize;
        let fd = MemFd(self.next_fd.fetch_add(1, Ordering::Relaxed));

        let region = {
            let mut regions = self.regions.write();
            let offset = first_fit(&regions, heap, window.size, len)
                .ok_or(SimError::Exhausted { heap, size })?;
            let phys = u32::try_from(offset)
                .ok()
                .and_then(|o| window.phys_base.checked_add(o))
                .ok_or(SimError::Exhausted { heap, size })?;
            let region = Region {
                fd,
                heap,
                offset,
                len,
                host_addr,
                phys,
                writable: true,
            };
            regions.push(region);
            region
        };
        self.storage.lock().insert(fd, bytes);

        debug!(
            ?heap,
            fd = fd.0,
            len,
            phys = format_args!("{:#x}", region.phys),
            "protected region allocated"
        );
        Ok(fd)
    }

    /// Return a region to its heap. Its contents are discarded.
    pub fn free(&self, fd: MemFd) -> Result<(), SimError> {
        {
            let mut regions = self.regions.write();
            let index = regions
                .iter()
                .position(|r| r.fd == fd)
                .ok_or(SimError::UnknownRegion(fd))?;
            regions.swap_remove(index);
        }
        self.storage.lock().remove(&fd);
        debug!(fd = fd.0, "protected region freed");
        Ok(())
    }

    /// Length of a live region.
    pub fn region_len(&self, fd: MemFd) -> Option<usize> {
        self.regions.read().iter().find(|r| r.fd == fd).map(|r| r.len)
    }

    /// Map a region into the secure world for the duration of `f`. This is
    /// the path the secure OS uses when a registered buffer is passed to a
    /// service; the normal world has no equivalent.
    pub fn with_region_mut<R>(&self, fd: MemFd, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        let mut storage = self.storage.lock();
        let bytes = storage.get_mut(&fd)?;
        Some(f(bytes))
    }

    fn region_at(&self, addr: usize, len: usize) -> Option<Region> {
        let end = addr.checked_add(len)?;
        self.regions
            .read()
            .iter()
            .find(|r| r.contains(addr) && end <= r.host_end())
            .copied()
    }

    /// Host caches are coherent; only the request is kept.
    fn record(&self, kind: CacheOpKind, addr: usize, len: usize) -> Result<(), CacheError> {
        if len == 0 || addr.checked_add(len).is_none() {
            return Err(CacheError { addr, len });
        }
        trace!(?kind, addr = format_args!("{addr:#x}"), len, "cache maintenance");
        let mut journal = self.cache_ops.lock();
        if journal.len() == CACHE_JOURNAL_LEN {
            journal.pop_front();
        }
        journal.push_back(CacheOp { kind, addr, len });
        Ok(())
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SimPlatform {
    /// Copy of a region's bytes.
    pub fn read_region(&self, fd: MemFd) -> Option<Vec<u8>> {
        self.storage.lock().get(&fd).map(|b| b.to_vec())
    }

    /// Physical base of a region.
    pub fn region_phys(&self, fd: MemFd) -> Option<u32> {
        self.regions.read().iter().find(|r| r.fd == fd).map(|r| r.phys)
    }

    /// Number of live regions.
    pub fn live_regions(&self) -> usize {
        self.regions.read().len()
    }

    /// Make a region refuse write checks.
    pub fn set_read_only(&self, fd: MemFd, read_only: bool) {
        if let Some(r) = self.regions.write().iter_mut().find(|r| r.fd == fd) {
            r.writable = !read_only;
        }
    }

    /// The most recent cache operations, oldest first.
    pub fn cache_ops(&self) -> Vec<CacheOp> {
        self.cache_ops.lock().iter().copied().collect()
    }
}

fn first_fit(regions: &[Region], heap: HeapId, window: usize, len: usize) -> Option<usize> {
    let mut taken: Vec<(usize, usize)> = regions
        .iter()
        .filter(|r| r.heap == heap)
        .map(|r| (r.offset, r.len))
        .collect();
    taken.sort_unstable();

    let mut cursor = 0usize;
    for (offset, used) in taken {
        if offset - cursor >= len {
            return Some(cursor);
        }
        cursor = offset + used;
    }
    (window.checked_sub(cursor)? >= len).then_some(cursor)
}

impl MemoryAccess for SimPlatform {
    fn check_access_rights(
        &self,
        rights: AccessRights,
        addr: usize,
        len: usize,
    ) -> Result<(), AccessDenied> {
        let denied = AccessDenied { addr, len };
        let end = addr.checked_add(len).ok_or(denied)?;
        if len == 0 {
            return Err(denied);
        }

        let regions = self.regions.read();
        match rights.classification {
            Classification::NonSecure => {
                if regions.iter().any(|r| r.overlaps(addr, end)) {
                    return Err(denied);
                }
            }
            Classification::Secure => {
                // Walk forward until the whole range is covered.
                let mut cursor = addr;
                while cursor < end {
                    let region = regions.iter().find(|r| r.contains(cursor)).ok_or(denied)?;
                    if rights.direction == Direction::Write && !region.writable {
                        return Err(denied);
                    }
                    cursor = region.host_end();
                }
            }
        }
        Ok(())
    }
}

impl PhysResolver for SimPlatform {
    fn virt_to_phys(&self, addr: usize, len: usize) -> Option<u32> {
        let region = self.region_at(addr, len)?;
        let offset = u32::try_from(addr - region.host_addr).ok()?;
        region.phys.checked_add(offset)
    }
}

impl CacheMaintenance for SimPlatform {
    fn invalidate(&self, addr: usize, len: usize) -> Result<(), CacheError> {
        self.record(CacheOpKind::Invalidate, addr, len)
    }

    fn flush(&self, addr: usize, len: usize) -> Result<(), CacheError> {
        self.record(CacheOpKind::Flush, addr, len)
    }
}
