//! What the admission pipeline needs from the secure OS.
//!
//! Buffers are identified by their address and length in the service's
//! address space. Implementations answer three kinds of question about such
//! a range: who owns it, where it sits physically, and how to keep the
//! caches coherent with the accelerator.

pub mod sim;

use thiserror::Error;

/// Which world a buffer must belong to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Memory only the secure world can reach.
    Secure,
    /// Memory the normal world owns.
    NonSecure,
}

/// How the service intends to touch a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Read only.
    Read,
    /// Written (and possibly read).
    Write,
}

/// Rights requested for one buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AccessRights {
    pub classification: Classification,
    pub direction: Direction,
}

impl AccessRights {
    pub const NONSECURE_READ: Self = Self::new(Classification::NonSecure, Direction::Read);
    pub const NONSECURE_WRITE: Self = Self::new(Classification::NonSecure, Direction::Write);
    pub const SECURE_WRITE: Self = Self::new(Classification::Secure, Direction::Write);

    pub const fn new(classification: Classification, direction: Direction) -> Self {
        Self {
            classification,
            direction,
        }
    }
}

/// The platform refused a rights query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("access denied for {len} bytes at {addr:#x}")]
pub struct AccessDenied {
    pub addr: usize,
    pub len: usize,
}

/// A cache maintenance request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cache maintenance failed for {len} bytes at {addr:#x}")]
pub struct CacheError {
    pub addr: usize,
    pub len: usize,
}

/// Ownership queries.
pub trait MemoryAccess {
    /// Succeeds only if every byte of `[addr, addr + len)` carries `rights`.
    /// An empty range is refused.
    fn check_access_rights(
        &self,
        rights: AccessRights,
        addr: usize,
        len: usize,
    ) -> Result<(), AccessDenied>;
}

/// Virtual to physical translation.
pub trait PhysResolver {
    /// Physical address of `addr`, provided `[addr, addr + len)` is
    /// physically contiguous and addressable by the accelerator.
    fn virt_to_phys(&self, addr: usize, len: usize) -> Option<u32>;
}

/// Data cache maintenance over a virtual range.
pub trait CacheMaintenance {
    /// Discard cached lines so later reads observe memory.
    fn invalidate(&self, addr: usize, len: usize) -> Result<(), CacheError>;
    /// Write back dirty lines so the accelerator observes our writes.
    fn flush(&self, addr: usize, len: usize) -> Result<(), CacheError>;
}

/// Everything the admission pipeline needs from its host.
pub trait Platform: MemoryAccess + PhysResolver + CacheMaintenance + Send + Sync {}

impl<T> Platform for T where T: MemoryAccess + PhysResolver + CacheMaintenance + Send + Sync {}

/// Address of a slice in the service's address space.
pub(crate) fn addr_of(bytes: &[u8]) -> usize {
    bytes.as_ptr() as usize
}
