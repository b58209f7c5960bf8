//! Access-rights guard.
//!
//! Runs before the pipeline reads or writes anything. Each buffer named in
//! a request must belong, in its entirety, to the world its role demands.

use thiserror::Error;
use tracing::warn;

use crate::platform::{addr_of, AccessRights, MemoryAccess};

/// A buffer failed its rights check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{name} buffer ({len} bytes) lacks {rights:?}")]
pub struct AccessViolation {
    pub name: &'static str,
    pub len: usize,
    pub rights: AccessRights,
}

/// One buffer and the rights it must carry.
#[derive(Clone, Copy)]
pub struct BufferCheck<'a> {
    pub name: &'static str,
    pub bytes: &'a [u8],
    pub rights: AccessRights,
}

impl<'a> BufferCheck<'a> {
    pub fn new(name: &'static str, bytes: &'a [u8], rights: AccessRights) -> Self {
        Self {
            name,
            bytes,
            rights,
        }
    }
}

/// Check every buffer in order; the first failure wins.
pub fn check_all<M: MemoryAccess + ?Sized>(
    platform: &M,
    checks: &[BufferCheck<'_>],
) -> Result<(), AccessViolation> {
    for check in checks {
        let len = check.bytes.len();
        if let Err(denied) = platform.check_access_rights(check.rights, addr_of(check.bytes), len) {
            warn!(buffer = check.name, %denied, rights = ?check.rights, "access rights check failed");
            return Err(AccessViolation {
                name: check.name,
                len,
                rights: check.rights,
            });
        }
    }
    Ok(())
}
