//! Protected buffer broker.
//!
//! A [`ProtectedBuffer`] owns one region of protected memory for as long
//! as it is live. Releasing it (explicitly or by dropping it) returns the
//! region to its heap; after that the handle refuses every use.

use std::fmt;
use std::sync::Arc;

use sedget_spec::MemFd;
use sedget_ta::platform::sim::{HeapId, SimError, SimPlatform};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SedgetError;

/// Pool a protected buffer comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferClass {
    /// Codec input, such as the compressed bitstream.
    Input,
    /// Working memory of the codec engine.
    Intermediate,
    /// Firmware image, its pools and page tables.
    Firmware,
}

impl BufferClass {
    /// Heap serving this class.
    pub fn heap(self) -> HeapId {
        match self {
            Self::Input => HeapId::MveProtected,
            Self::Intermediate => HeapId::MultimediaProtected,
            Self::Firmware => HeapId::MvePrivate,
        }
    }
}

/// A source of protected memory regions.
pub trait ProtectedHeap: Send + Sync {
    /// Reserve a region of at least `size` bytes.
    fn allocate_region(&self, size: usize, class: BufferClass) -> Result<MemFd, SedgetError>;
    /// Return a region.
    fn release_region(&self, fd: MemFd) -> Result<(), SedgetError>;
}

impl ProtectedHeap for SimPlatform {
    fn allocate_region(&self, size: usize, class: BufferClass) -> Result<MemFd, SedgetError> {
        self.allocate(class.heap(), size).map_err(|err| match err {
            SimError::ZeroSize => SedgetError::InvalidArgument("zero-sized protected buffer"),
            SimError::Exhausted { .. } => SedgetError::OutOfMemory { size, class },
            SimError::UnknownRegion(_) => SedgetError::InvalidHandle,
        })
    }

    fn release_region(&self, fd: MemFd) -> Result<(), SedgetError> {
        self.free(fd).map_err(|_| SedgetError::ReleaseFailed(fd))
    }
}

/// Handle to one protected region.
pub struct ProtectedBuffer {
    heap: Arc<dyn ProtectedHeap>,
    fd: Option<MemFd>,
    size: usize,
    class: BufferClass,
}

impl ProtectedBuffer {
    /// Allocate `size` bytes from the pool for `class`. Exhaustion is
    /// reported, not retried.
    pub fn allocate(
        heap: Arc<dyn ProtectedHeap>,
        size: usize,
        class: BufferClass,
    ) -> Result<Self, SedgetError> {
        if size == 0 {
            return Err(SedgetError::InvalidArgument("zero-sized protected buffer"));
        }
        let fd = heap.allocate_region(size, class)?;
        debug!(?class, size, fd = fd.0, "protected buffer allocated");
        Ok(Self {
            heap,
            fd: Some(fd),
            size,
            class,
        })
    }

    /// Reference to hand to the secure transport.
    pub fn mem_fd(&self) -> Result<MemFd, SedgetError> {
        self.fd.ok_or(SedgetError::InvalidHandle)
    }

    /// Requested size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Pool the buffer came from.
    pub fn class(&self) -> BufferClass {
        self.class
    }

    /// False once released.
    pub fn is_live(&self) -> bool {
        self.fd.is_some()
    }

    /// Return the region to its heap. A second release fails with
    /// [`SedgetError::InvalidHandle`].
    pub fn release(&mut self) -> Result<(), SedgetError> {
        let fd = self.fd.take().ok_or(SedgetError::InvalidHandle)?;
        self.heap.release_region(fd)?;
        debug!(fd = fd.0, "protected buffer released");
        Ok(())
    }
}

impl Drop for ProtectedBuffer {
    fn drop(&mut self) {
        if let Some(fd) = self.fd.take() {
            if let Err(err) = self.heap.release_region(fd) {
                warn!(fd = fd.0, %err, "releasing protected buffer on drop failed");
            }
        }
    }
}

impl fmt::Debug for ProtectedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtectedBuffer")
            .field("fd", &self.fd)
            .field("size", &self.size)
            .field("class", &self.class)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use sedget_ta::platform::sim::{HeapWindow, SimConfig};

    fn sim() -> Arc<SimPlatform> {
        Arc::new(SimPlatform::default())
    }

    #[test]
    fn release_is_one_shot() {
        let sim = sim();
        let mut buf = ProtectedBuffer::allocate(sim.clone(), 4096, BufferClass::Firmware).unwrap();
        assert!(buf.mem_fd().is_ok());
        buf.release().unwrap();
        assert!(!buf.is_live());
        assert!(matches!(buf.release(), Err(SedgetError::InvalidHandle)));
        assert!(matches!(buf.mem_fd(), Err(SedgetError::InvalidHandle)));
        assert_eq!(sim.live_regions(), 0);
    }

    #[test]
    fn drop_returns_the_region() {
        let sim = sim();
        {
            let _buf = ProtectedBuffer::allocate(sim.clone(), 1, BufferClass::Input).unwrap();
            assert_eq!(sim.live_regions(), 1);
        }
        assert_eq!(sim.live_regions(), 0);
    }

    #[test]
    fn classes_use_their_own_pools() {
        let sim = sim();
        let phys = |class| {
            let buf = ProtectedBuffer::allocate(sim.clone(), 4096, class).unwrap();
            let phys = sim.region_phys(buf.mem_fd().unwrap()).unwrap();
            std::mem::forget(buf);
            phys
        };
        let config = SimConfig::default();
        assert_eq!(phys(BufferClass::Input), config.mve_protected.phys_base);
        assert_eq!(
            phys(BufferClass::Intermediate),
            config.multimedia_protected.phys_base
        );
        assert_eq!(phys(BufferClass::Firmware), config.mve_private.phys_base);
    }

    #[test]
    fn exhaustion_is_reported() {
        let window = HeapWindow {
            phys_base: 0x8000_0000,
            size: 8192,
        };
        let sim = Arc::new(SimPlatform::new(SimConfig {
            mve_private: window,
            mve_protected: window,
            multimedia_protected: window,
        }));
        let _a = ProtectedBuffer::allocate(sim.clone(), 8192, BufferClass::Firmware).unwrap();
        let err = ProtectedBuffer::allocate(sim, 1, BufferClass::Firmware).unwrap_err();
        assert!(matches!(
            err,
            SedgetError::OutOfMemory {
                class: BufferClass::Firmware,
                ..
            }
        ));
        assert_eq!(err.kind(), FailureKind::ResourceExhausted);
    }

    #[test]
    fn zero_size_is_bad_input() {
        let err = ProtectedBuffer::allocate(sim(), 0, BufferClass::Input).unwrap_err();
        assert_eq!(err.kind(), FailureKind::BadInput);
    }
}
