//! Loading a codec's firmware into protected memory.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sedget_spec::{FIRMWARE_BUFFER_SIZE, MAX_FIRMWARE_FILE_SIZE};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::FirmwareCatalog;
use crate::error::SedgetError;
use crate::protected_mem::{BufferClass, ProtectedBuffer, ProtectedHeap};
use crate::tee::{self, SecureTransport};

/// Where firmware files live and how large things may get.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Directory the catalog's file names are relative to.
    pub firmware_dir: PathBuf,
    /// Largest firmware file accepted.
    pub max_firmware_size: usize,
    /// Size of the protected buffer reserved per load.
    pub firmware_buffer_size: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            firmware_dir: PathBuf::from("/lib/firmware"),
            max_firmware_size: MAX_FIRMWARE_FILE_SIZE,
            firmware_buffer_size: FIRMWARE_BUFFER_SIZE,
        }
    }
}

/// A firmware image resident in protected memory.
#[derive(Debug)]
pub struct LoadedFirmware {
    /// Buffer holding the image, its pools and its page tables. Releasing
    /// it unloads the firmware.
    pub buffer: ProtectedBuffer,
    /// Size of the sealed file that was loaded.
    pub firmware_size: usize,
}

/// Resolves roles to firmware files and hands them to the secure service.
pub struct FirmwareLoader<T> {
    catalog: FirmwareCatalog,
    config: LoaderConfig,
    heap: Arc<dyn ProtectedHeap>,
    transport: T,
}

impl<T: SecureTransport> FirmwareLoader<T> {
    /// Loader over `heap` and `transport`.
    pub fn new(
        catalog: FirmwareCatalog,
        config: LoaderConfig,
        heap: Arc<dyn ProtectedHeap>,
        transport: T,
    ) -> Self {
        Self {
            catalog,
            config,
            heap,
            transport,
        }
    }

    /// Role table in use.
    pub fn catalog(&self) -> &FirmwareCatalog {
        &self.catalog
    }

    /// Settings in use.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Transport in use.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Path of the firmware file registered for `role`.
    pub fn firmware_path(&self, role: &str) -> Result<PathBuf, SedgetError> {
        Ok(self.config.firmware_dir.join(self.catalog.lookup(role)?))
    }

    /// Load the firmware for `role` on `ncores` cores.
    ///
    /// `out` receives the secure descriptor and is zeroed first. On failure
    /// the protected buffer is released before returning.
    pub fn load_protected_firmware(
        &self,
        role: &str,
        ncores: u32,
        out: &mut [u8],
    ) -> Result<LoadedFirmware, SedgetError> {
        if role.is_empty() {
            return Err(SedgetError::InvalidArgument("empty role"));
        }
        if out.is_empty() {
            return Err(SedgetError::InvalidArgument("empty descriptor buffer"));
        }
        if ncores == 0 {
            return Err(SedgetError::InvalidArgument("core count must be positive"));
        }

        let path = self.firmware_path(role)?;
        let buffer = ProtectedBuffer::allocate(
            Arc::clone(&self.heap),
            self.config.firmware_buffer_size,
            BufferClass::Firmware,
        )?;
        let fd = buffer.mem_fd()?;
        out.fill(0);

        let firmware = read_firmware(&path, self.config.max_firmware_size)?;
        debug!(role, path = %path.display(), size = firmware.len(), "firmware read");

        if let Err(err) = tee::load_firmware(
            &self.transport,
            &firmware,
            fd,
            buffer.size(),
            out,
            ncores,
        ) {
            warn!(role, ncores, error = %err, "firmware load failed");
            return Err(err);
        }

        info!(role, ncores, size = firmware.len(), "firmware loaded");
        Ok(LoadedFirmware {
            buffer,
            firmware_size: firmware.len(),
        })
    }
}

/// Read a firmware file, refusing empty files and files over `max` bytes
/// before reading any content.
pub fn read_firmware(path: &Path, max: usize) -> Result<Vec<u8>, SedgetError> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    if size == 0 {
        return Err(SedgetError::EmptyFirmware(path.display().to_string()));
    }
    let limit = max as u64;
    if size > limit {
        return Err(SedgetError::FirmwareTooLarge { size, max });
    }

    let mut data = Vec::with_capacity(size as usize);
    file.take(limit + 1).read_to_end(&mut data)?;
    if data.len() as u64 > limit {
        return Err(SedgetError::FirmwareTooLarge {
            size: data.len() as u64,
            max,
        });
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use std::io::Write;

    #[test]
    fn oversized_files_are_refused() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 65]).unwrap();
        let err = read_firmware(file.path(), 64).unwrap_err();
        assert!(matches!(err, SedgetError::FirmwareTooLarge { size: 65, max: 64 }));
        assert_eq!(err.kind(), FailureKind::ResourceExhausted);
        assert_eq!(read_firmware(file.path(), 65).unwrap().len(), 65);
    }

    #[test]
    fn empty_and_missing_files_are_refused() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            read_firmware(file.path(), 64),
            Err(SedgetError::EmptyFirmware(_))
        ));
        assert!(matches!(
            read_firmware(Path::new("/nonexistent/sedget.efwb"), 64),
            Err(SedgetError::Io(_))
        ));
    }

    #[test]
    fn default_limits() {
        let config = LoaderConfig::default();
        assert_eq!(config.firmware_dir, Path::new("/lib/firmware"));
        assert_eq!(config.max_firmware_size, 1 << 20);
        assert_eq!(config.firmware_buffer_size, 4 << 20);
    }
}
