//! Normal-world side of the secure video firmware service.
//!
//! [`FirmwareLoader`] resolves a codec role to its firmware file, reserves a
//! protected buffer for it and asks the secure service, through a
//! [`SecureTransport`], to decrypt, authenticate and map the image. The
//! service answers with a secure descriptor; the plaintext never leaves
//! protected memory.
//!
//! [`loopback::LoopbackTransport`] runs the service in-process over the
//! simulated platform, which is what the CLI and the tests use.
#![deny(missing_docs)]

pub mod catalog;
pub mod error;
pub mod firmware;
pub mod image;
pub mod loopback;
pub mod protected_mem;
pub mod tee;

pub use catalog::{CatalogEntry, FirmwareCatalog};
pub use error::{FailureKind, SedgetError};
pub use firmware::{read_firmware, FirmwareLoader, LoadedFirmware, LoaderConfig};
pub use image::{inspect, ImageBuilder, ImageReport};
pub use loopback::LoopbackTransport;
pub use protected_mem::{BufferClass, ProtectedBuffer, ProtectedHeap};
pub use sedget_spec::{SecureDescriptor, Status};
pub use tee::{SecureTransport, Session, TransportError};
