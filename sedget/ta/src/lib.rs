//! Secure-world admission pipeline for video codec firmware.
//!
//! A normal-world client hands over an encrypted, signed firmware image
//! together with a protected output buffer. The service checks who owns
//! each buffer, decrypts and authenticates the image inside secure memory,
//! builds one second-level MMU table per accelerator core and returns a
//! [`SecureDescriptor`] that tells the driver where those tables live.
//!
//! The platform (access-rights queries, physical address resolution, cache
//! maintenance) sits behind the traits in [`platform`]; [`platform::sim`]
//! provides a hosted implementation backed by ordinary heap memory.

pub mod admission;
pub mod auth;
pub mod config;
pub mod descriptor;
pub mod guard;
pub mod mmu;
pub mod platform;
pub mod service;

pub use admission::{admit, AdmissionError, LoadRequest, ScratchLayout, Stage};
pub use auth::{decrypt_and_verify, seal, AuthError, FirmwareKey};
pub use config::ServiceConfig;
pub use mmu::{FirmwareLayout, LayoutError};
pub use platform::Platform;
pub use sedget_spec::{SecureDescriptor, Status};
pub use service::{Param, SedgetService, SessionId};
