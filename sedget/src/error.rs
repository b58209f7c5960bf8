//! Errors surfaced to callers of this crate.

use sedget_spec::{MemFd, Status};
use sedget_ta::{AuthError, LayoutError};
use thiserror::Error;

use crate::protected_mem::BufferClass;
use crate::tee::TransportError;

/// Coarse failure category.
///
/// This is all a caller should branch on. The variants of [`SedgetError`]
/// carry detail for logs, not for control flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The request itself is malformed. Retrying it unchanged will fail.
    BadInput,
    /// A buffer had the wrong owner, or the image failed authentication.
    TrustViolation,
    /// Memory or size limits were hit; another attempt may succeed with
    /// different parameters.
    ResourceExhausted,
    /// The secure transport or session failed.
    Transport,
}

/// Errors returned by the firmware loader and the buffer broker.
#[derive(Debug, Error)]
pub enum SedgetError {
    /// An argument failed a basic check.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// Role string is not `<video_decoder|video_encoder>.<codec>`.
    #[error("malformed role {0:?}")]
    InvalidRole(String),
    /// No firmware is registered for the role.
    #[error("no firmware registered for role {0:?}")]
    UnknownRole(String),
    /// The catalog names a role twice.
    #[error("role {0:?} listed more than once")]
    DuplicateRole(String),
    /// Catalog document could not be parsed.
    #[error("catalog: {0}")]
    Catalog(#[from] serde_json::Error),
    /// Firmware file is empty.
    #[error("firmware file {0} is empty")]
    EmptyFirmware(String),
    /// Firmware file exceeds the size limit.
    #[error("firmware file of {size} bytes exceeds the {max}-byte limit")]
    FirmwareTooLarge {
        /// Size on disk.
        size: u64,
        /// Configured limit.
        max: usize,
    },
    /// Reading the firmware file failed.
    #[error("firmware i/o: {0}")]
    Io(#[from] std::io::Error),
    /// The protected heap could not satisfy an allocation.
    #[error("cannot allocate {size} bytes of {class:?} memory")]
    OutOfMemory {
        /// Requested size.
        size: usize,
        /// Requested pool.
        class: BufferClass,
    },
    /// The handle was released or never belonged to the heap.
    #[error("protected buffer handle is not live")]
    InvalidHandle,
    /// The heap refused to release a region.
    #[error("heap refused to release {0:?}")]
    ReleaseFailed(MemFd),
    /// A sealed image could not be produced or opened.
    #[error("image: {0}")]
    Image(#[from] AuthError),
    /// A decrypted image has an inconsistent header.
    #[error("image layout: {0}")]
    Layout(#[from] LayoutError),
    /// Session or shared-memory failure.
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    /// The secure service refused the request.
    #[error("secure service rejected the request: {0}")]
    Rejected(Status),
}

impl SedgetError {
    /// Category of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidArgument(_)
            | Self::InvalidRole(_)
            | Self::UnknownRole(_)
            | Self::DuplicateRole(_)
            | Self::Catalog(_)
            | Self::EmptyFirmware(_)
            | Self::Io(_)
            | Self::InvalidHandle
            | Self::ReleaseFailed(_)
            | Self::Layout(_) => FailureKind::BadInput,
            Self::Image(AuthError::SignatureMismatch) => FailureKind::TrustViolation,
            Self::Image(_) => FailureKind::BadInput,
            Self::FirmwareTooLarge { .. } | Self::OutOfMemory { .. } => {
                FailureKind::ResourceExhausted
            }
            Self::Transport(_) => FailureKind::Transport,
            Self::Rejected(status) => match status {
                Status::AccessDenied | Status::SecurityError => FailureKind::TrustViolation,
                Status::OutOfMemory => FailureKind::ResourceExhausted,
                Status::Busy | Status::Communication => FailureKind::Transport,
                _ => FailureKind::BadInput,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_statuses_fall_into_kinds() {
        let kind = |s| SedgetError::Rejected(s).kind();
        assert_eq!(kind(Status::SecurityError), FailureKind::TrustViolation);
        assert_eq!(kind(Status::AccessDenied), FailureKind::TrustViolation);
        assert_eq!(kind(Status::ShortBuffer), FailureKind::BadInput);
        assert_eq!(kind(Status::OutOfMemory), FailureKind::ResourceExhausted);
        assert_eq!(kind(Status::BadParameters), FailureKind::BadInput);
        assert_eq!(kind(Status::CorruptObject), FailureKind::BadInput);
        assert_eq!(kind(Status::Busy), FailureKind::Transport);
    }

    #[test]
    fn size_limits_are_resource_exhaustion() {
        let err = SedgetError::FirmwareTooLarge {
            size: 2 << 20,
            max: 1 << 20,
        };
        assert_eq!(err.kind(), FailureKind::ResourceExhausted);
        assert_eq!(
            SedgetError::EmptyFirmware("x".into()).kind(),
            FailureKind::BadInput
        );
    }

    #[test]
    fn only_a_signature_mismatch_is_a_trust_violation() {
        assert_eq!(
            SedgetError::Image(AuthError::SignatureMismatch).kind(),
            FailureKind::TrustViolation
        );
        assert_eq!(
            SedgetError::Image(AuthError::UnalignedLength(17)).kind(),
            FailureKind::BadInput
        );
    }
}
