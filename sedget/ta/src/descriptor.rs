//! Secure descriptor emitter.

use sedget_spec::{SecureDescriptor, SECURE_DESCRIPTOR_LEN};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("descriptor buffer holds {0} bytes, need {SECURE_DESCRIPTOR_LEN}")]
pub struct DescriptorError(pub usize);

/// Serialize `desc` into `out`. Bytes past the descriptor are zeroed so
/// nothing stale reaches the caller.
pub fn emit(desc: &SecureDescriptor, out: &mut [u8]) -> Result<usize, DescriptorError> {
    if out.len() < SECURE_DESCRIPTOR_LEN {
        return Err(DescriptorError(out.len()));
    }
    out.fill(0);
    out[..SECURE_DESCRIPTOR_LEN].copy_from_slice(&desc.to_bytes());
    Ok(SECURE_DESCRIPTOR_LEN)
}
