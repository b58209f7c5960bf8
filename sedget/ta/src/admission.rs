//! Admission orchestrator: one firmware load request, start to finish.
//!
//! ```text
//! Start -> RightsChecked -> DecryptedVerified -> TablesBuilt -> DescriptorEmitted
//!    \___________\________________\__________________\______-> Failed
//! ```
//!
//! The secure buffer is split into an image region (ciphertext, then
//! plaintext, then the backing pools) followed by one table page per core.
//! Once the secure buffer has been touched, any failure wipes all of it.

use sedget_spec::mmu::PAGE_SIZE;
use sedget_spec::{SecureDescriptor, Status, SECURE_DESCRIPTOR_LEN};
use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::auth::{self, AuthError};
use crate::config::ServiceConfig;
use crate::descriptor::{self, DescriptorError};
use crate::guard::{self, AccessViolation, BufferCheck};
use crate::mmu::{self, LayoutError};
use crate::platform::{addr_of, AccessRights, CacheError, Platform};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("bad request: {0}")]
    BadRequest(&'static str),
    #[error("{what} buffer holds {got} bytes, need {needed}")]
    ShortBuffer {
        what: &'static str,
        needed: usize,
        got: usize,
    },
    #[error(transparent)]
    Access(#[from] AccessViolation),
    #[error("secure buffer has no physical address")]
    Unresolved,
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("invalid firmware layout: {0}")]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

impl AdmissionError {
    /// Code reported across the trust boundary. Detail stays on this side.
    pub fn status(&self) -> Status {
        match self {
            Self::BadRequest(_) => Status::BadParameters,
            Self::ShortBuffer { .. } | Self::Descriptor(_) => Status::ShortBuffer,
            Self::Access(_) | Self::Unresolved => Status::AccessDenied,
            Self::Cache(_) => Status::Generic,
            Self::Auth(_) => Status::SecurityError,
            Self::Layout(err) => match err {
                LayoutError::NoCores => Status::BadParameters,
                LayoutError::TableRegionTooSmall { .. } => Status::ShortBuffer,
                LayoutError::PoolOverflow { .. } => Status::OutOfMemory,
                LayoutError::UnresolvedTables | LayoutError::Misaligned { .. } => {
                    Status::AccessDenied
                }
                LayoutError::Header(_)
                | LayoutError::MisalignedBss(_)
                | LayoutError::TextOverrun { .. }
                | LayoutError::TableOverflow { .. }
                | LayoutError::AddressOverflow { .. } => Status::CorruptObject,
            },
        }
    }
}

/// Progress of one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Start,
    RightsChecked,
    DecryptedVerified,
    TablesBuilt,
    DescriptorEmitted,
    Failed,
}

/// Buffers named by a load request.
pub struct LoadRequest<'a> {
    /// Encrypted, signed image in normal-world memory.
    pub ciphertext: &'a [u8],
    /// Protected buffer receiving the image, its pools and the tables.
    pub secure: &'a mut [u8],
    /// Normal-world buffer receiving the descriptor.
    pub descriptor: &'a mut [u8],
    pub ncores: u32,
}

/// How a secure buffer is carved up for a given core count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScratchLayout {
    /// Bytes for the image and its backing pools.
    pub image_len: usize,
    /// Bytes for the per-core tables that follow.
    pub tables_len: usize,
}

impl ScratchLayout {
    /// Check the request's sizes against each other before anything is
    /// written.
    pub fn validate(
        config: &ServiceConfig,
        ciphertext_len: usize,
        secure_len: usize,
        descriptor_len: usize,
        ncores: u32,
    ) -> Result<Self, AdmissionError> {
        if ncores == 0 || ncores > config.max_cores {
            return Err(AdmissionError::BadRequest("core count out of range"));
        }
        if ciphertext_len == 0 {
            return Err(AdmissionError::BadRequest("empty ciphertext"));
        }
        if descriptor_len < SECURE_DESCRIPTOR_LEN {
            return Err(AdmissionError::ShortBuffer {
                what: "descriptor",
                needed: SECURE_DESCRIPTOR_LEN,
                got: descriptor_len,
            });
        }
        if secure_len % PAGE_SIZE != 0 {
            return Err(AdmissionError::BadRequest(
                "firmware buffer is not a whole number of pages",
            ));
        }

        let tables_len = ncores as usize * PAGE_SIZE;
        let needed = ciphertext_len.saturating_add(tables_len);
        if secure_len < needed {
            return Err(AdmissionError::ShortBuffer {
                what: "firmware",
                needed,
                got: secure_len,
            });
        }
        Ok(Self {
            image_len: secure_len - tables_len,
            tables_len,
        })
    }
}

struct Admission {
    stage: Stage,
}

impl Admission {
    fn advance(&mut self, next: Stage) {
        debug!(from = ?self.stage, to = ?next, "admission stage");
        self.stage = next;
    }

    fn run<P: Platform + ?Sized>(
        &mut self,
        platform: &P,
        config: &ServiceConfig,
        request: LoadRequest<'_>,
    ) -> Result<SecureDescriptor, AdmissionError> {
        let LoadRequest {
            ciphertext,
            secure,
            descriptor,
            ncores,
        } = request;

        let scratch = ScratchLayout::validate(
            config,
            ciphertext.len(),
            secure.len(),
            descriptor.len(),
            ncores,
        )?;

        guard::check_all(
            platform,
            &[
                BufferCheck::new("ciphertext", ciphertext, AccessRights::NONSECURE_READ),
                BufferCheck::new("firmware", secure, AccessRights::SECURE_WRITE),
                BufferCheck::new("descriptor", descriptor, AccessRights::NONSECURE_WRITE),
            ],
        )?;
        self.advance(Stage::RightsChecked);

        let secure_phys = platform
            .virt_to_phys(addr_of(secure), secure.len())
            .ok_or(AdmissionError::Unresolved)?;
        platform.invalidate(addr_of(secure), secure.len())?;

        match self.populate(platform, config, ciphertext, secure, secure_phys, scratch, ncores, descriptor) {
            Ok(desc) => Ok(desc),
            Err(err) => {
                secure.zeroize();
                descriptor.zeroize();
                if let Err(flush) = platform.flush(addr_of(secure), secure.len()) {
                    warn!(%flush, "flush after wipe failed");
                }
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn populate<P: Platform + ?Sized>(
        &mut self,
        platform: &P,
        config: &ServiceConfig,
        ciphertext: &[u8],
        secure: &mut [u8],
        secure_phys: u32,
        scratch: ScratchLayout,
        ncores: u32,
        descriptor: &mut [u8],
    ) -> Result<SecureDescriptor, AdmissionError> {
        secure.fill(0);
        let (image, tables) = secure.split_at_mut(scratch.image_len);

        let plaintext_len = auth::decrypt_and_verify(&config.key, ciphertext, image)?;
        // the decrypted signature sits where the pools begin
        image[plaintext_len..ciphertext.len()].fill(0);
        self.advance(Stage::DecryptedVerified);

        let desc = mmu::build(platform, &image[..plaintext_len], secure_phys, ncores, tables)?;
        self.advance(Stage::TablesBuilt);

        descriptor::emit(&desc, descriptor)?;
        platform.flush(addr_of(secure), secure.len())?;
        platform.flush(addr_of(descriptor), descriptor.len())?;
        self.advance(Stage::DescriptorEmitted);
        Ok(desc)
    }
}

/// Run a load request through every stage.
///
/// On success the secure buffer holds the plaintext image, zeroed pools
/// and one table per core, and `descriptor` holds the encoded descriptor.
/// On failure neither buffer carries anything derived from the image.
pub fn admit<P: Platform + ?Sized>(
    platform: &P,
    config: &ServiceConfig,
    request: LoadRequest<'_>,
) -> Result<SecureDescriptor, AdmissionError> {
    let mut admission = Admission { stage: Stage::Start };
    let ncores = request.ncores;
    let ciphertext_len = request.ciphertext.len();

    let result = admission.run(platform, config, request);
    match &result {
        Ok(desc) => info!(
            ncores,
            ciphertext_len,
            version = format_args!("{}.{}", desc.fw_version.major, desc.fw_version.minor),
            l2pages = format_args!("{:#x}", desc.l2pages),
            "firmware admitted"
        ),
        Err(err) => {
            warn!(stage = ?admission.stage, error = %err, "firmware rejected");
            admission.advance(Stage::Failed);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServiceConfig {
        ServiceConfig::default()
    }

    #[test]
    fn scratch_splits_tables_off_the_end() {
        let layout = ScratchLayout::validate(&config(), 4096, 16 * PAGE_SIZE, 8, 2).unwrap();
        assert_eq!(layout.image_len, 14 * PAGE_SIZE);
        assert_eq!(layout.tables_len, 2 * PAGE_SIZE);
    }

    #[test]
    fn core_count_bounds() {
        for ncores in [0, 9] {
            assert_eq!(
                ScratchLayout::validate(&config(), 4096, 16 * PAGE_SIZE, 8, ncores),
                Err(AdmissionError::BadRequest("core count out of range"))
            );
        }
    }

    #[test]
    fn secure_buffer_must_hold_ciphertext_and_tables() {
        let err = ScratchLayout::validate(&config(), 3 * PAGE_SIZE, 4 * PAGE_SIZE, 8, 2).unwrap_err();
        assert_eq!(
            err,
            AdmissionError::ShortBuffer {
                what: "firmware",
                needed: 5 * PAGE_SIZE,
                got: 4 * PAGE_SIZE
            }
        );
        assert_eq!(err.status(), Status::ShortBuffer);
    }

    #[test]
    fn descriptor_buffer_minimum() {
        assert!(matches!(
            ScratchLayout::validate(&config(), 64, 4 * PAGE_SIZE, 7, 1),
            Err(AdmissionError::ShortBuffer {
                what: "descriptor",
                ..
            })
        ));
    }

    #[test]
    fn statuses_separate_input_from_trust_failures() {
        assert_eq!(
            AdmissionError::Auth(AuthError::SignatureMismatch).status(),
            Status::SecurityError
        );
        assert_eq!(
            AdmissionError::Layout(LayoutError::MisalignedBss(1)).status(),
            Status::CorruptObject
        );
        assert_eq!(AdmissionError::Unresolved.status(), Status::AccessDenied);
        assert_eq!(
            AdmissionError::BadRequest("x").status(),
            Status::BadParameters
        );
    }
}
