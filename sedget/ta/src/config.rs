//! Service configuration.

use crate::auth::FirmwareKey;

/// Cores the accelerator family can have.
pub const DEFAULT_MAX_CORES: u32 = 8;

/// Settings the service is instantiated with.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Key every firmware image is sealed with.
    pub key: FirmwareKey,
    /// Upper bound for the core count a client may request.
    pub max_cores: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            key: FirmwareKey::provisioned(),
            max_cores: DEFAULT_MAX_CORES,
        }
    }
}

impl ServiceConfig {
    pub fn with_key(key: FirmwareKey) -> Self {
        Self {
            key,
            ..Self::default()
        }
    }
}
