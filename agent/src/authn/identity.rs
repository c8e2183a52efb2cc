//! Device identity key pair

use std::fmt;

use base64::Engine;
use ed25519_dalek::SigningKey;
use tracing::info;

use crate::errors::AgentError;
use crate::filesys::file::File;

/// Ed25519 key pair identifying this device to the control plane
pub struct DeviceKey {
    inner: SigningKey,
}

impl DeviceKey {
    /// Generate a new random key
    pub fn generate() -> Self {
        let mut rng = rand_core::OsRng;
        Self {
            inner: SigningKey::generate(&mut rng),
        }
    }

    /// Parse a base64-encoded 32-byte secret
    pub fn from_base64(encoded: &str) -> Result<Self, AgentError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| AgentError::ConfigError(format!("invalid identity key base64: {e}")))?;

        let secret: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            AgentError::ConfigError(format!("expected 32 key bytes, got {}", bytes.len()))
        })?;

        Ok(Self {
            inner: SigningKey::from_bytes(&secret),
        })
    }

    /// Base64 of the secret, for storage
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.inner.as_bytes())
    }

    /// Base64 of the verifying key, sent as `public_key` on registration
    pub fn public_key(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.inner.verifying_key().as_bytes())
    }

    /// Load the key from `file`, creating and persisting a new one if absent
    pub async fn load_or_generate(file: &File) -> Result<Self, AgentError> {
        if file.exists().await {
            return Self::from_base64(&file.read_string().await?);
        }

        info!("Generating new device identity key at {:?}", file.path());
        let key = Self::generate();
        file.write_atomic(key.to_base64().as_bytes()).await?;
        file.set_permissions_600().await?;
        Ok(key)
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceKey({})", self.public_key())
    }
}
