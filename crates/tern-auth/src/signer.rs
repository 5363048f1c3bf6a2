// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Token signing seam.

use std::fmt;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use tern_core::signature::hmac_sha256_base64;
use tern_core::{HubError, HubResult};

/// Produces the base64 signature of a token's string-to-sign.
#[async_trait]
pub trait TokenSigner: Send + Sync + fmt::Debug {
    /// Returns the signer name for logging.
    fn name(&self) -> &str;

    /// Signs `data` and returns the base64-encoded digest.
    async fn sign(&self, data: &str) -> HubResult<String>;
}

// =============================================================================
// LocalKeySigner
// =============================================================================

/// Signs with HMAC-SHA256 using a locally held base64 key.
#[derive(Clone)]
pub struct LocalKeySigner {
    key: String,
}

impl LocalKeySigner {
    /// Creates a signer, failing if `key` is not valid base64.
    pub fn new(key: impl Into<String>) -> HubResult<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(HubError::validation("shared_access_key", "key must not be empty"));
        }
        STANDARD
            .decode(key.as_bytes())
            .map_err(|_| HubError::validation("shared_access_key", "key is not valid base64"))?;
        Ok(Self { key })
    }
}

impl fmt::Debug for LocalKeySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalKeySigner").field("key", &"<redacted>").finish()
    }
}

#[async_trait]
impl TokenSigner for LocalKeySigner {
    fn name(&self) -> &str {
        "local_key"
    }

    async fn sign(&self, data: &str) -> HubResult<String> {
        hmac_sha256_base64(&self.key, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_keys() {
        assert!(LocalKeySigner::new("").is_err());
        assert!(LocalKeySigner::new("not base64!").is_err());
        assert!(LocalKeySigner::new("a2V5").is_ok());
    }

    #[tokio::test]
    async fn test_sign_matches_codec() {
        let signer = LocalKeySigner::new("a2V5").unwrap();
        let signature = signer.sign("payload").await.unwrap();
        assert_eq!(signature, hmac_sha256_base64("a2V5", "payload").unwrap());
        assert!(!format!("{:?}", signer).contains("a2V5"));
    }
}
