//! Signature verification of inbound requests.
//!
//! The queue signs every delivery with an HS256 JWT carried in the
//! `Upstash-Signature` header. The token is checked against the current
//! signing key first and the next signing key second, so keys can be
//! rotated without dropping deliveries.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::config::{env_keys, WorkflowEnv};
use crate::error::WorkflowError;

/// Issuer claim expected on every signature.
const SIGNATURE_ISSUER: &str = "Upstash";

/// Clock tolerance for `exp`/`nbf`, in seconds.
const CLOCK_TOLERANCE_SECONDS: u64 = 1;

/// Verifies inbound request signatures.
#[async_trait]
pub trait Receiver: Send + Sync {
    /// Verifies `signature` for a request with `body` sent to `url`.
    async fn verify(&self, signature: &str, body: &[u8], url: Option<&str>)
        -> Result<(), WorkflowError>;
}

/// Type alias for a shared Receiver.
pub type SharedReceiver = Arc<dyn Receiver>;

#[derive(Debug, Deserialize)]
struct SignatureClaims {
    sub: String,
    body: String,
}

/// Receiver checking JWT signatures against a current and a next key.
pub struct SigningKeyReceiver {
    current_signing_key: String,
    next_signing_key: String,
}

impl SigningKeyReceiver {
    /// Creates a receiver from both signing keys.
    pub fn new(current_signing_key: impl Into<String>, next_signing_key: impl Into<String>) -> Self {
        Self {
            current_signing_key: current_signing_key.into(),
            next_signing_key: next_signing_key.into(),
        }
    }

    /// Reads both signing keys from the environment, optionally region-prefixed.
    ///
    /// Returns `None` when either key is missing.
    pub fn from_env(env: &WorkflowEnv, prefix: Option<&str>) -> Option<Self> {
        let lookup = |key: &str| match prefix {
            Some(p) => env.get_prefixed(p, key),
            None => env.get(key),
        };
        let current = lookup(env_keys::QSTASH_CURRENT_SIGNING_KEY)?;
        let next = lookup(env_keys::QSTASH_NEXT_SIGNING_KEY)?;
        Some(Self::new(current, next))
    }

    fn verify_with_key(
        key: &str,
        signature: &str,
        body: &[u8],
        url: Option<&str>,
    ) -> Result<(), String> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[SIGNATURE_ISSUER]);
        validation.leeway = CLOCK_TOLERANCE_SECONDS;
        validation.validate_nbf = true;

        let token = decode::<SignatureClaims>(
            signature,
            &DecodingKey::from_secret(key.as_bytes()),
            &validation,
        )
        .map_err(|e| e.to_string())?;
        let claims = token.claims;

        if let Some(url) = url {
            if claims.sub != url {
                return Err(format!("invalid subject: {}, want: {}", claims.sub, url));
            }
        }

        let body_hash = URL_SAFE_NO_PAD.encode(Sha256::digest(body));
        if claims.body.trim_end_matches('=') != body_hash {
            return Err("body hash does not match".to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl Receiver for SigningKeyReceiver {
    async fn verify(
        &self,
        signature: &str,
        body: &[u8],
        url: Option<&str>,
    ) -> Result<(), WorkflowError> {
        match Self::verify_with_key(&self.current_signing_key, signature, body, url) {
            Ok(()) => Ok(()),
            Err(current_err) => {
                Self::verify_with_key(&self.next_signing_key, signature, body, url).map_err(
                    |next_err| WorkflowError::Authentication {
                        message: format!(
                            "signature verification failed: current key: {}; next key: {}",
                            current_err, next_err
                        ),
                    },
                )
            }
        }
    }
}
