//! Secret types for protecting sensitive values from accidental logging.
//!
//! Room secrets are wrapped in [`SecretString`] as soon as they leave the
//! request body, so deriving `Debug` on a struct that holds one is safe.
//!
//! Registries do not keep the plaintext around at all: [`SecretDigest`] keeps
//! an HMAC-SHA256 tag under a random per-room key and compares candidates in
//! constant time through `ring::hmac::verify`.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{SecretDigest, SecretString};
//!
//! let digest = SecretDigest::new(&SecretString::from("abcd")).unwrap();
//! assert!(digest.matches("abcd"));
//! assert!(!digest.matches("abce"));
//! ```

use ring::{hmac, rand};
use std::fmt;
use thiserror::Error;

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Key generation failed. Only happens when the OS entropy source is broken.
#[derive(Debug, Error)]
#[error("failed to derive secret digest")]
pub struct DigestError;

/// Keyed digest of a secret that supports constant-time comparison.
#[derive(Clone)]
pub struct SecretDigest {
    key: hmac::Key,
    tag: hmac::Tag,
}

impl SecretDigest {
    /// Digest `secret` under a freshly generated key.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError`] if the system RNG cannot produce a key.
    pub fn new(secret: &SecretString) -> Result<Self, DigestError> {
        let rng = rand::SystemRandom::new();
        let key = hmac::Key::generate(hmac::HMAC_SHA256, &rng).map_err(|_| DigestError)?;
        let tag = hmac::sign(&key, secret.expose_secret().as_bytes());
        Ok(Self { key, tag })
    }

    /// Constant-time check of `candidate` against the stored secret.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        hmac::verify(&self.key, candidate.as_bytes(), self.tag.as_ref()).is_ok()
    }
}

impl fmt::Debug for SecretDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretDigest")
            .field("tag", &"[REDACTED]")
            .finish()
    }
}
