//! Encrypted data.
//!
//! An [`Envelope`] is the self-contained output of an encryption: everything needed to decrypt
//! except the key. It is immutable once built; the builder methods consume it.
//!
//! # Fields
//!
//! | Field         | AEAD                 | RSA-OAEP          | Hybrid                 |
//! | --            | --                   | --                | --                     |
//! | `algorithm`   | e.g. `AES-GCM`       | `RSA-..-OAEP-..`  | `RSA-..-OAEP-..+AEAD`  |
//! | `ciphertext`  | encrypted payload    | OAEP block        | encrypted payload      |
//! | `nonce`       | random nonce         | empty             | random nonce           |
//! | `tag`         | 16-byte AEAD tag     | empty             | 16-byte AEAD tag       |
//! | `salt`        | set if password-derived | unset          | unset                  |
//! | `wrapped_key` | unset                | unset             | OAEP-wrapped data key  |
//!
//! # Format
//!
//! In human-readable serde formats (JSON), an envelope is an object whose byte fields are
//! standard base64 strings:
//!
//! ```text
//! {"ciphertext":"...","nonce":"...","tag":"...","algorithm":"AES-GCM","salt":"..."}
//! ```
//!
//! Optional fields are left out when unset. Binary formats carry raw bytes for every field and
//! always encode both optional fields.

use crate::{algorithm::AlgorithmId, CryptoError, Result};

/// Result of an encryption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    algorithm: AlgorithmId,
    ciphertext: Vec<u8>,
    nonce: Vec<u8>,
    tag: Vec<u8>,
    salt: Option<Vec<u8>>,
    wrapped_key: Option<Vec<u8>>,
}

impl Envelope {
    /// Assemble an envelope from its parts, e.g. after loading it from storage.
    pub fn new(algorithm: AlgorithmId, ciphertext: Vec<u8>, nonce: Vec<u8>, tag: Vec<u8>) -> Self {
        Self {
            algorithm,
            ciphertext,
            nonce,
            tag,
            salt: None,
            wrapped_key: None,
        }
    }

    /// Attach the salt a password-derived key was made with.
    pub fn with_salt(mut self, salt: Vec<u8>) -> Self {
        self.salt = Some(salt);
        self
    }

    /// Attach a wrapped data key.
    pub fn with_wrapped_key(mut self, wrapped_key: Vec<u8>) -> Self {
        self.wrapped_key = Some(wrapped_key);
        self
    }

    pub fn algorithm(&self) -> AlgorithmId {
        self.algorithm
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    pub fn tag(&self) -> &[u8] {
        &self.tag
    }

    pub fn salt(&self) -> Option<&[u8]> {
        self.salt.as_deref()
    }

    pub fn wrapped_key(&self) -> Option<&[u8]> {
        self.wrapped_key.as_deref()
    }

    /// Encode as a JSON object.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))
    }

    /// Parse an envelope from its JSON encoding.
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))
    }
}
