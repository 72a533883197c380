//! Service configuration.

use serde::{Deserialize, Serialize};

use crate::{
    algorithm::{AlgorithmId, OaepHash, SymmetricAlgorithm, RSA_MODULUS_SIZES},
    error::ConfigViolation,
    CryptoError, Result,
};

pub use crate::kdf::{KdfConfig, KdfHash};

/// Configuration for an [`EncryptionService`](crate::service::EncryptionService).
///
/// Every field has a default, so a JSON document only needs the fields it changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Algorithm used when a request doesn't name one.
    pub default_algorithm: AlgorithmId,

    /// PBKDF2 settings for password-based requests.
    pub kdf: KdfConfig,

    /// Smallest symmetric key accepted, in bits.
    pub min_symmetric_key_bits: usize,

    /// OAEP hash for RSA and hybrid requests.
    pub rsa_hash: OaepHash,

    /// Plaintext bytes per chunk when streaming.
    pub stream_chunk_size: usize,

    /// Worker threads for parallel key rotation.
    pub rotation_workers: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_algorithm: SymmetricAlgorithm::AesGcm.into(),
            kdf: KdfConfig::default(),
            min_symmetric_key_bits: 128,
            rsa_hash: OaepHash::Sha256,
            stream_chunk_size: 64 * 1024,
            rotation_workers: 4,
        }
    }
}

impl ServiceConfig {
    /// Parse a configuration from JSON. The result is not validated; see
    /// [`validate`](Self::validate).
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s)
            .map_err(|e| CryptoError::invalid(ConfigViolation::Unparseable(e.to_string())))
    }

    /// Check every setting, reporting all violations at once.
    pub fn validate(&self) -> Result<()> {
        let violations = self.violations();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(CryptoError::ConfigurationInvalid(violations))
        }
    }

    pub fn violations(&self) -> Vec<ConfigViolation> {
        let mut violations = self.kdf.violations();
        if self.default_algorithm.is_deprecated() {
            violations.push(ConfigViolation::DeprecatedDefault(
                self.default_algorithm.to_string(),
            ));
        }
        match self.default_algorithm {
            AlgorithmId::Symmetric(alg) if alg.key_size() * 8 < self.min_symmetric_key_bits => {
                violations.push(ConfigViolation::KeyTooShort {
                    minimum_bits: self.min_symmetric_key_bits,
                    actual_bits: alg.key_size() * 8,
                })
            }
            AlgorithmId::Asymmetric(rsa) | AlgorithmId::Hybrid { wrap: rsa, .. }
                if !RSA_MODULUS_SIZES.contains(&rsa.bits) =>
            {
                violations.push(ConfigViolation::UnsupportedModulus(rsa.bits))
            }
            _ => {}
        }
        if self.stream_chunk_size == 0 {
            violations.push(ConfigViolation::ZeroChunkSize);
        }
        violations
    }
}
