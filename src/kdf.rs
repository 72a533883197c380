//! Password-based key derivation.
//!
//! Keys are derived with PBKDF2-HMAC, using SHA-256 unless configured otherwise. The salt is 16
//! random bytes unless the caller supplies one; it must be stored alongside whatever the key
//! encrypts (an [`Envelope`](crate::envelope::Envelope) has a field for it). The iteration count
//! comes from [`KdfConfig`] and is not stored, so it must stay the same for as long as the data
//! is kept.
//!
//! # Example
//!
//! ```
//! # use envelope_crypto::kdf::*;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut csprng = rand::rngs::OsRng;
//! let kdf = KeyDerivation::new(&KdfConfig::default())?;
//! let derived = kdf.derive_from_password(&mut csprng, b"correct horse", None)?;
//!
//! // Later, with the stored salt:
//! let again = kdf.derive_from_password(&mut csprng, b"correct horse", Some(derived.salt()))?;
//! assert_eq!(derived.key(), again.key());
//! # Ok(())
//! # }
//! ```

use pbkdf2::pbkdf2_hmac;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512};
use tracing::debug;
use zeroize::Zeroize;

use crate::{
    algorithm::SYMMETRIC_KEY_SIZE,
    error::ConfigViolation,
    key::{fill_random, SymmetricKey},
    CryptoError, Result,
};

/// Fewest PBKDF2 iterations accepted.
pub const MIN_ITERATIONS: u32 = 10_000;

/// Iteration count used when none is configured.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Size of generated salts, and the minimum size of supplied ones.
pub const SALT_SIZE: usize = 16;

/// HMAC hash used inside PBKDF2.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KdfHash {
    #[default]
    Sha256,
    Sha512,
}

/// PBKDF2 settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    pub iterations: u32,
    pub hash: KdfHash,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            hash: KdfHash::Sha256,
        }
    }
}

impl KdfConfig {
    /// Every rule this configuration breaks.
    pub fn violations(&self) -> Vec<ConfigViolation> {
        let mut violations = Vec::new();
        if self.iterations < MIN_ITERATIONS {
            violations.push(ConfigViolation::IterationsTooLow {
                minimum: MIN_ITERATIONS,
                actual: self.iterations,
            });
        }
        violations
    }
}

/// A derived key and the salt that produced it.
#[derive(Debug)]
pub struct DerivedKey {
    key: SymmetricKey,
    salt: Vec<u8>,
}

impl DerivedKey {
    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn into_parts(self) -> (SymmetricKey, Vec<u8>) {
        (self.key, self.salt)
    }
}

/// PBKDF2 key derivation with a fixed iteration count and hash.
#[derive(Clone, Debug)]
pub struct KeyDerivation {
    iterations: u32,
    hash: KdfHash,
}

impl KeyDerivation {
    /// Fails with `IterationsTooLow` if the configured count is below [`MIN_ITERATIONS`].
    pub fn new(config: &KdfConfig) -> Result<Self> {
        if config.iterations < MIN_ITERATIONS {
            return Err(CryptoError::IterationsTooLow {
                minimum: MIN_ITERATIONS,
                actual: config.iterations,
            });
        }
        Ok(Self {
            iterations: config.iterations,
            hash: config.hash,
        })
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Derive a 32-byte key from a password. A fresh random salt is drawn if none is given.
    pub fn derive_from_password<R>(
        &self,
        csprng: &mut R,
        password: &[u8],
        salt: Option<&[u8]>,
    ) -> Result<DerivedKey>
    where
        R: CryptoRng + RngCore + ?Sized,
    {
        let salt = match salt {
            Some(salt) => {
                check_salt(salt)?;
                salt.to_vec()
            }
            None => {
                let mut salt = vec![0u8; SALT_SIZE];
                fill_random(csprng, &mut salt)?;
                salt
            }
        };
        let key = self.derive_key(password, &salt, SYMMETRIC_KEY_SIZE)?;
        debug!(key_id = %key.id(), iterations = self.iterations, "derived key from password");
        Ok(DerivedKey { key, salt })
    }

    /// Derive a key of any length from a password and an existing salt.
    pub fn derive_key(&self, password: &[u8], salt: &[u8], len: usize) -> Result<SymmetricKey> {
        if password.is_empty() {
            return Err(CryptoError::invalid(ConfigViolation::EmptyPassword));
        }
        check_salt(salt)?;
        let mut out = vec![0u8; len];
        match self.hash {
            KdfHash::Sha256 => pbkdf2_hmac::<Sha256>(password, salt, self.iterations, &mut out),
            KdfHash::Sha512 => pbkdf2_hmac::<Sha512>(password, salt, self.iterations, &mut out),
        }
        let key = SymmetricKey::from_bytes(&out);
        out.zeroize();
        Ok(key)
    }
}

fn check_salt(salt: &[u8]) -> Result<()> {
    if salt.len() < SALT_SIZE {
        return Err(CryptoError::invalid(ConfigViolation::SaltTooShort {
            minimum: SALT_SIZE,
            actual: salt.len(),
        }));
    }
    Ok(())
}
