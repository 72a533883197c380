/*!
Envelope encryption for data at rest. Data is sealed into self-describing [`Envelope`]s with
authenticated symmetric encryption, RSA-OAEP, or a hybrid of the two; keys can come from a
password; and stored envelopes can be moved to a new key in bulk.

Most callers only need the [`EncryptionService`](service::EncryptionService). It validates a
request completely before any cipher runs, routes it to the right algorithm, and reports
security-relevant events (authentication failures, deprecated algorithms, rejected
configurations) to an audit sink. The individual ciphers are public too, for callers that want
them directly.

# Cryptographic Algorithms Used

- Symmetric encryption: AES-256-GCM, ChaCha20-Poly1305, or XChaCha20-Poly1305, always with a
  16-byte tag that is checked before any plaintext is released.
- Public-key encryption: RSA-OAEP with 2048, 3072, or 4096-bit keys and SHA-256, SHA-384, or
  SHA-512 as the OAEP hash.
- Hybrid encryption: a one-time AEAD key, wrapped with RSA-OAEP.
- Password-based keys: PBKDF2-HMAC-SHA-256 (or SHA-512), at least 10,000 iterations, 16-byte salt.
- Key fingerprints: BLAKE2b with a 32-byte digest, shown as base58.

Every nonce is drawn from the caller's CSPRNG, except in [streams](stream), where each chunk's
nonce is derived from a random base nonce and a counter that is never allowed to wrap.

# Algorithm Deprecation

Some older algorithms (DES, 3DES, Blowfish, RC4, and unauthenticated AES modes) are recognized
but never used. A request for one is served with a modern AEAD and comes back with an
[`Advisory`](legacy::Advisory) describing the risk and how to migrate; stored envelopes that claim
one are refused. The ideal migration is:

1. Stop producing data with the deprecated algorithm.
2. Generate fresh keys for the replacement algorithm.
3. Re-encrypt stored data, verifying each record before the original is removed.
4. Destroy the old keys once nothing depends on them.

Moving AEAD envelopes from one key to another is what the [rotation](rotation) module does.

*/

mod error;
pub use self::error::{ConfigViolation, CryptoError, Result};

pub mod algorithm;
pub mod asymmetric;
pub mod audit;
pub mod config;
pub mod envelope;
pub mod hybrid;
pub mod kdf;
pub mod key;
pub mod legacy;
pub mod rotation;
pub mod service;
pub mod stream;
pub mod symmetric;

mod serde;

pub use envelope::Envelope;

use rand_core::{CryptoRng, RngCore};

/// Holds a cryptographic random number generator (RNG). This trait is needed so that a RNG can be
/// passed around as a trait object.
pub trait CryptoSrc: CryptoRng + RngCore {}
impl<T: CryptoRng + RngCore> CryptoSrc for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{algorithm::SymmetricAlgorithm, key::SymmetricKey, symmetric::SymmetricCipher};

    #[test]
    fn rng_as_trait_object() {
        let mut os = rand::rngs::OsRng;
        let csprng: &mut dyn CryptoSrc = &mut os;
        let key = SymmetricKey::generate(csprng, 32).unwrap();
        let cipher = SymmetricCipher::new(SymmetricAlgorithm::XChaCha20Poly1305);
        let env = cipher.encrypt(csprng, b"dyn", &key, None).unwrap();
        assert_eq!(cipher.decrypt(&env, &key, None).unwrap(), b"dyn");
    }
}
