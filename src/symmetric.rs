//! Symmetric-key authenticated encryption.
//!
//! A [`SymmetricCipher`] seals byte slices into [`Envelope`]s and opens them again. A fresh random
//! nonce is drawn for every single-shot encryption; callers can never supply one. For chunked
//! encryption with derived nonces, see [`stream`](crate::stream).
//!
//! # Example
//!
//! ```
//! # use envelope_crypto::{algorithm::SymmetricAlgorithm, symmetric::SymmetricCipher};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut csprng = rand::rngs::OsRng;
//! let cipher = SymmetricCipher::new(SymmetricAlgorithm::ChaCha20Poly1305);
//! let key = cipher.generate_key(&mut csprng)?;
//!
//! let envelope = cipher.encrypt(&mut csprng, b"attack at dawn", &key, Some(b"header"))?;
//! let plaintext = cipher.decrypt(&envelope, &key, Some(b"header"))?;
//! assert_eq!(&plaintext[..], b"attack at dawn");
//! # Ok(())
//! # }
//! ```
//!
//! # Algorithms
//!
//! AES-256-GCM, ChaCha20-Poly1305 and XChaCha20-Poly1305, all with 32-byte keys and 16-byte
//! detached tags. Any failure to open an envelope is reported as
//! [`CryptoError::AuthenticationFailed`], whatever the cause.

use aes_gcm::{
    aead::{self, generic_array::typenum::Unsigned, AeadCore, AeadInPlace, KeyInit, KeySizeUser},
    Aes256Gcm,
};
use chacha20poly1305::{ChaCha20Poly1305, XChaCha20Poly1305};
use rand_core::{CryptoRng, RngCore};
use tracing::debug;
use zeroize::Zeroize;

use crate::{
    algorithm::{AlgorithmDescriptor, AlgorithmId, SymmetricAlgorithm},
    envelope::Envelope,
    error::ConfigViolation,
    key::{fill_random, SymmetricKey},
    CryptoError, Result,
};

const AES_GCM_MAX_PLAINTEXT: u64 = (1 << 36) - 32;

/// Largest plaintext accepted in one AEAD call: the AES-GCM bound of 2^39 - 256 bits, or the
/// whole address space on targets where that doesn't fit in a `usize`.
pub const AEAD_MAX_PLAINTEXT: usize = if AES_GCM_MAX_PLAINTEXT > usize::MAX as u64 {
    usize::MAX
} else {
    AES_GCM_MAX_PLAINTEXT as usize
};

/// (key, nonce, tag) sizes in bytes, as reported by the primitive itself.
fn sizes_of<A: AeadCore + KeySizeUser>() -> (usize, usize, usize) {
    (A::KeySize::USIZE, A::NonceSize::USIZE, A::TagSize::USIZE)
}

fn primitive_sizes(algorithm: SymmetricAlgorithm) -> (usize, usize, usize) {
    match algorithm {
        SymmetricAlgorithm::AesGcm => sizes_of::<Aes256Gcm>(),
        SymmetricAlgorithm::ChaCha20Poly1305 => sizes_of::<ChaCha20Poly1305>(),
        SymmetricAlgorithm::XChaCha20Poly1305 => sizes_of::<XChaCha20Poly1305>(),
    }
}

/// Check a descriptor against what the primitive for `algorithm` actually uses. Returns every
/// mismatch found.
pub fn validate_descriptor(
    descriptor: &AlgorithmDescriptor,
    algorithm: SymmetricAlgorithm,
) -> Vec<ConfigViolation> {
    let (key, nonce, tag) = primitive_sizes(algorithm);
    let mut violations = Vec::new();
    if descriptor.key_size_bits != key * 8 {
        violations.push(ConfigViolation::KeyLength {
            algorithm: descriptor.name.clone(),
            expected_bits: key * 8,
            actual_bits: descriptor.key_size_bits,
        });
    }
    if descriptor.nonce_size_bytes != nonce {
        violations.push(ConfigViolation::NonceLength {
            algorithm: descriptor.name.clone(),
            expected: nonce,
            actual: descriptor.nonce_size_bytes,
        });
    }
    if descriptor.tag_size_bytes != tag {
        violations.push(ConfigViolation::TagLength {
            algorithm: descriptor.name.clone(),
            expected: tag,
            actual: descriptor.tag_size_bytes,
        });
    }
    violations
}

fn seal<A: AeadInPlace + KeyInit>(
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    buffer: &mut Vec<u8>,
) -> Result<Vec<u8>> {
    let aead = A::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: A::KeySize::USIZE,
        actual: key.len(),
    })?;
    let nonce = aead::Nonce::<A>::from_slice(nonce);
    let tag = aead
        .encrypt_in_place_detached(nonce, aad, buffer.as_mut_slice())
        .map_err(|_| CryptoError::PlaintextTooLarge {
            max: AEAD_MAX_PLAINTEXT,
            actual: buffer.len(),
        })?;
    Ok(tag.to_vec())
}

fn open<A: AeadInPlace + KeyInit>(
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    buffer: &mut Vec<u8>,
    tag: &[u8],
) -> Result<()> {
    let aead = A::new_from_slice(key).map_err(|_| CryptoError::AuthenticationFailed)?;
    let nonce = aead::Nonce::<A>::from_slice(nonce);
    let tag = aead::Tag::<A>::from_slice(tag);
    aead.decrypt_in_place_detached(nonce, aad, buffer.as_mut_slice(), tag)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// Authenticated encryption with one AEAD algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SymmetricCipher {
    algorithm: SymmetricAlgorithm,
}

impl SymmetricCipher {
    pub fn new(algorithm: SymmetricAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> SymmetricAlgorithm {
        self.algorithm
    }

    /// Generate a new random key of the size this algorithm requires.
    pub fn generate_key<R>(&self, csprng: &mut R) -> Result<SymmetricKey>
    where
        R: CryptoRng + RngCore + ?Sized,
    {
        SymmetricKey::generate(csprng, self.algorithm.key_size())
    }

    /// Encrypt `plaintext` under a freshly drawn random nonce.
    pub fn encrypt<R>(
        &self,
        csprng: &mut R,
        plaintext: &[u8],
        key: &SymmetricKey,
        associated_data: Option<&[u8]>,
    ) -> Result<Envelope>
    where
        R: CryptoRng + RngCore + ?Sized,
    {
        self.preflight(key)?;
        let mut nonce = vec![0u8; self.algorithm.nonce_size()];
        fill_random(csprng, &mut nonce)?;
        let (ciphertext, tag) =
            self.seal_with_nonce(key, &nonce, associated_data.unwrap_or_default(), plaintext)?;
        debug!(
            algorithm = %self.algorithm,
            key_id = %key.id(),
            len = plaintext.len(),
            "sealed envelope"
        );
        Ok(Envelope::new(self.algorithm.into(), ciphertext, nonce, tag))
    }

    /// Decrypt an envelope. The tag is verified before any plaintext is returned.
    pub fn decrypt(
        &self,
        envelope: &Envelope,
        key: &SymmetricKey,
        associated_data: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        let expected = AlgorithmId::from(self.algorithm);
        if envelope.algorithm() != expected {
            return Err(CryptoError::AlgorithmMismatch {
                expected,
                actual: envelope.algorithm(),
            });
        }
        self.preflight(key)?;
        self.open_with_nonce(
            key,
            envelope.nonce(),
            associated_data.unwrap_or_default(),
            envelope.ciphertext(),
            envelope.tag(),
        )
    }

    /// Check the key and the algorithm's descriptor before touching the primitive.
    pub(crate) fn preflight(&self, key: &SymmetricKey) -> Result<()> {
        let violations =
            validate_descriptor(&AlgorithmId::from(self.algorithm).descriptor(), self.algorithm);
        if !violations.is_empty() {
            return Err(CryptoError::ConfigurationInvalid(violations));
        }
        if key.len() != self.algorithm.key_size() {
            return Err(CryptoError::InvalidKeyLength {
                expected: self.algorithm.key_size(),
                actual: key.len(),
            });
        }
        Ok(())
    }

    /// Seal with an explicit nonce. Only the stream construction may call this; it alone is
    /// responsible for never repeating a nonce.
    pub(crate) fn seal_with_nonce(
        &self,
        key: &SymmetricKey,
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        if nonce.len() != self.algorithm.nonce_size() {
            return Err(CryptoError::invalid(ConfigViolation::NonceLength {
                algorithm: self.algorithm.to_string(),
                expected: self.algorithm.nonce_size(),
                actual: nonce.len(),
            }));
        }
        if plaintext.len() > AEAD_MAX_PLAINTEXT {
            return Err(CryptoError::PlaintextTooLarge {
                max: AEAD_MAX_PLAINTEXT,
                actual: plaintext.len(),
            });
        }
        let key = key.expose_secret();
        let mut buffer = plaintext.to_vec();
        let tag = match self.algorithm {
            SymmetricAlgorithm::AesGcm => seal::<Aes256Gcm>(key, nonce, aad, &mut buffer),
            SymmetricAlgorithm::ChaCha20Poly1305 => {
                seal::<ChaCha20Poly1305>(key, nonce, aad, &mut buffer)
            }
            SymmetricAlgorithm::XChaCha20Poly1305 => {
                seal::<XChaCha20Poly1305>(key, nonce, aad, &mut buffer)
            }
        };
        match tag {
            Ok(tag) => Ok((buffer, tag)),
            Err(e) => {
                buffer.zeroize();
                Err(e)
            }
        }
    }

    pub(crate) fn open_with_nonce(
        &self,
        key: &SymmetricKey,
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>> {
        // A malformed envelope is indistinguishable from a forged one.
        if nonce.len() != self.algorithm.nonce_size() || tag.len() != self.algorithm.tag_size() {
            return Err(CryptoError::AuthenticationFailed);
        }
        let key = key.expose_secret();
        let mut buffer = ciphertext.to_vec();
        let result = match self.algorithm {
            SymmetricAlgorithm::AesGcm => open::<Aes256Gcm>(key, nonce, aad, &mut buffer, tag),
            SymmetricAlgorithm::ChaCha20Poly1305 => {
                open::<ChaCha20Poly1305>(key, nonce, aad, &mut buffer, tag)
            }
            SymmetricAlgorithm::XChaCha20Poly1305 => {
                open::<XChaCha20Poly1305>(key, nonce, aad, &mut buffer, tag)
            }
        };
        match result {
            Ok(()) => Ok(buffer),
            Err(e) => {
                buffer.zeroize();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::AlgorithmStatus;
    use proptest::prelude::*;

    fn flip_bit(bytes: &[u8], bit: usize) -> Vec<u8> {
        let mut out = bytes.to_vec();
        out[bit / 8] ^= 1 << (bit % 8);
        out
    }

    #[test]
    fn round_trip_all() {
        let mut csprng = rand::rngs::OsRng;
        for alg in SymmetricAlgorithm::ALL {
            let cipher = SymmetricCipher::new(alg);
            let key = cipher.generate_key(&mut csprng).unwrap();
            for message in [&b""[..], b"x", b"I am a test message, going undercover"] {
                let env = cipher.encrypt(&mut csprng, message, &key, None).unwrap();
                assert_eq!(env.nonce().len(), alg.nonce_size());
                assert_eq!(env.tag().len(), 16);
                assert_eq!(env.ciphertext().len(), message.len());
                let dec = cipher.decrypt(&env, &key, None).unwrap();
                assert_eq!(message, &dec[..]);
            }
        }
    }

    #[test]
    fn single_bit_tamper() {
        let mut csprng = rand::rngs::OsRng;
        for alg in SymmetricAlgorithm::ALL {
            let cipher = SymmetricCipher::new(alg);
            let key = cipher.generate_key(&mut csprng).unwrap();
            let env = cipher.encrypt(&mut csprng, b"tamper me", &key, None).unwrap();
            for bit in 0..env.ciphertext().len() * 8 {
                let bad = Envelope::new(
                    env.algorithm(),
                    flip_bit(env.ciphertext(), bit),
                    env.nonce().to_vec(),
                    env.tag().to_vec(),
                );
                assert!(matches!(
                    cipher.decrypt(&bad, &key, None),
                    Err(CryptoError::AuthenticationFailed)
                ));
            }
            for bit in 0..env.tag().len() * 8 {
                let bad = Envelope::new(
                    env.algorithm(),
                    env.ciphertext().to_vec(),
                    env.nonce().to_vec(),
                    flip_bit(env.tag(), bit),
                );
                assert!(matches!(
                    cipher.decrypt(&bad, &key, None),
                    Err(CryptoError::AuthenticationFailed)
                ));
            }
        }
    }

    #[test]
    fn plaintext_limit_matches_gcm_bound() {
        if usize::BITS >= 64 {
            assert_eq!(AEAD_MAX_PLAINTEXT as u64, (1u64 << 39) / 8 - 32);
        } else {
            assert_eq!(AEAD_MAX_PLAINTEXT, usize::MAX);
        }
    }

    #[test]
    fn fresh_nonce_every_call() {
        let mut csprng = rand::rngs::OsRng;
        let cipher = SymmetricCipher::new(SymmetricAlgorithm::AesGcm);
        let key = cipher.generate_key(&mut csprng).unwrap();
        let a = cipher.encrypt(&mut csprng, b"same message", &key, None).unwrap();
        let b = cipher.encrypt(&mut csprng, b"same message", &key, None).unwrap();
        assert_ne!(a.nonce(), b.nonce());
        assert_ne!(a.ciphertext(), b.ciphertext());
    }

    #[test]
    fn wrong_key_and_wrong_aad_look_the_same() {
        let mut csprng = rand::rngs::OsRng;
        let cipher = SymmetricCipher::new(SymmetricAlgorithm::XChaCha20Poly1305);
        let key = cipher.generate_key(&mut csprng).unwrap();
        let other = cipher.generate_key(&mut csprng).unwrap();
        let env = cipher.encrypt(&mut csprng, b"secret", &key, Some(b"ctx")).unwrap();

        let wrong_key = cipher.decrypt(&env, &other, Some(b"ctx")).unwrap_err();
        let wrong_aad = cipher.decrypt(&env, &key, Some(b"other")).unwrap_err();
        let no_aad = cipher.decrypt(&env, &key, None).unwrap_err();
        assert_eq!(wrong_key.to_string(), wrong_aad.to_string());
        assert!(matches!(no_aad, CryptoError::AuthenticationFailed));
        assert_eq!(cipher.decrypt(&env, &key, Some(b"ctx")).unwrap(), b"secret");
    }

    #[test]
    fn bad_key_length() {
        let mut csprng = rand::rngs::OsRng;
        let cipher = SymmetricCipher::new(SymmetricAlgorithm::AesGcm);
        let short = SymmetricKey::from_bytes(&[1u8; 16]);
        match cipher.encrypt(&mut csprng, b"data", &short, None) {
            Err(CryptoError::InvalidKeyLength { expected: 32, actual: 16 }) => {}
            other => panic!("Expected InvalidKeyLength, got {:?}", other),
        }
    }

    #[test]
    fn malformed_nonce_is_auth_failure() {
        let mut csprng = rand::rngs::OsRng;
        let cipher = SymmetricCipher::new(SymmetricAlgorithm::ChaCha20Poly1305);
        let key = cipher.generate_key(&mut csprng).unwrap();
        let env = cipher.encrypt(&mut csprng, b"data", &key, None).unwrap();
        let short_nonce = Envelope::new(
            env.algorithm(),
            env.ciphertext().to_vec(),
            env.nonce()[..8].to_vec(),
            env.tag().to_vec(),
        );
        assert!(matches!(
            cipher.decrypt(&short_nonce, &key, None),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn algorithm_mismatch() {
        let mut csprng = rand::rngs::OsRng;
        let aes = SymmetricCipher::new(SymmetricAlgorithm::AesGcm);
        let chacha = SymmetricCipher::new(SymmetricAlgorithm::ChaCha20Poly1305);
        let key = aes.generate_key(&mut csprng).unwrap();
        let env = aes.encrypt(&mut csprng, b"data", &key, None).unwrap();
        assert!(matches!(
            chacha.decrypt(&env, &key, None),
            Err(CryptoError::AlgorithmMismatch { .. })
        ));
    }

    #[test]
    fn descriptor_checks_collect_everything() {
        let bad = AlgorithmDescriptor {
            name: "AES-GCM".into(),
            key_size_bits: 128,
            nonce_size_bytes: 8,
            tag_size_bytes: 12,
            status: AlgorithmStatus::Active,
        };
        let violations = validate_descriptor(&bad, SymmetricAlgorithm::AesGcm);
        assert_eq!(violations.len(), 3);
        for alg in SymmetricAlgorithm::ALL {
            let good = AlgorithmId::from(alg).descriptor();
            assert!(validate_descriptor(&good, alg).is_empty());
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]
        #[test]
        fn any_bytes_round_trip(message in proptest::collection::vec(any::<u8>(), 0..512)) {
            let mut csprng = rand::rngs::OsRng;
            let cipher = SymmetricCipher::new(SymmetricAlgorithm::AesGcm);
            let key = cipher.generate_key(&mut csprng).unwrap();
            let env = cipher.encrypt(&mut csprng, &message, &key, Some(b"aad")).unwrap();
            prop_assert_eq!(cipher.decrypt(&env, &key, Some(b"aad")).unwrap(), message);
        }
    }
}
