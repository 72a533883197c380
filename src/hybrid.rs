//! Hybrid encryption: RSA-OAEP wrapping a one-time AEAD key.
//!
//! Every call draws a fresh data key, seals the plaintext with it, and wraps the key's raw
//! bytes with the recipient's public key. The data key is zeroed as soon as it has been wrapped.
//! This lifts the size limit of plain RSA-OAEP.
//!
//! A [`HybridEnvelope`] can be folded into a single [`Envelope`] for storage; its algorithm is
//! then written as `<wrap>+<data>`, e.g. `RSA-4096-OAEP-SHA-256+AES-GCM`.

use rand_core::{CryptoRng, RngCore};
use tracing::{debug, warn};

use crate::{
    algorithm::{AlgorithmId, OaepHash, SymmetricAlgorithm},
    asymmetric::{AsymmetricCipher, PrivateKey, PublicKey},
    envelope::Envelope,
    key::SymmetricKey,
    symmetric::SymmetricCipher,
    CryptoError, Result,
};

/// Output of a hybrid encryption: the sealed data and the wrapped key that opens it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HybridEnvelope {
    data: Envelope,
    wrapped_key: Envelope,
}

impl HybridEnvelope {
    /// The AEAD-sealed payload.
    pub fn data(&self) -> &Envelope {
        &self.data
    }

    /// The RSA-OAEP envelope holding the data key.
    pub fn wrapped_key(&self) -> &Envelope {
        &self.wrapped_key
    }

    /// Fold both halves into one storable envelope.
    pub fn into_envelope(self) -> Result<Envelope> {
        let (wrap, data) = match (self.wrapped_key.algorithm(), self.data.algorithm()) {
            (AlgorithmId::Asymmetric(wrap), AlgorithmId::Symmetric(data)) => (wrap, data),
            _ => {
                return Err(CryptoError::MalformedEnvelope(
                    "hybrid halves have the wrong algorithms".into(),
                ))
            }
        };
        Ok(Envelope::new(
            AlgorithmId::Hybrid { wrap, data },
            self.data.ciphertext().to_vec(),
            self.data.nonce().to_vec(),
            self.data.tag().to_vec(),
        )
        .with_wrapped_key(self.wrapped_key.ciphertext().to_vec()))
    }

    /// Split a stored hybrid envelope back into its halves.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        let (wrap, data) = match envelope.algorithm() {
            AlgorithmId::Hybrid { wrap, data } => (wrap, data),
            other => {
                return Err(CryptoError::MalformedEnvelope(format!(
                    "{} is not a hybrid algorithm",
                    other
                )))
            }
        };
        let wrapped = envelope.wrapped_key().ok_or_else(|| {
            CryptoError::MalformedEnvelope("hybrid envelope has no wrapped key".into())
        })?;
        Ok(Self {
            data: Envelope::new(
                data.into(),
                envelope.ciphertext().to_vec(),
                envelope.nonce().to_vec(),
                envelope.tag().to_vec(),
            ),
            wrapped_key: Envelope::new(wrap.into(), wrapped.to_vec(), Vec::new(), Vec::new()),
        })
    }
}

/// Hybrid encryptor for one AEAD algorithm and one OAEP hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HybridEncryptor {
    data: SymmetricCipher,
    wrap: AsymmetricCipher,
}

impl Default for HybridEncryptor {
    fn default() -> Self {
        Self::new(SymmetricAlgorithm::default(), OaepHash::default())
    }
}

impl HybridEncryptor {
    pub fn new(data: SymmetricAlgorithm, hash: OaepHash) -> Self {
        Self {
            data: SymmetricCipher::new(data),
            wrap: AsymmetricCipher::new(hash),
        }
    }

    /// Encrypt any amount of data for the holder of `key`'s private half.
    pub fn encrypt<R>(
        &self,
        csprng: &mut R,
        plaintext: &[u8],
        key: &PublicKey,
        associated_data: Option<&[u8]>,
    ) -> Result<HybridEnvelope>
    where
        R: CryptoRng + RngCore,
    {
        let data_key = self.data.generate_key(csprng)?;
        let data = self.data.encrypt(csprng, plaintext, &data_key, associated_data)?;
        let wrapped_key = self.wrap.encrypt(csprng, data_key.expose_secret(), key)?;
        drop(data_key);
        debug!(
            wrap = %self.wrap.params(key),
            data = %self.data.algorithm(),
            recipient = %key.id(),
            "sealed hybrid envelope"
        );
        Ok(HybridEnvelope { data, wrapped_key })
    }

    /// Unwrap the data key and open the payload. Failure in either stage is reported the same way.
    pub fn decrypt(
        &self,
        envelope: &HybridEnvelope,
        key: &PrivateKey,
        associated_data: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        self.open(envelope, key, associated_data).map_err(|e| {
            warn!(recipient = %key, "hybrid decryption failed");
            debug!(cause = %e, "hybrid decryption failure cause");
            CryptoError::HybridDecryptionFailed
        })
    }

    fn open(
        &self,
        envelope: &HybridEnvelope,
        key: &PrivateKey,
        associated_data: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        let raw = self.wrap.decrypt(envelope.wrapped_key(), key)?;
        let data_key = SymmetricKey::from_vec(raw);
        self.data.decrypt(envelope.data(), &data_key, associated_data)
    }

    /// Encrypt and fold the result into one envelope.
    pub fn encrypt_envelope<R>(
        &self,
        csprng: &mut R,
        plaintext: &[u8],
        key: &PublicKey,
        associated_data: Option<&[u8]>,
    ) -> Result<Envelope>
    where
        R: CryptoRng + RngCore,
    {
        self.encrypt(csprng, plaintext, key, associated_data)?
            .into_envelope()
    }

    /// Decrypt a folded hybrid envelope.
    pub fn decrypt_envelope(
        &self,
        envelope: &Envelope,
        key: &PrivateKey,
        associated_data: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        let hybrid =
            HybridEnvelope::from_envelope(envelope).or(Err(CryptoError::HybridDecryptionFailed))?;
        self.decrypt(&hybrid, key, associated_data)
    }

    /// Pick the encryptor matching a folded envelope's algorithm.
    pub fn for_envelope(envelope: &Envelope) -> Option<Self> {
        match envelope.algorithm() {
            AlgorithmId::Hybrid { wrap, data } => Some(Self::new(data, wrap.hash)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asymmetric::tests::test_pair;

    #[test]
    fn large_payload_round_trip() {
        let mut csprng = rand::rngs::OsRng;
        let pair = test_pair();
        let plaintext = vec![0x5Au8; 1 << 20];
        for alg in SymmetricAlgorithm::ALL {
            let hybrid = HybridEncryptor::new(alg, OaepHash::Sha256);
            let env = hybrid.encrypt(&mut csprng, &plaintext, pair.public(), Some(b"hdr")).unwrap();
            assert_eq!(env.wrapped_key().ciphertext().len(), 256);
            assert_eq!(env.data().algorithm(), AlgorithmId::Symmetric(alg));
            let out = hybrid.decrypt(&env, pair.private(), Some(b"hdr")).unwrap();
            assert_eq!(out, plaintext);
        }
    }

    #[test]
    fn empty_payload() {
        let mut csprng = rand::rngs::OsRng;
        let pair = test_pair();
        let hybrid = HybridEncryptor::default();
        let env = hybrid.encrypt(&mut csprng, b"", pair.public(), None).unwrap();
        assert!(hybrid.decrypt(&env, pair.private(), None).unwrap().is_empty());
    }

    #[test]
    fn any_failure_is_hybrid_failure() {
        let mut csprng = rand::rngs::OsRng;
        let pair = test_pair();
        let hybrid = HybridEncryptor::default();
        let env = hybrid.encrypt(&mut csprng, b"payload", pair.public(), None).unwrap();

        // Corrupt the wrapped key
        let mut wrapped = env.wrapped_key().ciphertext().to_vec();
        wrapped[0] ^= 0x01;
        let bad = HybridEnvelope {
            data: env.data().clone(),
            wrapped_key: Envelope::new(
                env.wrapped_key().algorithm(),
                wrapped,
                Vec::new(),
                Vec::new(),
            ),
        };
        assert!(matches!(
            hybrid.decrypt(&bad, pair.private(), None),
            Err(CryptoError::HybridDecryptionFailed)
        ));

        // Corrupt the payload
        let mut ct = env.data().ciphertext().to_vec();
        ct[0] ^= 0x01;
        let bad = HybridEnvelope {
            data: Envelope::new(
                env.data().algorithm(),
                ct,
                env.data().nonce().to_vec(),
                env.data().tag().to_vec(),
            ),
            wrapped_key: env.wrapped_key().clone(),
        };
        assert!(matches!(
            hybrid.decrypt(&bad, pair.private(), None),
            Err(CryptoError::HybridDecryptionFailed)
        ));

        // Wrong associated data
        assert!(matches!(
            hybrid.decrypt(&env, pair.private(), Some(b"other")),
            Err(CryptoError::HybridDecryptionFailed)
        ));
    }

    #[test]
    fn folded_envelope() {
        let mut csprng = rand::rngs::OsRng;
        let pair = test_pair();
        let hybrid = HybridEncryptor::new(SymmetricAlgorithm::AesGcm, OaepHash::Sha256);
        let env = hybrid
            .encrypt_envelope(&mut csprng, b"store me", pair.public(), None)
            .unwrap();
        assert_eq!(env.algorithm().to_string(), "RSA-2048-OAEP-SHA-256+AES-GCM");
        assert_eq!(env.wrapped_key().map(|k| k.len()), Some(256));

        let json = env.to_json().unwrap();
        let loaded = Envelope::from_json(&json).unwrap();
        let chosen = HybridEncryptor::for_envelope(&loaded).unwrap();
        assert_eq!(chosen, hybrid);
        assert_eq!(chosen.decrypt_envelope(&loaded, pair.private(), None).unwrap(), b"store me");

        let stripped = Envelope::new(
            loaded.algorithm(),
            loaded.ciphertext().to_vec(),
            loaded.nonce().to_vec(),
            loaded.tag().to_vec(),
        );
        assert!(HybridEnvelope::from_envelope(&stripped).is_err());
        assert!(matches!(
            hybrid.decrypt_envelope(&stripped, pair.private(), None),
            Err(CryptoError::HybridDecryptionFailed)
        ));
    }
}
