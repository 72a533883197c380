//! Symmetric key material.
//!
//! A [`SymmetricKey`] wraps raw secret bytes. It never prints them: both `Debug` and `Display`
//! only show the key's [`KeyId`], a public fingerprint that can safely go into logs and audit
//! events.
//!
//! # Algorithms
//!
//! The `KeyId` is computed by hashing the domain string `envelope-crypto-kid` followed by the raw
//! key bytes with BLAKE2b-256. It is displayed as base58.

use blake2::{digest::consts::U32, Blake2b, Digest};
use rand_core::{CryptoRng, RngCore};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use std::fmt;

use crate::{CryptoError, Result};

const KEY_ID_DOMAIN: &[u8] = b"envelope-crypto-kid";
const KEY_ID_SIZE: usize = 32;

type Blake2b256 = Blake2b<U32>;

/// Fill `buf` from the CSPRNG, reporting a missing or broken source as `CryptoUnavailable`.
pub(crate) fn fill_random<R>(csprng: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: CryptoRng + RngCore + ?Sized,
{
    csprng
        .try_fill_bytes(buf)
        .map_err(|e| CryptoError::CryptoUnavailable(e.to_string()))
}

/// Secret key for one of the AEAD ciphers.
///
/// The key length is not checked on construction; a cipher checks it against its own descriptor
/// and fails with `InvalidKeyLength` on mismatch. The bytes are zeroed when the key is dropped.
pub struct SymmetricKey {
    key: Vec<u8>,
    id: KeyId,
}

impl SymmetricKey {
    /// Generate a new random key of `len` bytes.
    pub fn generate<R>(csprng: &mut R, len: usize) -> Result<SymmetricKey>
    where
        R: CryptoRng + RngCore + ?Sized,
    {
        let mut key = vec![0u8; len];
        if let Err(e) = fill_random(csprng, &mut key) {
            key.zeroize();
            return Err(e);
        }
        let id = KeyId::from_key(&key);
        Ok(SymmetricKey { key, id })
    }

    /// Copy raw key bytes into a new key. The caller remains responsible for wiping its copy.
    pub fn from_bytes(key: &[u8]) -> SymmetricKey {
        SymmetricKey {
            key: key.to_vec(),
            id: KeyId::from_key(key),
        }
    }

    /// Take ownership of raw key bytes without copying them.
    pub(crate) fn from_vec(key: Vec<u8>) -> SymmetricKey {
        let id = KeyId::from_key(&key);
        SymmetricKey { key, id }
    }

    /// The public fingerprint of this key.
    pub fn id(&self) -> &KeyId {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }

    /// Raw key bytes. Only for handing to a primitive or wrapping the key; never log these.
    pub fn expose_secret(&self) -> &[u8] {
        &self.key
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        self.key.ct_eq(&other.key).into()
    }
}

impl Eq for SymmetricKey {}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("len", &self.key.len())
            .field("key_id", &self.id.to_base58())
            .finish()
    }
}

impl fmt::Display for SymmetricKey {
    /// Display just the KeyId (never the underlying key).
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.id, f)
    }
}

/// Public fingerprint of a [`SymmetricKey`].
#[derive(Clone, Hash)]
pub struct KeyId {
    inner: [u8; KEY_ID_SIZE],
}

impl KeyId {
    /// Compute the KeyId for raw key bytes.
    pub fn from_key(key: &[u8]) -> KeyId {
        let mut hasher = Blake2b256::new();
        hasher.update(KEY_ID_DOMAIN);
        hasher.update(key);
        KeyId {
            inner: hasher.finalize().into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.inner
    }

    /// Convert into a base58-encoded KeyId.
    pub fn to_base58(&self) -> String {
        bs58::encode(&self.inner).into_string()
    }

    /// Attempt to parse a base58-encoded KeyId.
    pub fn from_base58(s: &str) -> Result<KeyId> {
        let raw = bs58::decode(s)
            .into_vec()
            .or(Err(CryptoError::MalformedKey("KeyId is not valid base58")))?;
        let inner: [u8; KEY_ID_SIZE] = raw
            .as_slice()
            .try_into()
            .or(Err(CryptoError::MalformedKey("KeyId has the wrong length")))?;
        Ok(KeyId { inner })
    }
}

impl PartialEq for KeyId {
    fn eq(&self, other: &Self) -> bool {
        self.inner[..].ct_eq(&other.inner[..]).into()
    }
}

impl Eq for KeyId {}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("KeyId").field(&self.to_base58()).finish()
    }
}

impl fmt::Display for KeyId {
    /// Display as a base58-encoded string.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DeadRng;

    impl RngCore for DeadRng {
        fn next_u32(&mut self) -> u32 {
            0
        }
        fn next_u64(&mut self) -> u64 {
            0
        }
        fn fill_bytes(&mut self, _dest: &mut [u8]) {}
        fn try_fill_bytes(
            &mut self,
            _dest: &mut [u8],
        ) -> std::result::Result<(), rand_core::Error> {
            let code = std::num::NonZeroU32::new(rand_core::Error::CUSTOM_START).unwrap();
            Err(rand_core::Error::from(code))
        }
    }

    impl CryptoRng for DeadRng {}

    #[test]
    fn generate() {
        let mut csprng = rand::rngs::OsRng;
        let key = SymmetricKey::generate(&mut csprng, 32).unwrap();
        assert_eq!(key.len(), 32);
        assert!(key.expose_secret().iter().any(|&x| x != 0));
        let other = SymmetricKey::generate(&mut csprng, 32).unwrap();
        assert_ne!(key, other);
        assert_ne!(key.id(), other.id());
    }

    #[test]
    fn no_rng() {
        let result = SymmetricKey::generate(&mut DeadRng, 32);
        assert!(matches!(result, Err(CryptoError::CryptoUnavailable(_))));
    }

    #[test]
    fn display_never_shows_key() {
        let raw = [0xABu8; 32];
        let key = SymmetricKey::from_bytes(&raw);
        let shown = format!("{} {:?}", key, key);
        assert!(!shown.to_lowercase().contains(&hex::encode(raw)));
        assert!(shown.contains(&key.id().to_base58()));
    }

    #[test]
    fn id_is_stable() {
        let raw = [7u8; 32];
        let a = SymmetricKey::from_bytes(&raw);
        let b = SymmetricKey::from_bytes(&raw);
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id().as_bytes(), &raw[..]);
    }

    #[test]
    fn base58() {
        let mut csprng = rand::rngs::OsRng;
        let key = SymmetricKey::generate(&mut csprng, 32).unwrap();
        let mut base58 = key.id().to_base58();
        assert_eq!(&KeyId::from_base58(&base58).unwrap(), key.id());
        base58.push('a');
        assert!(KeyId::from_base58(&base58).is_err());
        assert!(KeyId::from_base58("0OIl").is_err());
    }
}
