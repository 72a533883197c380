//! Algorithm identifiers and descriptors.
//!
//! Every envelope names the algorithm that produced it with a string of the form
//! `<CIPHER>-<MODE>`. The accepted strings are:
//!
//! | String                           | Kind       | Status     |
//! | --                               | --         | --         |
//! | `AES-GCM`                        | AEAD       | Active     |
//! | `ChaCha20-Poly1305`              | AEAD       | Active     |
//! | `XChaCha20-Poly1305`             | AEAD       | Active     |
//! | `RSA-<bits>-OAEP-SHA-<n>`        | Asymmetric | Active     |
//! | `RSA-<bits>-OAEP-SHA-<n>+<AEAD>` | Hybrid     | Active     |
//! | `DES-CBC`                        | Legacy     | Deprecated |
//! | `3DES-CBC`                       | Legacy     | Deprecated |
//! | `Blowfish-CBC`                   | Legacy     | Deprecated |
//! | `RC4-STREAM`                     | Legacy     | Deprecated |
//! | `AES-CBC`                        | Legacy     | Deprecated |
//! | `AES-ECB`                        | Legacy     | Deprecated |
//!
//! Each one maps to an [`AlgorithmDescriptor`], which is what all size validation is driven from.

use serde::{Deserialize, Serialize};

use std::{fmt, str::FromStr};

use crate::CryptoError;

/// Size of every symmetric key this crate produces.
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Size of every AEAD tag this crate produces.
pub const TAG_SIZE: usize = 16;

/// RSA modulus sizes accepted for new and imported keys.
pub const RSA_MODULUS_SIZES: [usize; 3] = [2048, 3072, 4096];

/// Smallest RSA modulus accepted anywhere.
pub const MIN_RSA_BITS: usize = 2048;

/// Authenticated symmetric ciphers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SymmetricAlgorithm {
    /// AES-256 in Galois/Counter Mode, 12-byte nonce.
    AesGcm,
    /// ChaCha20-Poly1305 (RFC 8439), 12-byte nonce.
    ChaCha20Poly1305,
    /// XChaCha20-Poly1305, the extended 24-byte nonce variant.
    XChaCha20Poly1305,
}

impl SymmetricAlgorithm {
    pub const ALL: [SymmetricAlgorithm; 3] = [
        SymmetricAlgorithm::AesGcm,
        SymmetricAlgorithm::ChaCha20Poly1305,
        SymmetricAlgorithm::XChaCha20Poly1305,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SymmetricAlgorithm::AesGcm => "AES-GCM",
            SymmetricAlgorithm::ChaCha20Poly1305 => "ChaCha20-Poly1305",
            SymmetricAlgorithm::XChaCha20Poly1305 => "XChaCha20-Poly1305",
        }
    }

    pub fn key_size(&self) -> usize {
        SYMMETRIC_KEY_SIZE
    }

    pub fn nonce_size(&self) -> usize {
        match self {
            SymmetricAlgorithm::AesGcm | SymmetricAlgorithm::ChaCha20Poly1305 => 12,
            SymmetricAlgorithm::XChaCha20Poly1305 => 24,
        }
    }

    pub fn tag_size(&self) -> usize {
        TAG_SIZE
    }
}

impl Default for SymmetricAlgorithm {
    fn default() -> Self {
        SymmetricAlgorithm::AesGcm
    }
}

impl fmt::Display for SymmetricAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SymmetricAlgorithm {
    type Err = CryptoError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SymmetricAlgorithm::ALL
            .into_iter()
            .find(|alg| alg.name() == s)
            .ok_or_else(|| CryptoError::UnsupportedAlgorithm(s.to_owned()))
    }
}

impl TryFrom<String> for SymmetricAlgorithm {
    type Error = CryptoError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SymmetricAlgorithm> for String {
    fn from(value: SymmetricAlgorithm) -> Self {
        value.name().to_owned()
    }
}

/// Hash function used for OAEP padding (both the label hash and MGF1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OaepHash {
    Sha256,
    Sha384,
    Sha512,
}

impl OaepHash {
    pub fn name(&self) -> &'static str {
        match self {
            OaepHash::Sha256 => "SHA-256",
            OaepHash::Sha384 => "SHA-384",
            OaepHash::Sha512 => "SHA-512",
        }
    }

    /// Digest length in bytes.
    pub fn output_size(&self) -> usize {
        match self {
            OaepHash::Sha256 => 32,
            OaepHash::Sha384 => 48,
            OaepHash::Sha512 => 64,
        }
    }
}

impl Default for OaepHash {
    fn default() -> Self {
        OaepHash::Sha256
    }
}

impl fmt::Display for OaepHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OaepHash {
    type Err = CryptoError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SHA-256" => Ok(OaepHash::Sha256),
            "SHA-384" => Ok(OaepHash::Sha384),
            "SHA-512" => Ok(OaepHash::Sha512),
            _ => Err(CryptoError::UnsupportedAlgorithm(s.to_owned())),
        }
    }
}

impl TryFrom<String> for OaepHash {
    type Error = CryptoError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OaepHash> for String {
    fn from(value: OaepHash) -> Self {
        value.name().to_owned()
    }
}

/// RSA-OAEP parameters: modulus size and padding hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RsaOaep {
    pub bits: usize,
    pub hash: OaepHash,
}

impl RsaOaep {
    /// Largest plaintext a single OAEP block can hold: `k - 2*hLen - 2`.
    pub fn capacity(&self) -> usize {
        self.bits.div_ceil(8).saturating_sub(2 * self.hash.output_size() + 2)
    }
}

impl fmt::Display for RsaOaep {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RSA-{}-OAEP-{}", self.bits, self.hash)
    }
}

impl FromStr for RsaOaep {
    type Err = CryptoError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unsupported = || CryptoError::UnsupportedAlgorithm(s.to_owned());
        let (bits, hash) = s
            .strip_prefix("RSA-")
            .and_then(|rest| rest.split_once("-OAEP-"))
            .ok_or_else(unsupported)?;
        let bits = bits.parse::<usize>().map_err(|_| unsupported())?;
        let hash = hash.parse::<OaepHash>().map_err(|_| unsupported())?;
        Ok(RsaOaep { bits, hash })
    }
}

/// Algorithms that are recognized only so they can be flagged and migrated away from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LegacyAlgorithm {
    DesCbc,
    TripleDesCbc,
    BlowfishCbc,
    Rc4,
    AesCbc,
    AesEcb,
}

impl LegacyAlgorithm {
    pub const ALL: [LegacyAlgorithm; 6] = [
        LegacyAlgorithm::DesCbc,
        LegacyAlgorithm::TripleDesCbc,
        LegacyAlgorithm::BlowfishCbc,
        LegacyAlgorithm::Rc4,
        LegacyAlgorithm::AesCbc,
        LegacyAlgorithm::AesEcb,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LegacyAlgorithm::DesCbc => "DES-CBC",
            LegacyAlgorithm::TripleDesCbc => "3DES-CBC",
            LegacyAlgorithm::BlowfishCbc => "Blowfish-CBC",
            LegacyAlgorithm::Rc4 => "RC4-STREAM",
            LegacyAlgorithm::AesCbc => "AES-CBC",
            LegacyAlgorithm::AesEcb => "AES-ECB",
        }
    }

    /// (key bits, IV bytes, tag bytes) as historically deployed.
    fn sizes(&self) -> (usize, usize, usize) {
        match self {
            LegacyAlgorithm::DesCbc => (56, 8, 0),
            LegacyAlgorithm::TripleDesCbc => (168, 8, 0),
            LegacyAlgorithm::BlowfishCbc => (128, 8, 0),
            LegacyAlgorithm::Rc4 => (128, 0, 0),
            LegacyAlgorithm::AesCbc => (256, 16, 0),
            LegacyAlgorithm::AesEcb => (256, 0, 0),
        }
    }
}

/// Any algorithm string this crate understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AlgorithmId {
    Symmetric(SymmetricAlgorithm),
    Asymmetric(RsaOaep),
    Hybrid { wrap: RsaOaep, data: SymmetricAlgorithm },
    Legacy(LegacyAlgorithm),
}

impl AlgorithmId {
    /// Get the descriptor all validation for this algorithm is run against.
    pub fn descriptor(&self) -> AlgorithmDescriptor {
        let name = self.to_string();
        match self {
            AlgorithmId::Symmetric(alg) => AlgorithmDescriptor {
                name,
                key_size_bits: alg.key_size() * 8,
                nonce_size_bytes: alg.nonce_size(),
                tag_size_bytes: alg.tag_size(),
                status: AlgorithmStatus::Active,
            },
            AlgorithmId::Asymmetric(rsa) => AlgorithmDescriptor {
                name,
                key_size_bits: rsa.bits,
                nonce_size_bytes: 0,
                tag_size_bytes: 0,
                status: AlgorithmStatus::Active,
            },
            AlgorithmId::Hybrid { wrap, data } => AlgorithmDescriptor {
                name,
                key_size_bits: wrap.bits,
                nonce_size_bytes: data.nonce_size(),
                tag_size_bytes: data.tag_size(),
                status: AlgorithmStatus::Active,
            },
            AlgorithmId::Legacy(alg) => {
                let (key_size_bits, nonce_size_bytes, tag_size_bytes) = alg.sizes();
                AlgorithmDescriptor {
                    name,
                    key_size_bits,
                    nonce_size_bytes,
                    tag_size_bytes,
                    status: AlgorithmStatus::Deprecated,
                }
            }
        }
    }

    pub fn is_deprecated(&self) -> bool {
        matches!(self, AlgorithmId::Legacy(_))
    }
}

impl From<SymmetricAlgorithm> for AlgorithmId {
    fn from(value: SymmetricAlgorithm) -> Self {
        AlgorithmId::Symmetric(value)
    }
}

impl From<RsaOaep> for AlgorithmId {
    fn from(value: RsaOaep) -> Self {
        AlgorithmId::Asymmetric(value)
    }
}

impl fmt::Display for AlgorithmId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AlgorithmId::Symmetric(alg) => fmt::Display::fmt(alg, f),
            AlgorithmId::Asymmetric(rsa) => fmt::Display::fmt(rsa, f),
            AlgorithmId::Hybrid { wrap, data } => write!(f, "{}+{}", wrap, data),
            AlgorithmId::Legacy(alg) => f.write_str(alg.name()),
        }
    }
}

impl FromStr for AlgorithmId {
    type Err = CryptoError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((wrap, data)) = s.split_once('+') {
            return Ok(AlgorithmId::Hybrid {
                wrap: wrap.parse()?,
                data: data.parse()?,
            });
        }
        if s.starts_with("RSA-") {
            return Ok(AlgorithmId::Asymmetric(s.parse()?));
        }
        if let Ok(alg) = s.parse::<SymmetricAlgorithm>() {
            return Ok(AlgorithmId::Symmetric(alg));
        }
        LegacyAlgorithm::ALL
            .into_iter()
            .find(|alg| alg.name() == s)
            .map(AlgorithmId::Legacy)
            .ok_or_else(|| CryptoError::UnsupportedAlgorithm(s.to_owned()))
    }
}

impl TryFrom<String> for AlgorithmId {
    type Error = CryptoError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AlgorithmId> for String {
    fn from(value: AlgorithmId) -> Self {
        value.to_string()
    }
}

/// Whether an algorithm may be used for new data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlgorithmStatus {
    Active,
    Deprecated,
}

/// Sizes and status for one algorithm.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmDescriptor {
    pub name: String,
    pub key_size_bits: usize,
    pub nonce_size_bytes: usize,
    pub tag_size_bytes: usize,
    pub status: AlgorithmStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_names() {
        let cases = [
            "AES-GCM",
            "ChaCha20-Poly1305",
            "XChaCha20-Poly1305",
            "RSA-4096-OAEP-SHA-256",
            "RSA-2048-OAEP-SHA-512+ChaCha20-Poly1305",
            "3DES-CBC",
            "RC4-STREAM",
        ];
        for case in cases {
            let id: AlgorithmId = case.parse().unwrap();
            assert_eq!(id.to_string(), case);
        }
    }

    #[test]
    fn reject_unknown() {
        assert!("AES-SIV".parse::<AlgorithmId>().is_err());
        assert!("RSA-abc-OAEP-SHA-256".parse::<AlgorithmId>().is_err());
        assert!("RSA-2048-OAEP-MD5".parse::<AlgorithmId>().is_err());
        assert!("RSA-2048-OAEP-SHA-256+DES-CBC".parse::<AlgorithmId>().is_err());
    }

    #[test]
    fn descriptors() {
        let desc = AlgorithmId::Symmetric(SymmetricAlgorithm::XChaCha20Poly1305).descriptor();
        assert_eq!(desc.key_size_bits, 256);
        assert_eq!(desc.nonce_size_bytes, 24);
        assert_eq!(desc.tag_size_bytes, 16);
        assert_eq!(desc.status, AlgorithmStatus::Active);

        let desc = AlgorithmId::Legacy(LegacyAlgorithm::DesCbc).descriptor();
        assert_eq!(desc.nonce_size_bytes, 8);
        assert_eq!(desc.status, AlgorithmStatus::Deprecated);
        assert_eq!(desc.name, "DES-CBC");
    }

    #[test]
    fn oaep_capacity() {
        let rsa = RsaOaep { bits: 2048, hash: OaepHash::Sha256 };
        assert_eq!(rsa.capacity(), 256 - 64 - 2);
        let rsa = RsaOaep { bits: 4096, hash: OaepHash::Sha512 };
        assert_eq!(rsa.capacity(), 512 - 128 - 2);
    }

    #[test]
    fn serde_as_string() {
        let id = AlgorithmId::Asymmetric(RsaOaep { bits: 3072, hash: OaepHash::Sha384 });
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"RSA-3072-OAEP-SHA-384\"");
        let back: AlgorithmId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
