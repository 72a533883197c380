//! [`serde`](https://serde.rs/) support for [`Envelope`].
//!
//! If the serializer is human-readable, every byte field is written as a standard base64 string
//! and unset optional fields are skipped. Otherwise the fields are written as raw bytes, and both
//! optional fields are always present so that non-self-describing formats can decode them.
//! The algorithm is always its string form (see [`crate::algorithm`]).

use crate::{algorithm::AlgorithmId, envelope::Envelope};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{
    de::{Deserialize, Deserializer, Error},
    ser::{Serialize, Serializer},
};
use serde_bytes::ByteBuf;

#[derive(serde::Serialize, serde::Deserialize)]
struct Text {
    ciphertext: String,
    nonce: String,
    tag: String,
    algorithm: AlgorithmId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    salt: Option<String>,
    #[serde(default, rename = "wrappedKey", skip_serializing_if = "Option::is_none")]
    wrapped_key: Option<String>,
}

#[derive(serde::Serialize)]
struct BytesRef<'a> {
    #[serde(with = "serde_bytes")]
    ciphertext: &'a [u8],
    #[serde(with = "serde_bytes")]
    nonce: &'a [u8],
    #[serde(with = "serde_bytes")]
    tag: &'a [u8],
    algorithm: AlgorithmId,
    salt: Option<&'a serde_bytes::Bytes>,
    wrapped_key: Option<&'a serde_bytes::Bytes>,
}

#[derive(serde::Deserialize)]
struct Bytes {
    ciphertext: ByteBuf,
    nonce: ByteBuf,
    tag: ByteBuf,
    algorithm: AlgorithmId,
    salt: Option<ByteBuf>,
    wrapped_key: Option<ByteBuf>,
}

impl Serialize for Envelope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            Text {
                ciphertext: STANDARD.encode(self.ciphertext()),
                nonce: STANDARD.encode(self.nonce()),
                tag: STANDARD.encode(self.tag()),
                algorithm: self.algorithm(),
                salt: self.salt().map(|s| STANDARD.encode(s)),
                wrapped_key: self.wrapped_key().map(|k| STANDARD.encode(k)),
            }
            .serialize(serializer)
        } else {
            BytesRef {
                ciphertext: self.ciphertext(),
                nonce: self.nonce(),
                tag: self.tag(),
                algorithm: self.algorithm(),
                salt: self.salt().map(serde_bytes::Bytes::new),
                wrapped_key: self.wrapped_key().map(serde_bytes::Bytes::new),
            }
            .serialize(serializer)
        }
    }
}

fn decode_b64<E: Error>(field: &'static str, value: &str) -> Result<Vec<u8>, E> {
    STANDARD
        .decode(value)
        .map_err(|_| E::custom(format!("{} is not valid base64", field)))
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let text = Text::deserialize(deserializer)?;
            let mut env = Envelope::new(
                text.algorithm,
                decode_b64("ciphertext", &text.ciphertext)?,
                decode_b64("nonce", &text.nonce)?,
                decode_b64("tag", &text.tag)?,
            );
            if let Some(salt) = text.salt {
                env = env.with_salt(decode_b64("salt", &salt)?);
            }
            if let Some(key) = text.wrapped_key {
                env = env.with_wrapped_key(decode_b64("wrappedKey", &key)?);
            }
            Ok(env)
        } else {
            let raw = Bytes::deserialize(deserializer)?;
            let mut env = Envelope::new(
                raw.algorithm,
                raw.ciphertext.into_vec(),
                raw.nonce.into_vec(),
                raw.tag.into_vec(),
            );
            if let Some(salt) = raw.salt {
                env = env.with_salt(salt.into_vec());
            }
            if let Some(key) = raw.wrapped_key {
                env = env.with_wrapped_key(key.into_vec());
            }
            Ok(env)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::{OaepHash, RsaOaep, SymmetricAlgorithm};

    fn hybrid_sample() -> Envelope {
        Envelope::new(
            AlgorithmId::Hybrid {
                wrap: RsaOaep { bits: 2048, hash: OaepHash::Sha256 },
                data: SymmetricAlgorithm::ChaCha20Poly1305,
            },
            vec![0xde, 0xad, 0xbe, 0xef],
            vec![0u8; 12],
            vec![0xffu8; 16],
        )
        .with_wrapped_key(vec![5u8; 256])
    }

    #[test]
    fn json_field_names() {
        let value = serde_json::to_value(hybrid_sample()).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj["ciphertext"], "3q2+7w==");
        assert_eq!(obj["algorithm"], "RSA-2048-OAEP-SHA-256+ChaCha20-Poly1305");
        assert!(obj.contains_key("wrappedKey"));
        assert!(!obj.contains_key("salt"));
    }

    #[test]
    fn binary_format() {
        let env = hybrid_sample();
        let encoded = bincode::serialize(&env).unwrap();
        let decoded: Envelope = bincode::deserialize(&encoded).unwrap();
        assert_eq!(decoded, env);

        let salted = Envelope::new(
            AlgorithmId::Symmetric(SymmetricAlgorithm::AesGcm),
            Vec::new(),
            vec![1u8; 12],
            vec![2u8; 16],
        )
        .with_salt(vec![3u8; 16]);
        let encoded = bincode::serialize(&salted).unwrap();
        let decoded: Envelope = bincode::deserialize(&encoded).unwrap();
        assert_eq!(decoded, salted);
    }
}
