use std::{fmt, io};

use crate::algorithm::AlgorithmId;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Possible cryptographic error conditions.
///
/// Authentication-related variants carry no detail on purpose: a caller (or an attacker
/// observing a caller) must not be able to tell a wrong key from a corrupted ciphertext.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Pre-flight validation failed. Every violated rule is listed, not just the first.
    #[error("Configuration invalid: {}", ViolationList(.0))]
    ConfigurationInvalid(Vec<ConfigViolation>),
    /// Key length doesn't match what the algorithm requires.
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    /// Asymmetric key is below the minimum accepted modulus size.
    #[error("Key size of {actual} bits is below the minimum of {minimum} bits")]
    WeakKeySize { minimum: usize, actual: usize },
    /// Plaintext exceeds what a single RSA-OAEP block can hold.
    #[error("Plaintext too large: at most {max} bytes allowed, got {actual}")]
    PlaintextTooLarge { max: usize, actual: usize },
    /// AEAD tag verification failed.
    #[error("Authentication failed")]
    AuthenticationFailed,
    /// RSA-OAEP decryption failed.
    #[error("Decryption failed")]
    DecryptionFailed,
    /// Either stage of hybrid decryption failed.
    #[error("Hybrid decryption failed")]
    HybridDecryptionFailed,
    /// Key material could not be parsed.
    #[error("Malformed key: {0}")]
    MalformedKey(&'static str),
    /// Envelope fields are missing or inconsistent with its algorithm.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),
    /// A stream's chunk counter would wrap, which would reuse a nonce.
    #[error("Nonce space exhausted for this key")]
    NonceSpaceExhausted,
    /// The final chunk of a stream was already processed.
    #[error("Stream already finalized")]
    StreamFinalized,
    /// PBKDF2 iteration count is below the accepted minimum.
    #[error("Iteration count {actual} is below the minimum of {minimum}")]
    IterationsTooLow { minimum: u32, actual: u32 },
    /// No secure random source or primitive backend is available.
    #[error("Cryptographic backend unavailable: {0}")]
    CryptoUnavailable(String),
    /// Algorithm isn't known, or has no live path for the requested operation.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    /// Envelope was produced by a different algorithm than the cipher handling it.
    #[error("Algorithm mismatch: expected {expected}, envelope uses {actual}")]
    AlgorithmMismatch { expected: AlgorithmId, actual: AlgorithmId },
    /// The persistence collaborator rejected an envelope.
    #[error("Persistence failed: {0}")]
    Persistence(String),
    /// Reading stream input failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CryptoError {
    /// Whether retrying with corrected input could succeed. Authentication failures are terminal
    /// for the envelope in question.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CryptoError::ConfigurationInvalid(_)
                | CryptoError::InvalidKeyLength { .. }
                | CryptoError::WeakKeySize { .. }
                | CryptoError::PlaintextTooLarge { .. }
                | CryptoError::IterationsTooLow { .. }
                | CryptoError::MalformedKey(_)
                | CryptoError::UnsupportedAlgorithm(_)
                | CryptoError::AlgorithmMismatch { .. }
        )
    }

    pub(crate) fn invalid(violation: ConfigViolation) -> Self {
        CryptoError::ConfigurationInvalid(vec![violation])
    }
}

/// A single rule violated by a configuration or request.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigViolation {
    #[error("unknown algorithm \"{0}\"")]
    UnknownAlgorithm(String),
    #[error("key is {actual_bits} bits, {algorithm} requires {expected_bits}")]
    KeyLength { algorithm: String, expected_bits: usize, actual_bits: usize },
    #[error("{algorithm} nonce is {expected} bytes, descriptor says {actual}")]
    NonceLength { algorithm: String, expected: usize, actual: usize },
    #[error("{algorithm} tag is {expected} bytes, descriptor says {actual}")]
    TagLength { algorithm: String, expected: usize, actual: usize },
    #[error("key size of {actual_bits} bits is below the minimum of {minimum_bits}")]
    KeyTooShort { minimum_bits: usize, actual_bits: usize },
    #[error("RSA modulus of {0} bits is not one of 2048, 3072, 4096")]
    UnsupportedModulus(usize),
    #[error("iteration count {actual} is below the minimum of {minimum}")]
    IterationsTooLow { minimum: u32, actual: u32 },
    #[error("salt is {actual} bytes, at least {minimum} required")]
    SaltTooShort { minimum: usize, actual: usize },
    #[error("password is empty")]
    EmptyPassword,
    #[error("{algorithm} cannot be used with a {secret}")]
    SecretMismatch { algorithm: String, secret: &'static str },
    #[error("stream chunk size must be non-zero")]
    ZeroChunkSize,
    #[error("{0} is deprecated and cannot be the default algorithm")]
    DeprecatedDefault(String),
    #[error("configuration could not be parsed: {0}")]
    Unparseable(String),
}

struct ViolationList<'a>(&'a [ConfigViolation]);

impl fmt::Display for ViolationList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, violation) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", violation)?;
        }
        Ok(())
    }
}
