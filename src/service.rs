//! The encryption service.
//!
//! [`EncryptionService`] is the single entry point most callers need. It checks each request
//! against its algorithm's descriptor and the service configuration before any cipher runs,
//! routes it to the matching cipher, and reports security-relevant events to an [`AuditSink`].
//!
//! # Example
//!
//! ```
//! # use envelope_crypto::{key::SymmetricKey, service::*, config::ServiceConfig};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut csprng = rand::rngs::OsRng;
//! let service = EncryptionService::new(ServiceConfig::default())?;
//! let key = SymmetricKey::generate(&mut csprng, 32)?;
//!
//! let request = EncryptRequest::new("ChaCha20-Poly1305", Secret::Key(&key), b"hello")
//!     .with_associated_data(b"record-17");
//! let outcome = service.encrypt(&mut csprng, &request)?;
//! assert!(outcome.advisory.is_none());
//!
//! let plain = service.decrypt(&outcome.envelope, DecryptSecret::Key(&key), Some(b"record-17"))?;
//! assert_eq!(plain, b"hello");
//! # Ok(())
//! # }
//! ```
//!
//! # Deprecated algorithms
//!
//! A request naming a legacy algorithm is not refused, but it is never served with that
//! algorithm either: the data is sealed with the advisory's recommended AEAD (the envelope
//! records the algorithm actually used) and the outcome carries the [`Advisory`]. Envelopes that
//! claim a legacy algorithm cannot be decrypted.

use rand_core::{CryptoRng, RngCore};
use tracing::debug;

use std::{
    fmt,
    io::{Read, Write},
    sync::Arc,
};

use crate::{
    algorithm::{AlgorithmId, SymmetricAlgorithm, MIN_RSA_BITS, RSA_MODULUS_SIZES},
    asymmetric::{AsymmetricCipher, PrivateKey, PublicKey},
    audit::{AuditEvent, AuditKind, AuditSink, Severity, TracingAuditSink},
    config::ServiceConfig,
    envelope::Envelope,
    error::ConfigViolation,
    hybrid::HybridEncryptor,
    kdf::{DerivedKey, KeyDerivation},
    key::SymmetricKey,
    legacy::{Advisory, LegacyAdvisor},
    rotation::{KeyRotationManager, RotationReport, RotationState},
    stream::{self, EncryptStream, ReaderChunks, StreamHeader},
    symmetric::{validate_descriptor, SymmetricCipher},
    CryptoError, Result,
};

/// Secret used to encrypt. Passwords never appear in `Debug` output.
#[derive(Clone, Copy)]
pub enum Secret<'a> {
    Key(&'a SymmetricKey),
    /// A key is derived with the service's KDF settings and a fresh salt.
    Password(&'a str),
    PublicKey(&'a PublicKey),
}

impl Secret<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Secret::Key(_) => "symmetric key",
            Secret::Password(_) => "password",
            Secret::PublicKey(_) => "public key",
        }
    }
}

impl fmt::Debug for Secret<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Secret::Key(key) => f.debug_tuple("Key").field(key).finish(),
            Secret::Password(_) => f.write_str("Password(<redacted>)"),
            Secret::PublicKey(key) => f.debug_tuple("PublicKey").field(key).finish(),
        }
    }
}

/// Secret used to decrypt. Passwords never appear in `Debug` output.
#[derive(Clone, Copy)]
pub enum DecryptSecret<'a> {
    Key(&'a SymmetricKey),
    /// Re-derives the key using the salt stored in the envelope.
    Password(&'a str),
    PrivateKey(&'a PrivateKey),
}

impl DecryptSecret<'_> {
    fn kind(&self) -> &'static str {
        match self {
            DecryptSecret::Key(_) => "symmetric key",
            DecryptSecret::Password(_) => "password",
            DecryptSecret::PrivateKey(_) => "private key",
        }
    }
}

impl fmt::Debug for DecryptSecret<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecryptSecret::Key(key) => f.debug_tuple("Key").field(key).finish(),
            DecryptSecret::Password(_) => f.write_str("Password(<redacted>)"),
            DecryptSecret::PrivateKey(key) => f.debug_tuple("PrivateKey").field(key).finish(),
        }
    }
}

/// One encryption request. `Debug` shows only the plaintext's length.
#[derive(Clone, Copy)]
pub struct EncryptRequest<'a> {
    /// Algorithm name, e.g. `AES-GCM` or `RSA-4096-OAEP-SHA-256+AES-GCM`. If empty, the service
    /// picks one to suit the secret.
    pub algorithm: &'a str,
    pub secret: Secret<'a>,
    pub plaintext: &'a [u8],
    pub associated_data: Option<&'a [u8]>,
}

impl<'a> EncryptRequest<'a> {
    pub fn new(algorithm: &'a str, secret: Secret<'a>, plaintext: &'a [u8]) -> Self {
        Self {
            algorithm,
            secret,
            plaintext,
            associated_data: None,
        }
    }

    pub fn with_associated_data(mut self, associated_data: &'a [u8]) -> Self {
        self.associated_data = Some(associated_data);
        self
    }
}

impl fmt::Debug for EncryptRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EncryptRequest")
            .field("algorithm", &self.algorithm)
            .field("secret", &self.secret)
            .field("plaintext_len", &self.plaintext.len())
            .field("associated_data_len", &self.associated_data.map(<[u8]>::len))
            .finish()
    }
}

/// Result of [`EncryptionService::encrypt`].
#[derive(Clone, Debug)]
pub struct EncryptOutcome {
    pub envelope: Envelope,
    /// Set whenever the request named a deprecated algorithm.
    pub advisory: Option<Advisory>,
}

/// Validating, auditing front end to every cipher in the crate.
pub struct EncryptionService {
    config: ServiceConfig,
    kdf: KeyDerivation,
    advisor: LegacyAdvisor,
    audit: Arc<dyn AuditSink>,
}

impl EncryptionService {
    /// Build a service. Fails if the configuration is invalid. Audit events go to `tracing`.
    pub fn new(config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        let kdf = KeyDerivation::new(&config.kdf)?;
        Ok(Self {
            config,
            kdf,
            advisor: LegacyAdvisor::new(),
            audit: Arc::new(TracingAuditSink),
        })
    }

    /// Send audit events to `sink` instead.
    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn record(&self, kind: AuditKind, severity: Severity, detail: String) {
        self.audit.record(AuditEvent::new(kind, severity, detail));
    }

    /// The algorithm a request will be served with, before legacy substitution.
    fn requested_algorithm(&self, request: &EncryptRequest) -> Result<AlgorithmId> {
        if !request.algorithm.is_empty() {
            return request.algorithm.parse().map_err(|_| {
                let name = request.algorithm.to_owned();
                CryptoError::invalid(ConfigViolation::UnknownAlgorithm(name))
            });
        }
        let data = match self.config.default_algorithm {
            AlgorithmId::Symmetric(alg) => alg,
            _ => SymmetricAlgorithm::default(),
        };
        Ok(match request.secret {
            Secret::PublicKey(key) => AlgorithmId::Hybrid {
                wrap: AsymmetricCipher::new(self.config.rsa_hash).params(key),
                data,
            },
            _ => self.config.default_algorithm,
        })
    }

    /// The algorithm a request is actually served with, and the advisory if it was substituted.
    fn effective_algorithm(&self, requested: AlgorithmId) -> (AlgorithmId, Option<Advisory>) {
        match self.advisor.advise_algorithm(requested) {
            Some(advisory) => (advisory.recommended, Some(advisory)),
            None => (requested, None),
        }
    }

    /// Check a request without encrypting anything. Every violated rule is reported.
    pub fn validate_config(&self, request: &EncryptRequest) -> Result<()> {
        let requested = match self.requested_algorithm(request) {
            Ok(alg) => alg,
            Err(CryptoError::ConfigurationInvalid(mut violations)) => {
                if let Secret::Password(p) = request.secret {
                    if p.is_empty() {
                        violations.push(ConfigViolation::EmptyPassword);
                    }
                }
                return Err(CryptoError::ConfigurationInvalid(violations));
            }
            Err(e) => return Err(e),
        };
        let (algorithm, _) = self.effective_algorithm(requested);
        let violations = self.violations(algorithm, request.secret);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(CryptoError::ConfigurationInvalid(violations))
        }
    }

    fn violations(&self, algorithm: AlgorithmId, secret: Secret) -> Vec<ConfigViolation> {
        let mut violations = Vec::new();
        let name = algorithm.to_string();
        match (algorithm, secret) {
            (AlgorithmId::Symmetric(alg), Secret::Key(key)) => {
                violations.extend(validate_descriptor(&algorithm.descriptor(), alg));
                let actual_bits = key.len() * 8;
                if key.len() != alg.key_size() {
                    violations.push(ConfigViolation::KeyLength {
                        algorithm: name,
                        expected_bits: alg.key_size() * 8,
                        actual_bits,
                    });
                }
                if actual_bits < self.config.min_symmetric_key_bits {
                    violations.push(ConfigViolation::KeyTooShort {
                        minimum_bits: self.config.min_symmetric_key_bits,
                        actual_bits,
                    });
                }
            }
            (AlgorithmId::Symmetric(alg), Secret::Password(password)) => {
                violations.extend(validate_descriptor(&algorithm.descriptor(), alg));
                violations.extend(self.config.kdf.violations());
                if password.is_empty() {
                    violations.push(ConfigViolation::EmptyPassword);
                }
            }
            (AlgorithmId::Asymmetric(rsa), Secret::PublicKey(key))
            | (AlgorithmId::Hybrid { wrap: rsa, .. }, Secret::PublicKey(key)) => {
                if let AlgorithmId::Hybrid { data, .. } = algorithm {
                    let descriptor = AlgorithmId::from(data).descriptor();
                    violations.extend(validate_descriptor(&descriptor, data));
                }
                if key.bits() != rsa.bits {
                    violations.push(ConfigViolation::KeyLength {
                        algorithm: name,
                        expected_bits: rsa.bits,
                        actual_bits: key.bits(),
                    });
                }
                if key.bits() < MIN_RSA_BITS {
                    violations.push(ConfigViolation::KeyTooShort {
                        minimum_bits: MIN_RSA_BITS,
                        actual_bits: key.bits(),
                    });
                } else if !RSA_MODULUS_SIZES.contains(&key.bits()) {
                    violations.push(ConfigViolation::UnsupportedModulus(key.bits()));
                }
            }
            (_, secret) => violations.push(ConfigViolation::SecretMismatch {
                algorithm: name,
                secret: secret.kind(),
            }),
        }
        violations
    }

    /// Validate and encrypt one request.
    pub fn encrypt<R>(&self, csprng: &mut R, request: &EncryptRequest) -> Result<EncryptOutcome>
    where
        R: CryptoRng + RngCore,
    {
        if let Err(e) = self.validate_config(request) {
            self.record(
                AuditKind::ConfigurationRejected,
                Severity::Warning,
                format!("encryption request rejected: {}", e),
            );
            return Err(e);
        }
        let requested = self.requested_algorithm(request)?;
        let (algorithm, advisory) = self.effective_algorithm(requested);
        if let Some(advisory) = &advisory {
            self.record(
                AuditKind::DeprecatedAlgorithm,
                Severity::Warning,
                format!(
                    "{} requested ({} urgency); sealed with {} instead",
                    requested, advisory.urgency, algorithm
                ),
            );
        }

        let aad = request.associated_data;
        let envelope = match (algorithm, request.secret) {
            (AlgorithmId::Symmetric(alg), Secret::Key(key)) => {
                SymmetricCipher::new(alg).encrypt(csprng, request.plaintext, key, aad)?
            }
            (AlgorithmId::Symmetric(alg), Secret::Password(password)) => {
                let (key, salt) = self
                    .kdf
                    .derive_from_password(csprng, password.as_bytes(), None)?
                    .into_parts();
                SymmetricCipher::new(alg)
                    .encrypt(csprng, request.plaintext, &key, aad)?
                    .with_salt(salt)
            }
            (AlgorithmId::Asymmetric(rsa), Secret::PublicKey(key)) => {
                AsymmetricCipher::new(rsa.hash).encrypt(csprng, request.plaintext, key)?
            }
            (AlgorithmId::Hybrid { wrap, data }, Secret::PublicKey(key)) => {
                HybridEncryptor::new(data, wrap.hash).encrypt_envelope(
                    csprng,
                    request.plaintext,
                    key,
                    aad,
                )?
            }
            (_, secret) => {
                return Err(CryptoError::invalid(ConfigViolation::SecretMismatch {
                    algorithm: algorithm.to_string(),
                    secret: secret.kind(),
                }))
            }
        };
        debug!(%algorithm, len = request.plaintext.len(), "request encrypted");
        Ok(EncryptOutcome { envelope, advisory })
    }

    /// Decrypt an envelope with the secret the caller says belongs to it.
    pub fn decrypt(
        &self,
        envelope: &Envelope,
        secret: DecryptSecret,
        associated_data: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        let result = self.open(envelope, secret, associated_data);
        if let Err(e) = &result {
            match e {
                CryptoError::AuthenticationFailed
                | CryptoError::DecryptionFailed
                | CryptoError::HybridDecryptionFailed => self.record(
                    AuditKind::AuthenticationFailure,
                    Severity::Warning,
                    format!("{} envelope failed to decrypt: {}", envelope.algorithm(), e),
                ),
                CryptoError::UnsupportedAlgorithm(_) => self.record(
                    AuditKind::DeprecatedAlgorithm,
                    Severity::Critical,
                    format!("refused to decrypt {} envelope", envelope.algorithm()),
                ),
                _ => {}
            }
        }
        result
    }

    fn open(
        &self,
        envelope: &Envelope,
        secret: DecryptSecret,
        aad: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        match (envelope.algorithm(), secret) {
            (AlgorithmId::Legacy(alg), _) => Err(CryptoError::UnsupportedAlgorithm(format!(
                "{} is deprecated and has no decryption path",
                alg.name()
            ))),
            (AlgorithmId::Symmetric(alg), DecryptSecret::Key(key)) => {
                SymmetricCipher::new(alg).decrypt(envelope, key, aad)
            }
            (AlgorithmId::Symmetric(alg), DecryptSecret::Password(password)) => {
                let salt = envelope.salt().ok_or_else(|| {
                    CryptoError::MalformedEnvelope("password-based envelope has no salt".into())
                })?;
                let key = self.kdf.derive_key(password.as_bytes(), salt, alg.key_size())?;
                SymmetricCipher::new(alg).decrypt(envelope, &key, aad)
            }
            (AlgorithmId::Asymmetric(rsa), DecryptSecret::PrivateKey(key)) => {
                AsymmetricCipher::new(rsa.hash).decrypt(envelope, key)
            }
            (AlgorithmId::Hybrid { wrap, data }, DecryptSecret::PrivateKey(key)) => {
                HybridEncryptor::new(data, wrap.hash).decrypt_envelope(envelope, key, aad)
            }
            (algorithm, secret) => Err(CryptoError::invalid(ConfigViolation::SecretMismatch {
                algorithm: algorithm.to_string(),
                secret: secret.kind(),
            })),
        }
    }

    /// Derive a key from a password with the configured KDF settings.
    pub fn derive_from_password<R>(
        &self,
        csprng: &mut R,
        password: &str,
        salt: Option<&[u8]>,
    ) -> Result<DerivedKey>
    where
        R: CryptoRng + RngCore,
    {
        match self.kdf.derive_from_password(csprng, password.as_bytes(), salt) {
            Ok(derived) => {
                self.record(
                    AuditKind::KeyDerived,
                    Severity::Info,
                    format!(
                        "derived key {} with {} iterations",
                        derived.key().id(),
                        self.kdf.iterations()
                    ),
                );
                Ok(derived)
            }
            Err(e) => {
                self.record(
                    AuditKind::ConfigurationRejected,
                    Severity::Warning,
                    format!("key derivation rejected: {}", e),
                );
                Err(e)
            }
        }
    }

    /// Rotate envelopes to a new key with a default [`KeyRotationManager`].
    pub fn rotate<R>(
        &self,
        csprng: &mut R,
        old_key: &SymmetricKey,
        envelopes: &[Envelope],
        new_key: &SymmetricKey,
    ) -> RotationReport
    where
        R: CryptoRng + RngCore,
    {
        self.rotate_with(&KeyRotationManager::new(), csprng, old_key, envelopes, new_key)
    }

    /// Rotate envelopes using a caller-configured manager (target algorithm, sink,
    /// cancellation).
    pub fn rotate_with<R>(
        &self,
        manager: &KeyRotationManager,
        csprng: &mut R,
        old_key: &SymmetricKey,
        envelopes: &[Envelope],
        new_key: &SymmetricKey,
    ) -> RotationReport
    where
        R: CryptoRng + RngCore,
    {
        let report = manager.rotate(csprng, old_key, envelopes, new_key);
        self.audit_rotation(old_key, new_key, &report);
        report
    }

    /// Rotate envelopes across the configured number of worker threads.
    #[cfg(feature = "getrandom")]
    pub fn rotate_parallel(
        &self,
        manager: &KeyRotationManager,
        old_key: &SymmetricKey,
        envelopes: &[Envelope],
        new_key: &SymmetricKey,
    ) -> RotationReport {
        let report =
            manager.rotate_parallel(old_key, envelopes, new_key, self.config.rotation_workers);
        self.audit_rotation(old_key, new_key, &report);
        report
    }

    fn audit_rotation(
        &self,
        old_key: &SymmetricKey,
        new_key: &SymmetricKey,
        report: &RotationReport,
    ) {
        let severity = match report.state {
            RotationState::Completed => Severity::Info,
            _ => Severity::Warning,
        };
        let mut detail = format!(
            "rotation {} -> {}: {:?}, {} rotated, {} failed, {} unprocessed",
            old_key.id(),
            new_key.id(),
            report.state,
            report.succeeded(),
            report.failed(),
            report.unprocessed.len()
        );
        for failure in &report.failures {
            detail.push_str(&format!("; #{}: {}", failure.index, failure.reason));
        }
        self.record(AuditKind::RotationFinished, severity, detail);
    }

    /// Encrypt everything `reader` yields as a chunked stream, using the configured chunk size.
    /// The reader is consumed one chunk at a time as the returned iterator is driven.
    pub fn encrypt_stream<'k, R, In>(
        &self,
        csprng: &mut R,
        algorithm: SymmetricAlgorithm,
        key: &'k SymmetricKey,
        reader: In,
    ) -> Result<(StreamHeader, EncryptStream<'k, ReaderChunks<In>>)>
    where
        R: CryptoRng + RngCore,
        In: Read,
    {
        let chunks = ReaderChunks::new(reader, self.config.stream_chunk_size);
        stream::encrypt_stream(csprng, SymmetricCipher::new(algorithm), chunks, key)
    }

    /// Decrypt a chunked stream into `writer`, returning the number of bytes written. If any
    /// chunk fails, the error is returned and nothing from that chunk on is written.
    pub fn decrypt_stream<I, Out>(
        &self,
        header: &StreamHeader,
        chunks: I,
        key: &SymmetricKey,
        mut writer: Out,
    ) -> Result<u64>
    where
        I: IntoIterator<Item = Envelope>,
        Out: Write,
    {
        let mut written = 0u64;
        for plain in stream::decrypt_stream(header, chunks, key) {
            let plain = match plain {
                Ok(plain) => plain,
                Err(e) => {
                    if matches!(e, CryptoError::AuthenticationFailed) {
                        self.record(
                            AuditKind::AuthenticationFailure,
                            Severity::Warning,
                            format!("{} stream chunk failed to verify", header.algorithm()),
                        );
                    }
                    return Err(e);
                }
            };
            writer.write_all(&plain)?;
            written += plain.len() as u64;
        }
        writer.flush()?;
        Ok(written)
    }
}
