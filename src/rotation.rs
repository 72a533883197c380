//! Key rotation: re-encrypting stored envelopes under a new key.
//!
//! A rotation job decrypts each envelope with the old key and seals it again with the new one,
//! under a fresh nonce. Items are independent: one that fails is recorded with its index and
//! reason, and the job moves on. A job with any failure ends as
//! [`RotationState::PartiallyFailed`], never as `Completed`.
//!
//! Jobs can be cancelled from another thread through a [`CancelHandle`]. Cancellation is checked
//! between items, so an item already being processed always finishes; the indices that were never
//! started are listed in the report. A cancelled job that already recorded a failure still ends as
//! `PartiallyFailed`.
//!
//! Only AEAD envelopes can be rotated with a symmetric key. Others fail with
//! `UnsupportedAlgorithm`.

use parking_lot::Mutex;
use rand_core::{CryptoRng, RngCore};
use tracing::{info, warn};
use zeroize::Zeroize;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    algorithm::{AlgorithmId, SymmetricAlgorithm},
    envelope::Envelope,
    key::SymmetricKey,
    symmetric::SymmetricCipher,
    CryptoError, Result,
};

/// Lifecycle of a rotation job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RotationState {
    Pending,
    InProgress,
    Completed,
    PartiallyFailed,
    Cancelled,
}

impl RotationState {
    pub fn is_finished(&self) -> bool {
        !matches!(self, RotationState::Pending | RotationState::InProgress)
    }
}

/// Error returned by an [`EnvelopeSink`].
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SinkError(pub String);

/// Where re-encrypted envelopes are written as they are produced.
pub trait EnvelopeSink: Send + Sync {
    fn persist(&self, index: usize, envelope: &Envelope) -> std::result::Result<(), SinkError>;
}

/// Requests cancellation of a running rotation job.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RotatedEnvelope {
    pub index: usize,
    pub envelope: Envelope,
}

#[derive(Debug)]
pub struct RotationFailure {
    pub index: usize,
    pub reason: CryptoError,
}

/// Outcome of a rotation job. `rotated` and `failures` are sorted by index.
#[derive(Debug)]
pub struct RotationReport {
    pub state: RotationState,
    pub rotated: Vec<RotatedEnvelope>,
    pub failures: Vec<RotationFailure>,
    pub unprocessed: Vec<usize>,
}

impl RotationReport {
    pub fn succeeded(&self) -> usize {
        self.rotated.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.state == RotationState::Completed
    }
}

/// Runs rotation jobs.
pub struct KeyRotationManager {
    target: Option<SymmetricAlgorithm>,
    sink: Option<Arc<dyn EnvelopeSink>>,
    state: Mutex<RotationState>,
    cancel: CancelHandle,
}

impl Default for KeyRotationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyRotationManager {
    pub fn new() -> Self {
        Self {
            target: None,
            sink: None,
            state: Mutex::new(RotationState::Pending),
            cancel: CancelHandle::default(),
        }
    }

    /// Re-encrypt everything with this algorithm instead of each envelope's own.
    pub fn with_target(mut self, algorithm: SymmetricAlgorithm) -> Self {
        self.target = Some(algorithm);
        self
    }

    /// Hand each re-encrypted envelope to `sink`. A sink error counts as that item's failure.
    pub fn with_sink(mut self, sink: Arc<dyn EnvelopeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// State of the current (or most recent) job.
    pub fn state(&self) -> RotationState {
        *self.state.lock()
    }

    /// Handle for cancelling the current or next job.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Rotate `envelopes` from `old_key` to `new_key`, one at a time.
    pub fn rotate<R>(
        &self,
        csprng: &mut R,
        old_key: &SymmetricKey,
        envelopes: &[Envelope],
        new_key: &SymmetricKey,
    ) -> RotationReport
    where
        R: CryptoRng + RngCore + ?Sized,
    {
        self.start(old_key, new_key, envelopes.len());
        let mut rotated = Vec::new();
        let mut failures = Vec::new();
        let mut next = 0;
        while next < envelopes.len() && !self.cancel.is_cancelled() {
            match self.rotate_one(csprng, next, &envelopes[next], old_key, new_key) {
                Ok(envelope) => rotated.push(RotatedEnvelope { index: next, envelope }),
                Err(reason) => failures.push(RotationFailure { index: next, reason }),
            }
            next += 1;
        }
        self.finish(rotated, failures, (next..envelopes.len()).collect())
    }

    /// Rotate `envelopes` across `workers` threads, each drawing nonces from the OS.
    #[cfg(feature = "getrandom")]
    pub fn rotate_parallel(
        &self,
        old_key: &SymmetricKey,
        envelopes: &[Envelope],
        new_key: &SymmetricKey,
        workers: usize,
    ) -> RotationReport {
        use std::sync::atomic::AtomicUsize;

        self.start(old_key, new_key, envelopes.len());
        let next = AtomicUsize::new(0);
        let results = Mutex::new((Vec::new(), Vec::new()));
        std::thread::scope(|s| {
            for _ in 0..workers.max(1) {
                s.spawn(|| {
                    let mut csprng = rand_core::OsRng;
                    while !self.cancel.is_cancelled() {
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        if index >= envelopes.len() {
                            break;
                        }
                        let item = &envelopes[index];
                        let result = self.rotate_one(&mut csprng, index, item, old_key, new_key);
                        let mut results = results.lock();
                        match result {
                            Ok(envelope) => results.0.push(RotatedEnvelope { index, envelope }),
                            Err(reason) => results.1.push(RotationFailure { index, reason }),
                        }
                    }
                });
            }
        });
        let (mut rotated, mut failures) = results.into_inner();
        rotated.sort_by_key(|r: &RotatedEnvelope| r.index);
        failures.sort_by_key(|f: &RotationFailure| f.index);
        let claimed = next.into_inner().min(envelopes.len());
        self.finish(rotated, failures, (claimed..envelopes.len()).collect())
    }

    fn start(&self, old_key: &SymmetricKey, new_key: &SymmetricKey, count: usize) {
        *self.state.lock() = RotationState::InProgress;
        info!(from = %old_key.id(), to = %new_key.id(), count, "starting key rotation");
    }

    fn finish(
        &self,
        rotated: Vec<RotatedEnvelope>,
        failures: Vec<RotationFailure>,
        unprocessed: Vec<usize>,
    ) -> RotationReport {
        let state = if !failures.is_empty() {
            RotationState::PartiallyFailed
        } else if self.cancel.is_cancelled() && !unprocessed.is_empty() {
            RotationState::Cancelled
        } else {
            RotationState::Completed
        };
        if self.cancel.is_cancelled() {
            self.cancel.reset();
        }
        *self.state.lock() = state;
        info!(
            ?state,
            rotated = rotated.len(),
            failed = failures.len(),
            unprocessed = unprocessed.len(),
            "key rotation finished"
        );
        RotationReport {
            state,
            rotated,
            failures,
            unprocessed,
        }
    }

    fn rotate_one<R>(
        &self,
        csprng: &mut R,
        index: usize,
        envelope: &Envelope,
        old_key: &SymmetricKey,
        new_key: &SymmetricKey,
    ) -> Result<Envelope>
    where
        R: CryptoRng + RngCore + ?Sized,
    {
        let result = self.reencrypt(csprng, envelope, old_key, new_key).and_then(|rotated| {
            if let Some(sink) = &self.sink {
                sink.persist(index, &rotated)
                    .map_err(|e| CryptoError::Persistence(e.to_string()))?;
            }
            Ok(rotated)
        });
        if let Err(e) = &result {
            warn!(index, reason = %e, "envelope rotation failed");
        }
        result
    }

    fn reencrypt<R>(
        &self,
        csprng: &mut R,
        envelope: &Envelope,
        old_key: &SymmetricKey,
        new_key: &SymmetricKey,
    ) -> Result<Envelope>
    where
        R: CryptoRng + RngCore + ?Sized,
    {
        let algorithm = match envelope.algorithm() {
            AlgorithmId::Symmetric(alg) => alg,
            other => {
                return Err(CryptoError::UnsupportedAlgorithm(format!(
                    "{} envelopes cannot be rotated with a symmetric key",
                    other
                )))
            }
        };
        let mut plaintext = SymmetricCipher::new(algorithm).decrypt(envelope, old_key, None)?;
        let target = SymmetricCipher::new(self.target.unwrap_or(algorithm));
        let result = target.encrypt(csprng, &plaintext, new_key, None);
        plaintext.zeroize();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::{OaepHash, RsaOaep};

    fn corpus(key: &SymmetricKey, n: usize) -> Vec<Envelope> {
        let mut csprng = rand::rngs::OsRng;
        let cipher = SymmetricCipher::new(SymmetricAlgorithm::AesGcm);
        (0..n)
            .map(|i| {
                let record = format!("record {}", i);
                cipher.encrypt(&mut csprng, record.as_bytes(), key, None).unwrap()
            })
            .collect()
    }

    fn corrupt(env: &Envelope) -> Envelope {
        let mut tag = env.tag().to_vec();
        tag[0] ^= 0xFF;
        Envelope::new(env.algorithm(), env.ciphertext().to_vec(), env.nonce().to_vec(), tag)
    }

    fn keys() -> (SymmetricKey, SymmetricKey) {
        let mut csprng = rand::rngs::OsRng;
        (
            SymmetricKey::generate(&mut csprng, 32).unwrap(),
            SymmetricKey::generate(&mut csprng, 32).unwrap(),
        )
    }

    #[test]
    fn four_of_five() {
        let mut csprng = rand::rngs::OsRng;
        let (old, new) = keys();
        let mut envelopes = corpus(&old, 5);
        envelopes[2] = corrupt(&envelopes[2]);

        let manager = KeyRotationManager::new();
        assert_eq!(manager.state(), RotationState::Pending);
        let report = manager.rotate(&mut csprng, &old, &envelopes, &new);
        assert_eq!(report.state, RotationState::PartiallyFailed);
        assert_eq!(manager.state(), RotationState::PartiallyFailed);
        assert!(!report.is_complete());
        assert_eq!(report.succeeded(), 4);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures[0].index, 2);
        assert!(matches!(report.failures[0].reason, CryptoError::AuthenticationFailed));
        assert!(report.unprocessed.is_empty());

        let cipher = SymmetricCipher::new(SymmetricAlgorithm::AesGcm);
        for rotated in &report.rotated {
            let plain = cipher.decrypt(&rotated.envelope, &new, None).unwrap();
            assert_eq!(plain, format!("record {}", rotated.index).as_bytes());
            assert!(cipher.decrypt(&rotated.envelope, &old, None).is_err());
            assert_ne!(rotated.envelope.nonce(), envelopes[rotated.index].nonce());
        }
    }

    #[test]
    fn clean_run_completes() {
        let mut csprng = rand::rngs::OsRng;
        let (old, new) = keys();
        let report = KeyRotationManager::new().rotate(&mut csprng, &old, &corpus(&old, 3), &new);
        assert_eq!(report.state, RotationState::Completed);
        assert!(report.state.is_finished());
        assert_eq!(report.succeeded(), 3);

        let empty = KeyRotationManager::new().rotate(&mut csprng, &old, &[], &new);
        assert_eq!(empty.state, RotationState::Completed);
    }

    #[test]
    fn target_algorithm() {
        let mut csprng = rand::rngs::OsRng;
        let (old, new) = keys();
        let manager = KeyRotationManager::new().with_target(SymmetricAlgorithm::XChaCha20Poly1305);
        let report = manager.rotate(&mut csprng, &old, &corpus(&old, 2), &new);
        for rotated in &report.rotated {
            assert_eq!(
                rotated.envelope.algorithm(),
                AlgorithmId::from(SymmetricAlgorithm::XChaCha20Poly1305)
            );
            assert_eq!(rotated.envelope.nonce().len(), 24);
        }
    }

    #[test]
    fn non_aead_envelopes_fail_per_item() {
        let mut csprng = rand::rngs::OsRng;
        let (old, new) = keys();
        let mut envelopes = corpus(&old, 2);
        envelopes.push(Envelope::new(
            RsaOaep { bits: 2048, hash: OaepHash::Sha256 }.into(),
            vec![0u8; 256],
            Vec::new(),
            Vec::new(),
        ));
        let report = KeyRotationManager::new().rotate(&mut csprng, &old, &envelopes, &new);
        assert_eq!(report.succeeded(), 2);
        assert!(matches!(report.failures[0].reason, CryptoError::UnsupportedAlgorithm(_)));
    }

    struct Recorder {
        seen: Mutex<Vec<usize>>,
        fail_on: Option<usize>,
        cancel_after: Option<(usize, CancelHandle)>,
    }

    impl EnvelopeSink for Recorder {
        fn persist(
            &self,
            index: usize,
            _envelope: &Envelope,
        ) -> std::result::Result<(), SinkError> {
            if self.fail_on == Some(index) {
                return Err(SinkError("disk full".into()));
            }
            self.seen.lock().push(index);
            if let Some((after, handle)) = &self.cancel_after {
                if *after == index {
                    handle.cancel();
                }
            }
            Ok(())
        }
    }

    #[test]
    fn sink_failures_are_item_failures() {
        let mut csprng = rand::rngs::OsRng;
        let (old, new) = keys();
        let sink = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            fail_on: Some(1),
            cancel_after: None,
        });
        let manager = KeyRotationManager::new().with_sink(sink.clone());
        let report = manager.rotate(&mut csprng, &old, &corpus(&old, 3), &new);
        assert_eq!(report.state, RotationState::PartiallyFailed);
        assert_eq!(*sink.seen.lock(), vec![0, 2]);
        match &report.failures[0].reason {
            CryptoError::Persistence(msg) => assert_eq!(msg, "disk full"),
            other => panic!("expected Persistence, got {:?}", other),
        }
    }

    #[test]
    fn cancellation_between_items() {
        let mut csprng = rand::rngs::OsRng;
        let (old, new) = keys();
        let manager = KeyRotationManager::new();
        let sink = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            fail_on: None,
            cancel_after: Some((1, manager.cancel_handle())),
        });
        let manager = manager.with_sink(sink);
        let report = manager.rotate(&mut csprng, &old, &corpus(&old, 5), &new);
        assert_eq!(report.state, RotationState::Cancelled);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.unprocessed, vec![2, 3, 4]);

        // The handle is cleared for the next job
        let report = manager.rotate(&mut csprng, &old, &corpus(&old, 1), &new);
        assert_eq!(report.state, RotationState::Completed);
        assert_eq!(report.succeeded(), 1);
    }

    #[test]
    fn failure_outranks_cancellation() {
        let mut csprng = rand::rngs::OsRng;
        let (old, new) = keys();
        let manager = KeyRotationManager::new();
        let sink = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            fail_on: None,
            cancel_after: Some((1, manager.cancel_handle())),
        });
        let manager = manager.with_sink(sink);
        let mut envelopes = corpus(&old, 5);
        envelopes[0] = corrupt(&envelopes[0]);

        let report = manager.rotate(&mut csprng, &old, &envelopes, &new);
        assert_eq!(report.state, RotationState::PartiallyFailed);
        assert_eq!(manager.state(), RotationState::PartiallyFailed);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures[0].index, 0);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.unprocessed, vec![2, 3, 4]);
    }

    #[cfg(feature = "getrandom")]
    #[test]
    fn parallel_rotation() {
        let (old, new) = keys();
        let mut envelopes = corpus(&old, 20);
        envelopes[3] = corrupt(&envelopes[3]);
        envelopes[17] = corrupt(&envelopes[17]);
        let report = KeyRotationManager::new().rotate_parallel(&old, &envelopes, &new, 4);
        assert_eq!(report.state, RotationState::PartiallyFailed);
        assert_eq!(report.succeeded(), 18);
        let failed: Vec<usize> = report.failures.iter().map(|f| f.index).collect();
        assert_eq!(failed, vec![3, 17]);
        let indices: Vec<usize> = report.rotated.iter().map(|r| r.index).collect();
        let mut sorted = indices.clone();
        sorted.sort();
        assert_eq!(indices, sorted);
    }

    #[cfg(feature = "getrandom")]
    #[test]
    fn parallel_cancelled_up_front() {
        let (old, new) = keys();
        let manager = KeyRotationManager::new();
        manager.cancel_handle().cancel();
        let report = manager.rotate_parallel(&old, &corpus(&old, 4), &new, 2);
        assert_eq!(report.state, RotationState::Cancelled);
        assert_eq!(report.unprocessed, vec![0, 1, 2, 3]);
        assert_eq!(report.succeeded(), 0);
    }
}
