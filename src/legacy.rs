//! Advice for moving off deprecated algorithms.
//!
//! The crate recognizes a handful of legacy algorithm names so that stored data and incoming
//! requests that use them can be flagged. It never encrypts or decrypts with them.

use serde::{Deserialize, Serialize};

use std::fmt;

use crate::algorithm::{
    AlgorithmDescriptor, AlgorithmId, AlgorithmStatus, LegacyAlgorithm, SymmetricAlgorithm,
};

/// How soon data under a deprecated algorithm should be migrated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
            Urgency::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Migration advice for one deprecated algorithm.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    pub algorithm: String,
    pub current_risk: String,
    pub recommended: AlgorithmId,
    /// Ordered; never empty.
    pub migration_steps: Vec<String>,
    pub urgency: Urgency,
}

/// Looks up migration advice for deprecated algorithms.
#[derive(Clone, Copy, Debug, Default)]
pub struct LegacyAdvisor;

impl LegacyAdvisor {
    pub fn new() -> Self {
        Self
    }

    /// Advice for a descriptor, or `None` if its algorithm is still active.
    pub fn advise(&self, descriptor: &AlgorithmDescriptor) -> Option<Advisory> {
        if descriptor.status != AlgorithmStatus::Deprecated {
            return None;
        }
        let legacy = match descriptor.name.parse::<AlgorithmId>() {
            Ok(AlgorithmId::Legacy(alg)) => Some(alg),
            _ => None,
        };
        let (current_risk, urgency) = match legacy {
            Some(LegacyAlgorithm::DesCbc) => (
                "56-bit keys can be brute-forced with commodity hardware; CBC mode has no integrity protection",
                Urgency::Critical,
            ),
            Some(LegacyAlgorithm::Rc4) => (
                "keystream biases allow plaintext recovery; no integrity protection",
                Urgency::Critical,
            ),
            Some(LegacyAlgorithm::TripleDesCbc) => (
                "64-bit blocks are open to birthday attacks (Sweet32) on long-lived keys; no integrity protection",
                Urgency::High,
            ),
            Some(LegacyAlgorithm::BlowfishCbc) => (
                "64-bit blocks are open to birthday attacks (Sweet32); no integrity protection",
                Urgency::High,
            ),
            Some(LegacyAlgorithm::AesEcb) => (
                "identical plaintext blocks produce identical ciphertext blocks, leaking structure",
                Urgency::High,
            ),
            Some(LegacyAlgorithm::AesCbc) => (
                "unauthenticated; padding oracles can reveal plaintext when errors are observable",
                Urgency::Medium,
            ),
            None => ("algorithm is marked deprecated", Urgency::Medium),
        };
        let recommended = recommend(legacy);
        Some(Advisory {
            algorithm: descriptor.name.clone(),
            current_risk: current_risk.to_owned(),
            recommended,
            migration_steps: migration_steps(&descriptor.name, recommended),
            urgency,
        })
    }

    /// Advice for a parsed algorithm id.
    pub fn advise_algorithm(&self, algorithm: AlgorithmId) -> Option<Advisory> {
        self.advise(&algorithm.descriptor())
    }
}

fn recommend(legacy: Option<LegacyAlgorithm>) -> AlgorithmId {
    match legacy {
        Some(LegacyAlgorithm::Rc4) => SymmetricAlgorithm::ChaCha20Poly1305.into(),
        _ => SymmetricAlgorithm::AesGcm.into(),
    }
}

fn migration_steps(from: &str, to: AlgorithmId) -> Vec<String> {
    vec![
        format!("Stop producing new {} ciphertext; encrypt new data with {}", from, to),
        format!("Generate a fresh {} key; never reuse {} key material", to, from),
        format!("Decrypt each stored {} record and re-encrypt it with {}", from, to),
        "Verify every re-encrypted record decrypts before deleting the original".to_owned(),
        format!("Destroy the {} keys once no data depends on them", from),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_legacy_algorithm_has_advice() {
        let advisor = LegacyAdvisor::new();
        for alg in LegacyAlgorithm::ALL {
            let advisory = advisor.advise_algorithm(AlgorithmId::Legacy(alg)).unwrap();
            assert_eq!(advisory.algorithm, alg.name());
            assert!(!advisory.migration_steps.is_empty());
            assert!(!advisory.current_risk.is_empty());
            assert!(!advisory.recommended.is_deprecated());
            assert!(advisory.migration_steps[0].contains(alg.name()));
        }
    }

    #[test]
    fn active_algorithms_get_none() {
        let advisor = LegacyAdvisor::new();
        for alg in SymmetricAlgorithm::ALL {
            assert!(advisor.advise_algorithm(alg.into()).is_none());
        }
    }

    #[test]
    fn recommendations_and_urgency() {
        let advisor = LegacyAdvisor::new();
        let rc4 = advisor.advise_algorithm(AlgorithmId::Legacy(LegacyAlgorithm::Rc4)).unwrap();
        assert_eq!(rc4.recommended, AlgorithmId::from(SymmetricAlgorithm::ChaCha20Poly1305));
        assert_eq!(rc4.urgency, Urgency::Critical);
        let cbc = advisor.advise_algorithm(AlgorithmId::Legacy(LegacyAlgorithm::AesCbc)).unwrap();
        assert_eq!(cbc.recommended, AlgorithmId::from(SymmetricAlgorithm::AesGcm));
        assert!(cbc.urgency < Urgency::High);
    }

    #[test]
    fn unknown_deprecated_descriptor() {
        let descriptor = AlgorithmDescriptor {
            name: "CAST5-CFB".into(),
            key_size_bits: 128,
            nonce_size_bytes: 8,
            tag_size_bytes: 0,
            status: AlgorithmStatus::Deprecated,
        };
        let advisory = LegacyAdvisor::new().advise(&descriptor).unwrap();
        assert_eq!(advisory.recommended, AlgorithmId::from(SymmetricAlgorithm::AesGcm));
        assert_eq!(advisory.migration_steps.len(), 5);
    }

    #[test]
    fn advisory_json() {
        let advisory = LegacyAdvisor::new()
            .advise_algorithm(AlgorithmId::Legacy(LegacyAlgorithm::DesCbc))
            .unwrap();
        let value = serde_json::to_value(&advisory).unwrap();
        assert_eq!(value["recommended"], "AES-GCM");
        assert_eq!(value["urgency"], "CRITICAL");
    }
}
