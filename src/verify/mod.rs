//! CID availability and integrity verification across public gateways
//!
//! ## Quorum and early exit
//!
//! [`IntegrityVerifier::verify_cid`] probes every gateway concurrently. A
//! CID is valid once `min(required_gateways, total)` gateways answer a HEAD
//! request successfully. Without `verify_all`, the call returns as soon as
//! the quorum is reached: outstanding probes are dropped, which cancels
//! their requests, so the returned counters are final. Gateways that were
//! never observed are reported with `checked = false` and the result is
//! marked `settled = false`.

mod verifier;

#[cfg(test)]
mod verifier_test;

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

use crate::error::Error;
use crate::primary::PinStatus;

pub use verifier::IntegrityVerifier;

/// Options for [`IntegrityVerifier::verify_cid`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerifyOptions {
    /// Wait for every probe instead of stopping at the quorum
    pub verify_all: bool,
    pub required_gateways: usize,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            verify_all: false,
            required_gateways: 2,
        }
    }
}

/// Outcome of probing one gateway
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayCheck {
    pub accessible: bool,
    /// False when the probe was cancelled by an early exit
    pub checked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GatewayCheck {
    pub fn not_checked() -> Self {
        Self::default()
    }
}

/// Content metadata taken from the first accessible gateway
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CidMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub cid: String,
    pub valid: bool,
    pub accessible: usize,
    pub total: usize,
    pub required: usize,
    pub gateways: BTreeMap<String, GatewayCheck>,
    pub metadata: Option<CidMetadata>,
    pub errors: Vec<String>,
    /// Every probe completed before the result was produced
    pub settled: bool,
    pub checked_at: DateTime<Utc>,
}

impl VerificationResult {
    pub(crate) fn new(cid: &str, total: usize, required: usize) -> Self {
        Self {
            cid: cid.to_string(),
            valid: false,
            accessible: 0,
            total,
            required,
            gateways: BTreeMap::new(),
            metadata: None,
            errors: Vec::new(),
            settled: false,
            checked_at: Utc::now(),
        }
    }

    /// Gateways needed for a valid verdict
    pub fn quorum(&self) -> usize {
        self.required.min(self.total)
    }

    pub(crate) fn record(&mut self, gateway: String, check: GatewayCheck) {
        if check.accessible {
            self.accessible += 1;
            if self.metadata.is_none() {
                self.metadata = Some(CidMetadata {
                    content_type: check.content_type.clone(),
                    content_length: check.content_length,
                });
            }
        } else if let Some(error) = &check.error {
            self.errors.push(format!("{gateway}: {error}"));
        }
        self.gateways.insert(gateway, check);
        self.valid = self.total > 0 && self.accessible >= self.quorum();
    }

    /// Percentage of gateways that served the CID, one decimal
    pub fn accessibility(&self) -> f64 {
        crate::backup::percentage(self.accessible, self.total)
    }
}

/// Digest used for integrity checks
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    /// Lowercase hex digest of `data`
    pub fn digest_hex(&self, data: &[u8]) -> String {
        match self {
            HashAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
            HashAlgorithm::Sha512 => hex::encode(Sha512::digest(data)),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            other => Err(Error::ConfigError(format!("Unsupported hash algorithm: {other}"))),
        }
    }
}

/// Result of downloading and hashing a CID's content
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub cid: String,
    /// Some gateway returned the full content
    pub retrieved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    pub algorithm: HashAlgorithm,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_hash: Option<String>,
    /// `None` when no expected hash was supplied or nothing was retrieved
    pub matches: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub errors: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MonitorOptions {
    pub duration: Duration,
    pub interval: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(60),
            interval: Duration::from_secs(10),
        }
    }
}

impl MonitorOptions {
    /// `floor(duration / interval)`
    pub fn check_count(&self) -> u64 {
        if self.interval.is_zero() {
            return 0;
        }
        (self.duration.as_millis() / self.interval.as_millis()) as u64
    }
}

/// One reachability check taken during monitoring
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSample {
    pub timestamp: DateTime<Utc>,
    pub valid: bool,
    pub accessible: usize,
    pub total: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSession {
    pub cid: String,
    pub checks: Vec<MonitoringSample>,
    pub total_checks: usize,
    pub successful_checks: usize,
    /// `successful_checks / total_checks * 100`, one decimal
    pub uptime: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Combined verification, integrity and pin status for a CID
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CidInfo {
    pub cid: String,
    pub verification: VerificationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity: Option<IntegrityReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin_status: Option<PinStatus>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchVerifySummary {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    /// Mean gateway accessibility percentage across CIDs
    pub average_accessibility: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchVerifyReport {
    pub results: Vec<VerificationResult>,
    pub summary: BatchVerifySummary,
}

impl BatchVerifyReport {
    pub fn from_results(results: Vec<VerificationResult>) -> Self {
        let valid = results.iter().filter(|r| r.valid).count();
        let average_accessibility = if results.is_empty() {
            0.0
        } else {
            let sum: f64 = results.iter().map(VerificationResult::accessibility).sum();
            crate::backup::round1(sum / results.len() as f64)
        };
        let summary = BatchVerifySummary {
            total: results.len(),
            valid,
            invalid: results.len() - valid,
            average_accessibility,
        };
        Self { results, summary }
    }

    pub fn result_for(&self, cid: &str) -> Option<&VerificationResult> {
        self.results.iter().find(|r| r.cid == cid)
    }
}
