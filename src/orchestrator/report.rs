//! Aggregated report for one orchestrated run

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backup::{percentage, BackupProvider, BackupReport};
use crate::config::{Distribution, GatewayConfig, PinvaultConfig};
use crate::primary::PrimaryUploadResult;
use crate::verify::BatchVerifyReport;

/// Key used for the primary service in per-provider maps
pub const PRIMARY_KEY: &str = "primary";

/// One stored copy of an artifact on one provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCopy {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StoredCopy {
    pub fn from_primary(result: &PrimaryUploadResult) -> Self {
        match &result.content {
            Some(content) => Self {
                success: true,
                cid: Some(content.cid.clone()),
                url: Some(content.url.clone()),
                timestamp: content.timestamp,
                error: None,
            },
            None => Self::failure(result.error.clone().unwrap_or_else(|| "upload failed".into())),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            cid: None,
            url: None,
            timestamp: Utc::now(),
            error: Some(error.into()),
        }
    }
}

/// Provider name to stored copy. Skipped providers are not recorded.
pub type CopyMap = BTreeMap<String, StoredCopy>;

/// Copies from a backup report, excluding providers that were skipped
pub fn backup_copies(report: &BackupReport) -> CopyMap {
    report
        .providers
        .values()
        .filter(|r| !r.skipped)
        .map(|r| {
            (
                r.provider.as_str().to_string(),
                StoredCopy {
                    success: r.success,
                    cid: r.cid.clone(),
                    url: r.url.clone(),
                    timestamp: r.timestamp,
                    error: r.error.clone(),
                },
            )
        })
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    pub name: String,
    pub image: CopyMap,
    pub metadata: CopyMap,
    /// Failures that prevented a phase from running for this asset
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl AssetRecord {
    pub fn primary_image_cid(&self) -> Option<&str> {
        primary_cid(&self.image)
    }

    pub fn primary_metadata_cid(&self) -> Option<&str> {
        primary_cid(&self.metadata)
    }
}

fn primary_cid(copies: &CopyMap) -> Option<&str> {
    copies
        .get(PRIMARY_KEY)
        .filter(|c| c.success)
        .and_then(|c| c.cid.as_deref())
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTotals {
    pub assets: usize,
    /// Attempted copies across every provider, primary included
    pub uploads: usize,
    pub successful: usize,
    pub failed: usize,
    /// Percentage, one decimal
    pub success_rate: f64,
}

/// Configuration the run was executed with
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    pub distribution: BTreeMap<String, f64>,
    pub verify_gateways: Vec<String>,
    pub restore_gateways: Vec<String>,
    pub required_gateways: usize,
    pub backup_providers: Vec<BackupProvider>,
    pub max_concurrent_uploads: usize,
}

impl ConfigSnapshot {
    pub fn from_config(config: &PinvaultConfig) -> Self {
        let Distribution(distribution) = &config.distribution;
        let GatewayConfig {
            verify,
            restore,
            required,
        } = &config.gateways;
        Self {
            distribution: distribution.clone(),
            verify_gateways: verify.iter().map(crate::config::gateway_label).collect(),
            restore_gateways: restore.iter().map(crate::config::gateway_label).collect(),
            required_gateways: *required,
            backup_providers: config.configured_providers(),
            max_concurrent_uploads: config.max_concurrent_uploads,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub assets: BTreeMap<String, AssetRecord>,
    pub totals: RunTotals,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<BatchVerifyReport>,
    pub config: ConfigSnapshot,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>, config: ConfigSnapshot) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            assets: BTreeMap::new(),
            totals: RunTotals::default(),
            verification: None,
            config,
        }
    }

    /// Recompute totals from the recorded copies and stamp the finish time
    pub fn finish(&mut self) {
        let copies = self
            .assets
            .values()
            .flat_map(|a| a.image.values().chain(a.metadata.values()));
        let (mut uploads, mut successful) = (0, 0);
        for copy in copies {
            uploads += 1;
            if copy.success {
                successful += 1;
            }
        }
        self.totals = RunTotals {
            assets: self.assets.len(),
            uploads,
            successful,
            failed: uploads - successful,
            success_rate: percentage(successful, uploads),
        };
        self.finished_at = Utc::now();
    }

    /// `upload-report-<UTC timestamp>.json`, millisecond resolution
    pub fn file_name(&self) -> String {
        format!(
            "upload-report-{}.json",
            self.started_at.format("%Y%m%dT%H%M%S%.3fZ")
        )
    }
}
