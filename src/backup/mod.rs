//! Backup replication to independent IPFS pinning providers
//!
//! Every configured provider receives every file. Provider CIDs are kept
//! per provider since two services hashing the same bytes are not
//! guaranteed to agree on a CID.

pub mod providers;
mod replicator;
mod restore;

#[cfg(test)]
mod replicator_test;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

pub use replicator::BackupReplicator;

use crate::item::ASSET_TAG;
pub use restore::{RestoreResult, RestoreService};

/// Backup pinning services
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupProvider {
    /// Infura IPFS API, basic auth with a project id
    Infura,
    /// web3.storage, bearer token, flat `{cid}` response
    Web3Storage,
    /// nft.storage, bearer token, `{value: {cid}}` response
    NftStorage,
}

impl BackupProvider {
    pub const ALL: [BackupProvider; 3] = [
        BackupProvider::Infura,
        BackupProvider::Web3Storage,
        BackupProvider::NftStorage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackupProvider::Infura => "infura",
            BackupProvider::Web3Storage => "web3-storage",
            BackupProvider::NftStorage => "nft-storage",
        }
    }

    pub fn credential_env(&self) -> &'static str {
        match self {
            BackupProvider::Infura => "INFURA_PROJECT_ID",
            BackupProvider::Web3Storage => "WEB3_STORAGE_TOKEN",
            BackupProvider::NftStorage => "NFT_STORAGE_TOKEN",
        }
    }

    pub fn api_url_env(&self) -> &'static str {
        match self {
            BackupProvider::Infura => "INFURA_API_URL",
            BackupProvider::Web3Storage => "WEB3_STORAGE_API_URL",
            BackupProvider::NftStorage => "NFT_STORAGE_API_URL",
        }
    }

    pub fn default_api_url(&self) -> Url {
        let raw = match self {
            BackupProvider::Infura => "https://ipfs.infura.io:5001/api/v0/add?pin=true",
            BackupProvider::Web3Storage => "https://api.web3.storage/upload",
            BackupProvider::NftStorage => "https://api.nft.storage/upload",
        };
        Url::parse(raw).expect("static provider URL is valid")
    }

    /// Public URL for content pinned by this provider
    pub fn content_url(&self, cid: &str) -> String {
        match self {
            BackupProvider::Infura => format!("https://ipfs.infura.io/ipfs/{cid}"),
            BackupProvider::Web3Storage => format!("https://{cid}.ipfs.w3s.link"),
            BackupProvider::NftStorage => format!("https://nftstorage.link/ipfs/{cid}"),
        }
    }
}

impl fmt::Display for BackupProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one (file, provider) pair, including its retries
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResult {
    pub provider: BackupProvider,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Upload attempts made; zero when skipped
    pub attempts: u32,
    /// Provider had no credential and was not attempted
    pub skipped: bool,
    pub timestamp: DateTime<Utc>,
}

impl ProviderResult {
    pub fn succeeded(
        provider: BackupProvider,
        cid: String,
        url: String,
        size: Option<u64>,
        attempts: u32,
    ) -> Self {
        Self {
            provider,
            success: true,
            cid: Some(cid),
            url: Some(url),
            size,
            error: None,
            attempts,
            skipped: false,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(provider: BackupProvider, error: String, attempts: u32) -> Self {
        Self {
            provider,
            success: false,
            cid: None,
            url: None,
            size: None,
            error: Some(error),
            attempts,
            skipped: false,
            timestamp: Utc::now(),
        }
    }

    pub fn not_configured(provider: BackupProvider) -> Self {
        Self {
            skipped: true,
            ..Self::failed(provider, "not configured".to_string(), 0)
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    /// Providers attempted; skipped providers are excluded
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Per-file aggregate across every backup provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupReport {
    pub file_name: String,
    pub file_path: PathBuf,
    /// Tags the file was uploaded with, asset id included
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    pub providers: BTreeMap<BackupProvider, ProviderResult>,
    pub successful: Vec<BackupProvider>,
    pub failed: Vec<BackupProvider>,
    pub skipped: Vec<BackupProvider>,
    pub summary: ReportSummary,
}

impl BackupReport {
    pub fn from_results(
        file_name: String,
        file_path: PathBuf,
        results: Vec<ProviderResult>,
    ) -> Self {
        let mut report = Self {
            file_name,
            file_path,
            tags: BTreeMap::new(),
            providers: BTreeMap::new(),
            successful: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            summary: ReportSummary::default(),
        };

        for result in results {
            if result.skipped {
                report.skipped.push(result.provider);
            } else if result.success {
                report.successful.push(result.provider);
            } else {
                report.failed.push(result.provider);
            }
            report.providers.entry(result.provider).or_insert(result);
        }

        report.summary = ReportSummary {
            total: report.successful.len() + report.failed.len(),
            successful: report.successful.len(),
            failed: report.failed.len(),
        };
        report
    }

    /// At least one backup provider holds the file
    pub fn is_backed_up(&self) -> bool {
        !self.successful.is_empty()
    }

    pub fn asset_id(&self) -> Option<&str> {
        self.tags.get(ASSET_TAG).map(String::as_str)
    }

    /// CID recorded by a specific provider
    pub fn cid_for(&self, provider: BackupProvider) -> Option<&str> {
        self.providers.get(&provider).and_then(|r| r.cid.as_deref())
    }
}

/// Attempted and successful uploads for one provider across a batch
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStats {
    pub attempted: usize,
    pub successful: usize,
    /// Percentage, one decimal
    pub success_rate: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total_files: usize,
    /// Files held by at least one provider
    pub backed_up_files: usize,
    pub failed_files: usize,
    pub provider_stats: BTreeMap<BackupProvider, ProviderStats>,
}

/// Result of [`BackupReplicator::batch_backup_upload`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchBackupReport {
    pub results: Vec<BackupReport>,
    pub summary: BatchSummary,
}

impl BatchBackupReport {
    pub fn from_reports(results: Vec<BackupReport>) -> Self {
        let mut provider_stats: BTreeMap<BackupProvider, ProviderStats> = BTreeMap::new();
        for report in &results {
            for result in report.providers.values().filter(|r| !r.skipped) {
                let stats = provider_stats.entry(result.provider).or_default();
                stats.attempted += 1;
                if result.success {
                    stats.successful += 1;
                }
            }
        }
        for stats in provider_stats.values_mut() {
            stats.success_rate = percentage(stats.successful, stats.attempted);
        }

        let backed_up_files = results.iter().filter(|r| r.is_backed_up()).count();
        let summary = BatchSummary {
            total_files: results.len(),
            backed_up_files,
            failed_files: results.len() - backed_up_files,
            provider_stats,
        };
        Self { results, summary }
    }

    /// First report for `file_path`. Files shared by several items match
    /// only once; use [`Self::report_for_asset`] for tagged items.
    pub fn report_for(&self, file_path: &std::path::Path) -> Option<&BackupReport> {
        self.results.iter().find(|r| r.file_path == file_path)
    }

    pub fn report_for_asset(&self, asset_id: &str) -> Option<&BackupReport> {
        self.results.iter().find(|r| r.asset_id() == Some(asset_id))
    }
}

/// `part / whole * 100`, rounded to one decimal; zero when `whole` is zero
pub(crate) fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round1(part as f64 / whole as f64 * 100.0)
}

pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
