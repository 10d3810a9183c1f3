//! Seam for the primary pinning service
//!
//! The primary client lives outside this crate. Orchestrated runs and the
//! `--info` lookup consume it through [`PrimaryStorageClient`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::item::{UploadItem, ASSET_TAG};
use crate::window::run_windowed;

/// Content accepted and pinned by the primary service
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinnedContent {
    pub cid: String,
    pub url: String,
    pub size: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

/// Primary upload outcome for one item of a batch
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryUploadResult {
    pub name: String,
    pub path: PathBuf,
    /// Tags of the uploaded item, asset id included
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<PinnedContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PrimaryUploadResult {
    pub fn from_outcome(item: &UploadItem, outcome: Result<PinnedContent>) -> Self {
        match outcome {
            Ok(content) => Self {
                name: item.name.clone(),
                path: item.path.clone(),
                tags: item.metadata_tags.clone(),
                success: true,
                content: Some(content),
                error: None,
            },
            Err(e) => Self {
                name: item.name.clone(),
                path: item.path.clone(),
                tags: item.metadata_tags.clone(),
                success: false,
                content: None,
                error: Some(e.to_string()),
            },
        }
    }

    pub fn asset_id(&self) -> Option<&str> {
        self.tags.get(ASSET_TAG).map(String::as_str)
    }
}

/// Pin state reported by the primary service
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinStatus {
    pub cid: String,
    pub pinned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait PrimaryStorageClient: Send + Sync {
    /// Cheap authenticated round trip used as a pre-flight check
    async fn test_connection(&self) -> Result<()>;

    async fn upload_file(&self, item: &UploadItem) -> Result<PinnedContent>;

    async fn upload_json(
        &self,
        document: &Value,
        name: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<PinnedContent>;

    /// Upload many files, at most `concurrency` at a time, one result per item
    async fn batch_upload(
        &self,
        items: &[UploadItem],
        concurrency: usize,
    ) -> Vec<PrimaryUploadResult> {
        run_windowed(items.iter().collect(), concurrency, |item| async move {
            PrimaryUploadResult::from_outcome(item, self.upload_file(item).await)
        })
        .await
    }

    async fn get_pin_status(&self, cid: &str) -> Result<PinStatus>;
}
