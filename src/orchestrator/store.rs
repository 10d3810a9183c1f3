//! Filesystem side of an orchestrated run

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::report::RunReport;
use crate::error::Result;

/// Local effects needed by a run, kept behind a trait so planning and
/// execution can be exercised without touching real asset directories.
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn write_placeholder(&self, path: &Path, contents: &[u8]) -> Result<()>;

    /// Persist a metadata document and return the file to upload
    async fn stage_metadata(&self, asset_id: &str, document: &Value) -> Result<PathBuf>;

    /// Persist the run report and return where it was written
    async fn write_report(&self, report: &RunReport) -> Result<PathBuf>;
}

/// [`AssetStore`] backed by local directories
#[derive(Clone, Debug)]
pub struct LocalAssetStore {
    staging_dir: PathBuf,
    report_dir: PathBuf,
}

impl LocalAssetStore {
    pub fn new(staging_dir: impl Into<PathBuf>, report_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            report_dir: report_dir.into(),
        }
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;
    debug!("Wrote {} ({} bytes)", path.display(), contents.len());
    Ok(())
}

#[async_trait]
impl AssetStore for LocalAssetStore {
    async fn write_placeholder(&self, path: &Path, contents: &[u8]) -> Result<()> {
        write_file(path, contents).await
    }

    async fn stage_metadata(&self, asset_id: &str, document: &Value) -> Result<PathBuf> {
        let path = self.staging_dir.join(format!("{asset_id}.json"));
        write_file(&path, &serde_json::to_vec_pretty(document)?).await?;
        Ok(path)
    }

    async fn write_report(&self, report: &RunReport) -> Result<PathBuf> {
        let path = self.report_dir.join(report.file_name());
        write_file(&path, &serde_json::to_vec_pretty(report)?).await?;
        Ok(path)
    }
}
