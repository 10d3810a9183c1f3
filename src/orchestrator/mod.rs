//! Orchestrated upload of an asset collection
//!
//! A run goes through these phases:
//!
//! 0. validate configuration and check the primary connection (fatal)
//! 1. plan image and metadata uploads from the manifest
//! 2. upload images to the primary service and every backup provider
//! 3. point each metadata document at its primary image CID
//! 4. upload metadata documents to the primary and backup providers
//! 5. optionally verify primary CIDs on the public gateways, then persist
//!    the run report
//!
//! Per-file and per-provider failures in phases 2 to 4 are recorded in the
//! report and never abort the run.

mod plan;
mod report;
mod store;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{error, info, instrument, warn};

pub use plan::{
    build_plan, patch_metadata, placeholder_image, AssetManifest, AssetSpec, ImageSource,
    PlannedAsset, UploadPlan,
};
pub use report::{
    backup_copies, AssetRecord, ConfigSnapshot, CopyMap, RunReport, RunTotals, StoredCopy,
    PRIMARY_KEY,
};
pub use store::{AssetStore, LocalAssetStore};

use crate::backup::BackupReplicator;
use crate::config::PinvaultConfig;
use crate::error::{Error, Result};
use crate::item::UploadItem;
use crate::primary::{PinnedContent, PrimaryStorageClient};
use crate::verify::IntegrityVerifier;
use crate::window::run_windowed;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunOptions {
    /// Substitute generated images for missing files
    pub allow_placeholders: bool,
    /// Check primary CIDs on the public gateways after uploading
    pub verify: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            allow_placeholders: false,
            verify: true,
        }
    }
}

/// Finished run and the location of its persisted report
#[derive(Clone, Debug)]
pub struct CompletedRun {
    pub report: RunReport,
    pub report_path: PathBuf,
}

pub struct UploadOrchestrator {
    config: PinvaultConfig,
    primary: Arc<dyn PrimaryStorageClient>,
    backup: BackupReplicator,
    verifier: IntegrityVerifier,
    store: Arc<dyn AssetStore>,
}

/// Metadata document ready for upload
struct PatchedMetadata {
    asset_id: String,
    name: String,
    document: Value,
    tags: std::collections::BTreeMap<String, String>,
}

impl UploadOrchestrator {
    pub fn new(
        config: PinvaultConfig,
        primary: Arc<dyn PrimaryStorageClient>,
        backup: BackupReplicator,
        verifier: IntegrityVerifier,
        store: Arc<dyn AssetStore>,
    ) -> Self {
        Self {
            config,
            primary,
            backup,
            verifier,
            store,
        }
    }

    #[instrument(
        skip(self, manifest),
        fields(assets = manifest.assets.len(), asset_dir = %asset_dir.display())
    )]
    pub async fn run(
        &self,
        manifest: &AssetManifest,
        asset_dir: &Path,
        options: RunOptions,
    ) -> Result<CompletedRun> {
        let started_at = Utc::now();

        // Phase 0
        self.config.validate_for_primary()?;
        if let Err(e) = self.primary.test_connection().await {
            error!("Primary service pre-flight failed: {}", e);
            return Err(Error::PrimaryUnavailable(e.to_string()));
        }
        info!("Primary service connection verified");

        // Phase 1
        let plan = build_plan(manifest, asset_dir, |p| p.is_file(), options.allow_placeholders)?;
        for asset in plan.placeholders() {
            warn!(
                "Using placeholder image for {} at {}",
                asset.id,
                asset.image.path.display()
            );
            self.store
                .write_placeholder(&asset.image.path, &placeholder_image(asset))
                .await?;
        }

        let mut report = RunReport::new(started_at, ConfigSnapshot::from_config(&self.config));
        for asset in &plan.assets {
            report.assets.insert(
                asset.id.clone(),
                AssetRecord {
                    name: asset.name.clone(),
                    ..AssetRecord::default()
                },
            );
        }

        // Phase 2
        self.upload_images(&plan, &mut report).await;

        // Phase 3
        let patched: Vec<PatchedMetadata> = plan
            .assets
            .iter()
            .filter_map(|asset| {
                let record = report.assets.get_mut(&asset.id)?;
                match record.primary_image_cid().map(str::to_string) {
                    Some(cid) => Some(PatchedMetadata {
                        asset_id: asset.id.clone(),
                        name: asset.metadata_name.clone(),
                        document: patch_metadata(&asset.metadata, &cid),
                        tags: asset.metadata_tags.clone(),
                    }),
                    None => {
                        record
                            .errors
                            .push("metadata skipped: image not stored on primary".into());
                        None
                    }
                }
            })
            .collect();

        // Phase 4
        self.upload_metadata(patched, &mut report).await;

        // Phase 5
        if options.verify {
            let cids: Vec<String> = report
                .assets
                .values()
                .flat_map(|a| [a.primary_image_cid(), a.primary_metadata_cid()])
                .flatten()
                .map(str::to_string)
                .collect();
            if !cids.is_empty() {
                report.verification = Some(
                    self.verifier
                        .batch_verify(cids, self.config.max_concurrent_uploads)
                        .await,
                );
            }
        }

        report.finish();
        let report_path = self.store.write_report(&report).await?;
        info!(
            "Run complete: {}/{} uploads succeeded ({}%), report at {}",
            report.totals.successful,
            report.totals.uploads,
            report.totals.success_rate,
            report_path.display()
        );

        Ok(CompletedRun {
            report,
            report_path,
        })
    }

    async fn upload_images(&self, plan: &UploadPlan, report: &mut RunReport) {
        let items = plan.image_items();
        let concurrency = self.config.max_concurrent_uploads;
        info!("Uploading {} images", items.len());

        let (primary_results, backups) = tokio::join!(
            self.primary.batch_upload(&items, concurrency),
            self.backup.batch_backup_upload(items.clone(), concurrency)
        );

        // Assets may share an image file; results are keyed by asset tag
        for result in &primary_results {
            if let Some(record) = result.asset_id().and_then(|id| report.assets.get_mut(id)) {
                record
                    .image
                    .insert(PRIMARY_KEY.into(), StoredCopy::from_primary(result));
            }
        }
        for backup in &backups.results {
            if let Some(record) = backup.asset_id().and_then(|id| report.assets.get_mut(id)) {
                record.image.extend(backup_copies(backup));
            }
        }
    }

    async fn upload_metadata(&self, documents: Vec<PatchedMetadata>, report: &mut RunReport) {
        if documents.is_empty() {
            return;
        }
        let concurrency = self.config.max_concurrent_uploads;
        info!("Uploading {} metadata documents", documents.len());

        let primary = self.primary.as_ref();
        let store = self.store.as_ref();
        let outcomes = run_windowed(documents, concurrency, |doc| async move {
            let pinned = primary.upload_json(&doc.document, &doc.name, &doc.tags).await;
            let staged = store.stage_metadata(&doc.asset_id, &doc.document).await;
            (doc, pinned, staged)
        })
        .await;

        let mut backup_items = Vec::new();
        for (doc, pinned, staged) in outcomes {
            let Some(record) = report.assets.get_mut(&doc.asset_id) else {
                continue;
            };
            record
                .metadata
                .insert(PRIMARY_KEY.into(), primary_copy(pinned));

            match staged {
                Ok(path) => {
                    let mut item = UploadItem::new(path, doc.name);
                    item.metadata_tags = doc.tags;
                    backup_items.push(item);
                }
                Err(e) => {
                    warn!("Could not stage metadata for {}: {}", doc.asset_id, e);
                    record.errors.push(format!("metadata backup skipped: {e}"));
                }
            }
        }

        let backups = self.backup.batch_backup_upload(backup_items, concurrency).await;
        for backup in &backups.results {
            if let Some(record) = backup.asset_id().and_then(|id| report.assets.get_mut(id)) {
                record.metadata.extend(backup_copies(backup));
            }
        }
    }
}

fn primary_copy(outcome: Result<PinnedContent>) -> StoredCopy {
    match outcome {
        Ok(content) => StoredCopy {
            success: true,
            cid: Some(content.cid),
            url: Some(content.url),
            timestamp: content.timestamp,
            error: None,
        },
        Err(e) => StoredCopy::failure(e.to_string()),
    }
}
