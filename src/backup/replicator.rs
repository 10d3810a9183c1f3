use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use reqwest::Client;
use tracing::{error, info, instrument, warn};

use super::providers::{build_providers, BackupProviderClient};
use super::restore::{RestoreResult, RestoreService};
use super::{BackupProvider, BackupReport, BatchBackupReport, ProviderResult};
use crate::backoff::RetryPolicy;
use crate::config::PinvaultConfig;
use crate::error::{Error, Result};
use crate::item::{UploadItem, UploadOptions};
use crate::window::run_windowed;

/// Replicates files to every configured backup provider
pub struct BackupReplicator {
    providers: Vec<Arc<dyn BackupProviderClient>>,
    retry: RetryPolicy,
    restore: RestoreService,
}

impl BackupReplicator {
    pub fn new(config: &PinvaultConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("pinvault/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let providers = build_providers(config, client.clone());
        let configured = config.configured_providers();
        if configured.is_empty() {
            warn!("No backup providers configured; backups will be skipped");
        } else {
            info!(
                "Backup providers configured: {}",
                configured
                    .iter()
                    .map(BackupProvider::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        Ok(Self {
            providers,
            retry: config.retry.clone(),
            restore: RestoreService::from_config(config, client),
        })
    }

    pub fn with_providers(
        providers: Vec<Arc<dyn BackupProviderClient>>,
        retry: RetryPolicy,
        restore: RestoreService,
    ) -> Self {
        Self {
            providers,
            retry,
            restore,
        }
    }

    pub fn providers(&self) -> impl Iterator<Item = BackupProvider> + '_ {
        self.providers.iter().map(|p| p.provider())
    }

    /// Upload one file to one provider, retrying with the configured backoff.
    ///
    /// A provider without credentials short-circuits with a skipped result
    /// and no attempts.
    pub async fn upload_to_provider(
        &self,
        provider: BackupProvider,
        file_path: &Path,
        options: &UploadOptions,
    ) -> ProviderResult {
        match self.providers.iter().find(|p| p.provider() == provider) {
            Some(client) => self.upload_with(client.as_ref(), file_path, options).await,
            None => ProviderResult::not_configured(provider),
        }
    }

    #[instrument(
        skip(self, client, options),
        fields(provider = %client.provider(), file = %file_path.display())
    )]
    async fn upload_with(
        &self,
        client: &dyn BackupProviderClient,
        file_path: &Path,
        options: &UploadOptions,
    ) -> ProviderResult {
        let provider = client.provider();
        if !client.is_configured() {
            #[cfg(feature = "metrics")]
            crate::metrics::record_upload(provider.as_str(), "skipped", 0.0, 0);

            info!("{} not configured, skipping", provider);
            return ProviderResult::not_configured(provider);
        }

        let started = Instant::now();
        let outcome = self
            .retry
            .run(|_attempt| async move { client.upload(file_path, options).await.into_result() })
            .await;

        let result = match outcome.result {
            Ok(content) => {
                info!(
                    "{} stored {} as {} (attempts: {})",
                    provider,
                    options.display_name(file_path),
                    content.cid,
                    outcome.attempts
                );
                ProviderResult::succeeded(
                    provider,
                    content.cid,
                    content.url,
                    content.size,
                    outcome.attempts,
                )
            }
            Err(failure) => {
                let err = Error::ProviderExhausted {
                    provider,
                    attempts: outcome.attempts,
                    last_error: failure.reason,
                };
                error!("{}", err);
                ProviderResult::failed(provider, err.to_string(), outcome.attempts)
            }
        };

        #[cfg(feature = "metrics")]
        crate::metrics::record_upload(
            provider.as_str(),
            if result.success { "success" } else { "failure" },
            started.elapsed().as_secs_f64(),
            outcome.attempts,
        );
        #[cfg(not(feature = "metrics"))]
        let _ = started;

        result
    }

    /// Upload one file to every provider.
    ///
    /// Providers run concurrently and independently; there is no early stop
    /// on the first success and no failure aborts its siblings.
    #[instrument(skip(self, options), fields(file = %file_path.display()))]
    pub async fn backup_upload(&self, file_path: &Path, options: &UploadOptions) -> BackupReport {
        let file_name = options.display_name(file_path);
        info!("Starting backup of {} to {} providers", file_name, self.providers.len());

        let results = join_all(
            self.providers
                .iter()
                .map(|client| self.upload_with(client.as_ref(), file_path, options)),
        )
        .await;

        let mut report = BackupReport::from_results(file_name, file_path.to_path_buf(), results);
        report.tags = options.metadata_tags.clone();
        info!(
            "Backup of {} complete: {}/{} providers succeeded",
            report.file_name, report.summary.successful, report.summary.total
        );
        report
    }

    /// Back up many files, at most `concurrency` files at a time.
    ///
    /// Every input yields exactly one [`BackupReport`] carrying its file path.
    pub async fn batch_backup_upload(
        &self,
        files: Vec<UploadItem>,
        concurrency: usize,
    ) -> BatchBackupReport {
        info!(
            "Starting batch backup of {} files (concurrency: {})",
            files.len(),
            concurrency
        );

        let reports = run_windowed(files, concurrency, |item| async move {
            self.backup_upload(&item.path, &item.options()).await
        })
        .await;

        let batch = BatchBackupReport::from_reports(reports);
        info!(
            "Batch backup complete: {}/{} files backed up",
            batch.summary.backed_up_files, batch.summary.total_files
        );
        batch
    }

    /// See [`RestoreService::restore_from_backup`]
    pub async fn restore_from_backup(
        &self,
        cid: &str,
        output_path: &Path,
    ) -> Result<RestoreResult> {
        self.restore.restore_from_backup(cid, output_path).await
    }
}
