//! Tests for backup replication: provider independence, report
//! accounting, batch windowing and retry backoff.

#[cfg(test)]
mod tests {
    use crate::backoff::RetryPolicy;
    use crate::backup::providers::{BackupProviderClient, UploadOutcome};
    use crate::backup::{BackupProvider, BackupReplicator, RestoreService};
    use crate::item::{UploadItem, UploadOptions, ASSET_TAG};

    use async_trait::async_trait;
    use reqwest::Client;
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    // ---------------------------------------------------------------------
    // Mock provider
    // ---------------------------------------------------------------------

    /// Fails `fail_first` attempts, then succeeds. Paths listed in
    /// `always_fail` never succeed.
    struct MockProvider {
        provider: BackupProvider,
        configured: bool,
        fail_first: u32,
        retryable: bool,
        always_fail: HashSet<PathBuf>,
        calls: AtomicU32,
        in_flight: Arc<Mutex<HashSet<PathBuf>>>,
        peak_files: Arc<AtomicUsize>,
        attempt_times: Mutex<Vec<tokio::time::Instant>>,
    }

    impl MockProvider {
        fn ok(provider: BackupProvider) -> Self {
            Self {
                provider,
                configured: true,
                fail_first: 0,
                retryable: true,
                always_fail: HashSet::new(),
                calls: AtomicU32::new(0),
                in_flight: Arc::new(Mutex::new(HashSet::new())),
                peak_files: Arc::new(AtomicUsize::new(0)),
                attempt_times: Mutex::new(Vec::new()),
            }
        }

        fn failing_first(mut self, n: u32) -> Self {
            self.fail_first = n;
            self
        }

        fn non_retryable(mut self) -> Self {
            self.retryable = false;
            self
        }

        fn unconfigured(mut self) -> Self {
            self.configured = false;
            self
        }

        fn failing_for(mut self, paths: &[&str]) -> Self {
            self.always_fail = paths.iter().map(PathBuf::from).collect();
            self
        }

        fn tracking(
            mut self,
            in_flight: Arc<Mutex<HashSet<PathBuf>>>,
            peak: Arc<AtomicUsize>,
        ) -> Self {
            self.in_flight = in_flight;
            self.peak_files = peak;
            self
        }
    }

    #[async_trait]
    impl BackupProviderClient for MockProvider {
        fn provider(&self) -> BackupProvider {
            self.provider
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn upload(&self, file_path: &Path, _options: &UploadOptions) -> UploadOutcome {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.attempt_times
                .lock()
                .unwrap()
                .push(tokio::time::Instant::now());

            {
                let mut files = self.in_flight.lock().unwrap();
                files.insert(file_path.to_path_buf());
                self.peak_files.fetch_max(files.len(), Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;

            let outcome = if self.always_fail.contains(file_path) {
                UploadOutcome::failure("HTTP 500: boom", self.retryable)
            } else if call <= self.fail_first {
                UploadOutcome::failure(format!("HTTP 503: attempt {call}"), self.retryable)
            } else {
                UploadOutcome::Success {
                    cid: format!("bafy-{}-{}", self.provider, file_path.display()),
                    url: format!("https://gw/{}", self.provider),
                    size: Some(1),
                }
            };

            self.in_flight.lock().unwrap().remove(file_path);
            outcome
        }
    }

    fn replicator(
        providers: Vec<Arc<dyn BackupProviderClient>>,
        retry: RetryPolicy,
    ) -> BackupReplicator {
        BackupReplicator::with_providers(
            providers,
            retry,
            RestoreService::new(Client::new(), Vec::new(), Duration::from_secs(1)),
        )
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::linear(3, Duration::from_millis(5))
    }

    // ---------------------------------------------------------------------
    // 1. backup_upload accounting
    // ---------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_backup_upload_totals_match_configured_providers() {
        let providers: Vec<Arc<dyn BackupProviderClient>> = vec![
            Arc::new(MockProvider::ok(BackupProvider::Infura)),
            Arc::new(MockProvider::ok(BackupProvider::Web3Storage).failing_first(10)),
            Arc::new(MockProvider::ok(BackupProvider::NftStorage)),
        ];
        let report = replicator(providers, fast_retry())
            .backup_upload(Path::new("a.png"), &UploadOptions::default())
            .await;

        assert_eq!(report.summary.total, 3);
        assert_eq!(report.successful.len() + report.failed.len(), 3);
        assert_eq!(report.summary.successful, 2);
        assert_eq!(report.failed, vec![BackupProvider::Web3Storage]);
        assert!(report.is_backed_up());
        assert_eq!(report.file_name, "a.png");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfigured_provider_is_recorded_but_not_counted() {
        let skipped = Arc::new(MockProvider::ok(BackupProvider::NftStorage).unconfigured());
        let providers: Vec<Arc<dyn BackupProviderClient>> = vec![
            Arc::new(MockProvider::ok(BackupProvider::Infura)),
            skipped.clone(),
        ];
        let report = replicator(providers, fast_retry())
            .backup_upload(Path::new("a.png"), &UploadOptions::default())
            .await;

        assert_eq!(report.summary.total, 1);
        assert_eq!(report.skipped, vec![BackupProvider::NftStorage]);
        let result = &report.providers[&BackupProvider::NftStorage];
        assert!(result.skipped);
        assert!(!result.success);
        assert_eq!(result.attempts, 0);
        assert_eq!(result.error.as_deref(), Some("not configured"));
        assert_eq!(skipped.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_provider_attempted_even_after_success() {
        let first = Arc::new(MockProvider::ok(BackupProvider::Infura));
        let second = Arc::new(MockProvider::ok(BackupProvider::Web3Storage));
        let providers: Vec<Arc<dyn BackupProviderClient>> = vec![first.clone(), second.clone()];

        replicator(providers, fast_retry())
            .backup_upload(Path::new("a.png"), &UploadOptions::default())
            .await;

        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_cids_tracked_per_provider() {
        let providers: Vec<Arc<dyn BackupProviderClient>> = vec![
            Arc::new(MockProvider::ok(BackupProvider::Infura)),
            Arc::new(MockProvider::ok(BackupProvider::NftStorage)),
        ];
        let report = replicator(providers, fast_retry())
            .backup_upload(Path::new("a.png"), &UploadOptions::default())
            .await;

        assert_ne!(
            report.cid_for(BackupProvider::Infura),
            report.cid_for(BackupProvider::NftStorage)
        );
        assert_eq!(report.cid_for(BackupProvider::Web3Storage), None);
    }

    // ---------------------------------------------------------------------
    // 2. upload_to_provider retry behaviour
    // ---------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_waits_three_then_six_seconds() {
        let provider = Arc::new(MockProvider::ok(BackupProvider::Infura).failing_first(2));
        let replicator = replicator(
            vec![provider.clone()],
            RetryPolicy::linear(3, Duration::from_millis(3000)),
        );

        let start = tokio::time::Instant::now();
        let result = replicator
            .upload_to_provider(
                BackupProvider::Infura,
                Path::new("a.png"),
                &UploadOptions::default(),
            )
            .await;

        assert!(result.success);
        assert_eq!(result.attempts, 3);

        let times = provider.attempt_times.lock().unwrap().clone();
        assert_eq!(times.len(), 3);
        // Each attempt itself takes 10ms in the mock
        assert_eq!(times[1] - times[0], Duration::from_millis(3010));
        assert_eq!(times[2] - times[1], Duration::from_millis(6010));
        assert_eq!(start.elapsed(), Duration::from_millis(9030));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_names_provider_and_last_error() {
        let provider = Arc::new(MockProvider::ok(BackupProvider::Web3Storage).failing_first(99));
        let result = replicator(vec![provider.clone()], fast_retry())
            .upload_to_provider(
                BackupProvider::Web3Storage,
                Path::new("a.png"),
                &UploadOptions::default(),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.attempts, 3);
        let error = result.error.unwrap();
        assert!(error.contains("web3-storage"), "{error}");
        assert!(error.contains("after 3 attempts"), "{error}");
        assert!(error.contains("attempt 3"), "{error}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_failure_is_not_retried() {
        let provider = Arc::new(
            MockProvider::ok(BackupProvider::Infura)
                .failing_first(99)
                .non_retryable(),
        );
        let result = replicator(vec![provider.clone()], fast_retry())
            .upload_to_provider(
                BackupProvider::Infura,
                Path::new("a.png"),
                &UploadOptions::default(),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.attempts, 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_not_configured() {
        let result = replicator(vec![], fast_retry())
            .upload_to_provider(
                BackupProvider::NftStorage,
                Path::new("a.png"),
                &UploadOptions::default(),
            )
            .await;
        assert!(result.skipped);
        assert_eq!(result.attempts, 0);
    }

    // ---------------------------------------------------------------------
    // 3. batch_backup_upload
    // ---------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_batch_yields_one_result_per_file_despite_failures() {
        let failing = ["f2.png", "f4.png"];
        let providers: Vec<Arc<dyn BackupProviderClient>> = vec![
            Arc::new(MockProvider::ok(BackupProvider::Infura).failing_for(&failing)),
            Arc::new(MockProvider::ok(BackupProvider::Web3Storage).failing_for(&failing)),
        ];
        let files: Vec<UploadItem> = (1..=5)
            .map(|i| UploadItem::new(format!("f{i}.png"), format!("File {i}")))
            .collect();

        let batch = replicator(providers, fast_retry())
            .batch_backup_upload(files, 2)
            .await;

        assert_eq!(batch.results.len(), 5);
        assert_eq!(batch.summary.total_files, 5);
        assert_eq!(batch.summary.backed_up_files, 3);
        assert_eq!(batch.summary.failed_files, 2);

        for i in 1..=5 {
            let path = PathBuf::from(format!("f{i}.png"));
            let report = batch.report_for(&path).expect("result for every file");
            assert_eq!(report.file_name, format!("File {i}"));
            assert_eq!(report.is_backed_up(), !failing.contains(&path.to_str().unwrap()));
        }

        let infura = batch.summary.provider_stats[&BackupProvider::Infura];
        assert_eq!(infura.attempted, 5);
        assert_eq!(infura.successful, 3);
        assert_eq!(infura.success_rate, 60.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_never_exceeds_window() {
        let in_flight = Arc::new(Mutex::new(HashSet::new()));
        let peak = Arc::new(AtomicUsize::new(0));
        let infura =
            MockProvider::ok(BackupProvider::Infura).tracking(in_flight.clone(), peak.clone());
        let nft = MockProvider::ok(BackupProvider::NftStorage).tracking(in_flight, peak.clone());
        let providers: Vec<Arc<dyn BackupProviderClient>> = vec![Arc::new(infura), Arc::new(nft)];
        let files: Vec<UploadItem> = (0..7)
            .map(|i| UploadItem::new(format!("file-{i}"), format!("file-{i}")))
            .collect();

        let batch = replicator(providers, fast_retry())
            .batch_backup_upload(files, 2)
            .await;

        assert_eq!(batch.results.len(), 7);
        // Provider fan-out shares the slot of its file
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_stats_exclude_skipped_providers() {
        let providers: Vec<Arc<dyn BackupProviderClient>> = vec![
            Arc::new(MockProvider::ok(BackupProvider::Infura)),
            Arc::new(MockProvider::ok(BackupProvider::NftStorage).unconfigured()),
        ];
        let files = vec![UploadItem::new("a", "a"), UploadItem::new("b", "b")];

        let batch = replicator(providers, fast_retry())
            .batch_backup_upload(files, 2)
            .await;

        assert!(!batch.summary.provider_stats.contains_key(&BackupProvider::NftStorage));
        assert_eq!(batch.summary.provider_stats[&BackupProvider::Infura].success_rate, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_file_reports_keep_their_tags() {
        let providers: Vec<Arc<dyn BackupProviderClient>> =
            vec![Arc::new(MockProvider::ok(BackupProvider::Infura))];
        let files = vec![
            UploadItem::new("shared.png", "a-image").with_tag(ASSET_TAG, "a"),
            UploadItem::new("shared.png", "b-image").with_tag(ASSET_TAG, "b"),
        ];

        let batch = replicator(providers, fast_retry())
            .batch_backup_upload(files, 2)
            .await;

        assert_eq!(batch.results.len(), 2);
        for (asset, name) in [("a", "a-image"), ("b", "b-image")] {
            let report = batch.report_for_asset(asset).expect("report per asset");
            assert_eq!(report.file_name, name);
            assert!(report.is_backed_up());
        }
        assert!(batch.report_for_asset("c").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_serializes_camel_case() {
        let providers: Vec<Arc<dyn BackupProviderClient>> =
            vec![Arc::new(MockProvider::ok(BackupProvider::Infura))];
        let report = replicator(providers, fast_retry())
            .backup_upload(Path::new("a.png"), &UploadOptions::default())
            .await;

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["fileName"], "a.png");
        assert_eq!(json["summary"]["total"], 1);
        assert_eq!(json["providers"]["infura"]["success"], true);
    }
}
