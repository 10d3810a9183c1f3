//! Unit tests for the gateway verifier

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use serde_json::Value;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::PinvaultConfig;
    use crate::error::{Error, Result};
    use crate::item::UploadItem;
    use crate::primary::{PinStatus, PinnedContent, PrimaryStorageClient};
    use crate::verify::{HashAlgorithm, IntegrityVerifier, MonitorOptions, VerifyOptions};

    const CID: &str = "bafyverify";

    fn verifier(server: &MockServer, prefixes: &[&str], required: usize) -> IntegrityVerifier {
        let mut config = PinvaultConfig::default();
        config.gateways.verify = prefixes
            .iter()
            .map(|p| Url::parse(&format!("{}/{}", server.uri(), p)).unwrap())
            .collect();
        config.gateways.required = required;
        config.timeouts.probe = Duration::from_secs(10);
        config.timeouts.download = Duration::from_secs(10);
        IntegrityVerifier::with_client(&config, reqwest::Client::new())
    }

    async fn mount_head(server: &MockServer, prefix: &str, status: u16, delay: Duration) {
        Mock::given(method("HEAD"))
            .and(path(format!("/{prefix}/{CID}")))
            .respond_with(
                ResponseTemplate::new(status)
                    .insert_header("content-type", "image/png")
                    .set_delay(delay),
            )
            .mount(server)
            .await;
    }

    // ---------------------------------------------------------------
    // Quorum
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_two_of_four_gateways_is_valid() {
        let server = MockServer::start().await;
        mount_head(&server, "g1", 200, Duration::ZERO).await;
        mount_head(&server, "g2", 200, Duration::ZERO).await;
        mount_head(&server, "g3", 404, Duration::ZERO).await;
        mount_head(&server, "g4", 500, Duration::ZERO).await;

        let v = verifier(&server, &["g1", "g2", "g3", "g4"], 2);
        let result = v
            .verify_cid(
                CID,
                VerifyOptions {
                    verify_all: true,
                    required_gateways: 2,
                },
            )
            .await;

        assert!(result.valid);
        assert_eq!(result.accessible, 2);
        assert_eq!(result.total, 4);
        assert!(result.settled);
        assert_eq!(result.gateways.len(), 4);
        assert!(result.gateways.values().all(|c| c.checked));
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.accessibility(), 50.0);
        assert_eq!(
            result.metadata.as_ref().and_then(|m| m.content_type.as_deref()),
            Some("image/png")
        );
    }

    #[tokio::test]
    async fn test_one_of_four_gateways_is_invalid() {
        let server = MockServer::start().await;
        mount_head(&server, "g1", 200, Duration::ZERO).await;
        mount_head(&server, "g2", 404, Duration::ZERO).await;
        mount_head(&server, "g3", 404, Duration::ZERO).await;
        mount_head(&server, "g4", 404, Duration::ZERO).await;

        let v = verifier(&server, &["g1", "g2", "g3", "g4"], 2);
        let result = v.verify_cid(CID, v.default_options()).await;

        assert!(!result.valid);
        assert_eq!(result.accessible, 1);
        // Quorum never reached so every probe is observed
        assert!(result.settled);
        assert_eq!(result.errors.len(), 3);
        assert!(result.errors.iter().any(|e| e.contains("HTTP 404")));
    }

    #[tokio::test]
    async fn test_quorum_capped_by_gateway_count() {
        let server = MockServer::start().await;
        mount_head(&server, "only", 200, Duration::ZERO).await;

        let v = verifier(&server, &["only"], 3);
        let result = v.verify_cid(CID, v.default_options()).await;

        assert_eq!(result.quorum(), 1);
        assert!(result.valid);
    }

    #[tokio::test]
    async fn test_no_gateways_is_invalid() {
        let server = MockServer::start().await;
        let v = verifier(&server, &[], 2);
        let result = v.verify_cid(CID, v.default_options()).await;

        assert!(!result.valid);
        assert_eq!(result.total, 0);
        assert!(result.settled);
    }

    // ---------------------------------------------------------------
    // Early exit
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_early_exit_cancels_slow_gateways() {
        let server = MockServer::start().await;
        mount_head(&server, "fast1", 200, Duration::ZERO).await;
        mount_head(&server, "fast2", 200, Duration::ZERO).await;
        mount_head(&server, "slow1", 200, Duration::from_secs(5)).await;
        mount_head(&server, "slow2", 200, Duration::from_secs(5)).await;

        let v = verifier(&server, &["fast1", "fast2", "slow1", "slow2"], 2);
        let started = Instant::now();
        let result = v.verify_cid(CID, v.default_options()).await;

        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(result.valid);
        assert_eq!(result.accessible, 2);
        assert!(!result.settled);

        let slow = &result.gateways[&format!("{}/slow1", server.uri())];
        assert!(!slow.checked);
        assert!(!slow.accessible);
    }

    #[tokio::test]
    async fn test_verify_all_waits_for_every_gateway() {
        let server = MockServer::start().await;
        mount_head(&server, "fast1", 200, Duration::ZERO).await;
        mount_head(&server, "fast2", 200, Duration::ZERO).await;
        mount_head(&server, "slow", 200, Duration::from_millis(500)).await;

        let v = verifier(&server, &["fast1", "fast2", "slow"], 2);
        let started = Instant::now();
        let result = v
            .verify_cid(
                CID,
                VerifyOptions {
                    verify_all: true,
                    required_gateways: 2,
                },
            )
            .await;

        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(result.settled);
        assert_eq!(result.accessible, 3);
    }

    #[tokio::test]
    async fn test_probe_timeout_counts_as_inaccessible() {
        let server = MockServer::start().await;
        mount_head(&server, "stuck", 200, Duration::from_secs(5)).await;

        let mut config = PinvaultConfig::default();
        config.gateways.verify = vec![Url::parse(&format!("{}/stuck", server.uri())).unwrap()];
        config.timeouts.probe = Duration::from_millis(200);
        let v = IntegrityVerifier::with_client(&config, reqwest::Client::new());

        let result = v.verify_cid(CID, v.default_options()).await;
        assert!(!result.valid);
        let check = result.gateways.values().next().unwrap();
        assert!(check.checked);
        assert_eq!(check.error.as_deref(), Some("timeout"));
    }

    // ---------------------------------------------------------------
    // Integrity
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_integrity_matches_expected_hash() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/g1/{CID}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(&server)
            .await;

        let v = verifier(&server, &["g1"], 1);
        let expected = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        let report = v
            .verify_content_integrity(CID, Some(expected), HashAlgorithm::Sha256)
            .await;

        assert!(report.retrieved);
        assert_eq!(report.hash.as_deref(), Some(expected));
        assert_eq!(report.matches, Some(true));
        assert_eq!(report.size, Some(5));
    }

    #[tokio::test]
    async fn test_integrity_mismatch_is_reported_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/g1/{CID}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"tampered".to_vec()))
            .mount(&server)
            .await;

        let v = verifier(&server, &["g1"], 1);
        let report = v
            .verify_content_integrity(CID, Some("00ff"), HashAlgorithm::Sha256)
            .await;

        assert!(report.retrieved);
        assert_eq!(report.matches, Some(false));
    }

    #[tokio::test]
    async fn test_integrity_falls_back_to_next_gateway() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/down/{CID}")))
            .respond_with(ResponseTemplate::new(504))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/up/{CID}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let v = verifier(&server, &["down", "up"], 1);
        let report = v.verify_content_integrity(CID, None, HashAlgorithm::Sha512).await;

        assert!(report.retrieved);
        assert_eq!(report.gateway, Some(format!("{}/up", server.uri())));
        assert_eq!(report.matches, None);
        assert_eq!(report.hash.as_ref().map(String::len), Some(128));
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_integrity_unretrievable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let v = verifier(&server, &["a", "b"], 1);
        let report = v
            .verify_content_integrity(CID, Some("abc"), HashAlgorithm::Sha256)
            .await;

        assert!(!report.retrieved);
        assert_eq!(report.matches, None);
        assert_eq!(report.errors.len(), 2);
    }

    // ---------------------------------------------------------------
    // Monitoring
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_monitor_uptime() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path(format!("/g1/{CID}")))
            .respond_with(ResponseTemplate::new(200))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path(format!("/g1/{CID}")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let v = verifier(&server, &["g1"], 2);
        let session = v
            .monitor_cid(
                CID,
                MonitorOptions {
                    duration: Duration::from_millis(300),
                    interval: Duration::from_millis(100),
                },
            )
            .await
            .unwrap();

        assert_eq!(session.total_checks, 3);
        assert_eq!(session.successful_checks, 2);
        assert_eq!(session.uptime, 66.7);
        assert_eq!(session.checks.len(), 3);
        assert!(!session.checks[2].valid);
    }

    #[tokio::test]
    async fn test_monitor_rejects_zero_interval() {
        let server = MockServer::start().await;
        let v = verifier(&server, &["g1"], 1);
        let err = v
            .monitor_cid(
                CID,
                MonitorOptions {
                    duration: Duration::from_secs(1),
                    interval: Duration::ZERO,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_check_count_floors() {
        let opts = MonitorOptions {
            duration: Duration::from_secs(25),
            interval: Duration::from_secs(10),
        };
        assert_eq!(opts.check_count(), 2);
    }

    // ---------------------------------------------------------------
    // CID info and batch verification
    // ---------------------------------------------------------------

    struct PinLookup {
        fail: bool,
    }

    #[async_trait]
    impl PrimaryStorageClient for PinLookup {
        async fn test_connection(&self) -> Result<()> {
            Ok(())
        }

        async fn upload_file(&self, _item: &UploadItem) -> Result<PinnedContent> {
            Err(Error::ConfigError("not used".into()))
        }

        async fn upload_json(
            &self,
            _document: &Value,
            _name: &str,
            _tags: &BTreeMap<String, String>,
        ) -> Result<PinnedContent> {
            Err(Error::ConfigError("not used".into()))
        }

        async fn get_pin_status(&self, cid: &str) -> Result<PinStatus> {
            if self.fail {
                return Err(Error::PrimaryUnavailable("pin list unavailable".into()));
            }
            Ok(PinStatus {
                cid: cid.to_string(),
                pinned: true,
                size: Some(5),
                pinned_at: None,
            })
        }
    }

    async fn mount_served(server: &MockServer, prefix: &str) {
        mount_head(server, prefix, 200, Duration::ZERO).await;
        Mock::given(method("GET"))
            .and(path(format!("/{prefix}/{CID}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_cid_info_combines_checks() {
        let server = MockServer::start().await;
        mount_served(&server, "g1").await;
        mount_served(&server, "g2").await;

        let v = verifier(&server, &["g1", "g2"], 2)
            .with_primary(Arc::new(PinLookup { fail: false }));
        let info = v.get_cid_info(CID).await;

        assert!(info.verification.valid);
        assert!(info.verification.settled);
        assert_eq!(info.integrity.as_ref().map(|i| i.retrieved), Some(true));
        assert_eq!(info.pin_status.as_ref().map(|p| p.pinned), Some(true));
    }

    #[tokio::test]
    async fn test_cid_info_tolerates_pin_status_failure() {
        let server = MockServer::start().await;
        mount_head(&server, "g1", 404, Duration::ZERO).await;

        let v = verifier(&server, &["g1"], 1).with_primary(Arc::new(PinLookup { fail: true }));
        let info = v.get_cid_info(CID).await;

        assert!(!info.verification.valid);
        assert!(info.integrity.is_none());
        assert!(info.pin_status.is_none());
    }

    #[tokio::test]
    async fn test_batch_verify_summary() {
        let server = MockServer::start().await;
        for prefix in ["g1", "g2"] {
            Mock::given(method("HEAD"))
                .and(path(format!("/{prefix}/bafygood")))
                .respond_with(ResponseTemplate::new(200))
                .mount(&server)
                .await;
        }
        Mock::given(method("HEAD"))
            .and(path("/g1/bafyhalf"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let v = verifier(&server, &["g1", "g2"], 2);
        let report = v
            .batch_verify(
                vec!["bafygood".into(), "bafyhalf".into(), "bafygone".into()],
                2,
            )
            .await;

        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.valid, 1);
        assert_eq!(report.summary.invalid, 2);
        assert_eq!(report.summary.average_accessibility, 50.0);
        assert!(report.result_for("bafyhalf").is_some_and(|r| !r.valid && r.accessible == 1));
        assert!(report.results.iter().all(|r| r.settled));
    }
}
