use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Client;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{
    BatchVerifyReport, CidInfo, GatewayCheck, HashAlgorithm, IntegrityReport, MonitorOptions,
    MonitoringSample, MonitoringSession, VerificationResult, VerifyOptions,
};
use crate::backup::percentage;
use crate::config::{gateway_label, gateway_url, PinvaultConfig};
use crate::error::{Error, Result};
use crate::primary::PrimaryStorageClient;
use crate::window::run_windowed;

/// Checks CIDs against a fixed list of public gateways
pub struct IntegrityVerifier {
    client: Client,
    gateways: Vec<Url>,
    required_gateways: usize,
    probe_timeout: Duration,
    download_timeout: Duration,
    primary: Option<Arc<dyn PrimaryStorageClient>>,
}

impl IntegrityVerifier {
    pub fn new(config: &PinvaultConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("pinvault/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: &PinvaultConfig, client: Client) -> Self {
        Self {
            client,
            gateways: config.gateways.verify.clone(),
            required_gateways: config.gateways.required,
            probe_timeout: config.timeouts.probe,
            download_timeout: config.timeouts.download,
            primary: None,
        }
    }

    /// Attach the primary client used for pin status lookups
    pub fn with_primary(mut self, primary: Arc<dyn PrimaryStorageClient>) -> Self {
        self.primary = Some(primary);
        self
    }

    pub fn gateways(&self) -> &[Url] {
        &self.gateways
    }

    /// Default options for this verifier's configured quorum
    pub fn default_options(&self) -> VerifyOptions {
        VerifyOptions {
            verify_all: false,
            required_gateways: self.required_gateways,
        }
    }

    /// HEAD every gateway concurrently and decide validity by quorum.
    ///
    /// See the module docs for the early-exit cancellation policy.
    #[instrument(skip(self))]
    pub async fn verify_cid(&self, cid: &str, options: VerifyOptions) -> VerificationResult {
        let mut result =
            VerificationResult::new(cid, self.gateways.len(), options.required_gateways);
        let quorum = result.quorum();

        let mut probes: FuturesUnordered<_> = self
            .gateways
            .iter()
            .map(|gateway| self.probe(gateway, cid))
            .collect();

        while let Some((label, check)) = probes.next().await {
            result.record(label, check);
            if !options.verify_all && result.total > 0 && result.accessible >= quorum {
                break;
            }
        }

        result.settled = probes.is_empty();
        if !result.settled {
            debug!(
                "Quorum reached for {}; cancelling {} outstanding probes",
                cid,
                probes.len()
            );
        }
        // Dropping the set cancels any in-flight request
        drop(probes);

        for gateway in &self.gateways {
            result
                .gateways
                .entry(gateway_label(gateway))
                .or_insert_with(GatewayCheck::not_checked);
        }
        result.checked_at = Utc::now();

        info!(
            "CID {} accessible on {}/{} gateways (valid: {}, settled: {})",
            cid, result.accessible, result.total, result.valid, result.settled
        );
        result
    }

    async fn probe(&self, gateway: &Url, cid: &str) -> (String, GatewayCheck) {
        let label = gateway_label(gateway);
        let url = gateway_url(gateway, cid);
        let started = Instant::now();

        let check = match self
            .client
            .head(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status();
                let headers = response.headers();
                let accessible = status.is_success();
                GatewayCheck {
                    accessible,
                    checked: true,
                    status: Some(status.as_u16()),
                    content_type: headers
                        .get(CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string),
                    content_length: headers
                        .get(CONTENT_LENGTH)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse().ok()),
                    latency_ms: Some(started.elapsed().as_millis() as u64),
                    error: (!accessible).then(|| format!("HTTP {}", status.as_u16())),
                }
            }
            Err(e) => GatewayCheck {
                accessible: false,
                checked: true,
                latency_ms: Some(started.elapsed().as_millis() as u64),
                error: Some(if e.is_timeout() {
                    "timeout".to_string()
                } else {
                    e.to_string()
                }),
                ..GatewayCheck::default()
            },
        };

        #[cfg(feature = "metrics")]
        crate::metrics::record_probe(&label, check.accessible);

        debug!("Probe {} -> accessible: {}", url, check.accessible);
        (label, check)
    }

    /// Download the content from the first gateway that serves it and hash it.
    ///
    /// A hash mismatch is reported through `matches`, never as an error.
    #[instrument(skip(self))]
    pub async fn verify_content_integrity(
        &self,
        cid: &str,
        expected_hash: Option<&str>,
        algorithm: HashAlgorithm,
    ) -> IntegrityReport {
        let mut report = IntegrityReport {
            cid: cid.to_string(),
            retrieved: false,
            gateway: None,
            algorithm,
            hash: None,
            expected_hash: expected_hash.map(str::to_string),
            matches: None,
            size: None,
            content_type: None,
            errors: Vec::new(),
        };

        for gateway in &self.gateways {
            let label = gateway_label(gateway);
            let url = gateway_url(gateway, cid);

            let response = match self
                .client
                .get(&url)
                .timeout(self.download_timeout)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => resp,
                Ok(resp) => {
                    report
                        .errors
                        .push(format!("{label}: HTTP {}", resp.status().as_u16()));
                    continue;
                }
                Err(e) => {
                    report.errors.push(format!("{label}: {e}"));
                    continue;
                }
            };

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let body = match response.bytes().await {
                Ok(body) => body,
                Err(e) => {
                    report.errors.push(format!("{label}: {e}"));
                    continue;
                }
            };

            let hash = algorithm.digest_hex(&body);
            report.matches =
                expected_hash.map(|expected| expected.trim().eq_ignore_ascii_case(&hash));
            if report.matches == Some(false) {
                warn!("Integrity mismatch for {} from {}", cid, label);
            }
            info!("Retrieved {} ({} bytes) from {}", cid, body.len(), label);

            report.retrieved = true;
            report.gateway = Some(label);
            report.hash = Some(hash);
            report.size = Some(body.len() as u64);
            report.content_type = content_type;
            return report;
        }

        warn!("Could not retrieve {} from any gateway", cid);
        report
    }

    /// Check reachability `floor(duration / interval)` times, sleeping
    /// `interval` between checks.
    #[instrument(skip(self))]
    pub async fn monitor_cid(
        &self,
        cid: &str,
        options: MonitorOptions,
    ) -> Result<MonitoringSession> {
        if options.interval.is_zero() {
            return Err(Error::ConfigError("Monitoring interval must be positive".into()));
        }

        let total_checks = options.check_count() as usize;
        let started_at = Utc::now();
        let mut checks = Vec::with_capacity(total_checks);
        info!(
            "Monitoring {} with {} checks every {:?}",
            cid, total_checks, options.interval
        );

        let check_options = VerifyOptions {
            verify_all: false,
            required_gateways: 1,
        };
        for i in 0..total_checks {
            let result = self.verify_cid(cid, check_options).await;
            checks.push(MonitoringSample {
                timestamp: result.checked_at,
                valid: result.valid,
                accessible: result.accessible,
                total: result.total,
            });
            if i + 1 < total_checks {
                tokio::time::sleep(options.interval).await;
            }
        }

        let successful_checks = checks.iter().filter(|c| c.valid).count();
        let uptime = percentage(successful_checks, total_checks);
        info!("Monitoring of {} finished: uptime {}%", cid, uptime);

        Ok(MonitoringSession {
            cid: cid.to_string(),
            checks,
            total_checks,
            successful_checks,
            uptime,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Full verification, integrity check when valid, and best-effort pin status
    #[instrument(skip(self))]
    pub async fn get_cid_info(&self, cid: &str) -> CidInfo {
        let verification = self
            .verify_cid(
                cid,
                VerifyOptions {
                    verify_all: true,
                    required_gateways: self.required_gateways,
                },
            )
            .await;

        let integrity = if verification.valid {
            Some(
                self.verify_content_integrity(cid, None, HashAlgorithm::default())
                    .await,
            )
        } else {
            None
        };

        let pin_status = match &self.primary {
            Some(primary) => match primary.get_pin_status(cid).await {
                Ok(status) => Some(status),
                Err(e) => {
                    warn!("Pin status lookup for {} failed: {}", cid, e);
                    None
                }
            },
            None => None,
        };

        CidInfo {
            cid: cid.to_string(),
            verification,
            integrity,
            pin_status,
        }
    }

    /// Verify many CIDs, at most `concurrency` at a time.
    ///
    /// Probes are always settled here so the accessibility average reflects
    /// every gateway.
    pub async fn batch_verify(&self, cids: Vec<String>, concurrency: usize) -> BatchVerifyReport {
        info!(
            "Verifying {} CIDs (concurrency: {})",
            cids.len(),
            concurrency
        );
        let options = VerifyOptions {
            verify_all: true,
            required_gateways: self.required_gateways,
        };

        let results = run_windowed(cids, concurrency, |cid| async move {
            self.verify_cid(&cid, options).await
        })
        .await;

        let report = BatchVerifyReport::from_results(results);
        info!(
            "Batch verification: {}/{} valid, average accessibility {}%",
            report.summary.valid, report.summary.total, report.summary.average_accessibility
        );
        report
    }
}
