//! Prometheus metrics for pinvault
//!
//! # Exported metrics
//! Available when built with `--features metrics` (default):
//! - `pinvault_provider_uploads_total` (counter): upload outcomes labeled by provider and outcome.
//! - `pinvault_provider_retries_total` (counter): retry sleeps labeled by provider.
//! - `pinvault_upload_duration_seconds` (histogram): wall time per (file, provider),
//!   retries included.
//! - `pinvault_gateway_probes_total` (counter): gateway HEAD probes labeled by gateway and outcome.
//! - `pinvault_restores_total` (counter): restore attempts labeled by gateway and outcome.

use std::sync::atomic::AtomicU64;

use once_cell::sync::Lazy;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ProviderLabels {
    pub provider: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ProviderOutcomeLabels {
    pub provider: String,
    /// "success", "failure" or "skipped"
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct GatewayOutcomeLabels {
    pub gateway: String,
    pub outcome: String,
}

pub static PROVIDER_UPLOADS_TOTAL: Lazy<Family<ProviderOutcomeLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static PROVIDER_RETRIES_TOTAL: Lazy<Family<ProviderLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static UPLOAD_DURATION_SECONDS: Lazy<Family<ProviderLabels, Histogram>> = Lazy::new(|| {
    fn upload_histogram() -> Histogram {
        // 50ms .. ~27min across 16 buckets; retries with long backoff land at the top.
        Histogram::new(exponential_buckets(0.05, 2.0, 16))
    }

    Family::new_with_constructor(upload_histogram)
});

pub static GATEWAY_PROBES_TOTAL: Lazy<Family<GatewayOutcomeLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static RESTORES_TOTAL: Lazy<Family<GatewayOutcomeLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "pinvault_provider_uploads",
        "Backup provider upload outcomes",
        PROVIDER_UPLOADS_TOTAL.clone(),
    );
    registry.register(
        "pinvault_provider_retries",
        "Retries issued against backup providers",
        PROVIDER_RETRIES_TOTAL.clone(),
    );
    registry.register(
        "pinvault_upload_duration_seconds",
        "Time spent uploading one file to one provider, including retries",
        UPLOAD_DURATION_SECONDS.clone(),
    );
    registry.register(
        "pinvault_gateway_probes",
        "Gateway reachability probes",
        GATEWAY_PROBES_TOTAL.clone(),
    );
    registry.register(
        "pinvault_restores",
        "Restore attempts per gateway",
        RESTORES_TOTAL.clone(),
    );
    registry
});

/// Record the final outcome of one (file, provider) upload.
pub fn record_upload(provider: &str, outcome: &str, seconds: f64, attempts: u32) {
    PROVIDER_UPLOADS_TOTAL
        .get_or_create(&ProviderOutcomeLabels {
            provider: provider.to_string(),
            outcome: outcome.to_string(),
        })
        .inc();

    if outcome == "skipped" {
        return;
    }

    let labels = ProviderLabels {
        provider: provider.to_string(),
    };
    UPLOAD_DURATION_SECONDS.get_or_create(&labels).observe(seconds);
    if attempts > 1 {
        PROVIDER_RETRIES_TOTAL
            .get_or_create(&labels)
            .inc_by(u64::from(attempts - 1));
    }
}

pub fn record_probe(gateway: &str, accessible: bool) {
    GATEWAY_PROBES_TOTAL
        .get_or_create(&GatewayOutcomeLabels {
            gateway: gateway.to_string(),
            outcome: if accessible { "accessible" } else { "unreachable" }.to_string(),
        })
        .inc();
}

pub fn record_restore(gateway: &str, success: bool) {
    RESTORES_TOTAL
        .get_or_create(&GatewayOutcomeLabels {
            gateway: gateway.to_string(),
            outcome: if success { "success" } else { "failure" }.to_string(),
        })
        .inc();
}

/// Render the registry in OpenMetrics text format
pub fn render() -> String {
    let mut buffer = String::new();
    if encode(&mut buffer, &REGISTRY).is_err() {
        buffer.clear();
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_upload_counts_retries() {
        record_upload("infura-test", "success", 1.5, 3);
        let retries = PROVIDER_RETRIES_TOTAL
            .get_or_create(&ProviderLabels {
                provider: "infura-test".to_string(),
            })
            .get();
        assert_eq!(retries, 2);
    }

    #[test]
    fn test_render_contains_registered_metrics() {
        record_probe("https://gateway.test", true);
        record_restore("https://gateway.test", false);
        let text = render();
        assert!(text.contains("pinvault_gateway_probes_total"));
        assert!(text.contains("pinvault_restores_total"));
    }
}
