//! Runtime configuration
//!
//! One explicit [`PinvaultConfig`] value is built from the environment,
//! validated once, and handed to every component constructor. Nothing in
//! the crate reads the environment after that point.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::backoff::RetryPolicy;
use crate::backup::BackupProvider;
use crate::error::{Error, Result};

/// Tolerance when checking that a distribution totals 100%
pub const DISTRIBUTION_EPSILON: f64 = 0.01;

pub const DEFAULT_VERIFY_GATEWAYS: &[&str] = &[
    "https://gateway.pinata.cloud/ipfs",
    "https://ipfs.io/ipfs",
    "https://cloudflare-ipfs.com/ipfs",
    "https://dweb.link/ipfs",
];

/// Primary provider's gateway first, then public gateways
pub const DEFAULT_RESTORE_GATEWAYS: &[&str] = &[
    "https://gateway.pinata.cloud/ipfs",
    "https://ipfs.io/ipfs",
    "https://cloudflare-ipfs.com/ipfs",
    "https://dweb.link/ipfs",
    "https://nftstorage.link/ipfs",
    "https://w3s.link/ipfs",
];

/// Credentials for the primary pinning service
#[derive(Clone, Default)]
pub struct PrimaryCredentials {
    pub jwt: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

impl PrimaryCredentials {
    pub fn is_configured(&self) -> bool {
        self.jwt.is_some() || (self.api_key.is_some() && self.api_secret.is_some())
    }
}

impl std::fmt::Debug for PrimaryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimaryCredentials")
            .field("jwt", &self.jwt.as_ref().map(|_| "[REDACTED]"))
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_secret", &self.api_secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Endpoint and optional credential for one backup provider
#[derive(Clone)]
pub struct ProviderSettings {
    pub provider: BackupProvider,
    /// Absent credential means the provider is skipped, not failed
    pub credential: Option<String>,
    pub api_url: Url,
}

impl ProviderSettings {
    pub fn is_configured(&self) -> bool {
        self.credential.as_deref().is_some_and(|c| !c.is_empty())
    }
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("provider", &self.provider)
            .field("credential", &self.credential.as_ref().map(|_| "[REDACTED]"))
            .field("api_url", &self.api_url.as_str())
            .finish()
    }
}

/// Gateway lists used for verification and restore
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    pub verify: Vec<Url>,
    pub restore: Vec<Url>,
    /// Quorum for a CID to count as valid
    pub required: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            verify: parse_static_urls(DEFAULT_VERIFY_GATEWAYS),
            restore: parse_static_urls(DEFAULT_RESTORE_GATEWAYS),
            required: 2,
        }
    }
}

/// Per-call network timeouts
#[derive(Clone, Copy, Debug)]
pub struct Timeouts {
    pub upload: Duration,
    pub probe: Duration,
    pub download: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            upload: Duration::from_secs(60),
            probe: Duration::from_secs(10),
            download: Duration::from_secs(30),
        }
    }
}

/// Percentage split across stakeholders; must total 100
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Distribution(pub BTreeMap<String, f64>);

impl Default for Distribution {
    fn default() -> Self {
        Distribution(BTreeMap::from([
            ("oracle".to_string(), 55.0),
            ("agents".to_string(), 15.0),
            ("dao".to_string(), 30.0),
        ]))
    }
}

impl Distribution {
    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some((name, share)) = self.0.iter().find(|(_, v)| !v.is_finite()) {
            return Err(Error::ConfigError(format!(
                "Distribution share for {name} is not a finite number: {share}"
            )));
        }
        let total = self.total();
        if total.is_nan() || (total - 100.0).abs() > DISTRIBUTION_EPSILON {
            return Err(Error::InvalidDistribution { total });
        }
        if let Some((name, share)) = self.0.iter().find(|(_, v)| **v < 0.0) {
            return Err(Error::ConfigError(format!(
                "Distribution share for {name} is negative: {share}"
            )));
        }
        Ok(())
    }
}

impl FromStr for Distribution {
    type Err = Error;

    /// Parses `name=percent,name=percent`
    fn from_str(s: &str) -> Result<Self> {
        let mut shares = BTreeMap::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = part.split_once('=').ok_or_else(|| {
                Error::ConfigError(format!(
                    "Invalid distribution entry '{part}', expected name=percent"
                ))
            })?;
            let value: f64 = value
                .trim()
                .parse()
                .ok()
                .filter(|v: &f64| v.is_finite())
                .ok_or_else(|| {
                    Error::ConfigError(format!("Invalid percentage in distribution entry '{part}'"))
                })?;
            shares.insert(name.trim().to_string(), value);
        }
        if shares.is_empty() {
            return Err(Error::ConfigError("Distribution is empty".to_string()));
        }
        Ok(Distribution(shares))
    }
}

/// Complete runtime configuration
#[derive(Clone, Debug)]
pub struct PinvaultConfig {
    pub primary: PrimaryCredentials,
    pub providers: Vec<ProviderSettings>,
    pub max_concurrent_uploads: usize,
    pub retry: RetryPolicy,
    pub gateways: GatewayConfig,
    pub timeouts: Timeouts,
    pub distribution: Distribution,
}

impl Default for PinvaultConfig {
    fn default() -> Self {
        Self {
            primary: PrimaryCredentials::default(),
            providers: BackupProvider::ALL
                .iter()
                .map(|p| ProviderSettings {
                    provider: *p,
                    credential: None,
                    api_url: p.default_api_url(),
                })
                .collect(),
            max_concurrent_uploads: 2,
            retry: RetryPolicy::default(),
            gateways: GatewayConfig::default(),
            timeouts: Timeouts::default(),
            distribution: Distribution::default(),
        }
    }
}

impl PinvaultConfig {
    /// Build configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let primary = PrimaryCredentials {
            jwt: get("PINATA_JWT"),
            api_key: get("PINATA_API_KEY"),
            api_secret: get("PINATA_SECRET_API_KEY"),
        };

        let mut providers = Vec::with_capacity(BackupProvider::ALL.len());
        for provider in BackupProvider::ALL {
            let api_url = match get(provider.api_url_env()) {
                Some(raw) => Url::parse(&raw)?,
                None => provider.default_api_url(),
            };
            providers.push(ProviderSettings {
                provider,
                credential: get(provider.credential_env()),
                api_url,
            });
        }

        let max_concurrent_uploads =
            parse_knob(get("MAX_CONCURRENT_UPLOADS"), "MAX_CONCURRENT_UPLOADS", 2)?;
        let max_attempts = parse_knob(get("RETRY_ATTEMPTS"), "RETRY_ATTEMPTS", 3)?;
        let retry_delay_ms = parse_knob(get("RETRY_DELAY"), "RETRY_DELAY", 3000)?;

        let gateways = GatewayConfig {
            verify: match get("IPFS_GATEWAYS") {
                Some(raw) => parse_url_list(&raw)?,
                None => defaults.gateways.verify,
            },
            restore: match get("RESTORE_GATEWAYS") {
                Some(raw) => parse_url_list(&raw)?,
                None => defaults.gateways.restore,
            },
            required: parse_knob(get("REQUIRED_GATEWAYS"), "REQUIRED_GATEWAYS", 2)?,
        };

        let timeouts = Timeouts {
            upload: Duration::from_secs(parse_knob(
                get("UPLOAD_TIMEOUT_SECS"),
                "UPLOAD_TIMEOUT_SECS",
                60,
            )?),
            probe: Duration::from_secs(parse_knob(
                get("PROBE_TIMEOUT_SECS"),
                "PROBE_TIMEOUT_SECS",
                10,
            )?),
            download: Duration::from_secs(parse_knob(
                get("DOWNLOAD_TIMEOUT_SECS"),
                "DOWNLOAD_TIMEOUT_SECS",
                30,
            )?),
        };

        let distribution = match get("DISTRIBUTION") {
            Some(raw) => raw.parse()?,
            None => defaults.distribution,
        };

        let config = Self {
            primary,
            providers,
            max_concurrent_uploads,
            retry: RetryPolicy::linear(max_attempts, Duration::from_millis(retry_delay_ms)),
            gateways,
            timeouts,
            distribution,
        };
        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    /// Validation shared by every entry point. Runs before any network call.
    pub fn validate(&self) -> Result<()> {
        self.distribution.validate()?;
        if self.gateways.verify.is_empty() {
            return Err(Error::ConfigError("At least one verification gateway is required".into()));
        }
        if self.gateways.restore.is_empty() {
            return Err(Error::ConfigError("At least one restore gateway is required".into()));
        }
        if self.gateways.required == 0 {
            return Err(Error::ConfigError("REQUIRED_GATEWAYS must be at least 1".into()));
        }
        if self.max_concurrent_uploads == 0 {
            return Err(Error::ConfigError("MAX_CONCURRENT_UPLOADS must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::ConfigError("RETRY_ATTEMPTS must be at least 1".into()));
        }
        let timeouts = [
            ("UPLOAD_TIMEOUT_SECS", self.timeouts.upload),
            ("PROBE_TIMEOUT_SECS", self.timeouts.probe),
            ("DOWNLOAD_TIMEOUT_SECS", self.timeouts.download),
        ];
        if let Some((key, _)) = timeouts.iter().find(|(_, t)| t.is_zero()) {
            return Err(Error::ConfigError(format!("{key} must be at least 1")));
        }
        Ok(())
    }

    /// Validation for runs that talk to the primary pinning service
    pub fn validate_for_primary(&self) -> Result<()> {
        if !self.primary.is_configured() {
            return Err(Error::ConfigError(
                "Missing primary credentials: set PINATA_JWT or \
                 PINATA_API_KEY and PINATA_SECRET_API_KEY"
                    .into(),
            ));
        }
        self.validate()
    }

    /// Backup providers with a credential present
    pub fn configured_providers(&self) -> Vec<BackupProvider> {
        self.providers
            .iter()
            .filter(|p| p.is_configured())
            .map(|p| p.provider)
            .collect()
    }

    pub fn provider(&self, provider: BackupProvider) -> Option<&ProviderSettings> {
        self.providers.iter().find(|p| p.provider == provider)
    }
}

fn parse_knob<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T> {
    match raw {
        Some(value) => value
            .parse()
            .map_err(|_| Error::ConfigError(format!("{key} must be a number, got '{value}'"))),
        None => Ok(default),
    }
}

fn parse_url_list(raw: &str) -> Result<Vec<Url>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Url::parse(s).map_err(Error::from))
        .collect()
}

fn parse_static_urls(urls: &[&str]) -> Vec<Url> {
    urls.iter().filter_map(|u| Url::parse(u).ok()).collect()
}

/// `{gateway}/{cid}` without doubled slashes
pub fn gateway_url(gateway: &Url, cid: &str) -> String {
    format!("{}/{}", gateway_label(gateway), cid)
}

/// Stable display form of a gateway base URL
pub fn gateway_label(gateway: &Url) -> String {
    gateway.as_str().trim_end_matches('/').to_string()
}
