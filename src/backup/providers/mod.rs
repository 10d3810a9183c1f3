pub mod infura;
pub mod nft_storage;
pub mod web3_storage;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::backoff::Retryable;
use crate::config::{PinvaultConfig, ProviderSettings};
use crate::item::UploadOptions;

use super::BackupProvider;

pub use infura::InfuraProvider;
pub use nft_storage::NftStorageProvider;
pub use web3_storage::Web3StorageProvider;

#[async_trait]
pub trait BackupProviderClient: Send + Sync {
    fn provider(&self) -> BackupProvider;

    /// Whether the provider's credential is present
    fn is_configured(&self) -> bool;

    /// Make exactly one upload attempt. Expected failures come back as
    /// [`UploadOutcome::Failure`], never as a panic or error.
    async fn upload(&self, file_path: &Path, options: &UploadOptions) -> UploadOutcome;
}

/// Provider response normalized into one shape
#[derive(Clone, Debug, PartialEq)]
pub enum UploadOutcome {
    Success {
        cid: String,
        url: String,
        size: Option<u64>,
    },
    Failure(UploadFailure),
}

impl UploadOutcome {
    pub fn failure(reason: impl Into<String>, retryable: bool) -> Self {
        UploadOutcome::Failure(UploadFailure {
            reason: reason.into(),
            retryable,
        })
    }

    pub fn into_result(self) -> Result<UploadedContent, UploadFailure> {
        match self {
            UploadOutcome::Success { cid, url, size } => Ok(UploadedContent { cid, url, size }),
            UploadOutcome::Failure(failure) => Err(failure),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct UploadedContent {
    pub cid: String,
    pub url: String,
    pub size: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UploadFailure {
    pub reason: String,
    pub retryable: bool,
}

impl std::fmt::Display for UploadFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

impl Retryable for UploadFailure {
    fn is_retryable(&self) -> bool {
        self.retryable
    }
}

/// Build one adapter per provider listed in the configuration
pub fn build_providers(
    config: &PinvaultConfig,
    client: Client,
) -> Vec<Arc<dyn BackupProviderClient>> {
    config
        .providers
        .iter()
        .map(|settings| -> Arc<dyn BackupProviderClient> {
            let http = HttpUploader::new(client.clone(), settings, config.timeouts.upload);
            match settings.provider {
                BackupProvider::Infura => Arc::new(InfuraProvider::new(http)),
                BackupProvider::Web3Storage => Arc::new(Web3StorageProvider::new(http)),
                BackupProvider::NftStorage => Arc::new(NftStorageProvider::new(http)),
            }
        })
        .collect()
}

/// Authorization scheme a provider expects
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AuthScheme {
    /// `Basic base64(credential + ":")`
    BasicProjectId,
    /// `Bearer credential`
    Bearer,
}

/// Multipart POST shared by every provider adapter
#[derive(Clone)]
pub(crate) struct HttpUploader {
    client: Client,
    provider: BackupProvider,
    credential: Option<String>,
    api_url: Url,
    timeout: Duration,
}

impl HttpUploader {
    pub(crate) fn new(client: Client, settings: &ProviderSettings, timeout: Duration) -> Self {
        Self {
            client,
            provider: settings.provider,
            credential: settings.credential.clone().filter(|c| !c.is_empty()),
            api_url: settings.api_url.clone(),
            timeout,
        }
    }

    pub(crate) fn is_configured(&self) -> bool {
        self.credential.is_some()
    }

    fn authorization(&self, scheme: AuthScheme, credential: &str) -> String {
        use base64::Engine;
        match scheme {
            AuthScheme::BasicProjectId => format!(
                "Basic {}",
                base64::engine::general_purpose::STANDARD.encode(format!("{credential}:"))
            ),
            AuthScheme::Bearer => format!("Bearer {credential}"),
        }
    }

    /// POST the file as multipart field `file` and hand the JSON body to
    /// `normalize`. Transport and status failures are classified here.
    pub(crate) async fn post_file<N>(
        &self,
        scheme: AuthScheme,
        file_path: &Path,
        options: &UploadOptions,
        normalize: N,
    ) -> UploadOutcome
    where
        N: FnOnce(&Value) -> UploadOutcome,
    {
        let Some(credential) = self.credential.as_deref() else {
            return UploadOutcome::failure("not configured", false);
        };

        let data = match tokio::fs::read(file_path).await {
            Ok(data) => data,
            Err(e) => {
                return UploadOutcome::failure(
                    format!("failed to read {}: {e}", file_path.display()),
                    false,
                )
            }
        };
        let file_name = options.display_name(file_path);
        let size = data.len();
        let form = Form::new().part("file", Part::bytes(data).file_name(file_name.clone()));

        debug!(
            "Uploading {} ({} bytes) to {}",
            file_name, size, self.provider
        );

        let response = match self
            .client
            .post(self.api_url.clone())
            .header(AUTHORIZATION, self.authorization(scheme, credential))
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return UploadOutcome::failure(describe_transport_error(&e), true),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return UploadOutcome::failure(
                format!("HTTP {}: {}", status.as_u16(), truncate(&body, 200)),
                is_retryable_status(status),
            );
        }

        match response.json::<Value>().await {
            Ok(body) => normalize(&body),
            Err(e) => UploadOutcome::failure(format!("invalid response body: {e}"), true),
        }
    }
}

/// 5xx, request timeout and rate limiting are worth another attempt
pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {e}")
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
