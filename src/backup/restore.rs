//! Restore content for a CID from the first gateway that can serve it
//!
//! Gateways are tried strictly in the configured order. The body is
//! streamed to disk chunk by chunk; the first gateway that delivers the
//! whole body wins and later gateways are never contacted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};
use url::Url;

use crate::config::{gateway_label, gateway_url, PinvaultConfig};
use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResult {
    pub cid: String,
    /// Gateway that served the content
    pub gateway: String,
    pub output_path: PathBuf,
    pub bytes_written: u64,
    /// Gateways that failed before the successful one, with their errors
    pub failed_gateways: Vec<(String, String)>,
}

#[derive(Clone)]
pub struct RestoreService {
    client: Client,
    gateways: Vec<Url>,
    timeout: Duration,
}

impl RestoreService {
    pub fn new(client: Client, gateways: Vec<Url>, timeout: Duration) -> Self {
        Self {
            client,
            gateways,
            timeout,
        }
    }

    pub fn from_config(config: &PinvaultConfig, client: Client) -> Self {
        Self::new(
            client,
            config.gateways.restore.clone(),
            config.timeouts.download,
        )
    }

    pub fn gateways(&self) -> &[Url] {
        &self.gateways
    }

    /// Write the content of `cid` to `output_path`.
    ///
    /// Fails with [`Error::RestoreExhausted`] once every gateway has failed.
    /// No retry happens here; the caller decides whether to try again.
    /// A file already at `output_path` is left alone unless a gateway
    /// answered with content and the write began.
    #[instrument(skip(self, output_path), fields(output = %output_path.display()))]
    pub async fn restore_from_backup(
        &self,
        cid: &str,
        output_path: &Path,
    ) -> Result<RestoreResult> {
        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut failed_gateways = Vec::new();
        let mut output_written = false;

        for gateway in &self.gateways {
            let label = gateway_label(gateway);
            let url = gateway_url(gateway, cid);
            info!("Attempting restore of {} from {}", cid, label);

            match self.stream_to_file(&url, output_path, &mut output_written).await {
                Ok(bytes_written) => {
                    #[cfg(feature = "metrics")]
                    crate::metrics::record_restore(&label, true);

                    info!(
                        "Restored {} ({} bytes) from {} to {}",
                        cid,
                        bytes_written,
                        label,
                        output_path.display()
                    );
                    return Ok(RestoreResult {
                        cid: cid.to_string(),
                        gateway: label,
                        output_path: output_path.to_path_buf(),
                        bytes_written,
                        failed_gateways,
                    });
                }
                Err(e) => {
                    #[cfg(feature = "metrics")]
                    crate::metrics::record_restore(&label, false);

                    warn!("Restore of {} from {} failed: {}", cid, label, e);
                    failed_gateways.push((label, e));
                }
            }
        }

        // Don't leave a truncated file behind
        if output_written {
            if let Err(e) = tokio::fs::remove_file(output_path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove partial file {}: {}", output_path.display(), e);
                }
            }
        }

        Err(Error::RestoreExhausted {
            cid: cid.to_string(),
            attempted: failed_gateways.into_iter().map(|(gateway, _)| gateway).collect(),
        })
    }

    /// Sets `output_written` once the output file has been created
    async fn stream_to_file(
        &self,
        url: &str,
        output_path: &Path,
        output_written: &mut bool,
    ) -> std::result::Result<u64, String> {
        let mut response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status().as_u16()));
        }

        // Truncates whatever a previous gateway left behind
        let mut file = tokio::fs::File::create(output_path)
            .await
            .map_err(|e| format!("cannot create {}: {e}", output_path.display()))?;
        *output_written = true;

        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|e| e.to_string())? {
            file.write_all(&chunk)
                .await
                .map_err(|e| format!("write failed: {e}"))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| format!("flush failed: {e}"))?;

        Ok(written)
    }
}
