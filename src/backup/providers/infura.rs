use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use super::{AuthScheme, BackupProviderClient, HttpUploader, UploadOutcome};
use crate::backup::BackupProvider;
use crate::item::UploadOptions;

/// Infura IPFS `add` endpoint, authenticated with the project id
pub struct InfuraProvider {
    http: HttpUploader,
}

impl InfuraProvider {
    pub(crate) fn new(http: HttpUploader) -> Self {
        Self { http }
    }
}

/// `{"Name": ..., "Hash": <cid>, "Size": "1234"}`
pub fn normalize_response(body: &Value) -> UploadOutcome {
    let Some(cid) = body["Hash"].as_str() else {
        return UploadOutcome::failure("Missing CID in Infura response", false);
    };
    // Size arrives as a decimal string from the IPFS HTTP API
    let size = body["Size"]
        .as_u64()
        .or_else(|| body["Size"].as_str().and_then(|s| s.parse().ok()));

    UploadOutcome::Success {
        cid: cid.to_string(),
        url: BackupProvider::Infura.content_url(cid),
        size,
    }
}

#[async_trait]
impl BackupProviderClient for InfuraProvider {
    fn provider(&self) -> BackupProvider {
        BackupProvider::Infura
    }

    fn is_configured(&self) -> bool {
        self.http.is_configured()
    }

    async fn upload(&self, file_path: &Path, options: &UploadOptions) -> UploadOutcome {
        self.http
            .post_file(AuthScheme::BasicProjectId, file_path, options, normalize_response)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::providers::test_support::{temp_file, uploader};
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_normalize_string_size() {
        let outcome = normalize_response(&json!({"Name": "a.png", "Hash": "QmHash", "Size": "42"}));
        assert_eq!(
            outcome,
            UploadOutcome::Success {
                cid: "QmHash".to_string(),
                url: "https://ipfs.infura.io/ipfs/QmHash".to_string(),
                size: Some(42),
            }
        );
    }

    #[test]
    fn test_normalize_missing_hash() {
        let outcome = normalize_response(&json!({"Name": "a.png"}));
        assert!(matches!(outcome, UploadOutcome::Failure(f) if !f.retryable));
    }

    #[tokio::test]
    async fn test_upload_uses_basic_project_auth() {
        let server = MockServer::start().await;
        // base64("project-123:")
        Mock::given(method("POST"))
            .and(path("/upload"))
            .and(header("authorization", "Basic cHJvamVjdC0xMjM6"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Name": "asset.png",
                "Hash": "QmInfura",
                "Size": "5"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = InfuraProvider::new(uploader(
            BackupProvider::Infura,
            &server.uri(),
            Some("project-123"),
        ));
        let file = temp_file(b"hello");
        let outcome = provider.upload(file.path(), &UploadOptions::default()).await;

        let content = outcome.into_result().unwrap();
        assert_eq!(content.cid, "QmInfura");
        assert_eq!(content.size, Some(5));
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let provider = InfuraProvider::new(uploader(
            BackupProvider::Infura,
            &server.uri(),
            Some("project-123"),
        ));
        let file = temp_file(b"hello");
        let failure = provider
            .upload(file.path(), &UploadOptions::default())
            .await
            .into_result()
            .unwrap_err();

        assert!(failure.retryable);
        assert!(failure.reason.contains("503"));
    }
}
