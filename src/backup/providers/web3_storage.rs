use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use super::{AuthScheme, BackupProviderClient, HttpUploader, UploadOutcome};
use crate::backup::BackupProvider;
use crate::item::UploadOptions;

/// web3.storage upload API
pub struct Web3StorageProvider {
    http: HttpUploader,
}

impl Web3StorageProvider {
    pub(crate) fn new(http: HttpUploader) -> Self {
        Self { http }
    }
}

/// Flat `{"cid": ...}` body
pub fn normalize_response(body: &Value) -> UploadOutcome {
    match body["cid"].as_str() {
        Some(cid) => UploadOutcome::Success {
            cid: cid.to_string(),
            url: BackupProvider::Web3Storage.content_url(cid),
            size: None,
        },
        None => UploadOutcome::failure("Missing CID in web3.storage response", false),
    }
}

#[async_trait]
impl BackupProviderClient for Web3StorageProvider {
    fn provider(&self) -> BackupProvider {
        BackupProvider::Web3Storage
    }

    fn is_configured(&self) -> bool {
        self.http.is_configured()
    }

    async fn upload(&self, file_path: &Path, options: &UploadOptions) -> UploadOutcome {
        self.http
            .post_file(AuthScheme::Bearer, file_path, options, normalize_response)
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

    #[tokio::test]
    async fn test_upload_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload"))
            .and(header("authorization", "Bearer w3-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"cid": "bafyweb3"})))
            .expect(1)
            .mount(&server)
            .await;

        let provider = Web3StorageProvider::new(uploader(
            BackupProvider::Web3Storage,
            &server.uri(),
            Some("w3-token"),
        ));
        let file = temp_file(b"{\"name\":\"asset\"}");
        let content = provider
            .upload(file.path(), &UploadOptions::default())
            .await
            .into_result()
            .unwrap();

        assert_eq!(content.cid, "bafyweb3");
        assert_eq!(content.url, "https://bafyweb3.ipfs.w3s.link");
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
            .mount(&server)
            .await;

        let provider = Web3StorageProvider::new(uploader(
            BackupProvider::Web3Storage,
            &server.uri(),
            Some("bad"),
        ));
        let file = temp_file(b"data");
        let failure = provider
            .upload(file.path(), &UploadOptions::default())
            .await
            .into_result()
            .unwrap_err();

        assert!(!failure.retryable);
        assert!(failure.reason.contains("401"));
    }

    #[tokio::test]
    async fn test_missing_credential_short_circuits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let provider =
            Web3StorageProvider::new(uploader(BackupProvider::Web3Storage, &server.uri(), None));
        assert!(!provider.is_configured());
        let file = temp_file(b"data");
        let outcome = provider.upload(file.path(), &UploadOptions::default()).await;
        assert_eq!(outcome, UploadOutcome::failure("not configured", false));
    }
}
