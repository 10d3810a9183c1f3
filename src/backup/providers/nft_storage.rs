use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use super::{AuthScheme, BackupProviderClient, HttpUploader, UploadOutcome};
use crate::backup::BackupProvider;
use crate::item::UploadOptions;

/// nft.storage upload API
pub struct NftStorageProvider {
    http: HttpUploader,
}

impl NftStorageProvider {
    pub(crate) fn new(http: HttpUploader) -> Self {
        Self { http }
    }
}

/// `{"ok": true, "value": {"cid": ..., "size": ...}}`
pub fn normalize_response(body: &Value) -> UploadOutcome {
    if body["ok"].as_bool() == Some(false) {
        let message = body["error"]["message"]
            .as_str()
            .unwrap_or("nft.storage reported failure");
        return UploadOutcome::failure(message, false);
    }

    match body["value"]["cid"].as_str() {
        Some(cid) => UploadOutcome::Success {
            cid: cid.to_string(),
            url: BackupProvider::NftStorage.content_url(cid),
            size: body["value"]["size"].as_u64(),
        },
        None => UploadOutcome::failure("Missing CID in nft.storage response", false),
    }
}

#[async_trait]
impl BackupProviderClient for NftStorageProvider {
    fn provider(&self) -> BackupProvider {
        BackupProvider::NftStorage
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
