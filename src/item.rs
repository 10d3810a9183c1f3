//! Upload units shared by the primary client, backup replication and planning

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Tag carrying the id of the asset an upload belongs to
pub const ASSET_TAG: &str = "asset";

/// How long a provider is asked to retain content
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PinPolicy {
    /// Pin indefinitely
    #[default]
    Permanent,
    /// Cache only; the provider may evict
    Transient,
}

/// One file scheduled for upload
///
/// Built during planning and never mutated once execution starts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadItem {
    pub path: PathBuf,
    pub name: String,
    pub metadata_tags: BTreeMap<String, String>,
    pub pin_policy: PinPolicy,
}

impl UploadItem {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            metadata_tags: BTreeMap::new(),
            pin_policy: PinPolicy::default(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata_tags.insert(key.into(), value.into());
        self
    }

    pub fn asset_id(&self) -> Option<&str> {
        self.metadata_tags.get(ASSET_TAG).map(String::as_str)
    }

    pub fn options(&self) -> UploadOptions {
        UploadOptions {
            name: Some(self.name.clone()),
            metadata_tags: self.metadata_tags.clone(),
            pin_policy: self.pin_policy,
        }
    }
}

/// Naming and tagging options passed alongside a file
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOptions {
    pub name: Option<String>,
    pub metadata_tags: BTreeMap<String, String>,
    pub pin_policy: PinPolicy,
}

impl UploadOptions {
    /// Explicit name, or the file name of `path`
    pub fn display_name(&self, path: &Path) -> String {
        self.name.clone().unwrap_or_else(|| {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string())
        })
    }
}
