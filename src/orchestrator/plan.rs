//! Pure upload planning
//!
//! Nothing here touches the network or the filesystem. File existence is
//! answered by the caller so plans can be built and tested in memory.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::item::{UploadItem, ASSET_TAG};

/// Asset collection description, loaded from TOML
///
/// ```toml
/// [[assets]]
/// id = "oracle-1"
/// name = "Oracle #1"
/// description = "Genesis oracle"
/// image = "images/oracle-1.png"
/// tags = { tier = "gold" }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct AssetManifest {
    #[serde(default)]
    pub assets: Vec<AssetSpec>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct AssetSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Classification tags, copied into upload metadata and document attributes
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Image file, relative to the asset directory unless absolute
    pub image: PathBuf,
}

impl AssetManifest {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let manifest: AssetManifest = toml::from_str(raw)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&raw)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for asset in &self.assets {
            if asset.id.trim().is_empty() {
                return Err(Error::ConfigError("Asset id must not be empty".into()));
            }
            if !seen.insert(asset.id.as_str()) {
                return Err(Error::ConfigError(format!("Duplicate asset id: {}", asset.id)));
            }
        }
        Ok(())
    }
}

/// Where an asset's image bytes come from
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "path")]
pub enum ImageSource {
    File(PathBuf),
    /// Generated stand-in written by the asset store before upload
    Placeholder(PathBuf),
}

impl ImageSource {
    pub fn path(&self) -> &Path {
        match self {
            ImageSource::File(p) | ImageSource::Placeholder(p) => p,
        }
    }
}

/// One asset: an image upload and the metadata document that points at it
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedAsset {
    pub id: String,
    pub name: String,
    pub image_source: ImageSource,
    pub image: UploadItem,
    /// Metadata document with an empty `image` field until patched
    pub metadata: Value,
    pub metadata_name: String,
    pub metadata_tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UploadPlan {
    pub assets: Vec<PlannedAsset>,
}

impl UploadPlan {
    pub fn image_items(&self) -> Vec<UploadItem> {
        self.assets.iter().map(|a| a.image.clone()).collect()
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &PlannedAsset> {
        self.assets
            .iter()
            .filter(|a| matches!(a.image_source, ImageSource::Placeholder(_)))
    }
}

/// Build image and metadata upload items for every asset in `manifest`.
///
/// An image that `file_exists` rejects becomes a placeholder when
/// `allow_placeholders` is set and a configuration error otherwise.
pub fn build_plan(
    manifest: &AssetManifest,
    asset_dir: &Path,
    file_exists: impl Fn(&Path) -> bool,
    allow_placeholders: bool,
) -> Result<UploadPlan> {
    let mut assets = Vec::with_capacity(manifest.assets.len());

    for asset in &manifest.assets {
        let image_path = asset_dir.join(&asset.image);
        let image_source = if file_exists(&image_path) {
            ImageSource::File(image_path)
        } else if allow_placeholders {
            ImageSource::Placeholder(
                asset_dir
                    .join("placeholders")
                    .join(format!("{}.svg", asset.id)),
            )
        } else {
            return Err(Error::ConfigError(format!(
                "Image for asset {} not found: {}",
                asset.id,
                image_path.display()
            )));
        };

        let mut image = UploadItem::new(image_source.path(), format!("{}-image", asset.id))
            .with_tag(ASSET_TAG, asset.id.as_str())
            .with_tag("kind", "image");
        image.metadata_tags.extend(asset.tags.clone());

        let mut metadata_tags = asset.tags.clone();
        metadata_tags.insert(ASSET_TAG.into(), asset.id.clone());
        metadata_tags.insert("kind".into(), "metadata".into());

        assets.push(PlannedAsset {
            id: asset.id.clone(),
            name: asset.name.clone(),
            image_source,
            image,
            metadata: metadata_document(asset),
            metadata_name: format!("{}-metadata", asset.id),
            metadata_tags,
        });
    }

    Ok(UploadPlan { assets })
}

fn metadata_document(asset: &AssetSpec) -> Value {
    let attributes: Vec<Value> = asset
        .tags
        .iter()
        .map(|(trait_type, value)| json!({ "trait_type": trait_type, "value": value }))
        .collect();
    json!({
        "name": asset.name,
        "description": asset.description,
        "image": "",
        "attributes": attributes,
    })
}

/// Copy of `document` whose `image` field points at `image_cid`
pub fn patch_metadata(document: &Value, image_cid: &str) -> Value {
    let mut fields = match document {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    fields.insert("image".into(), Value::String(format!("ipfs://{image_cid}")));
    Value::Object(fields)
}

/// SVG stand-in for a missing image
pub fn placeholder_image(asset: &PlannedAsset) -> Vec<u8> {
    format!(
        concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="512" height="512">"#,
            r##"<rect width="100%" height="100%" fill="#1f2933"/>"##,
            r##"<text x="50%" y="50%" fill="#f5f7fa" font-family="sans-serif" "##,
            r#"font-size="32" text-anchor="middle">{}</text></svg>"#,
        ),
        escape_xml(&asset.name)
    )
    .into_bytes()
}

fn escape_xml(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
