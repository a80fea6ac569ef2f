//! Over-the-air install manifest for iOS bundles.

use serde::Serialize;

pub const CONTENT_TYPE: &str = "application/x-plist";
pub const FILE_NAME: &str = "manifest.plist";
pub const DEFAULT_BUNDLE_IDENTIFIER: &str = "com.example.test";

const ASSET_KIND: &str = "software-package";
const METADATA_KIND: &str = "software";

/// Property list in the layout the iOS installer expects.
#[derive(Debug, Serialize)]
pub struct Manifest<'a> {
    items: Vec<Item<'a>>,
}

#[derive(Debug, Serialize)]
struct Item<'a> {
    assets: Vec<Asset<'a>>,
    metadata: Metadata<'a>,
}

#[derive(Debug, Serialize)]
struct Asset<'a> {
    kind: &'static str,
    url: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct Metadata<'a> {
    bundle_identifier: &'a str,
    bundle_version: &'a str,
    kind: &'static str,
    title: &'a str,
}

impl<'a> Manifest<'a> {
    /// One item installing the `.ipa` at `package_url` (a signed URL).
    pub fn new(title: &'a str, bundle_version: &'a str, package_url: &'a str) -> Self {
        Self {
            items: vec![Item {
                assets: vec![Asset {
                    kind: ASSET_KIND,
                    url: package_url,
                }],
                metadata: Metadata {
                    bundle_identifier: DEFAULT_BUNDLE_IDENTIFIER,
                    bundle_version,
                    kind: METADATA_KIND,
                    title,
                },
            }],
        }
    }

    pub fn to_xml(&self) -> Result<Vec<u8>, plist::Error> {
        let mut out = Vec::new();
        plist::to_writer_xml(&mut out, self)?;
        Ok(out)
    }
}
