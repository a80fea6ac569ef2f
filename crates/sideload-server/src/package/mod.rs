//! Version metadata read out of uploaded packages.
//!
//! Both formats are zip archives: an `.apk` carries a compiled
//! `AndroidManifest.xml`, an `.ipa` an `Info.plist` inside its `.app`.

pub(crate) mod axml;

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use zip::ZipArchive;

pub use axml::AxmlError;

use crate::storage::Platform;

const ANDROID_MANIFEST: &str = "AndroidManifest.xml";
const INFO_PLIST: &str = "Info.plist";

/// Metadata entries are small; nothing larger is inflated.
pub const MAX_ENTRY_BYTES: u64 = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unreadable archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("{0} not found in package")]
    MissingEntry(&'static str),

    #[error("{0} is larger than {MAX_ENTRY_BYTES} bytes")]
    TooLarge(&'static str),

    #[error("AndroidManifest.xml: {0}")]
    Manifest(#[from] AxmlError),

    #[error("Info.plist: {0}")]
    Plist(#[from] plist::Error),
}

/// What the package says about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    /// `versionName` (Android) or `CFBundleVersion` (iOS); `None` when the
    /// package leaves it empty or only references a resource.
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IosInfo {
    #[serde(rename = "CFBundleVersion", default)]
    bundle_version: Option<String>,
}

/// Open the archive at `path` and read its version. Blocking.
pub fn inspect(path: &Path, platform: Platform) -> Result<PackageInfo, PackageError> {
    let mut archive = ZipArchive::new(BufReader::new(File::open(path)?))?;
    let version = match platform {
        Platform::Android => {
            let manifest = read_entry(&mut archive, ANDROID_MANIFEST, |name| {
                name == ANDROID_MANIFEST
            })?;
            axml::version_name(&manifest)?
        }
        Platform::Ios => {
            let info = read_entry(&mut archive, INFO_PLIST, |name| {
                name.ends_with(&format!("/{INFO_PLIST}"))
            })?;
            plist::from_bytes::<IosInfo>(&info)?.bundle_version
        }
    };
    Ok(PackageInfo {
        version: version
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
    })
}

/// Contents of the shallowest entry whose name satisfies `wanted`; for an
/// `.ipa` that is the app's own `Info.plist`, not an embedded framework's.
fn read_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    label: &'static str,
    wanted: impl Fn(&str) -> bool,
) -> Result<Vec<u8>, PackageError> {
    let name = archive
        .file_names()
        .filter(|name| wanted(name))
        .min_by_key(|name| name.matches('/').count())
        .map(str::to_owned)
        .ok_or(PackageError::MissingEntry(label))?;

    let entry = archive.by_name(&name)?;
    if entry.size() > MAX_ENTRY_BYTES {
        return Err(PackageError::TooLarge(label));
    }
    let mut buf = Vec::new();
    entry.take(MAX_ENTRY_BYTES).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Small archives shaped like real packages.
#[cfg(test)]
pub(crate) mod fixture {
    use std::io::{Cursor, Write};

    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    pub fn archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    pub fn info_plist(bundle_version: &str) -> Vec<u8> {
        let mut dict = plist::Dictionary::new();
        dict.insert("CFBundleIdentifier".into(), "com.acme.demo".into());
        dict.insert("CFBundleVersion".into(), bundle_version.into());
        let mut out = Vec::new();
        plist::Value::Dictionary(dict).to_writer_xml(&mut out).unwrap();
        out
    }

    pub fn apk(version_name: &str) -> Vec<u8> {
        archive(&[
            ("AndroidManifest.xml", &super::axml::fixture::manifest(version_name)),
            ("classes.dex", b"dex\n035\0"),
        ])
    }

    pub fn ipa(bundle_version: &str) -> Vec<u8> {
        archive(&[
            ("Payload/Demo.app/Info.plist", &info_plist(bundle_version)),
            ("Payload/Demo.app/Demo", b"\xcf\xfa\xed\xfe"),
        ])
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::fixture::{apk, archive, info_plist, ipa};
    use super::*;

    fn on_disk(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file
    }

    fn version_of(bytes: &[u8], platform: Platform) -> Result<Option<String>, PackageError> {
        inspect(on_disk(bytes).path(), platform).map(|info| info.version)
    }

    #[test]
    fn apk_version_name() {
        assert_eq!(version_of(&apk("1.4.2"), Platform::Android).unwrap().as_deref(), Some("1.4.2"));
    }

    #[test]
    fn ipa_bundle_version() {
        assert_eq!(version_of(&ipa("310"), Platform::Ios).unwrap().as_deref(), Some("310"));
    }

    #[test]
    fn app_info_plist_wins_over_frameworks() {
        let bytes = archive(&[
            (
                "Payload/Demo.app/Frameworks/Kit.framework/Info.plist",
                &info_plist("9.9.9"),
            ),
            ("Payload/Demo.app/Info.plist", &info_plist("42")),
        ]);
        assert_eq!(version_of(&bytes, Platform::Ios).unwrap().as_deref(), Some("42"));
    }

    #[test]
    fn blank_version_is_none() {
        assert_eq!(version_of(&ipa("  "), Platform::Ios).unwrap(), None);
    }

    #[test]
    fn missing_metadata_entry() {
        let bytes = archive(&[("classes.dex", b"dex")]);
        assert!(matches!(
            version_of(&bytes, Platform::Android),
            Err(PackageError::MissingEntry(ANDROID_MANIFEST))
        ));
        assert!(matches!(
            version_of(&apk("1.0"), Platform::Ios),
            Err(PackageError::MissingEntry(INFO_PLIST))
        ));
    }

    #[test]
    fn not_an_archive() {
        assert!(matches!(
            version_of(b"bundle bytes", Platform::Android),
            Err(PackageError::Archive(_))
        ));
    }

    #[test]
    fn garbage_manifest() {
        let bytes = archive(&[("AndroidManifest.xml", b"<manifest/>")]);
        assert!(matches!(
            version_of(&bytes, Platform::Android),
            Err(PackageError::Manifest(AxmlError::NotBinaryXml))
        ));
    }
}
