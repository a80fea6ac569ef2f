//! Reader for Android's compiled binary XML.
//!
//! Covers the string pool, the resource id map and start-element chunks,
//! which is enough to read attributes off the root `<manifest>` element.

use thiserror::Error;

const RES_STRING_POOL_TYPE: u16 = 0x0001;
const RES_XML_TYPE: u16 = 0x0003;
const RES_XML_START_ELEMENT_TYPE: u16 = 0x0102;
const RES_XML_RESOURCE_MAP_TYPE: u16 = 0x0180;

const UTF8_FLAG: u32 = 1 << 8;
const NO_ENTRY: u32 = 0xFFFF_FFFF;
const TYPE_STRING: u8 = 0x03;

/// `android:versionName`
const VERSION_NAME_RES_ID: u32 = 0x0101_021c;
const VERSION_NAME: &str = "versionName";
const MANIFEST: &str = "manifest";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AxmlError {
    #[error("not a binary XML document")]
    NotBinaryXml,

    #[error("truncated data at offset {0}")]
    Truncated(usize),

    #[error("no manifest element")]
    NoManifest,
}

fn array<const N: usize>(data: &[u8], at: usize) -> Result<[u8; N], AxmlError> {
    at.checked_add(N)
        .and_then(|end| data.get(at..end))
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(AxmlError::Truncated(at))
}

fn u8_at(data: &[u8], at: usize) -> Result<u8, AxmlError> {
    Ok(array::<1>(data, at)?[0])
}

fn u16_at(data: &[u8], at: usize) -> Result<u16, AxmlError> {
    array(data, at).map(u16::from_le_bytes)
}

fn u32_at(data: &[u8], at: usize) -> Result<u32, AxmlError> {
    array(data, at).map(u32::from_le_bytes)
}

fn offset(base: usize, delta: u32) -> Result<usize, AxmlError> {
    base.checked_add(delta as usize).ok_or(AxmlError::Truncated(base))
}

fn utf16_string(chunk: &[u8], at: usize) -> Result<String, AxmlError> {
    let first = u16_at(chunk, at)?;
    let (len, start) = if first & 0x8000 == 0 {
        (usize::from(first), at + 2)
    } else {
        let low = u16_at(chunk, at + 2)?;
        ((usize::from(first & 0x7FFF) << 16) | usize::from(low), at + 4)
    };
    let units = (0..len)
        .map(|i| u16_at(chunk, start + i * 2))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(String::from_utf16_lossy(&units))
}

/// One- or two-byte length used by UTF-8 pools.
fn utf8_len(chunk: &[u8], at: usize) -> Result<(usize, usize), AxmlError> {
    let first = u8_at(chunk, at)?;
    if first & 0x80 == 0 {
        Ok((usize::from(first), at + 1))
    } else {
        let second = u8_at(chunk, at + 1)?;
        Ok(((usize::from(first & 0x7F) << 8) | usize::from(second), at + 2))
    }
}

fn utf8_string(chunk: &[u8], at: usize) -> Result<String, AxmlError> {
    // UTF-16 length first, then the UTF-8 byte length.
    let (_, at) = utf8_len(chunk, at)?;
    let (len, start) = utf8_len(chunk, at)?;
    let bytes = start
        .checked_add(len)
        .and_then(|end| chunk.get(start..end))
        .ok_or(AxmlError::Truncated(start))?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn string_pool(chunk: &[u8]) -> Result<Vec<String>, AxmlError> {
    let header_size = usize::from(u16_at(chunk, 2)?);
    let count = u32_at(chunk, 8)?;
    let flags = u32_at(chunk, 16)?;
    let strings_start = u32_at(chunk, 20)? as usize;
    let utf8 = flags & UTF8_FLAG != 0;

    (0..count as usize)
        .map(|i| {
            let at = offset(strings_start, u32_at(chunk, header_size + i * 4)?)?;
            if utf8 {
                utf8_string(chunk, at)
            } else {
                utf16_string(chunk, at)
            }
        })
        .collect()
}

fn resource_map(chunk: &[u8], header_size: usize) -> Vec<u32> {
    chunk
        .get(header_size..)
        .unwrap_or_default()
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn lookup(strings: &[String], index: u32) -> Option<&str> {
    strings.get(index as usize).map(String::as_str)
}

/// `versionName` of a start element, if it carries a literal one.
fn version_attribute(
    chunk: &[u8],
    header_size: usize,
    strings: &[String],
    resource_ids: &[u32],
) -> Result<Option<String>, AxmlError> {
    let attribute_start = usize::from(u16_at(chunk, header_size + 8)?);
    let attribute_size = usize::from(u16_at(chunk, header_size + 10)?);
    let attribute_count = usize::from(u16_at(chunk, header_size + 12)?);
    let base = header_size + attribute_start;

    for i in 0..attribute_count {
        let attr = base + i * attribute_size;
        let name = u32_at(chunk, attr + 4)?;
        let is_version = resource_ids.get(name as usize) == Some(&VERSION_NAME_RES_ID)
            || lookup(strings, name) == Some(VERSION_NAME);
        if !is_version {
            continue;
        }

        let raw = u32_at(chunk, attr + 8)?;
        if raw != NO_ENTRY {
            return Ok(lookup(strings, raw).map(str::to_owned));
        }
        if u8_at(chunk, attr + 15)? == TYPE_STRING {
            return Ok(lookup(strings, u32_at(chunk, attr + 16)?).map(str::to_owned));
        }
        // A resource reference; resolving it needs resources.arsc.
        return Ok(None);
    }
    Ok(None)
}

/// Read `android:versionName` off the root `<manifest>` element.
///
/// `Ok(None)` when the attribute is absent or not a literal string.
pub fn version_name(data: &[u8]) -> Result<Option<String>, AxmlError> {
    if u16_at(data, 0).ok() != Some(RES_XML_TYPE) {
        return Err(AxmlError::NotBinaryXml);
    }
    let total = (u32_at(data, 4)? as usize).min(data.len());
    let mut at = usize::from(u16_at(data, 2)?);

    let mut strings = Vec::new();
    let mut resource_ids = Vec::new();
    while at + 8 <= total {
        let kind = u16_at(data, at)?;
        let header_size = usize::from(u16_at(data, at + 2)?);
        let size = u32_at(data, at + 4)? as usize;
        let chunk = at
            .checked_add(size)
            .filter(|_| size >= 8)
            .and_then(|end| data.get(at..end))
            .ok_or(AxmlError::Truncated(at))?;

        match kind {
            RES_STRING_POOL_TYPE => strings = string_pool(chunk)?,
            RES_XML_RESOURCE_MAP_TYPE => resource_ids = resource_map(chunk, header_size),
            RES_XML_START_ELEMENT_TYPE => {
                let name = u32_at(chunk, header_size + 4)?;
                if lookup(&strings, name) == Some(MANIFEST) {
                    return version_attribute(chunk, header_size, &strings, &resource_ids);
                }
            }
            _ => {}
        }
        at += size;
    }
    Err(AxmlError::NoManifest)
}


#[cfg(test)]
mod tests {
    use super::fixture::{Version, manifest, manifest_with};
    use super::*;

    #[test]
    fn reads_version_from_utf16_pool() {
        assert_eq!(version_name(&manifest("1.4.2")).unwrap().as_deref(), Some("1.4.2"));
    }

    #[test]
    fn reads_version_from_utf8_pool() {
        let doc = manifest_with(Version::Literal("2.0-beta"), "versionName", true);
        assert_eq!(version_name(&doc).unwrap().as_deref(), Some("2.0-beta"));
    }

    #[test]
    fn attribute_is_found_by_resource_id() {
        // Stripped builds leave attribute names empty.
        let doc = manifest_with(Version::Literal("3.1"), "", false);
        assert_eq!(version_name(&doc).unwrap().as_deref(), Some("3.1"));
    }

    #[test]
    fn resource_reference_is_not_a_version() {
        let doc = manifest_with(Version::Reference, "versionName", false);
        assert_eq!(version_name(&doc).unwrap(), None);
    }

    #[test]
    fn plain_xml_is_rejected() {
        let err = version_name(b"<manifest versionName=\"1.0\"/>").unwrap_err();
        assert_eq!(err, AxmlError::NotBinaryXml);
    }

    #[test]
    fn truncated_document_is_an_error() {
        let doc = manifest("1.0");
        assert!(version_name(&doc[..40]).is_err());
    }
}
