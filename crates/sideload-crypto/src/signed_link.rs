//! Time-limited signed download links.
//!
//! A link carries three query parameters: `signature` (lowercase hex
//! HMAC-SHA256), `token` (128 random bits, hex) and `limit` (Unix seconds,
//! decimal). The MAC covers the request method, host and path the link was
//! issued for, so a signature minted for one bundle's download route cannot
//! be replayed against another route.
//!
//! Verification is stateless: the only server-side input is the secret.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::credential::random_hex;
use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_PARAM: &str = "signature";
pub const TOKEN_PARAM: &str = "token";
pub const LIMIT_PARAM: &str = "limit";

/// Lifetime of a freshly issued link.
pub const LINK_TTL: Duration = Duration::from_secs(15 * 60);

const TOKEN_BYTES: usize = 16;
const DOMAIN_TAG: &[u8] = b"sideload-link-v1";

/// The request a link is valid for.
///
/// Method is upper-cased and host lower-cased on construction; the path is
/// kept verbatim and must not include the query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkBinding {
    method: String,
    host: String,
    path: String,
}

impl LinkBinding {
    pub fn new(method: &str, host: &str, path: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            host: host.to_ascii_lowercase(),
            path: path.to_string(),
        }
    }

    /// Binding for a plain `GET`, which is what installers issue.
    pub fn get(host: &str, path: &str) -> Self {
        Self::new("GET", host, path)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Output of [`LinkSigner::issue`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedLink {
    pub signature: String,
    pub token: String,
    pub limit: i64,
}

impl SignedLink {
    /// `signature=…&token=…&limit=…`; every value is URL-safe as-is.
    pub fn query_string(&self) -> String {
        format!(
            "{SIGNATURE_PARAM}={}&{TOKEN_PARAM}={}&{LIMIT_PARAM}={}",
            self.signature, self.token, self.limit
        )
    }
}

/// Link parameters as received from a query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LinkParams {
    pub signature: Option<String>,
    pub token: Option<String>,
    pub limit: Option<String>,
}

impl From<&SignedLink> for LinkParams {
    fn from(link: &SignedLink) -> Self {
        Self {
            signature: Some(link.signature.clone()),
            token: Some(link.token.clone()),
            limit: Some(link.limit.to_string()),
        }
    }
}

/// An incoming request presenting a signed link.
///
/// `expected` is the binding of the route being served (e.g. the download
/// path of the resolved bundle); `actual` is what the client really sent.
#[derive(Debug, Clone)]
pub struct SignedRequest<'a> {
    pub params: &'a LinkParams,
    pub expected: &'a LinkBinding,
    pub actual: &'a LinkBinding,
}

struct Decoded {
    signature: Vec<u8>,
    token: String,
    limit: i64,
}

/// Issues and verifies signed links with a server-held secret.
pub struct LinkSigner {
    key: Zeroizing<Vec<u8>>,
    ttl: Duration,
}

impl std::fmt::Debug for LinkSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkSigner")
            .field("key", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl LinkSigner {
    /// An empty secret is refused; callers treat that as a startup failure.
    pub fn new(secret: &[u8]) -> Result<Self, CryptoError> {
        if secret.is_empty() {
            return Err(CryptoError::EmptySecret);
        }
        Ok(Self {
            key: Zeroizing::new(secret.to_vec()),
            ttl: LINK_TTL,
        })
    }

    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, binding: &LinkBinding) -> Result<SignedLink, CryptoError> {
        self.issue_at(binding, now_secs())
    }

    /// Issue a link as if the current time were `now`.
    #[allow(clippy::cast_possible_wrap)]
    pub fn issue_at(&self, binding: &LinkBinding, now: i64) -> Result<SignedLink, CryptoError> {
        let token = random_hex(TOKEN_BYTES);
        let limit = now.saturating_add(self.ttl.as_secs() as i64);
        let signature = hex::encode(self.mac(binding, &token, limit)?);
        Ok(SignedLink {
            signature,
            token,
            limit,
        })
    }

    pub fn verify(&self, params: &LinkParams, binding: &LinkBinding) -> Result<bool, CryptoError> {
        self.verify_at(params, binding, now_secs())
    }

    /// Check `params` against `binding` at time `now`.
    ///
    /// Returns `Ok(false)` for an expired link or a signature that does not
    /// match, and `Err` only when a parameter is missing or unparsable.
    /// Expiry is checked before the MAC is computed.
    pub fn verify_at(
        &self,
        params: &LinkParams,
        binding: &LinkBinding,
        now: i64,
    ) -> Result<bool, CryptoError> {
        let decoded = decode(params)?;
        if decoded.limit < now {
            return Ok(false);
        }
        let expected = self.mac(binding, &decoded.token, decoded.limit)?;
        Ok(expected.ct_eq(decoded.signature.as_slice()).into())
    }

    /// Like [`verify`](Self::verify), but first rejects a request whose
    /// method, host or path differ from the route's expected binding
    /// without touching the MAC.
    pub fn verify_request(&self, request: &SignedRequest<'_>) -> Result<bool, CryptoError> {
        self.verify_request_at(request, now_secs())
    }

    pub fn verify_request_at(
        &self,
        request: &SignedRequest<'_>,
        now: i64,
    ) -> Result<bool, CryptoError> {
        decode(request.params)?;
        if request.expected != request.actual {
            return Ok(false);
        }
        self.verify_at(request.params, request.expected, now)
    }

    fn mac(&self, binding: &LinkBinding, token: &str, limit: i64) -> Result<Vec<u8>, CryptoError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| CryptoError::KeyInit(e.to_string()))?;
        let limit = limit.to_string();
        mac.update(DOMAIN_TAG);
        for field in [
            binding.method.as_bytes(),
            binding.host.as_bytes(),
            binding.path.as_bytes(),
            token.as_bytes(),
            limit.as_bytes(),
        ] {
            // Length prefix keeps field boundaries unambiguous.
            mac.update(&(field.len() as u64).to_be_bytes());
            mac.update(field);
        }
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

fn decode(params: &LinkParams) -> Result<Decoded, CryptoError> {
    let signature = required(params.signature.as_deref(), SIGNATURE_PARAM)?;
    let token = required(params.token.as_deref(), TOKEN_PARAM)?;
    let limit = required(params.limit.as_deref(), LIMIT_PARAM)?;

    let signature = hex::decode(signature).map_err(|e| CryptoError::InvalidHex {
        field: SIGNATURE_PARAM,
        reason: e.to_string(),
    })?;
    hex::decode(token).map_err(|e| CryptoError::InvalidHex {
        field: TOKEN_PARAM,
        reason: e.to_string(),
    })?;
    let limit = limit
        .parse::<i64>()
        .map_err(|e| CryptoError::InvalidLimit(format!("{limit}: {e}")))?;

    Ok(Decoded {
        signature,
        token: token.to_string(),
        limit,
    })
}

fn required<'a>(value: Option<&'a str>, name: &'static str) -> Result<&'a str, CryptoError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(CryptoError::MissingField(name)),
    }
}

#[allow(clippy::cast_possible_wrap)]
fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Signer with a fixed secret, for tests in dependent crates.
#[cfg(any(test, feature = "test-utils"))]
#[allow(clippy::expect_used)]
pub fn test_signer() -> LinkSigner {
    LinkSigner::new(b"test-link-secret").expect("non-empty secret")
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn download(id: u32) -> LinkBinding {
        LinkBinding::get("apps.example.com", &format!("/bundle/{id}/download"))
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert!(matches!(LinkSigner::new(b""), Err(CryptoError::EmptySecret)));
    }

    #[test]
    fn fresh_link_verifies() {
        let signer = test_signer();
        let link = signer.issue(&download(1)).unwrap();
        assert!(signer.verify(&(&link).into(), &download(1)).unwrap());
    }

    #[test]
    fn link_shape() {
        let link = test_signer().issue_at(&download(1), NOW).unwrap();
        assert_eq!(link.limit, NOW + 900);
        assert_eq!(link.token.len(), 32);
        assert_eq!(link.signature.len(), 64);
        assert!(
            link.signature
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        );
        assert_eq!(
            link.query_string(),
            format!(
                "signature={}&token={}&limit={}",
                link.signature, link.token, link.limit
            )
        );
    }

    #[test]
    fn tokens_differ_between_issues() {
        let signer = test_signer();
        let a = signer.issue_at(&download(1), NOW).unwrap();
        let b = signer.issue_at(&download(1), NOW).unwrap();
        assert_ne!(a.token, b.token);
        assert_ne!(a.signature, b.signature);
    }

    #[test]
    fn valid_until_limit_then_expired() {
        let signer = test_signer();
        let link = signer.issue_at(&download(1), NOW).unwrap();
        let params = LinkParams::from(&link);

        assert!(signer.verify_at(&params, &download(1), NOW + 899).unwrap());
        assert!(signer.verify_at(&params, &download(1), NOW + 900).unwrap());
        assert!(!signer.verify_at(&params, &download(1), NOW + 901).unwrap());
    }

    #[test]
    fn expired_link_is_false_not_error() {
        let signer = test_signer();
        let link = signer.issue_at(&download(1), NOW - 16 * 60).unwrap();
        assert!(!signer.verify_at(&(&link).into(), &download(1), NOW).unwrap());
    }

    #[test]
    fn flipped_signature_bit_fails() {
        let signer = test_signer();
        let link = signer.issue_at(&download(1), NOW).unwrap();
        let mut bytes = hex::decode(&link.signature).unwrap();
        bytes[7] ^= 0x01;
        let params = LinkParams {
            signature: Some(hex::encode(bytes)),
            ..LinkParams::from(&link)
        };
        assert!(!signer.verify_at(&params, &download(1), NOW).unwrap());
    }

    #[test]
    fn flipped_token_bit_fails() {
        let signer = test_signer();
        let link = signer.issue_at(&download(1), NOW).unwrap();
        let mut bytes = hex::decode(&link.token).unwrap();
        bytes[0] ^= 0x80;
        let params = LinkParams {
            token: Some(hex::encode(bytes)),
            ..LinkParams::from(&link)
        };
        assert!(!signer.verify_at(&params, &download(1), NOW).unwrap());
    }

    #[test]
    fn altered_limit_fails() {
        let signer = test_signer();
        let link = signer.issue_at(&download(1), NOW).unwrap();
        let params = LinkParams {
            limit: Some((link.limit + 1).to_string()),
            ..LinkParams::from(&link)
        };
        assert!(!signer.verify_at(&params, &download(1), NOW).unwrap());

        let params = LinkParams {
            limit: Some((link.limit - 1).to_string()),
            ..LinkParams::from(&link)
        };
        assert!(!signer.verify_at(&params, &download(1), NOW).unwrap());
    }

    #[test]
    fn truncated_signature_is_false() {
        let signer = test_signer();
        let link = signer.issue_at(&download(1), NOW).unwrap();
        let params = LinkParams {
            signature: Some(link.signature[..62].to_string()),
            ..LinkParams::from(&link)
        };
        assert!(!signer.verify_at(&params, &download(1), NOW).unwrap());
    }

    #[test]
    fn signature_does_not_transfer_between_paths() {
        let signer = test_signer();
        let link = signer.issue_at(&download(1), NOW).unwrap();
        assert!(!signer.verify_at(&(&link).into(), &download(2), NOW).unwrap());
    }

    #[test]
    fn signature_bound_to_method_and_host() {
        let signer = test_signer();
        let link = signer.issue_at(&download(1), NOW).unwrap();
        let params = LinkParams::from(&link);

        let post = LinkBinding::new("POST", "apps.example.com", "/bundle/1/download");
        assert!(!signer.verify_at(&params, &post, NOW).unwrap());

        let other_host = LinkBinding::get("evil.example.com", "/bundle/1/download");
        assert!(!signer.verify_at(&params, &other_host, NOW).unwrap());

        let upper_host = LinkBinding::new("get", "APPS.example.com", "/bundle/1/download");
        assert!(signer.verify_at(&params, &upper_host, NOW).unwrap());
    }

    #[test]
    fn different_secret_fails() {
        let link = test_signer().issue_at(&download(1), NOW).unwrap();
        let other = LinkSigner::new(b"another-secret").unwrap();
        assert!(!other.verify_at(&(&link).into(), &download(1), NOW).unwrap());
    }

    #[test]
    fn missing_fields_are_errors() {
        let signer = test_signer();
        let link = signer.issue_at(&download(1), NOW).unwrap();
        let full = LinkParams::from(&link);

        let cases = [
            (
                LinkParams {
                    signature: None,
                    ..full.clone()
                },
                SIGNATURE_PARAM,
            ),
            (
                LinkParams {
                    token: Some(String::new()),
                    ..full.clone()
                },
                TOKEN_PARAM,
            ),
            (
                LinkParams {
                    limit: None,
                    ..full.clone()
                },
                LIMIT_PARAM,
            ),
        ];
        for (params, field) in cases {
            match signer.verify_at(&params, &download(1), NOW) {
                Err(CryptoError::MissingField(name)) => assert_eq!(name, field),
                other => panic!("expected missing {field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn malformed_values_are_errors() {
        let signer = test_signer();
        let link = signer.issue_at(&download(1), NOW).unwrap();

        let bad_sig = LinkParams {
            signature: Some("zz".repeat(32)),
            ..LinkParams::from(&link)
        };
        assert!(matches!(
            signer.verify_at(&bad_sig, &download(1), NOW),
            Err(CryptoError::InvalidHex { field: "signature", .. })
        ));

        let bad_token = LinkParams {
            token: Some("not-hex".into()),
            ..LinkParams::from(&link)
        };
        assert!(matches!(
            signer.verify_at(&bad_token, &download(1), NOW),
            Err(CryptoError::InvalidHex { field: "token", .. })
        ));

        let bad_limit = LinkParams {
            limit: Some("tomorrow".into()),
            ..LinkParams::from(&link)
        };
        assert!(matches!(
            signer.verify_at(&bad_limit, &download(1), NOW),
            Err(CryptoError::InvalidLimit(_))
        ));
    }

    #[test]
    fn verify_request_fast_rejects_binding_mismatch() {
        let signer = test_signer();
        let expected = download(1);
        let link = signer.issue_at(&expected, NOW).unwrap();
        let params = LinkParams::from(&link);

        let matching = SignedRequest {
            params: &params,
            expected: &expected,
            actual: &download(1),
        };
        assert!(signer.verify_request_at(&matching, NOW).unwrap());

        let head = LinkBinding::new("HEAD", "apps.example.com", "/bundle/1/download");
        let mismatched = SignedRequest {
            params: &params,
            expected: &expected,
            actual: &head,
        };
        assert!(!signer.verify_request_at(&mismatched, NOW).unwrap());
    }

    #[test]
    fn verify_request_reports_malformed_before_binding() {
        let signer = test_signer();
        let params = LinkParams::default();
        let request = SignedRequest {
            params: &params,
            expected: &download(1),
            actual: &download(2),
        };
        assert!(signer.verify_request_at(&request, NOW).is_err());
    }

    #[test]
    fn custom_ttl() {
        let signer = test_signer().with_ttl(Duration::from_secs(60));
        let link = signer.issue_at(&download(1), NOW).unwrap();
        assert_eq!(link.limit, NOW + 60);
        assert_eq!(signer.ttl(), Duration::from_secs(60));
    }

    #[test]
    fn debug_redacts_key() {
        let rendered = format!("{:?}", test_signer());
        assert!(!rendered.contains("test-link-secret"));
    }

    #[test]
    fn params_deserialize_from_query_json() {
        let params: LinkParams =
            serde_json::from_str(r#"{"signature":"ab","token":"cd","limit":"1"}"#).unwrap();
        assert_eq!(params.limit.as_deref(), Some("1"));
    }
}
