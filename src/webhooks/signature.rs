//! Webhook signature verification (HMAC-SHA256).
//!
//! GitHub signs each delivery with the shared webhook secret and sends the
//! digest in `X-Hub-Signature-256` as `sha256=<hex>`. Verification happens on
//! the raw body, before any JSON parsing.
//!
//! When no secret is configured the relay accepts unsigned deliveries; see
//! [`verify_delivery`].

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Reasons a delivery fails authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("missing X-Hub-Signature-256 header")]
    Missing,

    #[error("malformed signature header")]
    Malformed,

    #[error("signature does not match payload")]
    Mismatch,
}

/// The shared webhook secret. Its bytes never appear in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct WebhookSecret(Vec<u8>);

impl WebhookSecret {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        WebhookSecret(secret.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Checks `header` against the HMAC of `body`.
    ///
    /// The comparison is constant-time (delegated to the `hmac` crate).
    pub fn verify(&self, body: &[u8], header: &str) -> Result<(), SignatureError> {
        let expected = parse_signature_header(header).ok_or(SignatureError::Malformed)?;

        let mut mac =
            HmacSha256::new_from_slice(&self.0).map_err(|_| SignatureError::Malformed)?;
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| SignatureError::Mismatch)
    }
}

impl fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WebhookSecret(..)")
    }
}

/// Authenticates a delivery.
///
/// With no secret configured every delivery passes, signed or not. With a
/// secret, the header must be present and must match.
pub fn verify_delivery(
    secret: Option<&WebhookSecret>,
    body: &[u8],
    header: Option<&str>,
) -> Result<(), SignatureError> {
    let Some(secret) = secret else {
        return Ok(());
    };
    let header = header.ok_or(SignatureError::Missing)?;
    secret.verify(body, header)
}

/// Parses `sha256=<hex>` into raw digest bytes. `None` for anything else.
///
/// ```
/// use webhook_relay::webhooks::parse_signature_header;
///
/// assert_eq!(parse_signature_header("sha256=00ff"), Some(vec![0x00, 0xff]));
/// assert!(parse_signature_header("sha1=00ff").is_none());
/// assert!(parse_signature_header("sha256=zz").is_none());
/// ```
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    hex::decode(header.strip_prefix("sha256=")?).ok()
}

/// Computes the raw HMAC-SHA256 digest of `body`. Used to sign test deliveries.
pub fn compute_signature(body: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}

/// Formats a digest as an `X-Hub-Signature-256` header value.
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("sha256={}", hex::encode(signature))
}
