//! Webhook authenticity checks (HMAC-SHA256).
//!
//! GitHub signs each delivery body with the webhook secret and sends the
//! result in `X-Hub-Signature-256` as `sha256=<hex>`. When a secret is
//! configured, the gateway checks it before the body is parsed.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Why a delivery failed signature verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("missing signature header")]
    Missing,

    /// Header is not `sha256=<hex>`.
    #[error("malformed signature header")]
    Malformed,

    #[error("signature does not match payload")]
    Mismatch,
}

/// The shared secret configured on the GitHub webhook.
#[derive(Clone)]
pub struct WebhookSecret(Vec<u8>);

impl WebhookSecret {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        WebhookSecret(secret.into())
    }

    fn mac(&self) -> HmacSha256 {
        <HmacSha256 as Mac>::new_from_slice(&self.0).expect("HMAC can take key of any size")
    }

    /// Produces the `X-Hub-Signature-256` header value for `payload`.
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(payload);
        format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
    }

    /// Checks a delivery's signature header against its raw body.
    ///
    /// The comparison is constant-time.
    ///
    /// # Examples
    ///
    /// ```
    /// use pr_dashboard::webhooks::{SignatureError, WebhookSecret};
    ///
    /// let secret = WebhookSecret::new("It's a Secret to Everybody");
    /// let header = secret.sign(b"Hello, World!");
    ///
    /// assert!(secret.verify(b"Hello, World!", Some(&header)).is_ok());
    /// assert_eq!(
    ///     secret.verify(b"Hello, World?", Some(&header)),
    ///     Err(SignatureError::Mismatch)
    /// );
    /// assert_eq!(secret.verify(b"Hello, World!", None), Err(SignatureError::Missing));
    /// ```
    pub fn verify(&self, payload: &[u8], header: Option<&str>) -> Result<(), SignatureError> {
        let header = header.ok_or(SignatureError::Missing)?;
        let expected = header
            .strip_prefix(SIGNATURE_PREFIX)
            .and_then(|hex_sig| hex::decode(hex_sig).ok())
            .ok_or(SignatureError::Malformed)?;

        let mut mac = self.mac();
        mac.update(payload);
        mac.verify_slice(&expected)
            .map_err(|_| SignatureError::Mismatch)
    }
}

impl fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WebhookSecret(<redacted>)")
    }
}
