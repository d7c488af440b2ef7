use crate::errors::AuthError;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "X-Timestamp";
pub const SIGNATURE_HEADER: &str = "X-Signature";
pub const TOKEN_HEADER: &str = "X-Webhook-Token";

/// Verifies inbound webhook authenticity and freshness.
///
/// The signature is `hex(HMAC-SHA256(secret, "{timestamp}.{raw_body}"))`,
/// optionally prefixed with `sha256=`. Verification works on the raw body
/// bytes and must run before the body is parsed.
pub struct SignatureVerifier {
    secret: String,
    webhook_token: String,
    tolerance_secs: i64,
}

impl SignatureVerifier {
    pub fn new(secret: &str, webhook_token: &str, tolerance_secs: u64) -> Self {
        Self {
            secret: secret.to_string(),
            webhook_token: webhook_token.to_string(),
            tolerance_secs: i64::try_from(tolerance_secs).unwrap_or(i64::MAX),
        }
    }

    pub fn verify(
        &self,
        raw_body: &[u8],
        timestamp: Option<&str>,
        signature: Option<&str>,
    ) -> Result<(), AuthError> {
        self.verify_at(
            raw_body,
            timestamp,
            signature,
            chrono::Utc::now().timestamp(),
        )
    }

    /// Same as [`verify`](Self::verify) with an explicit clock (Unix seconds).
    pub fn verify_at(
        &self,
        raw_body: &[u8],
        timestamp: Option<&str>,
        signature: Option<&str>,
        now: i64,
    ) -> Result<(), AuthError> {
        if self.secret.is_empty() {
            return Err(AuthError::NotConfigured);
        }
        let timestamp = timestamp
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingHeader(TIMESTAMP_HEADER))?;
        let signature = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::MissingHeader(SIGNATURE_HEADER))?;
        let declared: i64 = timestamp
            .parse()
            .map_err(|_| AuthError::MalformedTimestamp)?;

        let Some(expected) = compute_mac(&self.secret, timestamp, raw_body) else {
            return Err(AuthError::BadSignature);
        };
        let presented = signature.strip_prefix("sha256=").unwrap_or(signature);
        let Ok(presented) = hex::decode(presented) else {
            return Err(AuthError::BadSignature);
        };
        if !bool::from(expected.as_slice().ct_eq(presented.as_slice())) {
            return Err(AuthError::BadSignature);
        }

        let skew = now.saturating_sub(declared).saturating_abs();
        if skew > self.tolerance_secs {
            return Err(AuthError::StaleTimestamp { skew_secs: skew });
        }
        Ok(())
    }

    /// Checks the optional static token. Passes when no token is configured.
    pub fn check_token(&self, presented: Option<&str>) -> Result<(), AuthError> {
        if self.webhook_token.is_empty() {
            return Ok(());
        }
        let presented = presented.unwrap_or_default().trim();
        if bool::from(presented.as_bytes().ct_eq(self.webhook_token.as_bytes())) {
            Ok(())
        } else {
            Err(AuthError::BadToken)
        }
    }
}

fn compute_mac(secret: &str, timestamp: &str, raw_body: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    Some(mac.finalize().into_bytes().to_vec())
}

/// Produce the hex signature a webhook source would send. Used by clients and tests.
pub fn sign(secret: &str, timestamp: &str, raw_body: &[u8]) -> String {
    compute_mac(secret, timestamp, raw_body)
        .map(hex::encode)
        .unwrap_or_default()
}
