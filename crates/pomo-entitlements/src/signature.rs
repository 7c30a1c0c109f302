//! Webhook Signature Verification
//!
//! Verifies Stripe's `Stripe-Signature` header against the raw request
//! body. The header carries a unix timestamp and one or more `v1` HMAC
//! signatures over `"{timestamp}.{body}"`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{PaywallError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Maximum allowed skew between the header timestamp and now
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Parsed `Stripe-Signature` header
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StripeSignature {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

impl StripeSignature {
    /// Parse a header of the form `t=<unix>,v1=<hex>[,v1=<hex>...]`
    pub fn parse(header: &str) -> Result<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for element in header.split(',') {
            let mut parts = element.trim().splitn(2, '=');
            match (parts.next(), parts.next()) {
                (Some("t"), Some(value)) => {
                    timestamp = value.parse::<i64>().ok();
                }
                (Some("v1"), Some(value)) => {
                    signatures.push(value.to_string());
                }
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| PaywallError::SignatureInvalid("missing timestamp".into()))?;
        if signatures.is_empty() {
            return Err(PaywallError::SignatureInvalid("missing v1 signature".into()));
        }

        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

/// Verifies a webhook payload against its signature header
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, payload: &[u8], header: &str) -> Result<()>;
}

/// HMAC-SHA256 verifier using the endpoint's signing secret
pub struct HmacSignatureVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl HmacSignatureVerifier {
    /// Create a verifier with the default timestamp tolerance
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs: SIGNATURE_TOLERANCE_SECS,
        }
    }

    /// Create a verifier with a custom timestamp tolerance
    pub fn with_tolerance(secret: impl Into<String>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }
}

impl SignatureVerifier for HmacSignatureVerifier {
    fn verify(&self, payload: &[u8], header: &str) -> Result<()> {
        let signature = StripeSignature::parse(header)?;

        // Header timestamps are attacker-controlled and may sit at the i64 extremes
        let age = chrono::Utc::now()
            .timestamp()
            .saturating_sub(signature.timestamp)
            .saturating_abs();
        if age > self.tolerance_secs {
            return Err(PaywallError::SignatureInvalid(format!(
                "timestamp outside tolerance ({age}s)"
            )));
        }

        for candidate in &signature.signatures {
            let Ok(expected) = hex::decode(candidate) else {
                continue;
            };
            let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
                .map_err(|_| PaywallError::Config("Invalid webhook secret".into()))?;
            mac.update(format!("{}.", signature.timestamp).as_bytes());
            mac.update(payload);
            if mac.verify_slice(&expected).is_ok() {
                return Ok(());
            }
        }

        Err(PaywallError::SignatureInvalid(
            "no matching v1 signature".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.").as_bytes());
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    fn header(secret: &str, timestamp: i64, payload: &[u8]) -> String {
        format!("t={timestamp},v1={}", sign(secret, timestamp, payload))
    }

    #[test]
    fn test_parse_header() {
        let parsed = StripeSignature::parse("t=1700000000,v1=aabb,v1=ccdd").unwrap();
        assert_eq!(parsed.timestamp, 1_700_000_000);
        assert_eq!(parsed.signatures, vec!["aabb", "ccdd"]);
    }

    #[test]
    fn test_parse_rejects_missing_parts() {
        assert!(StripeSignature::parse("v1=aabb").is_err());
        assert!(StripeSignature::parse("t=1700000000").is_err());
        assert!(StripeSignature::parse("garbage").is_err());
    }

    #[test]
    fn test_valid_signature() {
        let verifier = HmacSignatureVerifier::new("whsec_test");
        let payload = br#"{"id":"evt_1"}"#;
        let now = chrono::Utc::now().timestamp();
        let header = header("whsec_test", now, payload);

        assert!(verifier.verify(payload, &header).is_ok());
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let verifier = HmacSignatureVerifier::new("whsec_test");
        let payload = br#"{"id":"evt_1"}"#;
        let now = chrono::Utc::now().timestamp();
        let header = header("whsec_other", now, payload);

        assert!(matches!(
            verifier.verify(payload, &header),
            Err(PaywallError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let verifier = HmacSignatureVerifier::new("whsec_test");
        let now = chrono::Utc::now().timestamp();
        let header = header("whsec_test", now, br#"{"id":"evt_1"}"#);

        assert!(verifier.verify(br#"{"id":"evt_2"}"#, &header).is_err());
    }

    #[test]
    fn test_stale_timestamp_is_rejected() {
        let verifier = HmacSignatureVerifier::new("whsec_test");
        let payload = br#"{"id":"evt_1"}"#;
        let stale = chrono::Utc::now().timestamp() - 600;
        let header = header("whsec_test", stale, payload);

        assert!(matches!(
            verifier.verify(payload, &header),
            Err(PaywallError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn test_extreme_timestamp_is_rejected() {
        let verifier = HmacSignatureVerifier::new("whsec_test");

        for header in ["t=-9223372036854775808,v1=aabb", "t=9223372036854775807,v1=aabb"] {
            assert!(matches!(
                verifier.verify(br#"{"id":"evt_1"}"#, header),
                Err(PaywallError::SignatureInvalid(_))
            ));
        }
    }

    #[test]
    fn test_any_matching_v1_accepts() {
        let verifier = HmacSignatureVerifier::new("whsec_test");
        let payload = br#"{"id":"evt_1"}"#;
        let now = chrono::Utc::now().timestamp();
        let good = sign("whsec_test", now, payload);
        let header = format!("t={now},v1=deadbeef,v1={good}");

        assert!(verifier.verify(payload, &header).is_ok());
    }

    #[test]
    fn test_malformed_hex_candidate_is_skipped() {
        let verifier = HmacSignatureVerifier::new("whsec_test");
        let payload = br#"{"id":"evt_1"}"#;
        let now = chrono::Utc::now().timestamp();
        let good = sign("whsec_test", now, payload);
        let header = format!("t={now},v1=not-hex!,v1={good}");

        assert!(verifier.verify(payload, &header).is_ok());
    }
}
