//! Anonymous Identity
//!
//! Issues and verifies the signed identity cookie pair. The identity is
//! entirely client-held: the server keeps no identity table and trusts a
//! presented identity only when its HMAC signature cookie verifies.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{PaywallError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Cookie carrying the identity value
pub const IDENTITY_COOKIE: &str = "pm_uid";

/// Cookie carrying the hex HMAC signature of the identity value
pub const SIGNATURE_COOKIE: &str = "pm_uid_sig";

/// Cookie lifetime (one year)
pub const COOKIE_MAX_AGE_SECS: u64 = 60 * 60 * 24 * 365;

/// Anonymous, opaque identity for one browser
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Parse from string
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the identity as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Issues identity cookies and resolves identities from request cookies
pub struct IdentityIssuer {
    secret: String,
    secure: bool,
}

impl IdentityIssuer {
    /// Create a new issuer
    ///
    /// `secure` adds the `Secure` attribute to issued cookies and should be
    /// on for any production deployment.
    pub fn new(secret: impl Into<String>, secure: bool) -> Self {
        Self {
            secret: secret.into(),
            secure,
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let secret = std::env::var("UID_COOKIE_SECRET")
            .map_err(|_| PaywallError::Config("UID_COOKIE_SECRET not set".into()))?;
        let secure = std::env::var("APP_ENV").is_ok_and(|v| v == "production");

        Ok(Self::new(secret, secure))
    }

    /// Mint a new identity together with its Set-Cookie header values
    pub fn issue(&self) -> Result<(Identity, [String; 2])> {
        let identity = Identity::generate();
        let cookies = self.cookie_pair(&identity)?;
        Ok((identity, cookies))
    }

    /// Build the Set-Cookie header values for an identity
    pub fn cookie_pair(&self, identity: &Identity) -> Result<[String; 2]> {
        let signature = self.sign(identity.as_str())?;
        let attributes = self.cookie_attributes();

        Ok([
            format!("{IDENTITY_COOKIE}={}; {attributes}", identity.as_str()),
            format!("{SIGNATURE_COOKIE}={signature}; {attributes}"),
        ])
    }

    /// Resolve a verified identity from a request's Cookie header
    ///
    /// Returns None when either cookie is absent or the signature does not
    /// verify. A tampered cookie is indistinguishable from no cookie.
    pub fn resolve(&self, cookie_header: Option<&str>) -> Option<Identity> {
        let cookies = parse_cookie_header(cookie_header?);
        let value = cookies.get(IDENTITY_COOKIE)?;
        let signature = cookies.get(SIGNATURE_COOKIE)?;

        if self.verify(value, signature) {
            Some(Identity::from_string(*value))
        } else {
            tracing::warn!("Identity cookie signature did not verify");
            None
        }
    }

    fn cookie_attributes(&self) -> String {
        let mut attributes = format!(
            "Path=/; HttpOnly; SameSite=Lax; Max-Age={COOKIE_MAX_AGE_SECS}"
        );
        if self.secure {
            attributes.push_str("; Secure");
        }
        attributes
    }

    fn sign(&self, value: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| PaywallError::Config("Invalid cookie secret".into()))?;
        mac.update(value.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn verify(&self, value: &str, signature_hex: &str) -> bool {
        let Ok(signature) = hex::decode(signature_hex) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(self.secret.as_bytes()) else {
            return false;
        };
        mac.update(value.as_bytes());
        mac.verify_slice(&signature).is_ok()
    }
}

/// Split a Cookie header into name/value pairs
fn parse_cookie_header(header: &str) -> HashMap<&str, &str> {
    header
        .split(';')
        .filter_map(|pair| {
            let mut parts = pair.trim().splitn(2, '=');
            Some((parts.next()?, parts.next()?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> IdentityIssuer {
        IdentityIssuer::new("test-cookie-secret", false)
    }

    #[test]
    fn test_identity_generation_is_unique() {
        let a = Identity::generate();
        let b = Identity::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_cookie_pair_attributes() {
        let issuer = issuer();
        let identity = Identity::from_string("abc123");
        let [uid, sig] = issuer.cookie_pair(&identity).unwrap();

        assert!(uid.starts_with("pm_uid=abc123; "));
        assert!(sig.starts_with("pm_uid_sig="));
        for cookie in [&uid, &sig] {
            assert!(cookie.contains("Path=/"));
            assert!(cookie.contains("HttpOnly"));
            assert!(cookie.contains("SameSite=Lax"));
            assert!(cookie.contains("Max-Age=31536000"));
            assert!(!cookie.contains("Secure"));
        }
    }

    #[test]
    fn test_secure_attribute_in_production() {
        let issuer = IdentityIssuer::new("test-cookie-secret", true);
        let [uid, _] = issuer.cookie_pair(&Identity::generate()).unwrap();
        assert!(uid.ends_with("; Secure"));
    }

    #[test]
    fn test_resolve_roundtrip() {
        let issuer = issuer();
        let (identity, [uid, sig]) = issuer.issue().unwrap();

        let uid_pair = uid.split("; ").next().unwrap();
        let sig_pair = sig.split("; ").next().unwrap();
        let header = format!("{uid_pair}; {sig_pair}");

        let resolved = issuer.resolve(Some(&header)).unwrap();
        assert_eq!(resolved, identity);
    }

    #[test]
    fn test_tampered_value_is_rejected() {
        let issuer = issuer();
        let signature = issuer.sign("abc123").unwrap();
        let header = format!("pm_uid=evil999; pm_uid_sig={signature}");
        assert!(issuer.resolve(Some(&header)).is_none());
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let signature = IdentityIssuer::new("other-secret", false)
            .sign("abc123")
            .unwrap();
        let header = format!("pm_uid=abc123; pm_uid_sig={signature}");
        assert!(issuer().resolve(Some(&header)).is_none());
    }

    #[test]
    fn test_missing_cookies_resolve_to_none() {
        let issuer = issuer();
        assert!(issuer.resolve(None).is_none());
        assert!(issuer.resolve(Some("pm_uid=abc123")).is_none());
        assert!(issuer.resolve(Some("unrelated=1")).is_none());
        assert!(issuer.resolve(Some("pm_uid=abc123; pm_uid_sig=nothex!")).is_none());
    }

    #[test]
    fn test_parse_cookie_header() {
        let cookies = parse_cookie_header("a=1; b=2;c=x=y");
        assert_eq!(cookies.get("a"), Some(&"1"));
        assert_eq!(cookies.get("b"), Some(&"2"));
        assert_eq!(cookies.get("c"), Some(&"x=y"));
    }
}
