//! Paywall API Client
//!
//! Thin reqwest wrapper over the paywall endpoints. The cookie store
//! carries the signed identity pair across calls the same way a browser
//! would.

use serde::Deserialize;
use thiserror::Error;

/// Gate-side errors
#[derive(Error, Debug)]
pub enum GateError {
    #[error("API request failed: {0}")]
    Http(String),

    #[error("Upgrade failed: {0}")]
    Upgrade(String),
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    #[serde(default)]
    pro: bool,
}

#[derive(Debug, Deserialize)]
struct CheckoutResponse {
    #[serde(default)]
    url: Option<String>,
}

/// Client for the paywall API
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Create a client for a paywall server base URL
    pub fn new(base_url: impl Into<String>) -> Result<Self, GateError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| GateError::Http(e.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self { http, base_url })
    }

    /// Establish (or confirm) the anonymous identity
    pub async fn identify(&self) -> Result<(), GateError> {
        self.http
            .post(format!("{}/identify", self.base_url))
            .send()
            .await
            .map_err(|e| GateError::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| GateError::Http(e.to_string()))?;

        Ok(())
    }

    /// Read the current entitlement
    pub async fn pro_status(&self) -> Result<bool, GateError> {
        let response: MeResponse = self
            .http
            .get(format!("{}/me", self.base_url))
            .send()
            .await
            .map_err(|e| GateError::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| GateError::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| GateError::Http(e.to_string()))?;

        Ok(response.pro)
    }

    /// Open a checkout session, returning the hosted payment page URL
    pub async fn begin_checkout(&self) -> Result<String, GateError> {
        let response: CheckoutResponse = self
            .http
            .post(format!("{}/checkout", self.base_url))
            .send()
            .await
            .map_err(|e| GateError::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| GateError::Upgrade(e.to_string()))?
            .json()
            .await
            .map_err(|e| GateError::Upgrade(e.to_string()))?;

        response
            .url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| GateError::Upgrade("checkout session carried no URL".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let client = ApiClient::new("https://pomo.example.com/").unwrap();
        assert_eq!(client.base_url, "https://pomo.example.com");
    }

    #[test]
    fn test_me_response_defaults_to_free() {
        let parsed: MeResponse = serde_json::from_str("{\"ok\":true}").unwrap();
        assert!(!parsed.pro);
    }
}
