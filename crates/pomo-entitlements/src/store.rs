//! Entitlement Storage
//!
//! Key/value persistence for the pro flag, purchase details, and the
//! processed-webhook-event ledger. The production backend is a Redis-style
//! REST API (Upstash / Vercel KV); an in-memory store backs development
//! and tests.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PaywallError, Result};
use crate::identity::Identity;

/// How long processed webhook event ids are remembered (seven days)
pub const EVENT_LEDGER_TTL_SECS: i64 = 60 * 60 * 24 * 7;

fn pro_key(identity: &Identity) -> String {
    format!("pro:{}", identity.as_str())
}

fn detail_key(identity: &Identity) -> String {
    format!("pro:detail:{}", identity.as_str())
}

fn event_key(event_id: &str) -> String {
    format!("stripe:event:{event_id}")
}

/// Stored flag values other than "1" and "true" read as free tier
fn is_truthy(value: &str) -> bool {
    matches!(value, "1" | "true")
}

/// Details of the purchase that activated an entitlement
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PurchaseDetail {
    pub session_id: String,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Storage backend for entitlements and the webhook event ledger
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Whether the identity holds a pro entitlement
    async fn is_pro(&self, identity: &Identity) -> Result<bool>;

    /// Grant the pro entitlement, optionally recording purchase details
    async fn set_pro(&self, identity: &Identity, detail: Option<&PurchaseDetail>) -> Result<()>;

    /// Purchase details recorded at activation, if any
    async fn purchase_detail(&self, identity: &Identity) -> Result<Option<PurchaseDetail>>;

    /// Whether a webhook event id has already been processed
    async fn is_event_processed(&self, event_id: &str) -> Result<bool>;

    /// Record a webhook event id in the ledger for `ttl_secs`
    async fn mark_event_processed(&self, event_id: &str, ttl_secs: i64) -> Result<()>;
}

#[derive(Clone, Debug)]
struct ProRecord {
    pro: bool,
    detail: Option<PurchaseDetail>,
}

/// In-memory entitlement store for development and testing
pub struct MemoryEntitlementStore {
    records: RwLock<HashMap<String, ProRecord>>,
    events: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl MemoryEntitlementStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            events: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryEntitlementStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntitlementStore for MemoryEntitlementStore {
    async fn is_pro(&self, identity: &Identity) -> Result<bool> {
        let records = self.records.read().unwrap();
        Ok(records.get(identity.as_str()).is_some_and(|r| r.pro))
    }

    async fn set_pro(&self, identity: &Identity, detail: Option<&PurchaseDetail>) -> Result<()> {
        let mut records = self.records.write().unwrap();
        records.insert(
            identity.as_str().to_string(),
            ProRecord {
                pro: true,
                detail: detail.cloned(),
            },
        );
        Ok(())
    }

    async fn purchase_detail(&self, identity: &Identity) -> Result<Option<PurchaseDetail>> {
        let records = self.records.read().unwrap();
        Ok(records.get(identity.as_str()).and_then(|r| r.detail.clone()))
    }

    async fn is_event_processed(&self, event_id: &str) -> Result<bool> {
        let events = self.events.read().unwrap();
        Ok(events.get(event_id).is_some_and(|expires| *expires > Utc::now()))
    }

    async fn mark_event_processed(&self, event_id: &str, ttl_secs: i64) -> Result<()> {
        let mut events = self.events.write().unwrap();
        let now = Utc::now();
        events.retain(|_, expires| *expires > now);
        events.insert(event_id.to_string(), now + Duration::seconds(ttl_secs));
        Ok(())
    }
}

#[derive(Deserialize)]
struct KvReply {
    result: Option<serde_json::Value>,
    error: Option<String>,
}

/// Entitlement store backed by an Upstash-compatible Redis REST API
///
/// Commands are posted as JSON arrays to the base URL with a bearer token,
/// the wire protocol Vercel KV and Upstash Redis share.
pub struct RestKvStore {
    http: reqwest::Client,
    url: String,
    token: String,
}

impl RestKvStore {
    /// Create a new store
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            token: token.into(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("KV_REST_API_URL")
            .map_err(|_| PaywallError::Config("KV_REST_API_URL not set".into()))?;
        let token = std::env::var("KV_REST_API_TOKEN")
            .map_err(|_| PaywallError::Config("KV_REST_API_TOKEN not set".into()))?;

        Ok(Self::new(url, token))
    }

    /// Execute one Redis command, returning its reply as a string
    async fn command(&self, command: &[&str]) -> Result<Option<String>> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&command)
            .send()
            .await
            .map_err(|e| PaywallError::Storage(format!("KV request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(PaywallError::Storage(format!(
                "KV returned status {}",
                response.status()
            )));
        }

        let reply: KvReply = response
            .json()
            .await
            .map_err(|e| PaywallError::Storage(format!("Invalid KV response: {e}")))?;

        if let Some(error) = reply.error {
            return Err(PaywallError::Storage(format!("KV error: {error}")));
        }

        Ok(reply.result.and_then(|value| match value {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }))
    }
}

#[async_trait]
impl EntitlementStore for RestKvStore {
    async fn is_pro(&self, identity: &Identity) -> Result<bool> {
        let value = self.command(&["GET", &pro_key(identity)]).await?;
        Ok(value.as_deref().is_some_and(is_truthy))
    }

    async fn set_pro(&self, identity: &Identity, detail: Option<&PurchaseDetail>) -> Result<()> {
        self.command(&["SET", &pro_key(identity), "1"]).await?;

        if let Some(detail) = detail {
            let json = serde_json::to_string(detail)
                .map_err(|e| PaywallError::Storage(format!("Detail serialization: {e}")))?;
            self.command(&["SET", &detail_key(identity), &json]).await?;
        }
        Ok(())
    }

    async fn purchase_detail(&self, identity: &Identity) -> Result<Option<PurchaseDetail>> {
        let Some(json) = self.command(&["GET", &detail_key(identity)]).await? else {
            return Ok(None);
        };
        let detail = serde_json::from_str(&json)
            .map_err(|e| PaywallError::Storage(format!("Detail deserialization: {e}")))?;
        Ok(Some(detail))
    }

    async fn is_event_processed(&self, event_id: &str) -> Result<bool> {
        let value = self.command(&["GET", &event_key(event_id)]).await?;
        Ok(value.is_some())
    }

    async fn mark_event_processed(&self, event_id: &str, ttl_secs: i64) -> Result<()> {
        let ttl = ttl_secs.to_string();
        self.command(&["SET", &event_key(event_id), "1", "EX", &ttl])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity::from_string("abc123")
    }

    #[tokio::test]
    async fn test_default_is_free_tier() {
        let store = MemoryEntitlementStore::new();
        assert!(!store.is_pro(&identity()).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_pro_persists() {
        let store = MemoryEntitlementStore::new();
        store.set_pro(&identity(), None).await.unwrap();
        assert!(store.is_pro(&identity()).await.unwrap());
        assert!(!store.is_pro(&Identity::from_string("other")).await.unwrap());
    }

    #[tokio::test]
    async fn test_purchase_detail_roundtrip() {
        let store = MemoryEntitlementStore::new();
        let detail = PurchaseDetail {
            session_id: "cs_test_1".to_string(),
            amount_total: Some(600),
            currency: Some("jpy".to_string()),
            completed_at: Utc::now(),
        };

        store.set_pro(&identity(), Some(&detail)).await.unwrap();
        let stored = store.purchase_detail(&identity()).await.unwrap();
        assert_eq!(stored, Some(detail));
    }

    #[tokio::test]
    async fn test_event_ledger() {
        let store = MemoryEntitlementStore::new();
        assert!(!store.is_event_processed("evt_1").await.unwrap());

        store
            .mark_event_processed("evt_1", EVENT_LEDGER_TTL_SECS)
            .await
            .unwrap();
        assert!(store.is_event_processed("evt_1").await.unwrap());
        assert!(!store.is_event_processed("evt_2").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_ledger_entry_is_forgotten() {
        let store = MemoryEntitlementStore::new();
        store.mark_event_processed("evt_old", -1).await.unwrap();
        assert!(!store.is_event_processed("evt_old").await.unwrap());
    }

    #[tokio::test]
    async fn test_ledger_evicts_expired_entries_on_write() {
        let store = MemoryEntitlementStore::new();
        store.mark_event_processed("evt_old", -1).await.unwrap();
        store
            .mark_event_processed("evt_new", EVENT_LEDGER_TTL_SECS)
            .await
            .unwrap();

        let events = store.events.read().unwrap();
        assert!(!events.contains_key("evt_old"));
        assert!(events.contains_key("evt_new"));
    }

    #[test]
    fn test_truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy("true"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("false"));
        assert!(!is_truthy(""));
    }

    #[test]
    fn test_key_formats() {
        let identity = identity();
        assert_eq!(pro_key(&identity), "pro:abc123");
        assert_eq!(detail_key(&identity), "pro:detail:abc123");
        assert_eq!(event_key("evt_1"), "stripe:event:evt_1");
    }
}
