//! Entitlement Gate
//!
//! Client-side guard in front of pro features. The gate caches the last
//! known entitlement and answers synchronously; anything unknown or
//! failed reads as free tier.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::api::{ApiClient, GateError};

/// The paywall queries the gate needs
#[async_trait]
pub trait ProQuery: Send + Sync {
    async fn identify(&self) -> Result<(), GateError>;
    async fn pro_status(&self) -> Result<bool, GateError>;
    async fn begin_checkout(&self) -> Result<String, GateError>;
}

#[async_trait]
impl ProQuery for ApiClient {
    async fn identify(&self) -> Result<(), GateError> {
        ApiClient::identify(self).await
    }

    async fn pro_status(&self) -> Result<bool, GateError> {
        ApiClient::pro_status(self).await
    }

    async fn begin_checkout(&self) -> Result<String, GateError> {
        ApiClient::begin_checkout(self).await
    }
}

/// What to do with an attempted pro feature use
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateDecision {
    /// Let the feature run
    Allowed,
    /// Show the upgrade prompt for this feature
    Denied { feature: String },
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Caches the entitlement and gates pro features on it
pub struct EntitlementGate {
    client: Arc<dyn ProQuery>,
    pro: RwLock<bool>,
}

impl EntitlementGate {
    /// Create a gate starting on the free tier
    pub fn new(client: Arc<dyn ProQuery>) -> Self {
        Self {
            client,
            pro: RwLock::new(false),
        }
    }

    /// App-load sequence: establish identity, then read the entitlement
    ///
    /// A failed identify is not fatal; the status read may still succeed
    /// for a returning browser whose cookies are intact.
    pub async fn initialize(&self) -> bool {
        if let Err(e) = self.client.identify().await {
            tracing::warn!("Identify failed: {}", e);
        }
        self.refresh().await
    }

    /// Re-read the entitlement from the server
    pub async fn refresh(&self) -> bool {
        let pro = match self.client.pro_status().await {
            Ok(pro) => pro,
            Err(e) => {
                tracing::warn!("Entitlement check failed, staying on free tier: {}", e);
                false
            }
        };
        *self.pro.write().unwrap() = pro;
        pro
    }

    /// Last known entitlement
    pub fn is_pro(&self) -> bool {
        *self.pro.read().unwrap()
    }

    /// Gate one feature use
    pub fn require_pro(&self, feature: impl Into<String>) -> GateDecision {
        if self.is_pro() {
            GateDecision::Allowed
        } else {
            GateDecision::Denied {
                feature: feature.into(),
            }
        }
    }

    /// Start the upgrade: returns the hosted checkout URL to navigate to
    pub async fn begin_upgrade(&self) -> Result<String, GateError> {
        self.client.begin_checkout().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeApi {
        pro: AtomicBool,
        unavailable: AtomicBool,
        identify_calls: AtomicUsize,
    }

    impl FakeApi {
        fn new(pro: bool) -> Self {
            Self {
                pro: AtomicBool::new(pro),
                unavailable: AtomicBool::new(false),
                identify_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ProQuery for FakeApi {
        async fn identify(&self) -> Result<(), GateError> {
            self.identify_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn pro_status(&self) -> Result<bool, GateError> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(GateError::Http("server unreachable".into()));
            }
            Ok(self.pro.load(Ordering::SeqCst))
        }

        async fn begin_checkout(&self) -> Result<String, GateError> {
            Ok("https://checkout.stripe.com/c/pay/cs_test_1".into())
        }
    }

    #[tokio::test]
    async fn test_initialize_identifies_and_reads_status() {
        let api = Arc::new(FakeApi::new(false));
        let gate = EntitlementGate::new(api.clone());

        assert!(!gate.initialize().await);
        assert_eq!(api.identify_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_free_user_is_denied_with_feature_name() {
        let gate = EntitlementGate::new(Arc::new(FakeApi::new(false)));
        gate.initialize().await;

        let decision = gate.require_pro("long-break-lengths");
        assert_eq!(
            decision,
            GateDecision::Denied {
                feature: "long-break-lengths".to_string(),
            }
        );
        assert!(!decision.is_allowed());
    }

    #[tokio::test]
    async fn test_pro_user_is_allowed() {
        let gate = EntitlementGate::new(Arc::new(FakeApi::new(true)));
        gate.initialize().await;

        assert!(gate.is_pro());
        assert!(gate.require_pro("long-break-lengths").is_allowed());
    }

    #[tokio::test]
    async fn test_refresh_picks_up_activation() {
        let api = Arc::new(FakeApi::new(false));
        let gate = EntitlementGate::new(api.clone());
        gate.initialize().await;
        assert!(!gate.is_pro());

        // Purchase completes server-side
        api.pro.store(true, Ordering::SeqCst);
        assert!(gate.refresh().await);
        assert!(gate.require_pro("long-break-lengths").is_allowed());
    }

    #[tokio::test]
    async fn test_unreachable_server_reads_as_free_tier() {
        let api = Arc::new(FakeApi::new(true));
        let gate = EntitlementGate::new(api.clone());
        gate.initialize().await;
        assert!(gate.is_pro());

        api.unavailable.store(true, Ordering::SeqCst);
        assert!(!gate.refresh().await);
        assert!(!gate.is_pro());
    }

    #[tokio::test]
    async fn test_begin_upgrade_returns_hosted_url() {
        let gate = EntitlementGate::new(Arc::new(FakeApi::new(false)));
        let url = gate.begin_upgrade().await.unwrap();
        assert!(url.starts_with("https://checkout.stripe.com/"));
    }
}
