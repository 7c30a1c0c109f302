//! Stripe Checkout Integration
//!
//! Creates provider-hosted checkout sessions bound to an anonymous
//! identity. The identity travels both as `client_reference_id` and as
//! `metadata.uid` so the completion webhook can recover it either way.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stripe::{
    CheckoutSession, CheckoutSessionMode, Client, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, CreateCheckoutSessionLineItemsPriceData,
    CreateCheckoutSessionLineItemsPriceDataProductData, Currency,
};

use crate::error::{PaywallError, Result};
use crate::identity::Identity;

/// What the checkout session charges for
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PriceSource {
    /// A price configured in the Stripe dashboard
    PriceId(String),
    /// Ad-hoc price data assembled per session
    Inline {
        currency: Currency,
        product_name: String,
        unit_amount: i64,
    },
}

impl PriceSource {
    /// Read pricing from environment variables
    ///
    /// `STRIPE_PRICE_ID` wins when set; otherwise an inline price is built
    /// from `STRIPE_CURRENCY`, `STRIPE_PRODUCT_NAME`, and
    /// `STRIPE_UNIT_AMOUNT`, defaulting to the one-time ¥600 purchase.
    pub fn from_env() -> Self {
        if let Ok(price_id) = std::env::var("STRIPE_PRICE_ID") {
            if !price_id.is_empty() {
                return Self::PriceId(price_id);
            }
        }

        let currency = std::env::var("STRIPE_CURRENCY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Currency::JPY);
        let product_name = std::env::var("STRIPE_PRODUCT_NAME")
            .unwrap_or_else(|_| "Pomodoro Pro（買い切り）".to_string());
        let unit_amount = std::env::var("STRIPE_UNIT_AMOUNT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(600);

        Self::Inline {
            currency,
            product_name,
            unit_amount,
        }
    }
}

/// Checkout configuration
#[derive(Clone, Debug)]
pub struct CheckoutConfig {
    app_url: String,
    price: PriceSource,
}

impl CheckoutConfig {
    /// Create a new configuration
    pub fn new(app_url: impl Into<String>, price: PriceSource) -> Self {
        Self {
            app_url: app_url.into(),
            price,
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let app_url = std::env::var("APP_URL")
            .map_err(|_| PaywallError::Config("APP_URL not set".into()))?;

        Ok(Self::new(app_url, PriceSource::from_env()))
    }

    /// Where Stripe redirects after a completed payment
    ///
    /// The `{CHECKOUT_SESSION_ID}` token is substituted by Stripe.
    pub fn success_url(&self) -> String {
        format!(
            "{}/?checkout=success&session_id={{CHECKOUT_SESSION_ID}}",
            self.app_url.trim_end_matches('/')
        )
    }

    /// Where Stripe redirects after an abandoned payment
    pub fn cancel_url(&self) -> String {
        format!("{}/?checkout=cancel", self.app_url.trim_end_matches('/'))
    }

    /// Assemble the session request for an identity
    pub fn session_request(&self, identity: &Identity) -> CheckoutSessionRequest {
        CheckoutSessionRequest {
            identity: identity.clone(),
            success_url: self.success_url(),
            cancel_url: self.cancel_url(),
            price: self.price.clone(),
        }
    }
}

/// Everything needed to open one hosted checkout session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutSessionRequest {
    pub identity: Identity,
    pub success_url: String,
    pub cancel_url: String,
    pub price: PriceSource,
}

/// A created hosted checkout session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostedCheckout {
    pub id: String,
    pub url: String,
}

/// Client for the payment provider's checkout API
#[async_trait]
pub trait CheckoutClient: Send + Sync {
    async fn create_session(&self, request: &CheckoutSessionRequest) -> Result<HostedCheckout>;
}

/// Stripe-backed checkout client
pub struct StripeCheckout {
    client: Client,
}

impl StripeCheckout {
    /// Create a new Stripe client
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(secret_key.into()),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| PaywallError::Config("STRIPE_SECRET_KEY not set".into()))?;

        Ok(Self::new(secret_key))
    }
}

#[async_trait]
impl CheckoutClient for StripeCheckout {
    async fn create_session(&self, request: &CheckoutSessionRequest) -> Result<HostedCheckout> {
        let line_item = match &request.price {
            PriceSource::PriceId(price_id) => CreateCheckoutSessionLineItems {
                price: Some(price_id.clone()),
                quantity: Some(1),
                ..Default::default()
            },
            PriceSource::Inline {
                currency,
                product_name,
                unit_amount,
            } => CreateCheckoutSessionLineItems {
                price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                    currency: *currency,
                    unit_amount: Some(*unit_amount),
                    product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                        name: product_name.clone(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                quantity: Some(1),
                ..Default::default()
            },
        };

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Payment);
        params.line_items = Some(vec![line_item]);
        params.success_url = Some(&request.success_url);
        params.cancel_url = Some(&request.cancel_url);
        params.client_reference_id = Some(request.identity.as_str());
        params.metadata = Some(HashMap::from([(
            "uid".to_string(),
            request.identity.as_str().to_string(),
        )]));

        let session = CheckoutSession::create(&self.client, params)
            .await
            .map_err(|e| PaywallError::Upstream(format!("Checkout session creation: {e}")))?;

        let url = session
            .url
            .ok_or_else(|| PaywallError::Upstream("Checkout session has no URL".into()))?;

        Ok(HostedCheckout {
            id: session.id.to_string(),
            url,
        })
    }
}

/// Mock checkout client for development and testing
pub struct MockCheckoutClient {
    sessions: AtomicU64,
}

impl MockCheckoutClient {
    pub fn new() -> Self {
        Self {
            sessions: AtomicU64::new(0),
        }
    }
}

impl Default for MockCheckoutClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckoutClient for MockCheckoutClient {
    async fn create_session(&self, _request: &CheckoutSessionRequest) -> Result<HostedCheckout> {
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("cs_test_{n}");
        let url = format!("https://checkout.stripe.com/c/pay/{id}");

        Ok(HostedCheckout { id, url })
    }
}

/// Creates checkout sessions for identities
pub struct CheckoutSessionCreator {
    client: Arc<dyn CheckoutClient>,
    config: CheckoutConfig,
}

impl CheckoutSessionCreator {
    /// Create a new session creator
    pub fn new(client: Arc<dyn CheckoutClient>, config: CheckoutConfig) -> Self {
        Self { client, config }
    }

    /// Create from environment variables, using the real Stripe API
    pub fn from_env() -> Result<Self> {
        let client = StripeCheckout::from_env()?;
        let config = CheckoutConfig::from_env()?;

        Ok(Self::new(Arc::new(client), config))
    }

    /// Get the configuration
    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    /// Open a hosted checkout session for an identity
    pub async fn create_for(&self, identity: &Identity) -> Result<HostedCheckout> {
        let request = self.config.session_request(identity);
        let session = self.client.create_session(&request).await?;

        tracing::info!(
            identity = %identity,
            session_id = %session.id,
            "Created checkout session"
        );

        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CheckoutConfig {
        CheckoutConfig::new(
            "https://pomo.example.com/",
            PriceSource::Inline {
                currency: Currency::JPY,
                product_name: "Pomodoro Pro（買い切り）".to_string(),
                unit_amount: 600,
            },
        )
    }

    #[test]
    fn test_redirect_urls() {
        let config = config();
        assert_eq!(
            config.success_url(),
            "https://pomo.example.com/?checkout=success&session_id={CHECKOUT_SESSION_ID}"
        );
        assert_eq!(config.cancel_url(), "https://pomo.example.com/?checkout=cancel");
    }

    #[test]
    fn test_session_request_carries_identity_and_price() {
        let identity = Identity::from_string("abc123");
        let request = config().session_request(&identity);

        assert_eq!(request.identity, identity);
        assert!(request.success_url.contains("{CHECKOUT_SESSION_ID}"));
        assert!(request.cancel_url.ends_with("?checkout=cancel"));
        assert!(matches!(request.price, PriceSource::Inline { unit_amount: 600, .. }));
    }

    #[tokio::test]
    async fn test_mock_client_yields_distinct_sessions() {
        let creator = CheckoutSessionCreator::new(Arc::new(MockCheckoutClient::new()), config());
        let identity = Identity::from_string("abc123");

        let first = creator.create_for(&identity).await.unwrap();
        let second = creator.create_for(&identity).await.unwrap();

        assert_eq!(first.id, "cs_test_1");
        assert_eq!(first.url, "https://checkout.stripe.com/c/pay/cs_test_1");
        assert_ne!(first.id, second.id);
    }
}
