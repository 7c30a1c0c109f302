//! Application State

use std::sync::Arc;

use pomo_entitlements::{CheckoutSessionCreator, EntitlementStore, IdentityIssuer, WebhookProcessor};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Issues and verifies signed identity cookies
    pub identity: Arc<IdentityIssuer>,

    /// Entitlement storage (KV in production, memory in development)
    pub store: Arc<dyn EntitlementStore>,

    /// Checkout session creator (optional - None if Stripe not configured)
    pub checkout: Option<Arc<CheckoutSessionCreator>>,

    /// Webhook processor (optional - None if no webhook secret)
    pub webhook: Option<Arc<WebhookProcessor>>,
}
