//! Webhook Processing
//!
//! Consumes Stripe webhook deliveries and flips entitlements. Processing
//! is idempotent: every verified event id is recorded in a ledger before
//! any state change, and replays acknowledge without re-activating.
//!
//! Errors are reserved for verification failures and storage faults.
//! Business oddities (unhandled event types, sessions without a
//! resolvable identity) acknowledge cleanly so the provider stops
//! retrying deliveries we will never act on.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use crate::error::{PaywallError, Result};
use crate::identity::Identity;
use crate::signature::{HmacSignatureVerifier, SignatureVerifier};
use crate::store::{EntitlementStore, PurchaseDetail, EVENT_LEDGER_TTL_SECS};

/// The only event type that grants an entitlement
pub const ACTIVATION_EVENT_TYPE: &str = "checkout.session.completed";

/// A Stripe event envelope, parsed tolerantly
///
/// Unknown fields are ignored and the nested object is optional so that
/// event types this service never handles still deserialize.
#[derive(Clone, Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub livemode: bool,
    #[serde(default)]
    pub data: EventData,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub object: CheckoutSessionObject,
}

/// The checkout session carried in a completion event
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CheckoutSessionObject {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
}

impl CheckoutSessionObject {
    /// Recover the identity the session was opened for
    ///
    /// `client_reference_id` wins; `metadata.uid` is the fallback. Empty
    /// strings count as absent.
    pub fn resolve_identity(&self) -> Option<Identity> {
        self.client_reference_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| {
                self.metadata
                    .as_ref()
                    .and_then(|m| m.get("uid"))
                    .map(String::as_str)
                    .filter(|s| !s.is_empty())
            })
            .map(Identity::from_string)
    }
}

/// Whether deliveries must carry a valid signature
pub enum VerificationPolicy {
    /// Verify every delivery against the endpoint secret
    Required(Arc<dyn SignatureVerifier>),
    /// Accept unsigned deliveries, but never live-mode ones
    ///
    /// For local testing against `stripe trigger` without a secret.
    AllowUnverified,
}

/// What a processed delivery amounted to
///
/// Every variant acknowledges the delivery; errors are the only path to
/// a retry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A completed checkout activated an entitlement
    Activated { identity: Identity, event_id: String },
    /// The event id was already in the ledger
    Duplicate { event_id: String },
    /// An event type this service does not handle
    Ignored { event_type: String },
    /// A completed checkout with no resolvable identity
    NoIdentity { event_id: String },
}

/// Processes webhook deliveries into entitlement changes
pub struct WebhookProcessor {
    store: Arc<dyn EntitlementStore>,
    policy: VerificationPolicy,
    ledger_ttl_secs: i64,
}

impl WebhookProcessor {
    /// Create a new processor
    pub fn new(store: Arc<dyn EntitlementStore>, policy: VerificationPolicy) -> Self {
        Self {
            store,
            policy,
            ledger_ttl_secs: EVENT_LEDGER_TTL_SECS,
        }
    }

    /// Create from environment variables
    ///
    /// `STRIPE_WEBHOOK_SKIP_VERIFY=true` disables verification for local
    /// testing; otherwise `STRIPE_WEBHOOK_SECRET` is required.
    pub fn from_env(store: Arc<dyn EntitlementStore>) -> Result<Self> {
        let skip = std::env::var("STRIPE_WEBHOOK_SKIP_VERIFY")
            .is_ok_and(|v| v == "true" || v == "1");

        let policy = if skip {
            tracing::warn!("Webhook signature verification is DISABLED; test events only");
            VerificationPolicy::AllowUnverified
        } else {
            let secret = std::env::var("STRIPE_WEBHOOK_SECRET")
                .map_err(|_| PaywallError::Config("STRIPE_WEBHOOK_SECRET not set".into()))?;
            VerificationPolicy::Required(Arc::new(HmacSignatureVerifier::new(secret)))
        };

        Ok(Self::new(store, policy))
    }

    /// Process one delivery: the raw body bytes and the signature header
    pub async fn process(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
    ) -> Result<WebhookOutcome> {
        if let VerificationPolicy::Required(verifier) = &self.policy {
            let header = signature_header.ok_or_else(|| {
                PaywallError::SignatureInvalid("missing stripe-signature header".into())
            })?;
            verifier.verify(payload, header)?;
        }

        let event: StripeEvent = serde_json::from_slice(payload)
            .map_err(|e| PaywallError::PayloadParse(e.to_string()))?;

        if matches!(self.policy, VerificationPolicy::AllowUnverified) && event.livemode {
            return Err(PaywallError::SignatureInvalid(
                "live event delivered while verification is disabled".into(),
            ));
        }

        if self.store.is_event_processed(&event.id).await? {
            tracing::info!(event_id = %event.id, "Duplicate webhook event, skipping");
            return Ok(WebhookOutcome::Duplicate { event_id: event.id });
        }
        self.store
            .mark_event_processed(&event.id, self.ledger_ttl_secs)
            .await?;

        if event.event_type != ACTIVATION_EVENT_TYPE {
            tracing::debug!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Unhandled webhook event type"
            );
            return Ok(WebhookOutcome::Ignored {
                event_type: event.event_type,
            });
        }

        let session = &event.data.object;
        let Some(identity) = session.resolve_identity() else {
            tracing::warn!(
                event_id = %event.id,
                session_id = session.id.as_deref().unwrap_or("unknown"),
                "Completed checkout carries no identity"
            );
            return Ok(WebhookOutcome::NoIdentity { event_id: event.id });
        };

        let detail = PurchaseDetail {
            session_id: session.id.clone().unwrap_or_default(),
            amount_total: session.amount_total,
            currency: session.currency.clone(),
            completed_at: Utc::now(),
        };
        self.store.set_pro(&identity, Some(&detail)).await?;

        tracing::info!(
            event_id = %event.id,
            identity = %identity,
            "Activated pro entitlement"
        );

        Ok(WebhookOutcome::Activated {
            identity,
            event_id: event.id,
        })
    }
}
