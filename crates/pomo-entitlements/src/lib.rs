//! Pomodoro Pro Entitlements
//!
//! The freemium paywall state machine for the Pomodoro web app: an
//! anonymous signed-cookie identity is bound to a Stripe-hosted checkout
//! session, and an idempotent webhook consumer flips the pro flag in
//! key/value storage when the payment completes.
//!
//! ```text
//! browser ──POST /identify──▶ IdentityIssuer ──▶ pm_uid + pm_uid_sig cookies
//!    │
//!    ├──POST /checkout─────▶ CheckoutSessionCreator ──▶ hosted Stripe URL
//!    │                          (identity rides along as
//!    │                           client_reference_id / metadata.uid)
//!    │
//! Stripe ──POST /webhook───▶ WebhookProcessor ──▶ EntitlementStore
//!    │                          verify, dedup, activate    pro:<identity> = 1
//!    │
//! browser ──GET /me────────▶ EntitlementStore ──▶ { pro: true | false }
//! ```
//!
//! Payment truth lives with the provider; this crate only records the
//! resulting entitlement. Losing the store loses entitlements, not money.

mod checkout;
mod error;
mod identity;
mod signature;
mod store;
mod webhook;

pub use checkout::{
    CheckoutClient, CheckoutConfig, CheckoutSessionCreator, CheckoutSessionRequest,
    HostedCheckout, MockCheckoutClient, PriceSource, StripeCheckout,
};
pub use stripe::Currency;
pub use error::{PaywallError, Result};
pub use identity::{
    Identity, IdentityIssuer, COOKIE_MAX_AGE_SECS, IDENTITY_COOKIE, SIGNATURE_COOKIE,
};
pub use signature::{
    HmacSignatureVerifier, SignatureVerifier, StripeSignature, SIGNATURE_TOLERANCE_SECS,
};
pub use store::{
    EntitlementStore, MemoryEntitlementStore, PurchaseDetail, RestKvStore,
    EVENT_LEDGER_TTL_SECS,
};
pub use webhook::{
    CheckoutSessionObject, EventData, StripeEvent, VerificationPolicy, WebhookOutcome,
    WebhookProcessor, ACTIVATION_EVENT_TYPE,
};
