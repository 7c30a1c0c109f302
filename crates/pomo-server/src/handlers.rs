//! HTTP Handlers

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header::COOKIE, header::SET_COOKIE, HeaderMap, StatusCode},
    response::{AppendHeaders, IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use pomo_entitlements::{Identity, PaywallError, WebhookOutcome};

use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub stripe_configured: bool,
    pub webhook_configured: bool,
}

#[derive(Serialize)]
pub struct IdentifyResponse {
    pub ok: bool,
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub ok: bool,
    pub url: String,
}

#[derive(Serialize)]
pub struct MeResponse {
    pub ok: bool,
    pub pro: bool,
}

#[derive(Debug, Deserialize)]
pub struct MeQuery {
    #[serde(default)]
    pub uid: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Webhook acknowledgement
///
/// Always `received: true`; the optional flags say why nothing was
/// activated, mainly for the Stripe dashboard's delivery log.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deduped: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_uid: Option<bool>,
}

impl WebhookAck {
    fn received() -> Self {
        Self {
            received: true,
            deduped: None,
            ignored: None,
            no_uid: None,
        }
    }

    fn deduped() -> Self {
        Self {
            deduped: Some(true),
            ..Self::received()
        }
    }

    fn ignored(event_type: String) -> Self {
        Self {
            ignored: Some(event_type),
            ..Self::received()
        }
    }

    fn no_uid() -> Self {
        Self {
            no_uid: Some(true),
            ..Self::received()
        }
    }
}

fn cookie_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(COOKIE).and_then(|v| v.to_str().ok())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        stripe_configured: state.checkout.is_some(),
        webhook_configured: state.webhook.is_some(),
    })
}

/// Establish an anonymous identity
///
/// Returns the same `{ ok: true }` body either way; cookies are only set
/// when the request did not already carry a verified identity.
pub async fn identify(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    if state.identity.resolve(cookie_header(&headers)).is_some() {
        return Ok(Json(IdentifyResponse { ok: true }).into_response());
    }

    let (identity, [uid_cookie, sig_cookie]) = state.identity.issue().map_err(|e| {
        tracing::error!("Identity issue error: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: e.user_message().into(),
                code: "IDENTITY_ERROR".into(),
            }),
        )
    })?;

    tracing::info!(identity = %identity, "Issued new identity");

    Ok((
        AppendHeaders([(SET_COOKIE, uid_cookie), (SET_COOKIE, sig_cookie)]),
        Json(IdentifyResponse { ok: true }),
    )
        .into_response())
}

/// Create a Stripe checkout session for the caller's identity
pub async fn create_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CheckoutResponse>, (StatusCode, Json<ErrorResponse>)> {
    let checkout = state.checkout.as_ref().ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "Payments not configured".into(),
                code: "PAYMENTS_DISABLED".into(),
            }),
        )
    })?;

    let identity = state
        .identity
        .resolve(cookie_header(&headers))
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "No identity cookie; call /identify first".into(),
                    code: "NO_IDENTITY".into(),
                }),
            )
        })?;

    let session = checkout.create_for(&identity).await.map_err(|e| {
        tracing::error!("Checkout error: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: e.user_message().into(),
                code: "CHECKOUT_ERROR".into(),
            }),
        )
    })?;

    Ok(Json(CheckoutResponse {
        ok: true,
        url: session.url,
    }))
}

/// Report the caller's entitlement
///
/// Identity comes from the verified cookie pair, or from a `uid` query
/// parameter for clients that lost their cookies. No identity is not an
/// error: it reads as free tier.
pub async fn me(
    State(state): State<AppState>,
    Query(query): Query<MeQuery>,
    headers: HeaderMap,
) -> Result<Json<MeResponse>, (StatusCode, Json<ErrorResponse>)> {
    let identity = state.identity.resolve(cookie_header(&headers)).or_else(|| {
        query
            .uid
            .as_deref()
            .filter(|uid| !uid.is_empty())
            .map(Identity::from_string)
    });

    let Some(identity) = identity else {
        return Ok(Json(MeResponse {
            ok: true,
            pro: false,
        }));
    };

    let pro = state.store.is_pro(&identity).await.map_err(|e| {
        tracing::error!("Entitlement lookup error: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: e.user_message().into(),
                code: "STORAGE_ERROR".into(),
            }),
        )
    })?;

    Ok(Json(MeResponse { ok: true, pro }))
}

/// Stripe webhook handler
///
/// The body must stay raw bytes: the signature covers the exact payload
/// Stripe sent.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, (StatusCode, Json<ErrorResponse>)> {
    let processor = state.webhook.as_ref().ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "Webhook not configured".into(),
                code: "PAYMENTS_DISABLED".into(),
            }),
        )
    })?;

    let signature = headers.get("stripe-signature").and_then(|v| v.to_str().ok());

    let outcome = processor.process(&body, signature).await.map_err(|e| match e {
        PaywallError::SignatureInvalid(_) => {
            tracing::warn!("Webhook signature failed: {}", e);
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "Invalid signature".into(),
                    code: "INVALID_SIGNATURE".into(),
                }),
            )
        }
        PaywallError::PayloadParse(_) => {
            tracing::warn!("Webhook payload invalid: {}", e);
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "Invalid payload".into(),
                    code: "INVALID_PAYLOAD".into(),
                }),
            )
        }
        PaywallError::Storage(_) => {
            tracing::error!("Webhook storage error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Storage unavailable".into(),
                    code: "STORAGE_ERROR".into(),
                }),
            )
        }
        _ => {
            tracing::error!("Webhook processing error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Webhook processing failed".into(),
                    code: "WEBHOOK_ERROR".into(),
                }),
            )
        }
    })?;

    let ack = match outcome {
        WebhookOutcome::Activated { .. } => WebhookAck::received(),
        WebhookOutcome::Duplicate { .. } => WebhookAck::deduped(),
        WebhookOutcome::Ignored { event_type } => WebhookAck::ignored(event_type),
        WebhookOutcome::NoIdentity { .. } => WebhookAck::no_uid(),
    };

    Ok(Json(ack))
}
