//! Pomodoro Pro HTTP Server
//!
//! Axum-based server for the freemium paywall: anonymous identity,
//! Stripe checkout, the webhook receiver, and entitlement reads. Also
//! serves the static timer app.

mod handlers;
mod state;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pomo_entitlements::{
    CheckoutSessionCreator, EntitlementStore, IdentityIssuer, MemoryEntitlementStore,
    RestKvStore, WebhookProcessor,
};

use crate::handlers::{create_checkout, health_check, identify, me, stripe_webhook};
use crate::state::AppState;

fn app(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health & info
        .route("/health", get(health_check))

        // Paywall API
        .route("/identify", post(identify))
        .route("/checkout", post(create_checkout))
        .route("/me", get(me))

        // Stripe delivery endpoint
        .route("/webhook", post(stripe_webhook))

        // Static files (the timer app itself) on every unclaimed path
        .fallback_service(tower_http::services::ServeDir::new("static"))

        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    // Identity issuing needs its cookie secret; refuse to start without it
    let identity = Arc::new(IdentityIssuer::from_env()?);

    // Entitlement storage
    let store: Arc<dyn EntitlementStore> = match RestKvStore::from_env() {
        Ok(kv) => {
            tracing::info!("✓ KV store configured");
            Arc::new(kv)
        }
        Err(_) => {
            tracing::warn!("⚠ KV not configured - entitlements will not survive restarts");
            tracing::warn!("  Set KV_REST_API_URL and KV_REST_API_TOKEN in .env");
            Arc::new(MemoryEntitlementStore::new())
        }
    };

    // Checkout
    let checkout = CheckoutSessionCreator::from_env().ok();

    if checkout.is_some() {
        tracing::info!("✓ Stripe checkout configured");
    } else {
        tracing::warn!("⚠ Stripe not configured - checkout disabled");
        tracing::warn!("  Set STRIPE_SECRET_KEY and APP_URL in .env");
    }

    // Webhook processing
    let webhook = WebhookProcessor::from_env(store.clone()).ok();

    if webhook.is_some() {
        tracing::info!("✓ Webhook receiver configured");
    } else {
        tracing::warn!("⚠ Webhook secret not configured - purchases will not activate");
        tracing::warn!("  Set STRIPE_WEBHOOK_SECRET in .env");
    }

    // Build application state
    let state = AppState {
        identity,
        store,
        checkout: checkout.map(Arc::new),
        webhook: webhook.map(Arc::new),
    };

    let app = app(state);

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 pomo-server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health    - Health check");
    tracing::info!("  POST /identify  - Establish anonymous identity");
    tracing::info!("  POST /checkout  - Create Stripe checkout");
    tracing::info!("  GET  /me        - Read entitlement");
    tracing::info!("  POST /webhook   - Stripe webhook receiver");
    tracing::info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
