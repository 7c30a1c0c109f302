//! Pomodoro Pro Gate
//!
//! Client-side companion to the paywall server: establishes the
//! anonymous identity on startup, caches the entitlement, and decides
//! whether a pro feature runs or shows the upgrade prompt. This is the
//! same sequence the web timer performs; any native shell or CLI front
//! end can reuse it.
//!
//! The gate is advisory; the server's entitlement check stays
//! authoritative for anything that matters.

mod api;
mod gate;

pub use api::{ApiClient, GateError};
pub use gate::{EntitlementGate, GateDecision, ProQuery};
