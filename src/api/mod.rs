//! API layer
//!
//! HTTP handlers for:
//! - Entitlement RPCs (access checks, playback authorization, device sessions)
//! - Wallet RPCs and read endpoints
//! - Metrics (Prometheus)

mod access;
mod dto;
pub mod metrics;
mod wallet;

pub use dto::*;
pub use metrics::metrics_router;

use axum::{
    Router,
    routing::{get, post},
};

use crate::AppState;

/// Create the `/api` router
///
/// Access checks accept anonymous callers; every other route resolves
/// the caller through the `CurrentUser` extractor.
pub fn api_router() -> Router<AppState> {
    let rpc_routes = Router::new()
        .route("/check_content_access", post(access::check_content_access))
        .route("/check_episode_access", post(access::check_episode_access))
        .route(
            "/register_device_session",
            post(access::register_device_session),
        )
        .route("/authorize_playback", post(access::authorize_playback))
        .route(
            "/deactivate_device_session",
            post(access::deactivate_device_session),
        )
        .route("/add_wallet_funds", post(wallet::add_wallet_funds))
        .route(
            "/purchase_content_with_wallet",
            post(wallet::purchase_content_with_wallet),
        )
        .route(
            "/purchase_membership_with_wallet",
            post(wallet::purchase_membership_with_wallet),
        )
        .route(
            "/support_content_with_wallet",
            post(wallet::support_content_with_wallet),
        );

    let v1_routes = Router::new()
        .route("/contents/:id/devices", get(access::list_device_sessions))
        .route("/wallet", get(wallet::wallet_summary))
        .route("/wallet/transactions", get(wallet::wallet_transactions))
        .route("/wallet/supports", get(wallet::wallet_supports))
        .route("/wallet/reconcile", get(wallet::reconcile_wallet));

    Router::new()
        .nest("/rpc", rpc_routes)
        .nest("/v1", v1_routes)
}
