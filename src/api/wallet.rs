//! Wallet endpoints
//!
//! Ledger mutations are RPC-style POSTs; the session decides whose wallet
//! is touched, and a `user_id` in the body must agree with it.

use axum::{
    extract::{Query, State},
    response::Json,
};

use super::dto::{
    AddWalletFundsRequest, PurchaseContentRequest, PurchaseMembershipRequest,
    SupportContentRequest, SupportResponse, TransactionsQuery, WalletTransactionResponse,
};
use crate::AppState;
use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::service::{LedgerOutcome, Reconciliation, WalletSummary};

/// POST /api/rpc/add_wallet_funds
pub async fn add_wallet_funds(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<AddWalletFundsRequest>,
) -> Result<Json<LedgerOutcome>, AppError> {
    let user_id = user.ensure_same_user(req.user_id.as_deref())?;
    let outcome = state
        .wallet
        .add_wallet_funds(user_id, req.amount, &req.transaction_id)
        .await?;

    Ok(Json(outcome))
}

/// POST /api/rpc/purchase_content_with_wallet
pub async fn purchase_content_with_wallet(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<PurchaseContentRequest>,
) -> Result<Json<LedgerOutcome>, AppError> {
    let user_id = user.ensure_same_user(req.user_id.as_deref())?;
    let outcome = state
        .wallet
        .purchase_content_with_wallet(
            user_id,
            &req.content_id,
            req.episode_id.as_deref(),
            req.amount,
            req.currency.as_deref(),
        )
        .await?;

    Ok(Json(outcome))
}

/// POST /api/rpc/purchase_membership_with_wallet
pub async fn purchase_membership_with_wallet(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<PurchaseMembershipRequest>,
) -> Result<Json<LedgerOutcome>, AppError> {
    let user_id = user.ensure_same_user(req.user_id.as_deref())?;
    let outcome = state
        .wallet
        .purchase_membership_with_wallet(user_id, &req.plan_id, req.amount)
        .await?;

    Ok(Json(outcome))
}

/// POST /api/rpc/support_content_with_wallet
pub async fn support_content_with_wallet(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<SupportContentRequest>,
) -> Result<Json<LedgerOutcome>, AppError> {
    let user_id = user.ensure_same_user(req.user_id.as_deref())?;
    let outcome = state
        .wallet
        .support_content_with_wallet(
            user_id,
            &req.content_id,
            req.amount,
            req.episode_id.as_deref(),
        )
        .await?;

    Ok(Json(outcome))
}

/// GET /api/v1/wallet
pub async fn wallet_summary(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
) -> Result<Json<WalletSummary>, AppError> {
    Ok(Json(state.wallet.wallet_summary(&session.user_id).await?))
}

/// GET /api/v1/wallet/transactions
pub async fn wallet_transactions(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Query(params): Query<TransactionsQuery>,
) -> Result<Json<Vec<WalletTransactionResponse>>, AppError> {
    let entries = state
        .wallet
        .list_transactions(&session.user_id, params.limit, params.max_id.as_deref())
        .await?;

    Ok(Json(entries.into_iter().map(Into::into).collect()))
}

/// GET /api/v1/wallet/supports
pub async fn wallet_supports(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
) -> Result<Json<Vec<SupportResponse>>, AppError> {
    let supports = state.wallet.list_supports(&session.user_id).await?;

    Ok(Json(supports.into_iter().map(Into::into).collect()))
}

/// GET /api/v1/wallet/reconcile
pub async fn reconcile_wallet(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
) -> Result<Json<Reconciliation>, AppError> {
    Ok(Json(state.wallet.reconcile_wallet(&session.user_id).await?))
}
