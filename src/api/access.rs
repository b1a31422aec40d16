//! Entitlement endpoints

use axum::{
    extract::{Path, State},
    response::Json,
};

use super::dto::{
    AuthorizePlaybackRequest, CheckContentAccessRequest, CheckEpisodeAccessRequest, DeactivateDeviceRequest,
    DeviceSessionResponse, RegisterDeviceRequest,
};
use crate::AppState;
use crate::auth::{CurrentUser, MaybeUser};
use crate::error::AppError;
use crate::service::AccessDecision;

/// POST /api/rpc/check_content_access
pub async fn check_content_access(
    State(state): State<AppState>,
    user: MaybeUser,
    Json(req): Json<CheckContentAccessRequest>,
) -> Result<Json<AccessDecision>, AppError> {
    let decision = state
        .access
        .check_content_access(user.user_id(), &req.content_id, req.device_id.as_deref())
        .await?;

    Ok(Json(decision))
}

/// POST /api/rpc/check_episode_access
pub async fn check_episode_access(
    State(state): State<AppState>,
    user: MaybeUser,
    Json(req): Json<CheckEpisodeAccessRequest>,
) -> Result<Json<AccessDecision>, AppError> {
    let decision = state
        .access
        .check_episode_access(user.user_id(), &req.episode_id, req.device_id.as_deref())
        .await?;

    Ok(Json(decision))
}

/// POST /api/rpc/register_device_session
pub async fn register_device_session(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Json(req): Json<RegisterDeviceRequest>,
) -> Result<Json<bool>, AppError> {
    let registered = state
        .access
        .register_device_session(
            &session.user_id,
            &req.content_id,
            req.episode_id.as_deref(),
            &req.device_id,
            req.device_info.as_ref(),
        )
        .await?;

    Ok(Json(registered))
}

/// POST /api/rpc/authorize_playback
pub async fn authorize_playback(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Json(req): Json<AuthorizePlaybackRequest>,
) -> Result<Json<AccessDecision>, AppError> {
    let decision = state
        .access
        .authorize_playback(
            &session.user_id,
            &req.content_id,
            req.episode_id.as_deref(),
            &req.device_id,
            req.device_info.as_ref(),
        )
        .await?;

    Ok(Json(decision))
}

/// POST /api/rpc/deactivate_device_session
pub async fn deactivate_device_session(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Json(req): Json<DeactivateDeviceRequest>,
) -> Result<Json<bool>, AppError> {
    let removed = state
        .access
        .deactivate_device_session(&session.user_id, &req.content_id, &req.device_id)
        .await?;

    Ok(Json(removed))
}

/// GET /api/v1/contents/:id/devices
pub async fn list_device_sessions(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(content_id): Path<String>,
) -> Result<Json<Vec<DeviceSessionResponse>>, AppError> {
    let sessions = state
        .access
        .list_device_sessions(&session.user_id, &content_id)
        .await?;

    Ok(Json(sessions.into_iter().map(Into::into).collect()))
}
