use axum::{extract::State, Extension, Json};

use crate::error::{MessageResponse, Result};
use crate::handlers::activity;
use crate::models::{
    ActivityType, CurrentUser, TotpBeginResponse, TotpDisableRequest, TotpEnableRequest,
};
use crate::services::{AccessContext, ActivityService, TwoFactorService};
use crate::AppState;

/// POST /api/auth/2fa/setup
pub async fn begin_totp(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<TotpBeginResponse>> {
    let (challenge_id, otpauth_url) =
        TwoFactorService::begin_totp_enroll(&state.db, &state.config, &current_user.id).await?;
    Ok(Json(TotpBeginResponse {
        challenge_id,
        otpauth_url,
    }))
}

/// POST /api/auth/2fa/enable
pub async fn enable_totp(
    State(state): State<AppState>,
    ctx: AccessContext,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<TotpEnableRequest>,
) -> Result<Json<MessageResponse>> {
    TwoFactorService::enable_totp(
        &state.db,
        &state.config,
        &current_user.id,
        &req.challenge_id,
        &req.code,
    )
    .await?;
    ActivityService::record(&state.db, activity(&ctx, ActivityType::TwoFactorEnabled)).await;
    Ok(Json(MessageResponse::new("Two-factor authentication enabled")))
}

/// POST /api/auth/2fa/disable
pub async fn disable_totp(
    State(state): State<AppState>,
    ctx: AccessContext,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<TotpDisableRequest>,
) -> Result<Json<MessageResponse>> {
    TwoFactorService::disable_totp(&state.db, &state.config, &current_user.id, &req.code).await?;
    ActivityService::record(&state.db, activity(&ctx, ActivityType::TwoFactorDisabled)).await;
    Ok(Json(MessageResponse::new("Two-factor authentication disabled")))
}
