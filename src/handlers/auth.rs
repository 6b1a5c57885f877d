use axum::{
    extract::{Query, State},
    response::Redirect,
    Extension, Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use cookie::time::Duration as CookieDuration;

use crate::config::Config;
use crate::error::{AppError, MessageResponse, Result};
use crate::handlers::activity;
use crate::middleware::auth::SESSION_COOKIE;
use crate::models::{
    ActivityType, CurrentUser, Login2faRequest, LoginResponse, OAuthCallbackQuery, UserResponse,
};
use crate::services::{AccessContext, ActivityService, AuthService};
use crate::AppState;

const OAUTH_STATE_COOKIE: &str = "zee_oauth_state";
const OAUTH_STATE_TTL_MINUTES: i64 = 10;

fn session_cookie(config: &Config, token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.jwt.cookie_secure)
        .path("/")
        .max_age(CookieDuration::hours(config.jwt.session_expire_hours as i64))
        .build()
}

fn removal(name: &'static str, path: &'static str) -> Cookie<'static> {
    Cookie::build((name, "")).path(path).build()
}

/// Start Google sign-in
/// GET /api/auth/google
pub async fn google_login(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect)> {
    let oauth_state = AuthService::new_oauth_state();
    let url = AuthService::authorize_url(&state.config, &oauth_state)?;

    let cookie = Cookie::build((OAUTH_STATE_COOKIE, oauth_state))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.jwt.cookie_secure)
        .path("/api/auth")
        .max_age(CookieDuration::minutes(OAUTH_STATE_TTL_MINUTES))
        .build();

    Ok((jar.add(cookie), Redirect::to(&url)))
}

/// Google redirects back here with an authorization code
/// GET /api/auth/callback
pub async fn oauth_callback(
    State(state): State<AppState>,
    ctx: AccessContext,
    jar: CookieJar,
    Query(query): Query<OAuthCallbackQuery>,
) -> Result<(CookieJar, Redirect)> {
    if let Some(error) = query.error {
        tracing::warn!("Google sign-in was cancelled: {}", error);
        return Err(AppError::Unauthorized("Sign-in was cancelled".to_string()));
    }

    let expected = jar.get(OAUTH_STATE_COOKIE).map(|c| c.value().to_string());
    match (expected, query.state) {
        (Some(expected), Some(got)) if !expected.is_empty() && expected == got => {}
        _ => return Err(AppError::BadRequest("Invalid OAuth state".to_string())),
    }
    let jar = jar.remove(removal(OAUTH_STATE_COOKIE, "/api/auth"));

    let code = query
        .code
        .ok_or_else(|| AppError::BadRequest("Missing authorization code".to_string()))?;
    let profile = AuthService::exchange_code(&state.http, &state.config, &code).await?;
    let email = profile.email.clone();

    let user = match AuthService::sign_in(&state.db, &state.config, profile).await {
        Ok(user) => user,
        Err(e) => {
            ActivityService::record(
                &state.db,
                activity(&ctx, ActivityType::Login)
                    .actor(email)
                    .failed()
                    .details(serde_json::json!({ "reason": e.to_string() })),
            )
            .await;
            return Err(e);
        }
    };

    let email = user.email.clone();
    let login = AuthService::complete_login(&state.config, user)?;
    if let Some(mfa_token) = login.mfa_token {
        let target = format!("/login/2fa?token={}", urlencoding::encode(&mfa_token));
        return Ok((jar, Redirect::to(&target)));
    }

    let token = login
        .session_token
        .ok_or_else(|| AppError::Internal("Missing session token".to_string()))?;
    ActivityService::record(&state.db, activity(&ctx, ActivityType::Login).actor(email)).await;

    Ok((jar.add(session_cookie(&state.config, token)), Redirect::to("/")))
}

/// Second step of a TOTP protected sign-in
/// POST /api/auth/login/2fa
pub async fn login_2fa(
    State(state): State<AppState>,
    ctx: AccessContext,
    jar: CookieJar,
    Json(req): Json<Login2faRequest>,
) -> Result<(CookieJar, Json<LoginResponse>)> {
    let response = match AuthService::login_2fa(&state.db, &state.config, &req.mfa_token, &req.code).await {
        Ok(response) => response,
        Err(e) => {
            ActivityService::record(
                &state.db,
                activity(&ctx, ActivityType::Login)
                    .failed()
                    .details(serde_json::json!({ "reason": "two_factor" })),
            )
            .await;
            return Err(e);
        }
    };

    let mut jar = jar;
    if let Some(token) = response.session_token.clone() {
        jar = jar.add(session_cookie(&state.config, token));
    }
    if let Some(user) = response.user.as_ref() {
        ActivityService::record(
            &state.db,
            activity(&ctx, ActivityType::Login).actor(user.email.clone()),
        )
        .await;
    }

    Ok((jar, Json(response)))
}

/// Current signed-in user
/// GET /api/auth/session
pub async fn session(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<UserResponse>> {
    let user = AuthService::get_user(&state.db, &current_user.id).await?;
    Ok(Json(UserResponse::from(user)))
}

/// End every session of the user
/// POST /api/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    ctx: AccessContext,
    jar: CookieJar,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<(CookieJar, Json<MessageResponse>)> {
    AuthService::logout(&state.db, &current_user.id).await?;
    ActivityService::record(&state.db, activity(&ctx, ActivityType::Logout)).await;

    Ok((
        jar.remove(removal(SESSION_COOKIE, "/")),
        Json(MessageResponse::new("Logged out successfully")),
    ))
}
