use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::middleware::access::request_ip;
use crate::services::RateLimitService;
use crate::AppState;

async fn limit(
    state: &AppState,
    bucket: &str,
    max_hits: u32,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ip = request_ip(&request, state.config.server.trust_proxy_headers)
        .unwrap_or_else(|| "unknown".to_string());
    RateLimitService::hit(
        &state.db,
        &format!("{}:{}", bucket, ip),
        max_hits,
        state.config.rate_limit.window_seconds,
    )
    .await?;
    Ok(next.run(request).await)
}

/// General budget shared by every API route
pub async fn api_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let max_hits = state.config.rate_limit.api_limit;
    limit(&state, "api", max_hits, request, next).await
}

/// Stricter budget for credential checks
pub async fn auth_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let max_hits = state.config.rate_limit.auth_limit;
    limit(&state, "auth", max_hits, request, next).await
}
