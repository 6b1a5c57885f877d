use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Folder {0} is password protected")]
    PasswordRequired(String),

    #[error("Too many requests, retry in {0}s")]
    TooManyRequests(u64),

    #[error("Drive API error ({status}): {message}")]
    Drive { status: u16, message: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
}

/// Error body returned by every failing route
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            folder_id: None,
        }
    }
}

/// Body for endpoints that only acknowledge an action
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorBody::new("Database error"))
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorBody::new(msg.clone())),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, ErrorBody::new(msg.clone())),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, ErrorBody::new(msg.clone())),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorBody::new(msg.clone())),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, ErrorBody::new(msg.clone())),
            AppError::PasswordRequired(folder_id) => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    error: "Password required".to_string(),
                    folder_id: Some(folder_id.clone()),
                },
            ),
            AppError::TooManyRequests(_) => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorBody::new("Too many requests"),
            ),
            AppError::Drive { status, message } => {
                tracing::error!("Drive API error ({}): {}", status, message);
                (StatusCode::BAD_GATEWAY, ErrorBody::new("Google Drive request failed"))
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorBody::new(msg.clone()))
            }
            AppError::Jwt(e) => {
                tracing::warn!("JWT error: {:?}", e);
                (StatusCode::UNAUTHORIZED, ErrorBody::new("Invalid token"))
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorBody::new("IO error"))
            }
            AppError::Request(e) => {
                tracing::error!("Request error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorBody::new("External request error"))
            }
        };

        let mut response = (status, Json(body)).into_response();
        if let AppError::TooManyRequests(retry_after) = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_password_required_carries_folder_id() {
        let response = AppError::PasswordRequired("folder-1".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Password required");
        assert_eq!(body["folderId"], "folder-1");
    }

    #[tokio::test]
    async fn test_rate_limit_sets_retry_after() {
        let response = AppError::TooManyRequests(42).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }

    #[tokio::test]
    async fn test_drive_errors_hide_upstream_message() {
        let response = AppError::Drive {
            status: 500,
            message: "backend exploded".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Google Drive request failed");
        assert!(body.get("folderId").is_none());
    }
}
