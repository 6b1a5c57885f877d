use axum::{
    async_trait,
    extract::{ConnectInfo, FromRef, FromRequestParts, Query, Request},
    http::{request::Parts, HeaderMap},
};
use serde::Deserialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Config;
use crate::models::CurrentUser;
use crate::services::AccessContext;

pub const FOLDER_TOKEN_HEADER: &str = "x-folder-token";
pub const SHARE_TOKEN_HEADER: &str = "x-share-token";

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    share_token: Option<String>,
    folder_token: Option<String>,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Client address, proxy headers are only read when `trust_proxy` is set
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> Option<String> {
    let forwarded = trust_proxy
        .then(|| {
            header_str(headers, "x-forwarded-for")
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .or_else(|| header_str(headers, "x-real-ip"))
        })
        .flatten();
    forwarded
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

pub fn request_ip(request: &Request, trust_proxy: bool) -> Option<String> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|c| c.0);
    client_ip(request.headers(), peer, trust_proxy)
}

fn split_tokens(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl<S> FromRequestParts<S> for AccessContext
where
    Arc<Config>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = Arc::<Config>::from_ref(state);
        let query = Query::<TokenQuery>::try_from_uri(&parts.uri)
            .map(|q| q.0)
            .unwrap_or_default();

        let share_token = query
            .share_token
            .filter(|t| !t.is_empty())
            .or_else(|| header_str(&parts.headers, SHARE_TOKEN_HEADER).map(str::to_string));

        let mut folder_tokens: Vec<String> = header_str(&parts.headers, FOLDER_TOKEN_HEADER)
            .map(|raw| split_tokens(raw).collect())
            .unwrap_or_default();
        if let Some(raw) = query.folder_token.as_deref() {
            folder_tokens.extend(split_tokens(raw));
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|c| c.0);

        Ok(AccessContext {
            user: parts.extensions.get::<CurrentUser>().cloned(),
            share_token,
            folder_tokens,
            client_ip: client_ip(&parts.headers, peer, config.server.trust_proxy_headers),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserRole;
    use crate::services::auth::tests::test_config;
    use axum::http::Request as HttpRequest;

    async fn extract(request: HttpRequest<()>) -> AccessContext {
        let (mut parts, _) = request.into_parts();
        AccessContext::from_request_parts(&mut parts, &Arc::new(test_config()))
            .await
            .unwrap()
    }

    #[test]
    fn test_client_ip_order_behind_proxy() {
        let peer: SocketAddr = "10.0.0.9:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(peer), true).as_deref(), Some("10.0.0.9"));

        headers.insert("x-real-ip", "192.168.1.2".parse().unwrap());
        assert_eq!(client_ip(&headers, Some(peer), true).as_deref(), Some("192.168.1.2"));

        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers, Some(peer), true).as_deref(), Some("203.0.113.7"));

        assert_eq!(client_ip(&HeaderMap::new(), None, true), None);
    }

    #[test]
    fn test_forwarded_headers_ignored_by_default() {
        let peer: SocketAddr = "10.0.0.9:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7".parse().unwrap());
        headers.insert("x-real-ip", "192.168.1.2".parse().unwrap());
        assert_eq!(client_ip(&headers, Some(peer), false).as_deref(), Some("10.0.0.9"));
        assert_eq!(client_ip(&headers, None, false), None);
    }

    #[tokio::test]
    async fn test_tokens_from_headers_and_query() {
        let request = HttpRequest::builder()
            .uri("/api/files?folderId=abc&share_token=s1&folder_token=q1")
            .header(FOLDER_TOKEN_HEADER, "h1, h2")
            .header(SHARE_TOKEN_HEADER, "ignored")
            .body(())
            .unwrap();
        let ctx = extract(request).await;
        assert_eq!(ctx.share_token.as_deref(), Some("s1"));
        assert_eq!(ctx.folder_tokens, vec!["h1", "h2", "q1"]);
        assert!(ctx.user.is_none());

        let mut request = HttpRequest::builder()
            .uri("/api/files")
            .header(SHARE_TOKEN_HEADER, "s2")
            .body(())
            .unwrap();
        request.extensions_mut().insert(CurrentUser {
            id: "u1".to_string(),
            email: "admin@example.com".to_string(),
            role: UserRole::Admin,
        });
        let ctx = extract(request).await;
        assert_eq!(ctx.share_token.as_deref(), Some("s2"));
        assert!(ctx.folder_tokens.is_empty());
        assert!(ctx.is_admin());
    }
}
