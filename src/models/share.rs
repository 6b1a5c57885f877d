use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Share link record
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareLink {
    pub id: String,
    pub jti: String,
    pub path: String,
    pub target_id: String,
    pub item_name: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub created_by: String,
    pub login_required: bool,
    pub expires_at: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShareKind {
    #[default]
    Timed,
    Session,
}

/// Request to create a share
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShareRequest {
    pub path: String,
    pub item_name: String,
    #[serde(default, rename = "type")]
    pub kind: ShareKind,
    pub expires_in: Option<String>,
    #[serde(default)]
    pub login_required: bool,
}

/// Share token claims
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShareClaims {
    pub jti: String,
    pub path: String,
    pub target: String,
    pub login_required: bool,
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
}

/// Created link, the token is only ever returned here
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareLinkResponse {
    pub id: String,
    pub url: String,
    pub token: String,
    pub path: String,
    pub item_name: String,
    pub login_required: bool,
    pub expires_at: i64,
    pub expires_in: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyShareQuery {
    pub token: String,
}

/// Public view of a share token
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareInfo {
    pub path: String,
    pub target_id: String,
    pub login_required: bool,
    pub expires_at: i64,
}

/// Parsed `/folder/<id>` or `/file/<id>` share path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareTarget {
    Folder(String),
    File(String),
}

impl ShareTarget {
    pub fn parse(path: &str) -> Option<Self> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        // Locale prefixes such as `/en/folder/<id>` are allowed
        let kind_pos = segments
            .iter()
            .rposition(|s| *s == "folder" || *s == "file")?;
        let id = segments.last()?;
        if kind_pos + 2 != segments.len() || !Self::valid_id(id) {
            return None;
        }

        match segments[kind_pos] {
            "folder" => Some(ShareTarget::Folder(id.to_string())),
            _ => Some(ShareTarget::File(id.to_string())),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ShareTarget::Folder(id) | ShareTarget::File(id) => id,
        }
    }

    fn valid_id(id: &str) -> bool {
        !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_share_paths() {
        assert_eq!(
            ShareTarget::parse("/folder/abc123"),
            Some(ShareTarget::Folder("abc123".to_string()))
        );
        assert_eq!(
            ShareTarget::parse("/en/folder/root/file/x-Y_9?view=1"),
            Some(ShareTarget::File("x-Y_9".to_string()))
        );
        assert_eq!(ShareTarget::parse("/folder/"), None);
        assert_eq!(ShareTarget::parse("/files/abc"), None);
        assert_eq!(ShareTarget::parse("/folder/a.b"), None);
        assert_eq!(ShareTarget::parse("/folder/abc/extra"), None);
    }

    #[test]
    fn test_create_request_defaults_to_timed() {
        let req: CreateShareRequest =
            serde_json::from_str(r#"{"path":"/folder/a","itemName":"A"}"#).unwrap();
        assert_eq!(req.kind, ShareKind::Timed);
        assert!(!req.login_required);

        let req: CreateShareRequest = serde_json::from_str(
            r#"{"path":"/folder/a","itemName":"A","type":"session","loginRequired":true}"#,
        )
        .unwrap();
        assert_eq!(req.kind, ShareKind::Session);
        assert!(req.login_required);
    }
}
