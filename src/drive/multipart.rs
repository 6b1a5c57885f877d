use uuid::Uuid;

/// `multipart/related` body for Drive's single request upload
pub struct MultipartBody {
    pub boundary: String,
    pub body: Vec<u8>,
}

impl MultipartBody {
    /// Metadata part followed by the media part
    pub fn related(metadata: &serde_json::Value, mime_type: &str, data: &[u8]) -> Self {
        let boundary = format!("zee-index-{}", Uuid::new_v4().simple());
        let metadata = metadata.to_string();

        let mut body = Vec::with_capacity(data.len() + metadata.len() + 256);
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n",
                boundary
            )
            .as_bytes(),
        );
        body.extend_from_slice(metadata.as_bytes());
        body.extend_from_slice(
            format!("\r\n--{}\r\nContent-Type: {}\r\n\r\n", boundary, mime_type).as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

        Self { boundary, body }
    }

    pub fn content_type(&self) -> String {
        format!("multipart/related; boundary={}", self.boundary)
    }
}
