use crate::error::LocatorError;
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header;

/// Multipart field holding the image
const FILE_FIELD: &str = "file";

/// Image bytes from either a multipart form (`file` field) or a raw body
pub struct ImageUpload(pub Vec<u8>);

fn is_multipart(req: &Request) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("multipart/form-data"))
        .unwrap_or(false)
}

#[async_trait]
impl<S> FromRequest<S> for ImageUpload
where
    S: Send + Sync,
{
    type Rejection = LocatorError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = if is_multipart(&req) {
            let mut multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| LocatorError::InvalidRequest(e.body_text()))?;

            let mut file = None;
            while let Some(field) = multipart
                .next_field()
                .await
                .map_err(|e| LocatorError::InvalidRequest(e.to_string()))?
            {
                if field.name() == Some(FILE_FIELD) {
                    let data = field
                        .bytes()
                        .await
                        .map_err(|e| LocatorError::InvalidRequest(e.to_string()))?;
                    file = Some(data.to_vec());
                    break;
                }
            }
            file.ok_or_else(|| LocatorError::InvalidRequest(format!("missing multipart field {FILE_FIELD:?}")))?
        } else {
            Bytes::from_request(req, state)
                .await
                .map_err(|e| LocatorError::InvalidRequest(e.body_text()))?
                .to_vec()
        };

        if bytes.is_empty() {
            return Err(LocatorError::InvalidRequest("empty upload".to_string()));
        }
        Ok(ImageUpload(bytes))
    }
}
