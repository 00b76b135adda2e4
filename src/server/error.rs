//! HTTP mapping of `LocatorError`.

use crate::error::LocatorError;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Debug, Serialize)]
struct ErrorDetail<'a> {
    kind: &'a str,
    message: String,
}

impl LocatorError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Decode(_)
            | Self::InvalidPrompt(_)
            | Self::MissingMetadata(_)
            | Self::UnknownCamera(_)
            | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnknownSession(_) => StatusCode::NOT_FOUND,
            Self::InvalidState(_) | Self::EmptyHistory | Self::Superseded => StatusCode::CONFLICT,
            Self::DegenerateGeometry(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::MissingElevation { .. } | Self::Collaborator { .. } => StatusCode::BAD_GATEWAY,
            Self::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for LocatorError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!("{} {}: {}", status.as_u16(), self.kind(), self);

        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.kind(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for LocatorError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for LocatorError {
    fn from(rejection: QueryRejection) -> Self {
        Self::InvalidRequest(rejection.body_text())
    }
}

impl From<PathRejection> for LocatorError {
    fn from(rejection: PathRejection) -> Self {
        Self::InvalidRequest(rejection.body_text())
    }
}
