//! HTTP error responses of the facilitator service.
//!
//! Verification and settlement outcomes, failed ones included, are answered
//! with `200 OK` and a structured body. Only malformed requests and unknown
//! lookups use error statuses.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sx402::networks::UnknownNetwork;

/// Errors answered with a non-2xx status.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorError {
    /// The request body is not valid JSON for the endpoint.
    #[error("invalid request body: {0}")]
    InvalidBody(#[from] JsonRejection),

    /// The requested network key is not in the registry.
    #[error(transparent)]
    UnknownNetwork(#[from] UnknownNetwork),
}

impl FacilitatorError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::UnknownNetwork(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for FacilitatorError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
