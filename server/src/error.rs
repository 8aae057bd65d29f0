//! HTTP error mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use plant_doctor::PlantDoctorError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing multipart field '{0}'")]
    MissingField(&'static str),

    #[error("invalid multipart body: {0}")]
    Multipart(String),

    #[error("{0}")]
    BadImage(String),

    #[error("inference failed: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingField(_) | ApiError::Multipart(_) | ApiError::BadImage(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PlantDoctorError> for ApiError {
    fn from(err: PlantDoctorError) -> Self {
        match err {
            PlantDoctorError::ImageDecode(_) => ApiError::BadImage(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::warn!("Rejected request: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::MissingField("image").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(PlantDoctorError::ImageDecode("bad".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(PlantDoctorError::Inference("lock".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
