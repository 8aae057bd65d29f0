//! POST /predict - classify an uploaded leaf image

use axum::extract::{Multipart, State};
use axum::Json;
use plant_doctor::Prediction;
use tracing::info;

use crate::error::ApiError;
use crate::state::SharedState;

/// Multipart field carrying the image
pub const IMAGE_FIELD: &str = "image";

/// POST /predict - multipart upload with an `image` field.
///
/// Returns `{"prediction", "confidence", "advice"}`.
pub async fn predict(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<Prediction>, ApiError> {
    let mut image = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Multipart(e.to_string()))?
    {
        if field.name() == Some(IMAGE_FIELD) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::Multipart(e.to_string()))?;
            image = Some(bytes);
            break;
        }
    }

    let bytes = image.ok_or(ApiError::MissingField(IMAGE_FIELD))?;
    let size = bytes.len();

    // Decoding and the forward pass are CPU-bound
    let prediction = tokio::task::spawn_blocking(move || state.predictor.predict_bytes(&bytes))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    info!(
        "Predicted '{}' ({:.3}) for a {} byte upload",
        prediction.prediction, prediction.confidence, size
    );
    Ok(Json(prediction))
}
