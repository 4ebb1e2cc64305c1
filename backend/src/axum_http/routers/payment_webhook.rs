use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
};
use booking_core::domain::value_objects::payment_webhook::WebhookOutcome;
use chrono::Utc;
use serde_json::json;
use tracing::warn;

use crate::axum_http::{app_state::AppState, error_responses::AppError};

const SIGNATURE_HEADER: &str = "stripe-signature";

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(payment_webhook))
        .with_state(state)
}

/// Anything past the signature check is acknowledged so the provider stops
/// redelivering; failures are kept as webhook failure records instead.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("missing signature header".to_string()))?;

    match state.webhooks.handle(&body, signature, Utc::now()).await? {
        WebhookOutcome::Processed => Ok(Json(json!({ "received": true }))),
        WebhookOutcome::Failed(reason) => {
            warn!(%reason, "payment_webhook: event recorded as failure");
            Ok(Json(json!({ "received": true })))
        }
    }
}
