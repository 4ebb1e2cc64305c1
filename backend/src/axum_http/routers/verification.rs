use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use booking_core::domain::value_objects::verification::SubmitVerificationModel;
use chrono::Utc;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    axum_http::{app_state::AppState, error_responses::AppError},
};

/// Nested under `/api/v1/bookings`.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/:booking_id/verification",
            get(verification_status).post(submit_verification),
        )
        .route("/:booking_id/verification/resend", post(resend_code))
        .route("/:booking_id/verification/extend", post(extend_window))
        .with_state(state)
}

pub async fn verification_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(booking_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let status = state
        .verification
        .status(booking_id, auth.user_id, Utc::now())
        .await?;
    Ok(Json(status))
}

pub async fn submit_verification(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(booking_id): Path<Uuid>,
    Json(submission): Json<SubmitVerificationModel>,
) -> Result<impl IntoResponse, AppError> {
    let status = state
        .verification
        .submit(booking_id, auth.user_id, submission, Utc::now())
        .await?;
    Ok(Json(status))
}

pub async fn resend_code(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(booking_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state
        .verification
        .resend_code(booking_id, auth.user_id, Utc::now())
        .await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn extend_window(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(booking_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let status = state
        .verification
        .extend_window(booking_id, auth.user_id, Utc::now())
        .await?;
    Ok(Json(status))
}
