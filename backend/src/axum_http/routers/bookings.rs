use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use booking_core::domain::value_objects::bookings::{CancelBookingModel, CreateBookingModel};
use chrono::Utc;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    axum_http::{
        app_state::AppState,
        error_responses::AppError,
        routers::{ListQuery, transition_json},
    },
};

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/", post(create_booking).get(list_bookings))
        .route("/:booking_id", get(get_booking))
        .route("/:booking_id/authorize", post(authorize_payment))
        .route("/:booking_id/approve", post(approve_booking))
        .route("/:booking_id/cancel", post(cancel_booking))
        .route("/:booking_id/complete", post(complete_booking))
        .with_state(state)
}

pub async fn create_booking(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(model): Json<CreateBookingModel>,
) -> Result<impl IntoResponse, AppError> {
    let booking = state
        .lifecycle
        .create_booking(auth.user_id, model, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

pub async fn list_bookings(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let bookings = state
        .lifecycle
        .list_bookings(auth.user_id, query.limit(), Utc::now())
        .await?;
    Ok(Json(bookings))
}

pub async fn get_booking(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(booking_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let booking = state
        .lifecycle
        .get_booking(booking_id, auth.user_id, Utc::now())
        .await?;
    Ok(Json(booking))
}

pub async fn authorize_payment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(booking_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .lifecycle
        .authorize_payment(booking_id, auth.user_id, Utc::now())
        .await?;
    Ok(transition_json(outcome))
}

pub async fn approve_booking(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(booking_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .lifecycle
        .approve_booking(booking_id, auth.user_id, Utc::now())
        .await?;
    Ok(transition_json(outcome))
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(booking_id): Path<Uuid>,
    body: Option<Json<CancelBookingModel>>,
) -> Result<impl IntoResponse, AppError> {
    let reason = body.and_then(|Json(model)| model.reason);
    let outcome = state
        .lifecycle
        .cancel_booking(booking_id, auth.user_id, reason, Utc::now())
        .await?;
    Ok(transition_json(outcome))
}

pub async fn complete_booking(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(booking_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .lifecycle
        .complete_booking(booking_id, auth.user_id, Utc::now())
        .await?;
    Ok(transition_json(outcome))
}
