use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use booking_core::domain::value_objects::bookings::CreateBookingRequestModel;
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
        .route("/", post(create_request).get(list_requests))
        .route("/:request_id", get(get_request))
        .route("/:request_id/accept", post(accept_request))
        .route("/:request_id/reject", post(reject_request))
        .route("/:request_id/cancel", post(cancel_request))
        .with_state(state)
}

pub async fn create_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(model): Json<CreateBookingRequestModel>,
) -> Result<impl IntoResponse, AppError> {
    let request = state
        .requests
        .create_request(auth.user_id, model, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn list_requests(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let requests = state
        .requests
        .list_requests(auth.user_id, query.limit())
        .await?;
    Ok(Json(requests))
}

pub async fn get_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let request = state.requests.get_request(request_id, auth.user_id).await?;
    Ok(Json(request))
}

pub async fn accept_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .requests
        .accept_request(request_id, auth.user_id, Utc::now())
        .await?;
    Ok(transition_json(outcome))
}

pub async fn reject_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .requests
        .reject_request(request_id, auth.user_id, Utc::now())
        .await?;
    Ok(transition_json(outcome))
}

pub async fn cancel_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .requests
        .cancel_request(request_id, auth.user_id, Utc::now())
        .await?;
    Ok(transition_json(outcome))
}
