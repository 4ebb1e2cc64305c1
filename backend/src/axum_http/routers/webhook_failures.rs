use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::axum_http::{app_state::AppState, error_responses::AppError, routers::ListQuery};

#[derive(Debug, Default, Deserialize)]
pub struct ResolveFailureModel {
    pub note: Option<String>,
}

/// Operator routes. Closed unless `INTERNAL_API_TOKEN` is configured.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_unresolved))
        .route("/:failure_id/resolve", post(resolve_failure))
        .with_state(state)
}

fn authorize_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), StatusCode> {
    let Some(expected) = expected else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    match provided {
        Some(token) if token == expected => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

pub async fn list_unresolved(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    if let Err(status) = authorize_bearer(&headers, state.internal_token.as_deref()) {
        return status.into_response();
    }
    match state.webhooks.list_unresolved_failures(query.limit()).await {
        Ok(failures) => Json(failures).into_response(),
        Err(err) => AppError::from(err).into_response(),
    }
}

pub async fn resolve_failure(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(failure_id): Path<Uuid>,
    body: Option<Json<ResolveFailureModel>>,
) -> Response {
    if let Err(status) = authorize_bearer(&headers, state.internal_token.as_deref()) {
        return status.into_response();
    }
    let note = body.and_then(|Json(model)| model.note);
    match state
        .webhooks
        .resolve_failure(failure_id, note, Utc::now())
        .await
    {
        Ok(failure) => Json(failure).into_response(),
        Err(err) => AppError::from(err).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn internal_routes_need_the_configured_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            authorize_bearer(&headers, None),
            Err(StatusCode::SERVICE_UNAVAILABLE)
        );
        assert_eq!(
            authorize_bearer(&headers, Some("ops")),
            Err(StatusCode::UNAUTHORIZED)
        );

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer wrong"));
        assert_eq!(
            authorize_bearer(&headers, Some("ops")),
            Err(StatusCode::UNAUTHORIZED)
        );

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer ops"));
        assert_eq!(authorize_bearer(&headers, Some("ops")), Ok(()));
    }
}
