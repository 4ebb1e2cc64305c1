use axum::Json;
use booking_core::domain::value_objects::transitions::TransitionOutcome;
use serde::{Deserialize, Serialize};

pub mod booking_requests;
pub mod bookings;
pub mod live_events;
pub mod payment_webhook;
pub mod verification;
pub mod webhook_failures;

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 200;

/// Body for state-changing calls. `applied: false` means someone else moved
/// the record first and the request had no effect.
#[derive(Debug, Serialize)]
pub struct TransitionResponse<T> {
    pub applied: bool,
    pub result: Option<T>,
}

pub fn transition_json<T: Serialize>(outcome: TransitionOutcome<T>) -> Json<TransitionResponse<T>> {
    let applied = outcome.is_applied();
    Json(TransitionResponse {
        applied,
        result: outcome.applied(),
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

impl ListQuery {
    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT)
    }
}
