use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::infra::db::postgres::schema::webhook_failures;

#[derive(Debug, Clone, PartialEq, Serialize, Identifiable, Selectable, Queryable)]
#[diesel(table_name = webhook_failures)]
pub struct WebhookFailureEntity {
    pub id: Uuid,
    pub provider: String,
    pub provider_event_id: Option<String>,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub error_message: String,
    pub retry_count: i32,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = webhook_failures)]
pub struct InsertWebhookFailureEntity {
    pub provider: String,
    pub provider_event_id: Option<String>,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub error_message: String,
}
