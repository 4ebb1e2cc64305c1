use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::webhook_failures::{
    InsertWebhookFailureEntity, WebhookFailureEntity,
};

#[automock]
#[async_trait]
pub trait WebhookFailureRepository {
    /// Inserts the failure, or bumps `retry_count` on the existing row for the
    /// same provider event id.
    async fn record(
        &self,
        failure: InsertWebhookFailureEntity,
        now: DateTime<Utc>,
    ) -> Result<WebhookFailureEntity>;

    async fn list_unresolved(&self, limit: i64) -> Result<Vec<WebhookFailureEntity>>;

    async fn resolve(
        &self,
        failure_id: Uuid,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookFailureEntity>>;
}
