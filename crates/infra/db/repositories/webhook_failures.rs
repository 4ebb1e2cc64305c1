use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{RunQueryDsl, insert_into, prelude::*, update, upsert::excluded};
use std::sync::Arc;
use tokio::task;
use uuid::Uuid;

use crate::{
    domain::{
        entities::webhook_failures::{InsertWebhookFailureEntity, WebhookFailureEntity},
        repositories::webhook_failures::WebhookFailureRepository,
    },
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::webhook_failures},
};

pub struct WebhookFailurePostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl WebhookFailurePostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl WebhookFailureRepository for WebhookFailurePostgres {
    async fn record(
        &self,
        failure: InsertWebhookFailureEntity,
        now: DateTime<Utc>,
    ) -> Result<WebhookFailureEntity> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<WebhookFailureEntity> {
            let mut conn = db_pool.get()?;

            let recorded = if failure.provider_event_id.is_some() {
                // Redelivery of an event that already failed: keep one row.
                insert_into(webhook_failures::table)
                    .values(&failure)
                    .on_conflict(webhook_failures::provider_event_id)
                    .do_update()
                    .set((
                        webhook_failures::retry_count.eq(webhook_failures::retry_count + 1),
                        webhook_failures::error_message.eq(excluded(webhook_failures::error_message)),
                        webhook_failures::last_seen_at.eq(now),
                    ))
                    .returning(WebhookFailureEntity::as_select())
                    .get_result::<WebhookFailureEntity>(&mut conn)?
            } else {
                insert_into(webhook_failures::table)
                    .values(&failure)
                    .returning(WebhookFailureEntity::as_select())
                    .get_result::<WebhookFailureEntity>(&mut conn)?
            };

            Ok(recorded)
        })
        .await?
    }

    async fn list_unresolved(&self, limit: i64) -> Result<Vec<WebhookFailureEntity>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<Vec<WebhookFailureEntity>> {
            let mut conn = db_pool.get()?;

            let results = webhook_failures::table
                .filter(webhook_failures::resolved.eq(false))
                .order(webhook_failures::created_at.asc())
                .limit(limit)
                .select(WebhookFailureEntity::as_select())
                .load::<WebhookFailureEntity>(&mut conn)?;

            Ok(results)
        })
        .await?
    }

    async fn resolve(
        &self,
        failure_id: Uuid,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookFailureEntity>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<Option<WebhookFailureEntity>> {
            let mut conn = db_pool.get()?;

            let updated = update(webhook_failures::table.find(failure_id))
                .set((
                    webhook_failures::resolved.eq(true),
                    webhook_failures::resolved_at.eq(Some(now)),
                    webhook_failures::resolution_note.eq(note),
                ))
                .returning(WebhookFailureEntity::as_select())
                .get_result::<WebhookFailureEntity>(&mut conn)
                .optional()?;

            Ok(updated)
        })
        .await?
    }
}
