use std::sync::Arc;

use anyhow::{Result, anyhow};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use tokio::task;
use tracing::info;

use crate::infra::db::postgres::postgres_connection::PgPoolSquad;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Applies every pending migration in order. Already applied versions are
/// skipped, so this is safe to call on every startup.
pub async fn run_pending_migrations(db_pool: Arc<PgPoolSquad>) -> Result<usize> {
    let applied = task::spawn_blocking(move || -> Result<Vec<String>> {
        let mut conn = db_pool.get()?;
        let versions = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        Ok(versions.iter().map(ToString::to_string).collect())
    })
    .await??;

    for version in &applied {
        info!(%version, "migrations: applied");
    }

    Ok(applied.len())
}
