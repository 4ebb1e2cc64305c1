use std::time::Duration;

use anyhow::Result;
use diesel::{
    Connection, PgConnection,
    connection::{CacheSize, SimpleConnection},
    r2d2::{ConnectionManager, CustomizeConnection, Error as R2d2Error, Pool},
};

const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-connection session settings. Sessions run in UTC so `now()` and
/// timestamp literals agree with the instants the application writes, and
/// the statement cache is off because transaction-mode poolers (pgbouncer,
/// Supabase) reject named prepared statements.
#[derive(Debug, Default)]
struct SessionSetup;

impl CustomizeConnection<PgConnection, R2d2Error> for SessionSetup {
    fn on_acquire(&self, conn: &mut PgConnection) -> std::result::Result<(), R2d2Error> {
        conn.set_prepared_statement_cache_size(CacheSize::Disabled);
        conn.batch_execute("SET TIME ZONE 'UTC'")
            .map_err(R2d2Error::QueryError)
    }
}

pub type PgPoolSquad = Pool<ConnectionManager<PgConnection>>;

pub fn establish_connection(database_url: &str, max_size: u32) -> Result<PgPoolSquad> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(max_size)
        .connection_timeout(CHECKOUT_TIMEOUT)
        .connection_customizer(Box::new(SessionSetup))
        .build(manager)?;
    Ok(pool)
}
