use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{
    PgConnection, RunQueryDsl,
    dsl::{exists, not},
    insert_into,
    prelude::*,
    result::Error as DieselError,
    update,
};
use std::sync::Arc;
use tokio::task;
use uuid::Uuid;

use crate::{
    domain::{
        entities::bookings::{BookingChangeset, BookingEntity, InsertBookingEntity},
        repositories::bookings::BookingRepository,
        value_objects::{
            enums::{booking_statuses::BookingStatus, payment_statuses::PaymentStatus},
            transitions::{BookingGuard, ConfirmOutcome, InsertBookingOutcome, TransitionOutcome},
        },
    },
    infra::db::postgres::{
        postgres_connection::PgPoolSquad,
        schema::{booking_verifications, bookings, companion_payout_accounts},
    },
};

pub const OVERLAP_CONSTRAINT: &str = "bookings_companion_no_overlap";

pub(crate) fn is_overlap_violation(err: &DieselError) -> bool {
    matches!(
        err,
        DieselError::DatabaseError(_, info) if info.constraint_name() == Some(OVERLAP_CONSTRAINT)
    )
}

fn holding_statuses() -> Vec<String> {
    BookingStatus::holding()
        .iter()
        .map(ToString::to_string)
        .collect()
}

/// The conditional update every booking transition goes through. Returns the
/// updated row, or `None` when the row no longer matches `guard`.
pub(crate) fn apply_transition(
    conn: &mut PgConnection,
    booking_id: Uuid,
    guard: &BookingGuard,
    changes: &BookingChangeset,
) -> QueryResult<Option<BookingEntity>> {
    let statuses: Vec<String> = guard.statuses.iter().map(ToString::to_string).collect();
    let payment_statuses: Vec<String> = guard
        .payment_statuses
        .iter()
        .map(ToString::to_string)
        .collect();

    let target = bookings::table
        .filter(bookings::id.eq(booking_id))
        .filter(bookings::status.eq_any(statuses))
        .filter(bookings::payment_status.eq_any(payment_statuses));

    if guard.unreleased {
        update(target.filter(bookings::payment_released_at.is_null()))
            .set(changes)
            .returning(BookingEntity::as_select())
            .get_result::<BookingEntity>(conn)
            .optional()
    } else {
        update(target)
            .set(changes)
            .returning(BookingEntity::as_select())
            .get_result::<BookingEntity>(conn)
            .optional()
    }
}

pub(crate) fn find_overlapping(
    conn: &mut PgConnection,
    companion_id: Uuid,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    statuses: Vec<String>,
    excluding: Option<Uuid>,
) -> QueryResult<Option<Uuid>> {
    let mut query = bookings::table
        .select(bookings::id)
        .filter(bookings::companion_id.eq(companion_id))
        .filter(bookings::status.eq_any(statuses))
        .filter(bookings::starts_at.lt(ends_at))
        .filter(bookings::ends_at.gt(starts_at))
        .into_boxed();

    if let Some(excluded_id) = excluding {
        query = query.filter(bookings::id.ne(excluded_id));
    }

    query.first::<Uuid>(conn).optional()
}

pub struct BookingPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl BookingPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl BookingRepository for BookingPostgres {
    async fn insert(&self, booking: InsertBookingEntity) -> Result<InsertBookingOutcome> {
        // Diesel is synchronous; run DB work on the blocking threadpool.
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<InsertBookingOutcome> {
            let mut conn = db_pool.get()?;

            let overlapping = find_overlapping(
                &mut conn,
                booking.companion_id,
                booking.starts_at,
                booking.ends_at,
                holding_statuses(),
                None,
            )?;
            if overlapping.is_some() {
                return Ok(InsertBookingOutcome::Overlap);
            }

            // The exclusion constraint catches the insert that races past the
            // check above.
            match insert_into(bookings::table)
                .values(&booking)
                .returning(BookingEntity::as_select())
                .get_result::<BookingEntity>(&mut conn)
            {
                Ok(inserted) => Ok(InsertBookingOutcome::Inserted(inserted)),
                Err(err) if is_overlap_violation(&err) => Ok(InsertBookingOutcome::Overlap),
                Err(err) => Err(err.into()),
            }
        })
        .await?
    }

    async fn find_by_id(&self, booking_id: Uuid) -> Result<Option<BookingEntity>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<Option<BookingEntity>> {
            let mut conn = db_pool.get()?;

            let result = bookings::table
                .find(booking_id)
                .select(BookingEntity::as_select())
                .first::<BookingEntity>(&mut conn)
                .optional()?;

            Ok(result)
        })
        .await?
    }

    async fn find_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<BookingEntity>> {
        let db_pool = Arc::clone(&self.db_pool);
        let payment_intent_id = payment_intent_id.to_string();

        task::spawn_blocking(move || -> Result<Option<BookingEntity>> {
            let mut conn = db_pool.get()?;

            let result = bookings::table
                .filter(bookings::payment_intent_id.eq(payment_intent_id))
                .select(BookingEntity::as_select())
                .first::<BookingEntity>(&mut conn)
                .optional()?;

            Ok(result)
        })
        .await?
    }

    async fn find_by_transfer(&self, transfer_id: &str) -> Result<Option<BookingEntity>> {
        let db_pool = Arc::clone(&self.db_pool);
        let transfer_id = transfer_id.to_string();

        task::spawn_blocking(move || -> Result<Option<BookingEntity>> {
            let mut conn = db_pool.get()?;

            let result = bookings::table
                .filter(bookings::transfer_id.eq(transfer_id))
                .select(BookingEntity::as_select())
                .first::<BookingEntity>(&mut conn)
                .optional()?;

            Ok(result)
        })
        .await?
    }

    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<BookingEntity>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<Vec<BookingEntity>> {
            let mut conn = db_pool.get()?;

            let results = bookings::table
                .filter(
                    bookings::client_id
                        .eq(user_id)
                        .or(bookings::companion_id.eq(user_id)),
                )
                .order(bookings::starts_at.desc())
                .limit(limit)
                .select(BookingEntity::as_select())
                .load::<BookingEntity>(&mut conn)?;

            Ok(results)
        })
        .await?
    }

    async fn transition(
        &self,
        booking_id: Uuid,
        guard: BookingGuard,
        changes: BookingChangeset,
    ) -> Result<TransitionOutcome<BookingEntity>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<TransitionOutcome<BookingEntity>> {
            let mut conn = db_pool.get()?;
            let updated = apply_transition(&mut conn, booking_id, &guard, &changes)?;
            Ok(updated.into())
        })
        .await?
    }

    async fn confirm(
        &self,
        booking_id: Uuid,
        guard: BookingGuard,
        changes: BookingChangeset,
    ) -> Result<ConfirmOutcome> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<ConfirmOutcome> {
            let mut conn = db_pool.get()?;

            let outcome = conn.transaction::<ConfirmOutcome, anyhow::Error, _>(|conn| {
                let current = bookings::table
                    .find(booking_id)
                    .select(BookingEntity::as_select())
                    .for_update()
                    .first::<BookingEntity>(conn)
                    .optional()?;

                let Some(current) = current else {
                    return Ok(ConfirmOutcome::Stale);
                };
                if !guard.matches(&current) {
                    return Ok(ConfirmOutcome::Stale);
                }

                let conflict = find_overlapping(
                    conn,
                    current.companion_id,
                    current.starts_at,
                    current.ends_at,
                    vec![BookingStatus::Confirmed.to_string()],
                    Some(current.id),
                )?;
                if conflict.is_some() {
                    return Ok(ConfirmOutcome::Overlap);
                }

                Ok(match apply_transition(conn, booking_id, &guard, &changes)? {
                    Some(confirmed) => ConfirmOutcome::Confirmed(confirmed),
                    None => ConfirmOutcome::Stale,
                })
            })?;

            Ok(outcome)
        })
        .await?
    }

    async fn find_pending_started_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BookingEntity>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<Vec<BookingEntity>> {
            let mut conn = db_pool.get()?;

            let results = bookings::table
                .filter(bookings::blocked_at.is_null())
                .filter(bookings::status.eq(BookingStatus::Pending.to_string()))
                .filter(bookings::starts_at.le(cutoff))
                .order(bookings::starts_at.asc())
                .limit(limit)
                .select(BookingEntity::as_select())
                .load::<BookingEntity>(&mut conn)?;

            Ok(results)
        })
        .await?
    }

    async fn find_confirmed_entering_window(
        &self,
        opens_before: DateTime<Utc>,
        closes_after: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BookingEntity>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<Vec<BookingEntity>> {
            let mut conn = db_pool.get()?;

            let results = bookings::table
                .filter(bookings::blocked_at.is_null())
                .filter(bookings::status.eq(BookingStatus::Confirmed.to_string()))
                .filter(bookings::starts_at.le(opens_before))
                .filter(bookings::starts_at.gt(closes_after))
                .filter(not(exists(
                    booking_verifications::table
                        .filter(booking_verifications::booking_id.eq(bookings::id)),
                )))
                .order(bookings::starts_at.asc())
                .limit(limit)
                .select(BookingEntity::as_select())
                .load::<BookingEntity>(&mut conn)?;

            Ok(results)
        })
        .await?
    }

    async fn find_confirmed_unverified_started_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BookingEntity>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<Vec<BookingEntity>> {
            let mut conn = db_pool.get()?;

            let results = bookings::table
                .filter(bookings::blocked_at.is_null())
                .filter(bookings::status.eq(BookingStatus::Confirmed.to_string()))
                .filter(bookings::starts_at.le(cutoff))
                .filter(not(exists(
                    booking_verifications::table
                        .filter(booking_verifications::booking_id.eq(bookings::id)),
                )))
                .order(bookings::starts_at.asc())
                .limit(limit)
                .select(BookingEntity::as_select())
                .load::<BookingEntity>(&mut conn)?;

            Ok(results)
        })
        .await?
    }

    async fn find_verified_awaiting_capture(&self, limit: i64) -> Result<Vec<BookingEntity>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<Vec<BookingEntity>> {
            let mut conn = db_pool.get()?;

            let results = bookings::table
                .filter(bookings::blocked_at.is_null())
                .filter(bookings::status.eq(BookingStatus::Confirmed.to_string()))
                .filter(bookings::payment_status.eq(PaymentStatus::Authorized.to_string()))
                .filter(exists(
                    booking_verifications::table
                        .filter(booking_verifications::booking_id.eq(bookings::id))
                        .filter(booking_verifications::both_verified_at.is_not_null()),
                ))
                .order(bookings::starts_at.asc())
                .limit(limit)
                .select(BookingEntity::as_select())
                .load::<BookingEntity>(&mut conn)?;

            Ok(results)
        })
        .await?
    }

    async fn find_completable(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BookingEntity>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<Vec<BookingEntity>> {
            let mut conn = db_pool.get()?;

            let results = bookings::table
                .filter(bookings::blocked_at.is_null())
                .filter(bookings::status.eq(BookingStatus::Confirmed.to_string()))
                .filter(bookings::payment_status.eq(PaymentStatus::Paid.to_string()))
                .filter(bookings::ends_at.le(now))
                .filter(exists(
                    booking_verifications::table
                        .filter(booking_verifications::booking_id.eq(bookings::id))
                        .filter(booking_verifications::both_verified_at.is_not_null()),
                ))
                .order(bookings::ends_at.asc())
                .limit(limit)
                .select(BookingEntity::as_select())
                .load::<BookingEntity>(&mut conn)?;

            Ok(results)
        })
        .await?
    }

    async fn find_releasable(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BookingEntity>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<Vec<BookingEntity>> {
            let mut conn = db_pool.get()?;

            let results = bookings::table
                .filter(bookings::blocked_at.is_null())
                .filter(bookings::status.eq(BookingStatus::Completed.to_string()))
                .filter(bookings::payment_status.eq(PaymentStatus::Paid.to_string()))
                .filter(bookings::payment_released_at.is_null())
                .filter(bookings::completed_at.le(cutoff))
                .order(bookings::completed_at.asc())
                .limit(limit)
                .select(BookingEntity::as_select())
                .load::<BookingEntity>(&mut conn)?;

            Ok(results)
        })
        .await?
    }

    async fn find_payout_account(&self, companion_id: Uuid) -> Result<Option<String>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<Option<String>> {
            let mut conn = db_pool.get()?;

            let result = companion_payout_accounts::table
                .find(companion_id)
                .select(companion_payout_accounts::provider_account_ref)
                .first::<String>(&mut conn)
                .optional()?;

            Ok(result)
        })
        .await?
    }

    async fn block(&self, booking_id: Uuid, reason: String, now: DateTime<Utc>) -> Result<bool> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<bool> {
            let mut conn = db_pool.get()?;

            let changes = BookingChangeset {
                blocked_at: Some(now),
                blocked_reason: Some(reason),
                ..BookingChangeset::at(now)
            };
            let affected = update(
                bookings::table
                    .filter(bookings::id.eq(booking_id))
                    .filter(bookings::blocked_at.is_null()),
            )
            .set(&changes)
            .execute(&mut conn)?;

            Ok(affected > 0)
        })
        .await?
    }
}
