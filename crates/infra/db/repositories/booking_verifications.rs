use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{RunQueryDsl, insert_into, prelude::*, update};
use std::sync::Arc;
use tokio::task;
use uuid::Uuid;

use crate::{
    domain::{
        entities::{
            booking_verifications::{BookingVerificationEntity, InsertBookingVerificationEntity},
            bookings::BookingEntity,
        },
        repositories::booking_verifications::BookingVerificationRepository,
        value_objects::{
            enums::{
                booking_statuses::BookingStatus, parties::Party,
                verification_statuses::VerificationStatus,
            },
            transitions::{PartyVerificationOutcome, TransitionOutcome},
        },
    },
    infra::db::postgres::{
        postgres_connection::PgPoolSquad,
        schema::{booking_verifications as bv, bookings},
    },
    utils::geo::Coordinates,
};

pub struct BookingVerificationPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl BookingVerificationPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

fn pending() -> String {
    VerificationStatus::Pending.to_string()
}

#[async_trait]
impl BookingVerificationRepository for BookingVerificationPostgres {
    async fn open_window(
        &self,
        verification: InsertBookingVerificationEntity,
    ) -> Result<Option<BookingVerificationEntity>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<Option<BookingVerificationEntity>> {
            let mut conn = db_pool.get()?;

            // One row per booking; a second opener gets nothing back.
            let inserted = insert_into(bv::table)
                .values(&verification)
                .on_conflict(bv::booking_id)
                .do_nothing()
                .returning(BookingVerificationEntity::as_select())
                .get_result::<BookingVerificationEntity>(&mut conn)
                .optional()?;

            Ok(inserted)
        })
        .await?
    }

    async fn find_by_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<BookingVerificationEntity>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<Option<BookingVerificationEntity>> {
            let mut conn = db_pool.get()?;

            let result = bv::table
                .filter(bv::booking_id.eq(booking_id))
                .select(BookingVerificationEntity::as_select())
                .first::<BookingVerificationEntity>(&mut conn)
                .optional()?;

            Ok(result)
        })
        .await?
    }

    async fn mark_code_sent(
        &self,
        booking_id: Uuid,
        party: Party,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<()> {
            let mut conn = db_pool.get()?;
            let target = bv::table.filter(bv::booking_id.eq(booking_id));

            match party {
                Party::Client => update(target)
                    .set((bv::client_otp_sent_at.eq(Some(now)), bv::updated_at.eq(now)))
                    .execute(&mut conn)?,
                Party::Companion => update(target)
                    .set((
                        bv::companion_otp_sent_at.eq(Some(now)),
                        bv::updated_at.eq(now),
                    ))
                    .execute(&mut conn)?,
            };

            Ok(())
        })
        .await?
    }

    async fn replace_code(
        &self,
        booking_id: Uuid,
        party: Party,
        otp_hash: String,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome<BookingVerificationEntity>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<TransitionOutcome<BookingVerificationEntity>> {
            let mut conn = db_pool.get()?;
            let open = bv::table
                .filter(bv::booking_id.eq(booking_id))
                .filter(bv::verification_status.eq(pending()))
                .filter(bv::both_verified_at.is_null())
                .filter(bv::expires_at.gt(now));

            let updated = match party {
                Party::Client => update(open.filter(bv::client_verified_at.is_null()))
                    .set((
                        bv::client_otp_hash.eq(Some(otp_hash)),
                        bv::client_otp_generated_at.eq(Some(now)),
                        bv::client_otp_sent_at.eq(None::<DateTime<Utc>>),
                        bv::client_failed_attempts.eq(0),
                        bv::updated_at.eq(now),
                    ))
                    .returning(BookingVerificationEntity::as_select())
                    .get_result::<BookingVerificationEntity>(&mut conn)
                    .optional()?,
                Party::Companion => update(open.filter(bv::companion_verified_at.is_null()))
                    .set((
                        bv::companion_otp_hash.eq(Some(otp_hash)),
                        bv::companion_otp_generated_at.eq(Some(now)),
                        bv::companion_otp_sent_at.eq(None::<DateTime<Utc>>),
                        bv::companion_failed_attempts.eq(0),
                        bv::updated_at.eq(now),
                    ))
                    .returning(BookingVerificationEntity::as_select())
                    .get_result::<BookingVerificationEntity>(&mut conn)
                    .optional()?,
            };

            Ok(updated.into())
        })
        .await?
    }

    async fn record_failed_attempt(
        &self,
        booking_id: Uuid,
        party: Party,
        now: DateTime<Utc>,
    ) -> Result<i32> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<i32> {
            let mut conn = db_pool.get()?;
            let target = bv::table
                .filter(bv::booking_id.eq(booking_id))
                .filter(bv::verification_status.eq(pending()));

            let attempts = match party {
                Party::Client => update(target)
                    .set((
                        bv::client_failed_attempts.eq(bv::client_failed_attempts + 1),
                        bv::updated_at.eq(now),
                    ))
                    .returning(bv::client_failed_attempts)
                    .get_result::<i32>(&mut conn)
                    .optional()?,
                Party::Companion => update(target)
                    .set((
                        bv::companion_failed_attempts.eq(bv::companion_failed_attempts + 1),
                        bv::updated_at.eq(now),
                    ))
                    .returning(bv::companion_failed_attempts)
                    .get_result::<i32>(&mut conn)
                    .optional()?,
            };

            Ok(attempts.unwrap_or_default())
        })
        .await?
    }

    async fn record_verification(
        &self,
        booking_id: Uuid,
        party: Party,
        location: Option<Coordinates>,
        now: DateTime<Utc>,
    ) -> Result<PartyVerificationOutcome> {
        let db_pool = Arc::clone(&self.db_pool);
        let lat = location.map(|point| point.lat);
        let lon = location.map(|point| point.lon);

        task::spawn_blocking(move || -> Result<PartyVerificationOutcome> {
            let mut conn = db_pool.get()?;

            let outcome = conn.transaction::<PartyVerificationOutcome, anyhow::Error, _>(|conn| {
                let open = bv::table
                    .filter(bv::booking_id.eq(booking_id))
                    .filter(bv::verification_status.eq(pending()))
                    .filter(bv::both_verified_at.is_null())
                    .filter(bv::expires_at.gt(now));

                let recorded = match party {
                    Party::Client => update(open.filter(bv::client_verified_at.is_null()))
                        .set((
                            bv::client_verified_at.eq(Some(now)),
                            bv::client_verification_lat.eq(lat),
                            bv::client_verification_lon.eq(lon),
                            bv::updated_at.eq(now),
                        ))
                        .returning(BookingVerificationEntity::as_select())
                        .get_result::<BookingVerificationEntity>(conn)
                        .optional()?,
                    Party::Companion => update(open.filter(bv::companion_verified_at.is_null()))
                        .set((
                            bv::companion_verified_at.eq(Some(now)),
                            bv::companion_verification_lat.eq(lat),
                            bv::companion_verification_lon.eq(lon),
                            bv::updated_at.eq(now),
                        ))
                        .returning(BookingVerificationEntity::as_select())
                        .get_result::<BookingVerificationEntity>(conn)
                        .optional()?,
                };

                let Some(recorded) = recorded else {
                    return Ok(PartyVerificationOutcome::Stale);
                };

                if recorded.verified_at(party.other()).is_none() {
                    return Ok(PartyVerificationOutcome::Recorded(recorded));
                }

                let finalized = update(
                    bv::table
                        .filter(bv::booking_id.eq(booking_id))
                        .filter(bv::both_verified_at.is_null())
                        .filter(bv::client_verified_at.is_not_null())
                        .filter(bv::companion_verified_at.is_not_null()),
                )
                .set((
                    bv::both_verified_at.eq(Some(now)),
                    bv::verification_status.eq(VerificationStatus::Verified.to_string()),
                    bv::updated_at.eq(now),
                ))
                .returning(BookingVerificationEntity::as_select())
                .get_result::<BookingVerificationEntity>(conn)
                .optional()?;

                Ok(match finalized {
                    Some(finalized) => PartyVerificationOutcome::BothVerified(finalized),
                    None => PartyVerificationOutcome::Recorded(recorded),
                })
            })?;

            Ok(outcome)
        })
        .await?
    }

    async fn extend_window(
        &self,
        booking_id: Uuid,
        requested_by: Party,
        new_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome<BookingVerificationEntity>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<TransitionOutcome<BookingVerificationEntity>> {
            let mut conn = db_pool.get()?;

            let updated = update(
                bv::table
                    .filter(bv::booking_id.eq(booking_id))
                    .filter(bv::verification_status.eq(pending()))
                    .filter(bv::both_verified_at.is_null())
                    .filter(bv::extension_requested_by.is_null())
                    .filter(bv::expires_at.gt(now)),
            )
            .set((
                bv::expires_at.eq(new_expires_at),
                bv::extension_requested_by.eq(Some(requested_by.to_string())),
                bv::extended_at.eq(Some(now)),
                bv::updated_at.eq(now),
            ))
            .returning(BookingVerificationEntity::as_select())
            .get_result::<BookingVerificationEntity>(&mut conn)
            .optional()?;

            Ok(updated.into())
        })
        .await?
    }

    async fn expire_window(
        &self,
        booking_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome<BookingVerificationEntity>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<TransitionOutcome<BookingVerificationEntity>> {
            let mut conn = db_pool.get()?;

            let updated = update(
                bv::table
                    .filter(bv::booking_id.eq(booking_id))
                    .filter(bv::verification_status.eq(pending()))
                    .filter(bv::both_verified_at.is_null())
                    .filter(bv::expires_at.le(now)),
            )
            .set((
                bv::verification_status.eq(VerificationStatus::Expired.to_string()),
                bv::updated_at.eq(now),
            ))
            .returning(BookingVerificationEntity::as_select())
            .get_result::<BookingVerificationEntity>(&mut conn)
            .optional()?;

            Ok(updated.into())
        })
        .await?
    }

    async fn find_pending_past_expiry(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BookingVerificationEntity>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<Vec<BookingVerificationEntity>> {
            let mut conn = db_pool.get()?;

            let results = bv::table
                .filter(bv::verification_status.eq(pending()))
                .filter(bv::both_verified_at.is_null())
                .filter(bv::expires_at.le(now))
                .order(bv::expires_at.asc())
                .limit(limit)
                .select(BookingVerificationEntity::as_select())
                .load::<BookingVerificationEntity>(&mut conn)?;

            Ok(results)
        })
        .await?
    }

    async fn find_expired_with_confirmed_booking(
        &self,
        limit: i64,
    ) -> Result<Vec<(BookingVerificationEntity, BookingEntity)>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<Vec<(BookingVerificationEntity, BookingEntity)>> {
            let mut conn = db_pool.get()?;

            let results = bv::table
                .inner_join(bookings::table)
                .filter(bv::verification_status.eq(VerificationStatus::Expired.to_string()))
                .filter(bookings::status.eq(BookingStatus::Confirmed.to_string()))
                .filter(bookings::blocked_at.is_null())
                .order(bv::expires_at.asc())
                .limit(limit)
                .select((
                    BookingVerificationEntity::as_select(),
                    BookingEntity::as_select(),
                ))
                .load::<(BookingVerificationEntity, BookingEntity)>(&mut conn)?;

            Ok(results)
        })
        .await?
    }

    async fn find_undelivered_codes(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<(BookingVerificationEntity, BookingEntity)>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<Vec<(BookingVerificationEntity, BookingEntity)>> {
            let mut conn = db_pool.get()?;

            let results = bv::table
                .inner_join(bookings::table)
                .filter(bv::verification_status.eq(pending()))
                .filter(bv::expires_at.gt(now))
                .filter(
                    bv::client_otp_sent_at
                        .is_null()
                        .and(bv::client_verified_at.is_null())
                        .or(bv::companion_otp_sent_at
                            .is_null()
                            .and(bv::companion_verified_at.is_null())),
                )
                .filter(bookings::status.eq(BookingStatus::Confirmed.to_string()))
                .order(bv::expires_at.asc())
                .limit(limit)
                .select((
                    BookingVerificationEntity::as_select(),
                    BookingEntity::as_select(),
                ))
                .load::<(BookingVerificationEntity, BookingEntity)>(&mut conn)?;

            Ok(results)
        })
        .await?
    }
}
