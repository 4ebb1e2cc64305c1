use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{RunQueryDsl, insert_into, prelude::*, result::Error as DieselError, update};
use std::sync::Arc;
use tokio::task;
use uuid::Uuid;

use crate::{
    domain::{
        entities::{
            booking_requests::{BookingRequestEntity, InsertBookingRequestEntity},
            bookings::{BookingEntity, InsertBookingEntity},
        },
        repositories::booking_requests::BookingRequestRepository,
        value_objects::{
            enums::{booking_request_statuses::BookingRequestStatus, booking_statuses::BookingStatus},
            transitions::{AcceptRequestOutcome, TransitionOutcome},
        },
    },
    infra::db::{
        postgres::{
            postgres_connection::PgPoolSquad,
            schema::{booking_requests, bookings},
        },
        repositories::bookings::{find_overlapping, is_overlap_violation},
    },
};

pub struct BookingRequestPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl BookingRequestPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl BookingRequestRepository for BookingRequestPostgres {
    async fn insert(&self, request: InsertBookingRequestEntity) -> Result<BookingRequestEntity> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<BookingRequestEntity> {
            let mut conn = db_pool.get()?;

            let inserted = insert_into(booking_requests::table)
                .values(&request)
                .returning(BookingRequestEntity::as_select())
                .get_result::<BookingRequestEntity>(&mut conn)?;

            Ok(inserted)
        })
        .await?
    }

    async fn find_by_id(&self, request_id: Uuid) -> Result<Option<BookingRequestEntity>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<Option<BookingRequestEntity>> {
            let mut conn = db_pool.get()?;

            let result = booking_requests::table
                .find(request_id)
                .select(BookingRequestEntity::as_select())
                .first::<BookingRequestEntity>(&mut conn)
                .optional()?;

            Ok(result)
        })
        .await?
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<BookingRequestEntity>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<Vec<BookingRequestEntity>> {
            let mut conn = db_pool.get()?;

            let results = booking_requests::table
                .filter(
                    booking_requests::client_id
                        .eq(user_id)
                        .or(booking_requests::companion_id.eq(user_id)),
                )
                .order(booking_requests::created_at.desc())
                .limit(limit)
                .select(BookingRequestEntity::as_select())
                .load::<BookingRequestEntity>(&mut conn)?;

            Ok(results)
        })
        .await?
    }

    async fn transition(
        &self,
        request_id: Uuid,
        expected: BookingRequestStatus,
        next: BookingRequestStatus,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome<BookingRequestEntity>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<TransitionOutcome<BookingRequestEntity>> {
            let mut conn = db_pool.get()?;
            let target = booking_requests::table
                .filter(booking_requests::id.eq(request_id))
                .filter(booking_requests::status.eq(expected.to_string()));

            // Only a companion answer counts as a response.
            let updated = if next.is_companion_response() {
                update(target)
                    .set((
                        booking_requests::status.eq(next.to_string()),
                        booking_requests::responded_at.eq(Some(now)),
                        booking_requests::updated_at.eq(now),
                    ))
                    .returning(BookingRequestEntity::as_select())
                    .get_result::<BookingRequestEntity>(&mut conn)
                    .optional()?
            } else {
                update(target)
                    .set((
                        booking_requests::status.eq(next.to_string()),
                        booking_requests::updated_at.eq(now),
                    ))
                    .returning(BookingRequestEntity::as_select())
                    .get_result::<BookingRequestEntity>(&mut conn)
                    .optional()?
            };

            Ok(updated.into())
        })
        .await?
    }

    async fn accept(
        &self,
        request_id: Uuid,
        booking: InsertBookingEntity,
        now: DateTime<Utc>,
    ) -> Result<AcceptRequestOutcome> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<AcceptRequestOutcome> {
            let mut conn = db_pool.get()?;

            let result = conn.transaction::<AcceptRequestOutcome, DieselError, _>(|conn| {
                let holding: Vec<String> = BookingStatus::holding()
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                if find_overlapping(
                    conn,
                    booking.companion_id,
                    booking.starts_at,
                    booking.ends_at,
                    holding,
                    None,
                )?
                .is_some()
                {
                    return Ok(AcceptRequestOutcome::Overlap);
                }

                let accepted = update(
                    booking_requests::table
                        .filter(booking_requests::id.eq(request_id))
                        .filter(
                            booking_requests::status
                                .eq(BookingRequestStatus::Pending.to_string()),
                        )
                        .filter(booking_requests::expires_at.gt(now)),
                )
                .set((
                    booking_requests::status.eq(BookingRequestStatus::Accepted.to_string()),
                    booking_requests::responded_at.eq(Some(now)),
                    booking_requests::updated_at.eq(now),
                ))
                .returning(booking_requests::id)
                .get_result::<Uuid>(conn)
                .optional()?;

                if accepted.is_none() {
                    return Ok(AcceptRequestOutcome::Stale);
                }

                let created = insert_into(bookings::table)
                    .values(&booking)
                    .returning(BookingEntity::as_select())
                    .get_result::<BookingEntity>(conn)?;

                let request = update(booking_requests::table.find(request_id))
                    .set(booking_requests::booking_id.eq(Some(created.id)))
                    .returning(BookingRequestEntity::as_select())
                    .get_result::<BookingRequestEntity>(conn)?;

                Ok(AcceptRequestOutcome::Accepted {
                    request,
                    booking: created,
                })
            });

            match result {
                Ok(outcome) => Ok(outcome),
                // The insert lost a race with another booking for the same
                // slot; the whole transaction rolled back.
                Err(err) if is_overlap_violation(&err) => Ok(AcceptRequestOutcome::Overlap),
                Err(err) => Err(err.into()),
            }
        })
        .await?
    }

    async fn find_expired_pending(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BookingRequestEntity>> {
        let db_pool = Arc::clone(&self.db_pool);

        task::spawn_blocking(move || -> Result<Vec<BookingRequestEntity>> {
            let mut conn = db_pool.get()?;

            let results = booking_requests::table
                .filter(booking_requests::status.eq(BookingRequestStatus::Pending.to_string()))
                .filter(booking_requests::expires_at.le(now))
                .order(booking_requests::expires_at.asc())
                .limit(limit)
                .select(BookingRequestEntity::as_select())
                .load::<BookingRequestEntity>(&mut conn)?;

            Ok(results)
        })
        .await?
    }
}
