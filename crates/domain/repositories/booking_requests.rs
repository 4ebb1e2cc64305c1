use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::{
    entities::{
        booking_requests::{BookingRequestEntity, InsertBookingRequestEntity},
        bookings::InsertBookingEntity,
    },
    value_objects::{
        enums::booking_request_statuses::BookingRequestStatus,
        transitions::{AcceptRequestOutcome, TransitionOutcome},
    },
};

#[automock]
#[async_trait]
pub trait BookingRequestRepository {
    async fn insert(&self, request: InsertBookingRequestEntity) -> Result<BookingRequestEntity>;

    async fn find_by_id(&self, request_id: Uuid) -> Result<Option<BookingRequestEntity>>;

    async fn list_for_user(&self, user_id: Uuid, limit: i64)
    -> Result<Vec<BookingRequestEntity>>;

    async fn transition(
        &self,
        request_id: Uuid,
        expected: BookingRequestStatus,
        next: BookingRequestStatus,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome<BookingRequestEntity>>;

    /// `pending -> accepted`, insert the booking and link it back, all in
    /// one transaction.
    async fn accept(
        &self,
        request_id: Uuid,
        booking: InsertBookingEntity,
        now: DateTime<Utc>,
    ) -> Result<AcceptRequestOutcome>;

    async fn find_expired_pending(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BookingRequestEntity>>;
}
