use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::{
    entities::bookings::{BookingChangeset, BookingEntity, InsertBookingEntity},
    value_objects::transitions::{
        BookingGuard, ConfirmOutcome, InsertBookingOutcome, TransitionOutcome,
    },
};

#[automock]
#[async_trait]
pub trait BookingRepository {
    /// Inserts unless the companion already holds an overlapping pending or
    /// confirmed booking.
    async fn insert(&self, booking: InsertBookingEntity) -> Result<InsertBookingOutcome>;

    async fn find_by_id(&self, booking_id: Uuid) -> Result<Option<BookingEntity>>;

    async fn find_by_payment_intent(&self, payment_intent_id: &str)
    -> Result<Option<BookingEntity>>;

    async fn find_by_transfer(&self, transfer_id: &str) -> Result<Option<BookingEntity>>;

    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<BookingEntity>>;

    /// Applies `changes` only while the row still matches `guard`.
    async fn transition(
        &self,
        booking_id: Uuid,
        guard: BookingGuard,
        changes: BookingChangeset,
    ) -> Result<TransitionOutcome<BookingEntity>>;

    /// Conditional transition plus an overlap check against the companion's
    /// other confirmed bookings, in one transaction.
    async fn confirm(
        &self,
        booking_id: Uuid,
        guard: BookingGuard,
        changes: BookingChangeset,
    ) -> Result<ConfirmOutcome>;

    /// Pending bookings whose start is at or before `cutoff`.
    async fn find_pending_started_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BookingEntity>>;

    /// Confirmed bookings with no verification row whose window has opened
    /// (`starts_at <= opens_before`) and not yet closed (`starts_at > closes_after`).
    async fn find_confirmed_entering_window(
        &self,
        opens_before: DateTime<Utc>,
        closes_after: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BookingEntity>>;

    /// Confirmed bookings that never got a verification row and started at or
    /// before `cutoff`.
    async fn find_confirmed_unverified_started_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BookingEntity>>;

    /// Confirmed + authorized bookings whose verification is complete.
    async fn find_verified_awaiting_capture(&self, limit: i64) -> Result<Vec<BookingEntity>>;

    /// Confirmed + paid + verified bookings whose end time has passed.
    async fn find_completable(&self, now: DateTime<Utc>, limit: i64)
    -> Result<Vec<BookingEntity>>;

    /// Completed + paid bookings finished at or before `cutoff` and not yet released.
    async fn find_releasable(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BookingEntity>>;

    async fn find_payout_account(&self, companion_id: Uuid) -> Result<Option<String>>;

    /// Takes the booking out of every scheduler scan. Returns `false` when it
    /// was already blocked.
    async fn block(&self, booking_id: Uuid, reason: String, now: DateTime<Utc>) -> Result<bool>;
}
