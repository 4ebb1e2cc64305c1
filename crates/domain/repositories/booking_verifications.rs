use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::{
    domain::{
        entities::{
            booking_verifications::{BookingVerificationEntity, InsertBookingVerificationEntity},
            bookings::BookingEntity,
        },
        value_objects::{
            enums::parties::Party,
            transitions::{PartyVerificationOutcome, TransitionOutcome},
        },
    },
    utils::geo::Coordinates,
};

#[automock]
#[async_trait]
pub trait BookingVerificationRepository {
    /// Creates the row for a booking. `None` when it already exists.
    async fn open_window(
        &self,
        verification: InsertBookingVerificationEntity,
    ) -> Result<Option<BookingVerificationEntity>>;

    async fn find_by_booking(&self, booking_id: Uuid)
    -> Result<Option<BookingVerificationEntity>>;

    async fn mark_code_sent(
        &self,
        booking_id: Uuid,
        party: Party,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Swaps in a fresh code digest for an unverified party of an open window
    /// and resets its attempt counter.
    async fn replace_code(
        &self,
        booking_id: Uuid,
        party: Party,
        otp_hash: String,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome<BookingVerificationEntity>>;

    /// Returns the new failed-attempt count for the party.
    async fn record_failed_attempt(
        &self,
        booking_id: Uuid,
        party: Party,
        now: DateTime<Utc>,
    ) -> Result<i32>;

    /// Marks the party verified while the window is open, and sets
    /// `both_verified_at` in the same transaction when the other party is
    /// already verified.
    async fn record_verification(
        &self,
        booking_id: Uuid,
        party: Party,
        location: Option<Coordinates>,
        now: DateTime<Utc>,
    ) -> Result<PartyVerificationOutcome>;

    /// One extension per window, only while it is still pending.
    async fn extend_window(
        &self,
        booking_id: Uuid,
        requested_by: Party,
        new_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome<BookingVerificationEntity>>;

    /// `pending -> expired` once `expires_at` has passed.
    async fn expire_window(
        &self,
        booking_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome<BookingVerificationEntity>>;

    async fn find_pending_past_expiry(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BookingVerificationEntity>>;

    /// Expired windows whose booking is still confirmed, i.e. the no-show
    /// consequence has not been applied yet.
    async fn find_expired_with_confirmed_booking(
        &self,
        limit: i64,
    ) -> Result<Vec<(BookingVerificationEntity, BookingEntity)>>;

    /// Open windows where at least one party's code was never delivered.
    async fn find_undelivered_codes(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<(BookingVerificationEntity, BookingEntity)>>;
}
