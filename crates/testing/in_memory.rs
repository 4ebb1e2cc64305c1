use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    domain::{
        entities::{
            booking_requests::{BookingRequestEntity, InsertBookingRequestEntity},
            booking_verifications::{BookingVerificationEntity, InsertBookingVerificationEntity},
            bookings::{BookingChangeset, BookingEntity, InsertBookingEntity},
            webhook_failures::{InsertWebhookFailureEntity, WebhookFailureEntity},
        },
        repositories::{
            booking_requests::BookingRequestRepository,
            booking_verifications::BookingVerificationRepository, bookings::BookingRepository,
            webhook_failures::WebhookFailureRepository,
        },
        value_objects::{
            enums::{
                booking_request_statuses::BookingRequestStatus, booking_statuses::BookingStatus,
                parties::Party, payment_statuses::PaymentStatus,
                verification_statuses::VerificationStatus,
            },
            transitions::{
                AcceptRequestOutcome, BookingGuard, ConfirmOutcome, InsertBookingOutcome,
                PartyVerificationOutcome, TransitionOutcome,
            },
        },
    },
    utils::geo::Coordinates,
};

#[derive(Debug, Default)]
struct StoreState {
    bookings: HashMap<Uuid, BookingEntity>,
    requests: HashMap<Uuid, BookingRequestEntity>,
    /// Keyed by booking id.
    verifications: HashMap<Uuid, BookingVerificationEntity>,
    failures: Vec<WebhookFailureEntity>,
    payout_accounts: HashMap<Uuid, String>,
}

impl StoreState {
    fn overlapping(
        &self,
        companion_id: Uuid,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        statuses: &[BookingStatus],
        excluding: Option<Uuid>,
    ) -> bool {
        self.bookings.values().any(|booking| {
            booking.companion_id == companion_id
                && Some(booking.id) != excluding
                && booking
                    .status()
                    .map(|status| statuses.contains(&status))
                    .unwrap_or(false)
                && booking.starts_at < ends_at
                && booking.ends_at > starts_at
        })
    }

    fn transition(
        &mut self,
        booking_id: Uuid,
        guard: &BookingGuard,
        changes: &BookingChangeset,
    ) -> Option<BookingEntity> {
        let booking = self.bookings.get_mut(&booking_id)?;
        if !guard.matches(booking) {
            return None;
        }
        apply_changeset(booking, changes);
        Some(booking.clone())
    }

    fn insert_booking(&mut self, booking: InsertBookingEntity) -> BookingEntity {
        let entity = booking_from_insert(booking);
        self.bookings.insert(entity.id, entity.clone());
        entity
    }

    fn has_verification(&self, booking_id: Uuid, both_verified: bool) -> bool {
        self.verifications
            .get(&booking_id)
            .map(|v| !both_verified || v.both_verified_at.is_some())
            .unwrap_or(false)
    }

    fn bookings_where(
        &self,
        limit: i64,
        predicate: impl Fn(&BookingEntity) -> bool,
        sort_key: impl Fn(&BookingEntity) -> DateTime<Utc>,
    ) -> Vec<BookingEntity> {
        let mut results: Vec<BookingEntity> = self
            .bookings
            .values()
            .filter(|booking| predicate(booking))
            .cloned()
            .collect();
        results.sort_by_key(|booking| sort_key(booking));
        results.truncate(limit.max(0) as usize);
        results
    }

    fn open_verification_mut(
        &mut self,
        booking_id: Uuid,
        now: DateTime<Utc>,
    ) -> Option<&mut BookingVerificationEntity> {
        self.verifications.get_mut(&booking_id).filter(|v| {
            v.verification_status == VerificationStatus::Pending.as_str()
                && v.both_verified_at.is_none()
                && v.expires_at > now
        })
    }
}

/// Shared in-memory database. Every method takes the single lock, checks the
/// guard and applies the change before releasing it, mirroring a single-row
/// conditional UPDATE.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn put_booking(&self, booking: BookingEntity) {
        self.lock().bookings.insert(booking.id, booking);
    }

    pub fn put_verification(&self, verification: BookingVerificationEntity) {
        self.lock()
            .verifications
            .insert(verification.booking_id, verification);
    }

    pub fn put_request(&self, request: BookingRequestEntity) {
        self.lock().requests.insert(request.id, request);
    }

    pub fn put_payout_account(&self, companion_id: Uuid, account: &str) {
        self.lock()
            .payout_accounts
            .insert(companion_id, account.to_string());
    }

    pub fn booking(&self, booking_id: Uuid) -> Option<BookingEntity> {
        self.lock().bookings.get(&booking_id).cloned()
    }

    pub fn bookings(&self) -> Vec<BookingEntity> {
        let mut bookings: Vec<_> = self.lock().bookings.values().cloned().collect();
        bookings.sort_by_key(|booking| booking.id);
        bookings
    }

    pub fn verification(&self, booking_id: Uuid) -> Option<BookingVerificationEntity> {
        self.lock().verifications.get(&booking_id).cloned()
    }

    pub fn request(&self, request_id: Uuid) -> Option<BookingRequestEntity> {
        self.lock().requests.get(&request_id).cloned()
    }

    pub fn failures(&self) -> Vec<WebhookFailureEntity> {
        self.lock().failures.clone()
    }
}

pub fn apply_changeset(booking: &mut BookingEntity, changes: &BookingChangeset) {
    let BookingChangeset {
        status,
        payment_status,
        payment_intent_id,
        confirmed_at,
        paid_at,
        completed_at,
        payment_released_at,
        transfer_id,
        transfer_status,
        refund_id,
        cancelled_by,
        cancellation_reason,
        cancelled_at,
        blocked_at,
        blocked_reason,
        updated_at,
    } = changes.clone();

    if let Some(value) = status {
        booking.status = value;
    }
    if let Some(value) = payment_status {
        booking.payment_status = value;
    }
    if let Some(value) = payment_intent_id {
        booking.payment_intent_id = Some(value);
    }
    if let Some(value) = confirmed_at {
        booking.confirmed_at = Some(value);
    }
    if let Some(value) = paid_at {
        booking.paid_at = Some(value);
    }
    if let Some(value) = completed_at {
        booking.completed_at = Some(value);
    }
    if let Some(value) = payment_released_at {
        booking.payment_released_at = Some(value);
    }
    if let Some(value) = transfer_id {
        booking.transfer_id = Some(value);
    }
    if let Some(value) = transfer_status {
        booking.transfer_status = Some(value);
    }
    if let Some(value) = refund_id {
        booking.refund_id = Some(value);
    }
    if let Some(value) = cancelled_by {
        booking.cancelled_by = Some(value);
    }
    if let Some(value) = cancellation_reason {
        booking.cancellation_reason = Some(value);
    }
    if let Some(value) = cancelled_at {
        booking.cancelled_at = Some(value);
    }
    if let Some(value) = blocked_at {
        booking.blocked_at = Some(value);
    }
    if let Some(value) = blocked_reason {
        booking.blocked_reason = Some(value);
    }
    if let Some(value) = updated_at {
        booking.updated_at = value;
    }
}

pub fn booking_from_insert(booking: InsertBookingEntity) -> BookingEntity {
    let now = Utc::now();
    BookingEntity {
        id: Uuid::new_v4(),
        client_id: booking.client_id,
        companion_id: booking.companion_id,
        booking_request_id: booking.booking_request_id,
        starts_at: booking.starts_at,
        ends_at: booking.ends_at,
        duration_minutes: booking.duration_minutes,
        timezone: booking.timezone,
        base_amount_minor: booking.base_amount_minor,
        extra_amount_minor: booking.extra_amount_minor,
        currency: booking.currency,
        status: booking.status,
        payment_status: booking.payment_status,
        payment_method_ref: booking.payment_method_ref,
        payment_intent_id: None,
        confirmed_at: None,
        paid_at: None,
        completed_at: None,
        payment_released_at: None,
        transfer_id: None,
        transfer_status: None,
        refund_id: None,
        cancelled_by: None,
        cancellation_reason: None,
        cancelled_at: None,
        blocked_at: None,
        blocked_reason: None,
        meeting_type: booking.meeting_type,
        meeting_location: booking.meeting_location,
        meeting_location_lat: booking.meeting_location_lat,
        meeting_location_lon: booking.meeting_location_lon,
        created_at: now,
        updated_at: now,
    }
}

fn request_from_insert(request: InsertBookingRequestEntity) -> BookingRequestEntity {
    let now = Utc::now();
    BookingRequestEntity {
        id: Uuid::new_v4(),
        client_id: request.client_id,
        companion_id: request.companion_id,
        starts_at: request.starts_at,
        ends_at: request.ends_at,
        duration_minutes: request.duration_minutes,
        timezone: request.timezone,
        proposed_amount_minor: request.proposed_amount_minor,
        currency: request.currency,
        meeting_type: request.meeting_type,
        meeting_location: request.meeting_location,
        meeting_location_lat: request.meeting_location_lat,
        meeting_location_lon: request.meeting_location_lon,
        payment_method_ref: request.payment_method_ref,
        message: request.message,
        status: request.status,
        payment_status: request.payment_status,
        expires_at: request.expires_at,
        responded_at: None,
        booking_id: None,
        created_at: now,
        updated_at: now,
    }
}

fn verification_from_insert(verification: InsertBookingVerificationEntity) -> BookingVerificationEntity {
    let now = Utc::now();
    BookingVerificationEntity {
        id: Uuid::new_v4(),
        booking_id: verification.booking_id,
        client_otp_hash: verification.client_otp_hash,
        companion_otp_hash: verification.companion_otp_hash,
        client_otp_generated_at: verification.client_otp_generated_at,
        companion_otp_generated_at: verification.companion_otp_generated_at,
        client_otp_sent_at: None,
        companion_otp_sent_at: None,
        client_failed_attempts: 0,
        companion_failed_attempts: 0,
        client_verified_at: None,
        companion_verified_at: None,
        client_verification_lat: None,
        client_verification_lon: None,
        companion_verification_lat: None,
        companion_verification_lon: None,
        expires_at: verification.expires_at,
        extension_requested_by: None,
        extended_at: None,
        verification_status: verification.verification_status,
        both_verified_at: None,
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl BookingRepository for InMemoryStore {
    async fn insert(&self, booking: InsertBookingEntity) -> Result<InsertBookingOutcome> {
        let mut state = self.lock();
        if state.overlapping(
            booking.companion_id,
            booking.starts_at,
            booking.ends_at,
            &BookingStatus::holding(),
            None,
        ) {
            return Ok(InsertBookingOutcome::Overlap);
        }
        Ok(InsertBookingOutcome::Inserted(state.insert_booking(booking)))
    }

    async fn find_by_id(&self, booking_id: Uuid) -> Result<Option<BookingEntity>> {
        Ok(self.lock().bookings.get(&booking_id).cloned())
    }

    async fn find_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<BookingEntity>> {
        Ok(self
            .lock()
            .bookings
            .values()
            .find(|b| b.payment_intent_id.as_deref() == Some(payment_intent_id))
            .cloned())
    }

    async fn find_by_transfer(&self, transfer_id: &str) -> Result<Option<BookingEntity>> {
        Ok(self
            .lock()
            .bookings
            .values()
            .find(|b| b.transfer_id.as_deref() == Some(transfer_id))
            .cloned())
    }

    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<BookingEntity>> {
        let mut results = self.lock().bookings_where(
            limit,
            |b| b.client_id == user_id || b.companion_id == user_id,
            |b| b.starts_at,
        );
        results.reverse();
        Ok(results)
    }

    async fn transition(
        &self,
        booking_id: Uuid,
        guard: BookingGuard,
        changes: BookingChangeset,
    ) -> Result<TransitionOutcome<BookingEntity>> {
        Ok(self.lock().transition(booking_id, &guard, &changes).into())
    }

    async fn confirm(
        &self,
        booking_id: Uuid,
        guard: BookingGuard,
        changes: BookingChangeset,
    ) -> Result<ConfirmOutcome> {
        let mut state = self.lock();
        let Some(current) = state.bookings.get(&booking_id).cloned() else {
            return Ok(ConfirmOutcome::Stale);
        };
        if !guard.matches(&current) {
            return Ok(ConfirmOutcome::Stale);
        }
        if state.overlapping(
            current.companion_id,
            current.starts_at,
            current.ends_at,
            &[BookingStatus::Confirmed],
            Some(current.id),
        ) {
            return Ok(ConfirmOutcome::Overlap);
        }
        Ok(match state.transition(booking_id, &guard, &changes) {
            Some(confirmed) => ConfirmOutcome::Confirmed(confirmed),
            None => ConfirmOutcome::Stale,
        })
    }

    async fn find_pending_started_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BookingEntity>> {
        Ok(self.lock().bookings_where(
            limit,
            |b| {
                b.blocked_at.is_none()
                    && b.status == BookingStatus::Pending.as_str()
                    && b.starts_at <= cutoff
            },
            |b| b.starts_at,
        ))
    }

    async fn find_confirmed_entering_window(
        &self,
        opens_before: DateTime<Utc>,
        closes_after: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BookingEntity>> {
        let state = self.lock();
        Ok(state.bookings_where(
            limit,
            |b| {
                b.blocked_at.is_none()
                    && b.status == BookingStatus::Confirmed.as_str()
                    && b.starts_at <= opens_before
                    && b.starts_at > closes_after
                    && !state.has_verification(b.id, false)
            },
            |b| b.starts_at,
        ))
    }

    async fn find_confirmed_unverified_started_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BookingEntity>> {
        let state = self.lock();
        Ok(state.bookings_where(
            limit,
            |b| {
                b.blocked_at.is_none()
                    && b.status == BookingStatus::Confirmed.as_str()
                    && b.starts_at <= cutoff
                    && !state.has_verification(b.id, false)
            },
            |b| b.starts_at,
        ))
    }

    async fn find_verified_awaiting_capture(&self, limit: i64) -> Result<Vec<BookingEntity>> {
        let state = self.lock();
        Ok(state.bookings_where(
            limit,
            |b| {
                b.blocked_at.is_none()
                    && b.status == BookingStatus::Confirmed.as_str()
                    && b.payment_status == PaymentStatus::Authorized.as_str()
                    && state.has_verification(b.id, true)
            },
            |b| b.starts_at,
        ))
    }

    async fn find_completable(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BookingEntity>> {
        let state = self.lock();
        Ok(state.bookings_where(
            limit,
            |b| {
                b.blocked_at.is_none()
                    && b.status == BookingStatus::Confirmed.as_str()
                    && b.payment_status == PaymentStatus::Paid.as_str()
                    && b.ends_at <= now
                    && state.has_verification(b.id, true)
            },
            |b| b.ends_at,
        ))
    }

    async fn find_releasable(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BookingEntity>> {
        Ok(self.lock().bookings_where(
            limit,
            |b| {
                b.blocked_at.is_none()
                    && b.status == BookingStatus::Completed.as_str()
                    && b.payment_status == PaymentStatus::Paid.as_str()
                    && b.payment_released_at.is_none()
                    && b.completed_at.is_some_and(|completed| completed <= cutoff)
            },
            |b| b.completed_at.unwrap_or(b.ends_at),
        ))
    }

    async fn find_payout_account(&self, companion_id: Uuid) -> Result<Option<String>> {
        Ok(self.lock().payout_accounts.get(&companion_id).cloned())
    }

    async fn block(&self, booking_id: Uuid, reason: String, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.lock();
        let Some(booking) = state.bookings.get_mut(&booking_id) else {
            return Ok(false);
        };
        if booking.blocked_at.is_some() {
            return Ok(false);
        }
        booking.blocked_at = Some(now);
        booking.blocked_reason = Some(reason);
        booking.updated_at = now;
        Ok(true)
    }
}

#[async_trait]
impl BookingRequestRepository for InMemoryStore {
    async fn insert(&self, request: InsertBookingRequestEntity) -> Result<BookingRequestEntity> {
        let entity = request_from_insert(request);
        self.lock().requests.insert(entity.id, entity.clone());
        Ok(entity)
    }

    async fn find_by_id(&self, request_id: Uuid) -> Result<Option<BookingRequestEntity>> {
        Ok(self.lock().requests.get(&request_id).cloned())
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<BookingRequestEntity>> {
        let mut results: Vec<_> = self
            .lock()
            .requests
            .values()
            .filter(|r| r.client_id == user_id || r.companion_id == user_id)
            .cloned()
            .collect();
        results.sort_by_key(|r| std::cmp::Reverse(r.created_at));
        results.truncate(limit.max(0) as usize);
        Ok(results)
    }

    async fn transition(
        &self,
        request_id: Uuid,
        expected: BookingRequestStatus,
        next: BookingRequestStatus,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome<BookingRequestEntity>> {
        let mut state = self.lock();
        let updated = state
            .requests
            .get_mut(&request_id)
            .filter(|r| r.status == expected.as_str())
            .map(|request| {
                request.status = next.to_string();
                if next.is_companion_response() {
                    request.responded_at = Some(now);
                }
                request.updated_at = now;
                request.clone()
            });
        Ok(updated.into())
    }

    async fn accept(
        &self,
        request_id: Uuid,
        booking: InsertBookingEntity,
        now: DateTime<Utc>,
    ) -> Result<AcceptRequestOutcome> {
        let mut state = self.lock();
        if state.overlapping(
            booking.companion_id,
            booking.starts_at,
            booking.ends_at,
            &BookingStatus::holding(),
            None,
        ) {
            return Ok(AcceptRequestOutcome::Overlap);
        }

        let acceptable = state
            .requests
            .get(&request_id)
            .is_some_and(|r| r.status == BookingRequestStatus::Pending.as_str() && r.expires_at > now);
        if !acceptable {
            return Ok(AcceptRequestOutcome::Stale);
        }

        let created = state.insert_booking(booking);
        let Some(request) = state.requests.get_mut(&request_id) else {
            return Ok(AcceptRequestOutcome::Stale);
        };
        request.status = BookingRequestStatus::Accepted.to_string();
        request.responded_at = Some(now);
        request.updated_at = now;
        request.booking_id = Some(created.id);

        Ok(AcceptRequestOutcome::Accepted {
            request: request.clone(),
            booking: created,
        })
    }

    async fn find_expired_pending(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BookingRequestEntity>> {
        let mut results: Vec<_> = self
            .lock()
            .requests
            .values()
            .filter(|r| r.status == BookingRequestStatus::Pending.as_str() && r.expires_at <= now)
            .cloned()
            .collect();
        results.sort_by_key(|r| r.expires_at);
        results.truncate(limit.max(0) as usize);
        Ok(results)
    }
}

#[async_trait]
impl BookingVerificationRepository for InMemoryStore {
    async fn open_window(
        &self,
        verification: InsertBookingVerificationEntity,
    ) -> Result<Option<BookingVerificationEntity>> {
        let mut state = self.lock();
        if state.verifications.contains_key(&verification.booking_id) {
            return Ok(None);
        }
        let entity = verification_from_insert(verification);
        state.verifications.insert(entity.booking_id, entity.clone());
        Ok(Some(entity))
    }

    async fn find_by_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<BookingVerificationEntity>> {
        Ok(self.lock().verifications.get(&booking_id).cloned())
    }

    async fn mark_code_sent(
        &self,
        booking_id: Uuid,
        party: Party,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(v) = self.lock().verifications.get_mut(&booking_id) {
            match party {
                Party::Client => v.client_otp_sent_at = Some(now),
                Party::Companion => v.companion_otp_sent_at = Some(now),
            }
            v.updated_at = now;
        }
        Ok(())
    }

    async fn replace_code(
        &self,
        booking_id: Uuid,
        party: Party,
        otp_hash: String,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome<BookingVerificationEntity>> {
        let mut state = self.lock();
        let updated = state
            .open_verification_mut(booking_id, now)
            .filter(|v| v.verified_at(party).is_none())
            .map(|v| {
                match party {
                    Party::Client => {
                        v.client_otp_hash = Some(otp_hash);
                        v.client_otp_generated_at = Some(now);
                        v.client_otp_sent_at = None;
                        v.client_failed_attempts = 0;
                    }
                    Party::Companion => {
                        v.companion_otp_hash = Some(otp_hash);
                        v.companion_otp_generated_at = Some(now);
                        v.companion_otp_sent_at = None;
                        v.companion_failed_attempts = 0;
                    }
                }
                v.updated_at = now;
                v.clone()
            });
        Ok(updated.into())
    }

    async fn record_failed_attempt(
        &self,
        booking_id: Uuid,
        party: Party,
        now: DateTime<Utc>,
    ) -> Result<i32> {
        let mut state = self.lock();
        let Some(v) = state
            .verifications
            .get_mut(&booking_id)
            .filter(|v| v.verification_status == VerificationStatus::Pending.as_str())
        else {
            return Ok(0);
        };
        let attempts = match party {
            Party::Client => {
                v.client_failed_attempts += 1;
                v.client_failed_attempts
            }
            Party::Companion => {
                v.companion_failed_attempts += 1;
                v.companion_failed_attempts
            }
        };
        v.updated_at = now;
        Ok(attempts)
    }

    async fn record_verification(
        &self,
        booking_id: Uuid,
        party: Party,
        location: Option<Coordinates>,
        now: DateTime<Utc>,
    ) -> Result<PartyVerificationOutcome> {
        let mut state = self.lock();
        let Some(v) = state
            .open_verification_mut(booking_id, now)
            .filter(|v| v.verified_at(party).is_none())
        else {
            return Ok(PartyVerificationOutcome::Stale);
        };

        let lat = location.map(|point| point.lat);
        let lon = location.map(|point| point.lon);
        match party {
            Party::Client => {
                v.client_verified_at = Some(now);
                v.client_verification_lat = lat;
                v.client_verification_lon = lon;
            }
            Party::Companion => {
                v.companion_verified_at = Some(now);
                v.companion_verification_lat = lat;
                v.companion_verification_lon = lon;
            }
        }
        v.updated_at = now;

        if v.verified_at(party.other()).is_none() {
            return Ok(PartyVerificationOutcome::Recorded(v.clone()));
        }

        v.both_verified_at = Some(now);
        v.verification_status = VerificationStatus::Verified.to_string();
        Ok(PartyVerificationOutcome::BothVerified(v.clone()))
    }

    async fn extend_window(
        &self,
        booking_id: Uuid,
        requested_by: Party,
        new_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome<BookingVerificationEntity>> {
        let mut state = self.lock();
        let updated = state
            .open_verification_mut(booking_id, now)
            .filter(|v| v.extension_requested_by.is_none())
            .map(|v| {
                v.expires_at = new_expires_at;
                v.extension_requested_by = Some(requested_by.to_string());
                v.extended_at = Some(now);
                v.updated_at = now;
                v.clone()
            });
        Ok(updated.into())
    }

    async fn expire_window(
        &self,
        booking_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome<BookingVerificationEntity>> {
        let mut state = self.lock();
        let updated = state
            .verifications
            .get_mut(&booking_id)
            .filter(|v| {
                v.verification_status == VerificationStatus::Pending.as_str()
                    && v.both_verified_at.is_none()
                    && v.expires_at <= now
            })
            .map(|v| {
                v.verification_status = VerificationStatus::Expired.to_string();
                v.updated_at = now;
                v.clone()
            });
        Ok(updated.into())
    }

    async fn find_pending_past_expiry(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BookingVerificationEntity>> {
        let mut results: Vec<_> = self
            .lock()
            .verifications
            .values()
            .filter(|v| {
                v.verification_status == VerificationStatus::Pending.as_str()
                    && v.both_verified_at.is_none()
                    && v.expires_at <= now
            })
            .cloned()
            .collect();
        results.sort_by_key(|v| v.expires_at);
        results.truncate(limit.max(0) as usize);
        Ok(results)
    }

    async fn find_expired_with_confirmed_booking(
        &self,
        limit: i64,
    ) -> Result<Vec<(BookingVerificationEntity, BookingEntity)>> {
        let state = self.lock();
        let mut results: Vec<_> = state
            .verifications
            .values()
            .filter(|v| v.verification_status == VerificationStatus::Expired.as_str())
            .filter_map(|v| {
                state
                    .bookings
                    .get(&v.booking_id)
                    .filter(|b| b.blocked_at.is_none() && b.status == BookingStatus::Confirmed.as_str())
                    .map(|b| (v.clone(), b.clone()))
            })
            .collect();
        results.sort_by_key(|(v, _)| v.expires_at);
        results.truncate(limit.max(0) as usize);
        Ok(results)
    }

    async fn find_undelivered_codes(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<(BookingVerificationEntity, BookingEntity)>> {
        let state = self.lock();
        let mut results: Vec<_> = state
            .verifications
            .values()
            .filter(|v| {
                v.verification_status == VerificationStatus::Pending.as_str()
                    && v.expires_at > now
                    && ((v.client_otp_sent_at.is_none() && v.client_verified_at.is_none())
                        || (v.companion_otp_sent_at.is_none()
                            && v.companion_verified_at.is_none()))
            })
            .filter_map(|v| {
                state
                    .bookings
                    .get(&v.booking_id)
                    .filter(|b| b.status == BookingStatus::Confirmed.as_str())
                    .map(|b| (v.clone(), b.clone()))
            })
            .collect();
        results.sort_by_key(|(v, _)| v.expires_at);
        results.truncate(limit.max(0) as usize);
        Ok(results)
    }
}

#[async_trait]
impl WebhookFailureRepository for InMemoryStore {
    async fn record(
        &self,
        failure: InsertWebhookFailureEntity,
        now: DateTime<Utc>,
    ) -> Result<WebhookFailureEntity> {
        let mut state = self.lock();

        if let Some(event_id) = failure.provider_event_id.as_deref() {
            if let Some(existing) = state
                .failures
                .iter_mut()
                .find(|f| f.provider_event_id.as_deref() == Some(event_id))
            {
                existing.retry_count += 1;
                existing.error_message = failure.error_message;
                existing.last_seen_at = now;
                return Ok(existing.clone());
            }
        }

        let entity = WebhookFailureEntity {
            id: Uuid::new_v4(),
            provider: failure.provider,
            provider_event_id: failure.provider_event_id,
            event_type: failure.event_type,
            payload: failure.payload,
            error_message: failure.error_message,
            retry_count: 0,
            resolved: false,
            resolved_at: None,
            resolution_note: None,
            created_at: now,
            last_seen_at: now,
        };
        state.failures.push(entity.clone());
        Ok(entity)
    }

    async fn list_unresolved(&self, limit: i64) -> Result<Vec<WebhookFailureEntity>> {
        Ok(self
            .lock()
            .failures
            .iter()
            .filter(|f| !f.resolved)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn resolve(
        &self,
        failure_id: Uuid,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookFailureEntity>> {
        Ok(self
            .lock()
            .failures
            .iter_mut()
            .find(|f| f.id == failure_id)
            .map(|f| {
                f.resolved = true;
                f.resolved_at = Some(now);
                f.resolution_note = note;
                f.clone()
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::booking_fixture;

    #[tokio::test]
    async fn conditional_transition_applies_once() {
        let store = InMemoryStore::new();
        let booking = booking_fixture(Utc::now());
        store.put_booking(booking.clone());

        let guard = BookingGuard::status(BookingStatus::Pending);
        let changes = BookingChangeset::at(Utc::now()).status(BookingStatus::Expired);

        let first = BookingRepository::transition(&store, booking.id, guard.clone(), changes.clone())
            .await
            .unwrap();
        let second = BookingRepository::transition(&store, booking.id, guard, changes)
            .await
            .unwrap();

        assert!(first.is_applied());
        assert_eq!(second, TransitionOutcome::Stale);
        assert_eq!(store.booking(booking.id).unwrap().status, "expired");
    }

    #[tokio::test]
    async fn overlapping_insert_is_refused() {
        let store = InMemoryStore::new();
        let existing = booking_fixture(Utc::now());
        store.put_booking(existing.clone());

        let overlapping = InsertBookingEntity {
            client_id: Uuid::new_v4(),
            companion_id: existing.companion_id,
            booking_request_id: None,
            starts_at: existing.starts_at + chrono::Duration::minutes(30),
            ends_at: existing.ends_at + chrono::Duration::minutes(30),
            duration_minutes: 60,
            timezone: "UTC".to_string(),
            base_amount_minor: 1_000,
            extra_amount_minor: 0,
            currency: "THB".to_string(),
            status: BookingStatus::Pending.to_string(),
            payment_status: PaymentStatus::Unpaid.to_string(),
            payment_method_ref: None,
            meeting_type: "virtual".to_string(),
            meeting_location: None,
            meeting_location_lat: None,
            meeting_location_lon: None,
        };

        let outcome = BookingRepository::insert(&store, overlapping.clone()).await.unwrap();
        assert_eq!(outcome, InsertBookingOutcome::Overlap);

        let mut back_to_back = overlapping;
        back_to_back.starts_at = existing.ends_at;
        back_to_back.ends_at = existing.ends_at + chrono::Duration::minutes(60);
        let outcome = BookingRepository::insert(&store, back_to_back).await.unwrap();
        assert!(matches!(outcome, InsertBookingOutcome::Inserted(_)));
    }
}
