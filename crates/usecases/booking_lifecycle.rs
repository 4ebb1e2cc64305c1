use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    domain::{
        entities::{
            booking_verifications::BookingVerificationEntity,
            bookings::{BookingChangeset, BookingEntity, InsertBookingEntity},
        },
        repositories::{
            booking_verifications::BookingVerificationRepository, bookings::BookingRepository,
            payment_gateway::Authorization,
        },
        value_objects::{
            booking_events::BookingEventKind,
            booking_rules::BookingRules,
            bookings::{
                BookingDto, CreateBookingModel, MAX_DURATION_MINUTES, MIN_DURATION_MINUTES,
                MeetingSlotModel,
            },
            enums::{
                booking_statuses::BookingStatus, cancelled_by::CancelledBy,
                meeting_types::MeetingType, parties::Party, payment_statuses::PaymentStatus,
            },
            transitions::{BookingGuard, ConfirmOutcome, InsertBookingOutcome, TransitionOutcome},
        },
    },
    realtime::broadcaster::EventBroadcaster,
    usecases::{
        errors::{BookingError, UseCaseResult},
        payment_coordinator::PaymentCoordinator,
    },
    utils::{geo::Coordinates, time::parse_local_datetime},
};

/// A cancelled booking is re-read and retried this many times when another
/// actor moved it between the read and the conditional update.
const CANCEL_ATTEMPTS: usize = 2;

pub const REASON_NOT_APPROVED: &str = "not_approved_before_start";
pub const REASON_COMPANION_NO_SHOW: &str = "companion_no_show";
pub const REASON_CLIENT_NO_SHOW: &str = "client_no_show";
pub const REASON_NO_SHOW: &str = "no_show";

/// A meeting slot resolved to UTC instants and checked for consistency.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSlot {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub timezone: String,
    pub meeting_type: MeetingType,
    pub meeting_location: Option<String>,
    pub meeting_point: Option<Coordinates>,
}

pub fn resolve_slot(slot: &MeetingSlotModel, now: DateTime<Utc>) -> UseCaseResult<ResolvedSlot> {
    if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&slot.duration_minutes) {
        return Err(BookingError::InvalidInput(format!(
            "duration must be between {MIN_DURATION_MINUTES} and {MAX_DURATION_MINUTES} minutes"
        )));
    }

    let starts_at = parse_local_datetime(&slot.date, &slot.start_time, &slot.timezone)
        .map_err(|err| BookingError::InvalidInput(err.to_string()))?;
    if starts_at <= now {
        return Err(BookingError::InvalidInput(
            "meeting time is in the past".to_string(),
        ));
    }

    let meeting_point =
        Coordinates::from_parts(slot.meeting_location_lat, slot.meeting_location_lon)
            .map_err(|err| BookingError::InvalidInput(err.to_string()))?;
    if slot.meeting_type.requires_proximity() && meeting_point.is_none() {
        return Err(BookingError::InvalidInput(
            "in-person meetings need meeting coordinates".to_string(),
        ));
    }

    Ok(ResolvedSlot {
        starts_at,
        ends_at: starts_at + Duration::minutes(i64::from(slot.duration_minutes)),
        duration_minutes: slot.duration_minutes,
        timezone: slot.timezone.trim().to_string(),
        meeting_type: slot.meeting_type,
        meeting_location: slot
            .meeting_location
            .as_deref()
            .map(str::trim)
            .filter(|location| !location.is_empty())
            .map(str::to_string),
        meeting_point,
    })
}

pub fn normalize_currency(currency: &str) -> UseCaseResult<String> {
    let currency = currency.trim();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(BookingError::InvalidInput(format!(
            "invalid currency `{currency}`"
        )));
    }
    Ok(currency.to_ascii_uppercase())
}

/// How a booking leaves the holding states early.
struct Termination {
    from: &'static [BookingStatus],
    status: BookingStatus,
    event: BookingEventKind,
    cancelled_by: CancelledBy,
    reason: String,
}

/// The booking state machine. Every status change goes through one
/// conditional update on the booking row; provider calls happen first.
pub struct BookingLifecycleUseCase {
    bookings: Arc<dyn BookingRepository + Send + Sync>,
    verifications: Arc<dyn BookingVerificationRepository + Send + Sync>,
    payments: Arc<PaymentCoordinator>,
    broadcaster: EventBroadcaster,
    rules: BookingRules,
}

impl BookingLifecycleUseCase {
    pub fn new(
        bookings: Arc<dyn BookingRepository + Send + Sync>,
        verifications: Arc<dyn BookingVerificationRepository + Send + Sync>,
        payments: Arc<PaymentCoordinator>,
        broadcaster: EventBroadcaster,
        rules: BookingRules,
    ) -> Self {
        Self {
            bookings,
            verifications,
            payments,
            broadcaster,
            rules,
        }
    }

    pub fn rules(&self) -> &BookingRules {
        &self.rules
    }

    async fn load(&self, booking_id: Uuid) -> UseCaseResult<BookingEntity> {
        self.bookings
            .find_by_id(booking_id)
            .await?
            .ok_or(BookingError::NotFound("booking"))
    }

    pub async fn create_booking(
        &self,
        client_id: Uuid,
        model: CreateBookingModel,
        now: DateTime<Utc>,
    ) -> UseCaseResult<BookingEntity> {
        if model.companion_id == client_id {
            return Err(BookingError::InvalidInput(
                "cannot book yourself".to_string(),
            ));
        }
        if model.base_amount_minor <= 0 || model.extra_amount_minor < 0 {
            return Err(BookingError::InvalidInput(
                "amounts must be positive".to_string(),
            ));
        }
        let currency = normalize_currency(&model.currency)?;
        let slot = resolve_slot(&model.slot, now)?;

        let insert = InsertBookingEntity {
            client_id,
            companion_id: model.companion_id,
            booking_request_id: None,
            starts_at: slot.starts_at,
            ends_at: slot.ends_at,
            duration_minutes: slot.duration_minutes,
            timezone: slot.timezone,
            base_amount_minor: model.base_amount_minor,
            extra_amount_minor: model.extra_amount_minor,
            currency,
            status: BookingStatus::Pending.to_string(),
            payment_status: PaymentStatus::Unpaid.to_string(),
            payment_method_ref: model.payment_method_ref,
            meeting_type: slot.meeting_type.to_string(),
            meeting_location: slot.meeting_location,
            meeting_location_lat: slot.meeting_point.map(|point| point.lat),
            meeting_location_lon: slot.meeting_point.map(|point| point.lon),
        };

        let booking = match self.bookings.insert(insert).await? {
            InsertBookingOutcome::Inserted(booking) => booking,
            InsertBookingOutcome::Overlap => {
                info!(
                    %client_id,
                    companion_id = %model.companion_id,
                    "bookings: requested slot overlaps an existing booking"
                );
                return Err(BookingError::Conflict);
            }
        };

        info!(
            booking_id = %booking.id,
            %client_id,
            companion_id = %booking.companion_id,
            starts_at = %booking.starts_at,
            "bookings: created"
        );
        self.announce_created(&booking);
        Ok(booking)
    }

    pub(crate) fn announce_created(&self, booking: &BookingEntity) {
        self.broadcaster.emit_to_parties(
            booking,
            BookingEventKind::BookingCreated,
            json!({
                "starts_at": booking.starts_at,
                "ends_at": booking.ends_at,
                "booking_request_id": booking.booking_request_id,
            }),
        );
        self.broadcaster
            .availability_changed(booking.companion_id, booking.starts_at, booking.ends_at);
    }

    pub async fn get_booking(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> UseCaseResult<BookingDto> {
        let booking = self.load(booking_id).await?;
        if booking.party_of(user_id).is_none() {
            return Err(BookingError::Forbidden);
        }
        let verification = self.verifications.find_by_booking(booking.id).await?;
        Ok(BookingDto::new(booking, verification.as_ref(), now))
    }

    pub async fn list_bookings(
        &self,
        user_id: Uuid,
        limit: i64,
        now: DateTime<Utc>,
    ) -> UseCaseResult<Vec<BookingDto>> {
        let bookings = self.bookings.list_for_user(user_id, limit).await?;

        let mut dtos = Vec::with_capacity(bookings.len());
        for booking in bookings {
            let verification = match booking.status()? {
                BookingStatus::Confirmed => self.verifications.find_by_booking(booking.id).await?,
                _ => None,
            };
            dtos.push(BookingDto::new(booking, verification.as_ref(), now));
        }
        Ok(dtos)
    }

    /// Client places the hold ahead of the companion's approval.
    pub async fn authorize_payment(
        &self,
        booking_id: Uuid,
        client_id: Uuid,
        now: DateTime<Utc>,
    ) -> UseCaseResult<TransitionOutcome<BookingEntity>> {
        let booking = self.load(booking_id).await?;
        if booking.client_id != client_id {
            return Err(BookingError::Forbidden);
        }
        let status = booking.status()?;
        if status != BookingStatus::Pending {
            return Err(BookingError::invalid_transition("authorize payment for", status));
        }

        let payment_status = booking.payment_status()?;
        match payment_status {
            PaymentStatus::Authorized | PaymentStatus::Pending => {
                return Ok(TransitionOutcome::Stale);
            }
            PaymentStatus::Unpaid | PaymentStatus::Failed | PaymentStatus::Cancelled => {}
            other => return Err(self.unexpected_payment(&booking, other)),
        }

        let authorization = self.payments.authorize(&booking).await?;
        let changes = BookingChangeset {
            payment_intent_id: Some(authorization.payment_intent_id.clone()),
            ..BookingChangeset::at(now)
        }
        .payment_status(authorization.status);

        let outcome = self
            .bookings
            .transition(
                booking.id,
                BookingGuard::status(BookingStatus::Pending).payment(&[payment_status]),
                changes,
            )
            .await?;

        match &outcome {
            TransitionOutcome::Applied(authorized) => {
                if authorization.status == PaymentStatus::Authorized {
                    self.broadcaster.emit_to_parties(
                        authorized,
                        BookingEventKind::PaymentAuthorized,
                        json!({ "amount_minor": authorized.total_amount_minor() }),
                    );
                }
            }
            TransitionOutcome::Stale => {
                self.payments
                    .void_authorization(booking.id, &authorization.payment_intent_id)
                    .await;
            }
        }
        Ok(outcome)
    }

    /// Companion approval: `pending -> confirmed`, authorizing first when the
    /// client has not done so yet.
    pub async fn approve_booking(
        &self,
        booking_id: Uuid,
        companion_id: Uuid,
        now: DateTime<Utc>,
    ) -> UseCaseResult<TransitionOutcome<BookingEntity>> {
        let booking = self.load(booking_id).await?;
        if booking.companion_id != companion_id {
            return Err(BookingError::Forbidden);
        }
        match booking.status()? {
            BookingStatus::Pending => {}
            BookingStatus::Confirmed => return Ok(TransitionOutcome::Stale),
            other => return Err(BookingError::invalid_transition("approve", other)),
        }
        if booking.starts_at <= now {
            return Err(BookingError::InvalidTransition(
                "meeting start has already passed".to_string(),
            ));
        }

        let payment_status = booking.payment_status()?;
        let fresh = match payment_status {
            PaymentStatus::Authorized if booking.payment_intent_id.is_some() => None,
            PaymentStatus::Unpaid | PaymentStatus::Failed | PaymentStatus::Cancelled => {
                let authorization = self.payments.authorize(&booking).await?;
                if authorization.status != PaymentStatus::Authorized {
                    self.record_incomplete_authorization(&booking, payment_status, authorization, now)
                        .await?;
                    return Err(BookingError::InvalidTransition(
                        "payment authorization needs customer action".to_string(),
                    ));
                }
                Some(authorization)
            }
            PaymentStatus::Pending => {
                return Err(BookingError::InvalidTransition(
                    "payment authorization is still pending".to_string(),
                ));
            }
            other => return Err(self.unexpected_payment(&booking, other)),
        };

        let changes = BookingChangeset {
            confirmed_at: Some(now),
            payment_intent_id: fresh.as_ref().map(|a| a.payment_intent_id.clone()),
            ..BookingChangeset::at(now)
        }
        .status(BookingStatus::Confirmed)
        .payment_status(PaymentStatus::Authorized);
        let guard = BookingGuard::status(BookingStatus::Pending).payment(&[payment_status]);

        match self.bookings.confirm(booking.id, guard, changes).await? {
            ConfirmOutcome::Confirmed(confirmed) => {
                info!(booking_id = %confirmed.id, %companion_id, "bookings: confirmed");
                if fresh.is_some() {
                    self.broadcaster.emit_to_parties(
                        &confirmed,
                        BookingEventKind::PaymentAuthorized,
                        json!({ "amount_minor": confirmed.total_amount_minor() }),
                    );
                }
                self.broadcaster.emit_to_parties(
                    &confirmed,
                    BookingEventKind::BookingConfirmed,
                    json!({ "confirmed_at": confirmed.confirmed_at }),
                );
                Ok(TransitionOutcome::Applied(confirmed))
            }
            ConfirmOutcome::Stale => {
                info!(booking_id = %booking.id, "bookings: approval lost to a concurrent change");
                if let Some(authorization) = fresh {
                    self.payments
                        .void_authorization(booking.id, &authorization.payment_intent_id)
                        .await;
                }
                Ok(TransitionOutcome::Stale)
            }
            ConfirmOutcome::Overlap => {
                warn!(
                    booking_id = %booking.id,
                    %companion_id,
                    "bookings: approval refused, overlapping confirmed booking"
                );
                if let Some(authorization) = fresh {
                    self.payments
                        .void_authorization(booking.id, &authorization.payment_intent_id)
                        .await;
                }
                Err(BookingError::Conflict)
            }
        }
    }

    async fn record_incomplete_authorization(
        &self,
        booking: &BookingEntity,
        expected: PaymentStatus,
        authorization: Authorization,
        now: DateTime<Utc>,
    ) -> UseCaseResult<()> {
        let changes = BookingChangeset {
            payment_intent_id: Some(authorization.payment_intent_id.clone()),
            ..BookingChangeset::at(now)
        }
        .payment_status(authorization.status);

        let outcome = self
            .bookings
            .transition(
                booking.id,
                BookingGuard::status(BookingStatus::Pending).payment(&[expected]),
                changes,
            )
            .await?;
        if !outcome.is_applied() {
            self.payments
                .void_authorization(booking.id, &authorization.payment_intent_id)
                .await;
        }
        Ok(())
    }

    fn unexpected_payment(&self, booking: &BookingEntity, payment_status: PaymentStatus) -> BookingError {
        error!(
            booking_id = %booking.id,
            status = %booking.status,
            %payment_status,
            "bookings: payment status inconsistent with booking status"
        );
        BookingError::DataIntegrity(format!(
            "booking {} is {} with payment {payment_status}",
            booking.id, booking.status
        ))
    }

    /// Client or companion cancels before the meeting has been verified.
    pub async fn cancel_booking(
        &self,
        booking_id: Uuid,
        actor_id: Uuid,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> UseCaseResult<TransitionOutcome<BookingEntity>> {
        let mut booking = self.load(booking_id).await?;
        let party = booking.party_of(actor_id).ok_or(BookingError::Forbidden)?;
        let status = booking.status()?;
        if !BookingStatus::holding().contains(&status) {
            return Err(BookingError::invalid_transition("cancel", status));
        }

        let cancelled_by = match party {
            Party::Client => CancelledBy::Client,
            Party::Companion => CancelledBy::Companion,
        };
        let reason = reason
            .map(|reason| reason.trim().to_string())
            .filter(|reason| !reason.is_empty())
            .unwrap_or_else(|| format!("cancelled_by_{party}"));

        for _ in 0..CANCEL_ATTEMPTS {
            if !BookingStatus::holding().contains(&booking.status()?) {
                return Ok(TransitionOutcome::Stale);
            }
            if let Some(verification) = self.verifications.find_by_booking(booking.id).await? {
                if verification.both_verified_at.is_some() {
                    return Err(BookingError::InvalidTransition(
                        "meeting has already been verified".to_string(),
                    ));
                }
            }

            let termination = Termination {
                from: &[BookingStatus::Pending, BookingStatus::Confirmed],
                status: BookingStatus::Cancelled,
                event: BookingEventKind::BookingCancelled,
                cancelled_by,
                reason: reason.clone(),
            };
            match self.terminate(&booking, termination, now).await? {
                TransitionOutcome::Applied(cancelled) => {
                    return Ok(TransitionOutcome::Applied(cancelled));
                }
                TransitionOutcome::Stale => booking = self.load(booking_id).await?,
            }
        }

        Ok(TransitionOutcome::Stale)
    }

    /// Companion closes a verified meeting before its scheduled end.
    pub async fn complete_booking(
        &self,
        booking_id: Uuid,
        actor_id: Uuid,
        now: DateTime<Utc>,
    ) -> UseCaseResult<TransitionOutcome<BookingEntity>> {
        let booking = self.load(booking_id).await?;
        match booking.party_of(actor_id) {
            Some(Party::Companion) => {}
            _ => return Err(BookingError::Forbidden),
        }
        match booking.status()? {
            BookingStatus::Confirmed => {}
            BookingStatus::Completed => return Ok(TransitionOutcome::Stale),
            other => return Err(BookingError::invalid_transition("complete", other)),
        }

        self.complete_verified(&booking, now).await
    }

    /// `confirmed -> completed` for a verified meeting, capturing first if
    /// the earlier capture did not go through.
    pub async fn complete_verified(
        &self,
        booking: &BookingEntity,
        now: DateTime<Utc>,
    ) -> UseCaseResult<TransitionOutcome<BookingEntity>> {
        let verified = self
            .verifications
            .find_by_booking(booking.id)
            .await?
            .is_some_and(|v| v.both_verified_at.is_some());
        if !verified {
            return Err(BookingError::InvalidTransition(
                "meeting was not verified by both parties".to_string(),
            ));
        }

        let mut current = booking.clone();
        if current.payment_status()? == PaymentStatus::Authorized {
            current = match self.payments.capture(&current, now).await? {
                TransitionOutcome::Applied(captured) => captured,
                TransitionOutcome::Stale => self.load(booking.id).await?,
            };
        }
        if current.payment_status()? != PaymentStatus::Paid {
            return Err(BookingError::InvalidTransition(format!(
                "payment is {}, not captured",
                current.payment_status
            )));
        }

        let changes = BookingChangeset {
            completed_at: Some(now),
            ..BookingChangeset::at(now)
        }
        .status(BookingStatus::Completed);
        let outcome = self
            .bookings
            .transition(
                current.id,
                BookingGuard::status(BookingStatus::Confirmed).payment(&[PaymentStatus::Paid]),
                changes,
            )
            .await?;

        if let TransitionOutcome::Applied(completed) = &outcome {
            info!(booking_id = %completed.id, "bookings: completed");
            self.broadcaster.emit_to_parties(
                completed,
                BookingEventKind::BookingCompleted,
                json!({ "completed_at": completed.completed_at }),
            );
        }
        Ok(outcome)
    }

    /// A pending booking whose start passed without approval.
    pub async fn expire_pending(
        &self,
        booking: &BookingEntity,
        now: DateTime<Utc>,
    ) -> UseCaseResult<TransitionOutcome<BookingEntity>> {
        let termination = Termination {
            from: &[BookingStatus::Pending],
            status: BookingStatus::Expired,
            event: BookingEventKind::BookingExpired,
            cancelled_by: CancelledBy::System,
            reason: REASON_NOT_APPROVED.to_string(),
        };
        self.terminate(booking, termination, now).await
    }

    /// A confirmed booking whose verification lapsed, or never opened.
    /// When only the client showed up the booking is cancelled on the
    /// companion's account; otherwise it is a no-show. The hold is reversed
    /// either way.
    pub async fn resolve_lapsed(
        &self,
        booking: &BookingEntity,
        verification: Option<&BookingVerificationEntity>,
        now: DateTime<Utc>,
    ) -> UseCaseResult<TransitionOutcome<BookingEntity>> {
        if verification.is_some_and(|v| v.both_verified_at.is_some()) {
            return Ok(TransitionOutcome::Stale);
        }

        let client_verified = verification.is_some_and(|v| v.client_verified_at.is_some());
        let companion_verified = verification.is_some_and(|v| v.companion_verified_at.is_some());

        let termination = match (client_verified, companion_verified) {
            (true, false) => Termination {
                from: &[BookingStatus::Confirmed],
                status: BookingStatus::Cancelled,
                event: BookingEventKind::BookingCancelled,
                cancelled_by: CancelledBy::System,
                reason: REASON_COMPANION_NO_SHOW.to_string(),
            },
            (false, true) => Termination {
                from: &[BookingStatus::Confirmed],
                status: BookingStatus::NoShow,
                event: BookingEventKind::BookingNoShow,
                cancelled_by: CancelledBy::System,
                reason: REASON_CLIENT_NO_SHOW.to_string(),
            },
            _ => Termination {
                from: &[BookingStatus::Confirmed],
                status: BookingStatus::NoShow,
                event: BookingEventKind::BookingNoShow,
                cancelled_by: CancelledBy::System,
                reason: REASON_NO_SHOW.to_string(),
            },
        };
        self.terminate(booking, termination, now).await
    }

    async fn terminate(
        &self,
        booking: &BookingEntity,
        termination: Termination,
        now: DateTime<Utc>,
    ) -> UseCaseResult<TransitionOutcome<BookingEntity>> {
        let payment_status = booking.payment_status()?;
        let settlement = self.payments.settle_cancellation(booking).await?;

        let changes = BookingChangeset {
            refund_id: settlement.refund_id.clone(),
            cancelled_by: Some(termination.cancelled_by.to_string()),
            cancellation_reason: Some(termination.reason.clone()),
            cancelled_at: Some(now),
            ..BookingChangeset::at(now)
        }
        .status(termination.status)
        .payment_status(settlement.payment_status);
        let guard = BookingGuard::statuses(termination.from).payment(&[payment_status]);

        let outcome = self.bookings.transition(booking.id, guard, changes).await?;
        match &outcome {
            TransitionOutcome::Applied(ended) => {
                info!(
                    booking_id = %ended.id,
                    status = %termination.status,
                    cancelled_by = %termination.cancelled_by,
                    reason = %termination.reason,
                    payment_status = %settlement.payment_status,
                    "bookings: ended early"
                );
                self.broadcaster.emit_to_parties(
                    ended,
                    termination.event,
                    json!({
                        "status": termination.status,
                        "cancelled_by": termination.cancelled_by,
                        "reason": termination.reason,
                        "payment_status": settlement.payment_status,
                    }),
                );
                if let Some(refund_id) = &settlement.refund_id {
                    self.broadcaster.emit_to_parties(
                        ended,
                        BookingEventKind::PaymentRefunded,
                        json!({ "refund_id": refund_id }),
                    );
                }
                self.broadcaster
                    .availability_changed(ended.companion_id, ended.starts_at, ended.ends_at);
            }
            TransitionOutcome::Stale if settlement.payment_status != payment_status => {
                self.reconcile_after_stale_settlement(booking).await?;
            }
            TransitionOutcome::Stale => {}
        }
        Ok(outcome)
    }

    /// The provider call went through but the row had moved on. If the row
    /// still claims the money state we just undid, an operator has to look.
    async fn reconcile_after_stale_settlement(&self, booking: &BookingEntity) -> UseCaseResult<()> {
        let Some(current) = self.bookings.find_by_id(booking.id).await? else {
            return Ok(());
        };
        let still_holding = current.payment_intent_id == booking.payment_intent_id
            && current.payment_status == booking.payment_status
            && !current.status()?.is_terminal();
        if still_holding {
            error!(
                booking_id = %booking.id,
                status = %current.status,
                payment_status = %current.payment_status,
                payment_intent_id = ?current.payment_intent_id,
                "bookings: payment reversed at the provider but booking still holds it"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        realtime::connection_registry::ConnectionRegistry,
        testing::{
            fakes::FakePaymentGateway,
            fixtures::{booking_fixture, confirmed_booking_fixture, verification_fixture},
            in_memory::InMemoryStore,
        },
    };
    use std::sync::atomic::Ordering;

    struct Harness {
        store: Arc<InMemoryStore>,
        gateway: Arc<FakePaymentGateway>,
        registry: Arc<ConnectionRegistry>,
        lifecycle: BookingLifecycleUseCase,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(FakePaymentGateway::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = EventBroadcaster::new(Arc::clone(&registry));
        let payments = Arc::new(PaymentCoordinator::new(
            store.clone(),
            gateway.clone(),
            broadcaster.clone(),
        ));
        let lifecycle = BookingLifecycleUseCase::new(
            store.clone(),
            store.clone(),
            payments,
            broadcaster,
            BookingRules::default(),
        );
        Harness {
            store,
            gateway,
            registry,
            lifecycle,
        }
    }

    fn slot(date: &str, start_time: &str) -> MeetingSlotModel {
        MeetingSlotModel {
            date: date.to_string(),
            start_time: start_time.to_string(),
            timezone: "Asia/Bangkok".to_string(),
            duration_minutes: 90,
            meeting_type: MeetingType::InPerson,
            meeting_location: Some("  Lumphini Park gate  ".to_string()),
            meeting_location_lat: Some(13.7314),
            meeting_location_lon: Some(100.5414),
        }
    }

    fn create_model(companion_id: Uuid) -> CreateBookingModel {
        CreateBookingModel {
            companion_id,
            slot: slot("2030-01-15", "18:30"),
            base_amount_minor: 200_000,
            extra_amount_minor: 10_000,
            currency: "thb".to_string(),
            payment_method_ref: Some("pm_card_visa".to_string()),
        }
    }

    #[test]
    fn slot_is_resolved_to_utc() {
        let now = Utc::now();
        let resolved = resolve_slot(&slot("2030-01-15", "18:30"), now).unwrap();

        assert_eq!(resolved.starts_at.to_rfc3339(), "2030-01-15T11:30:00+00:00");
        assert_eq!(resolved.ends_at - resolved.starts_at, Duration::minutes(90));
        assert_eq!(resolved.meeting_location.as_deref(), Some("Lumphini Park gate"));
    }

    #[test]
    fn slot_validation_rejects_bad_input() {
        let now = Utc::now();

        let past = slot("2001-01-01", "10:00");
        assert!(matches!(resolve_slot(&past, now), Err(BookingError::InvalidInput(_))));

        let mut short = slot("2030-01-15", "18:30");
        short.duration_minutes = 5;
        assert!(resolve_slot(&short, now).is_err());

        let mut nowhere = slot("2030-01-15", "18:30");
        nowhere.meeting_location_lat = None;
        nowhere.meeting_location_lon = None;
        assert!(resolve_slot(&nowhere, now).is_err());

        nowhere.meeting_type = MeetingType::Virtual;
        assert!(resolve_slot(&nowhere, now).is_ok());
    }

    #[tokio::test]
    async fn create_booking_rejects_overlap_and_self_booking() {
        let h = harness();
        let now = Utc::now();
        let client_id = Uuid::new_v4();
        let companion_id = Uuid::new_v4();

        let created = h
            .lifecycle
            .create_booking(client_id, create_model(companion_id), now)
            .await
            .unwrap();
        assert_eq!(created.status, "pending");
        assert_eq!(created.payment_status, "unpaid");
        assert_eq!(created.currency, "THB");

        let overlap = h
            .lifecycle
            .create_booking(Uuid::new_v4(), create_model(companion_id), now)
            .await;
        assert!(matches!(overlap, Err(BookingError::Conflict)));

        let own = h
            .lifecycle
            .create_booking(companion_id, create_model(companion_id), now)
            .await;
        assert!(matches!(own, Err(BookingError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn approval_authorizes_and_confirms() {
        let h = harness();
        let now = Utc::now();
        let booking = booking_fixture(now + Duration::days(1));
        h.store.put_booking(booking.clone());
        let (_, mut client_events) = h.registry.add(booking.client_id);

        let outcome = h
            .lifecycle
            .approve_booking(booking.id, booking.companion_id, now)
            .await
            .unwrap();

        let confirmed = outcome.applied().unwrap();
        assert_eq!(confirmed.status, "confirmed");
        assert_eq!(confirmed.payment_status, "authorized");
        assert!(confirmed.payment_intent_id.is_some());

        let first = client_events.recv().await.unwrap();
        assert!(first.contains("payment_authorized"));
        let second = client_events.recv().await.unwrap();
        assert!(second.contains("booking_confirmed"));
    }

    #[tokio::test]
    async fn authorization_failure_keeps_booking_pending() {
        let h = harness();
        let now = Utc::now();
        let booking = booking_fixture(now + Duration::days(1));
        h.store.put_booking(booking.clone());
        h.gateway.fail_authorize.store(true, Ordering::SeqCst);

        let result = h
            .lifecycle
            .approve_booking(booking.id, booking.companion_id, now)
            .await;

        assert!(matches!(result, Err(BookingError::ExternalProvider(_))));
        let stored = h.store.booking(booking.id).unwrap();
        assert_eq!(stored.status, "pending");
        assert_eq!(stored.payment_status, "unpaid");
    }

    #[tokio::test]
    async fn concurrent_approvals_confirm_exactly_once() {
        let h = harness();
        let now = Utc::now();
        let booking = booking_fixture(now + Duration::days(1));
        h.store.put_booking(booking.clone());

        let (first, second) = tokio::join!(
            h.lifecycle
                .approve_booking(booking.id, booking.companion_id, now),
            h.lifecycle
                .approve_booking(booking.id, booking.companion_id, now),
        );
        let outcomes = [first.unwrap(), second.unwrap()];

        assert_eq!(outcomes.iter().filter(|o| o.is_applied()).count(), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| **o == TransitionOutcome::Stale)
                .count(),
            1
        );

        // The loser's hold, if it placed one, is reversed.
        let authorizations = h
            .gateway
            .calls()
            .iter()
            .filter(|call| matches!(call, crate::testing::fakes::GatewayCall::Authorize(_)))
            .count();
        assert_eq!(h.gateway.cancellations(), authorizations - 1);
        assert_eq!(h.store.booking(booking.id).unwrap().status, "confirmed");
    }

    #[tokio::test]
    async fn approval_conflicts_with_overlapping_confirmed_booking() {
        let h = harness();
        let now = Utc::now();
        let starts_at = now + Duration::days(1);
        let confirmed = confirmed_booking_fixture(starts_at);
        let mut pending = booking_fixture(starts_at + Duration::minutes(30));
        pending.companion_id = confirmed.companion_id;
        h.store.put_booking(confirmed);
        h.store.put_booking(pending.clone());

        let result = h
            .lifecycle
            .approve_booking(pending.id, pending.companion_id, now)
            .await;

        assert!(matches!(result, Err(BookingError::Conflict)));
        assert_eq!(h.gateway.cancellations(), 1);
        assert_eq!(h.store.booking(pending.id).unwrap().status, "pending");
    }

    #[tokio::test]
    async fn cancelling_confirmed_booking_reverses_hold() {
        let h = harness();
        let now = Utc::now();
        let booking = confirmed_booking_fixture(now + Duration::days(1));
        h.store.put_booking(booking.clone());

        let outcome = h
            .lifecycle
            .cancel_booking(booking.id, booking.client_id, Some("plans changed".to_string()), now)
            .await
            .unwrap();

        let cancelled = outcome.applied().unwrap();
        assert_eq!(cancelled.status, "cancelled");
        assert_eq!(cancelled.payment_status, "cancelled");
        assert_eq!(cancelled.cancelled_by.as_deref(), Some("client"));
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("plans changed"));
        assert_eq!(h.gateway.cancellations(), 1);

        let again = h
            .lifecycle
            .cancel_booking(booking.id, booking.client_id, None, now)
            .await;
        assert!(matches!(again, Err(BookingError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn cancellation_is_blocked_once_meeting_verified() {
        let h = harness();
        let now = Utc::now();
        let booking = confirmed_booking_fixture(now);
        let mut verification = verification_fixture(booking.id, now + Duration::minutes(10));
        verification.client_verified_at = Some(now);
        verification.companion_verified_at = Some(now);
        verification.both_verified_at = Some(now);
        h.store.put_booking(booking.clone());
        h.store.put_verification(verification);

        let result = h
            .lifecycle
            .cancel_booking(booking.id, booking.companion_id, None, now)
            .await;

        assert!(matches!(result, Err(BookingError::InvalidTransition(_))));
        assert_eq!(h.gateway.cancellations(), 0);
    }

    #[tokio::test]
    async fn strangers_cannot_touch_a_booking() {
        let h = harness();
        let now = Utc::now();
        let booking = booking_fixture(now + Duration::days(1));
        h.store.put_booking(booking.clone());
        let stranger = Uuid::new_v4();

        assert!(matches!(
            h.lifecycle.cancel_booking(booking.id, stranger, None, now).await,
            Err(BookingError::Forbidden)
        ));
        assert!(matches!(
            h.lifecycle.approve_booking(booking.id, booking.client_id, now).await,
            Err(BookingError::Forbidden)
        ));
        assert!(matches!(
            h.lifecycle.get_booking(booking.id, stranger, now).await,
            Err(BookingError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn completion_captures_outstanding_authorization() {
        let h = harness();
        let now = Utc::now();
        let booking = confirmed_booking_fixture(now - Duration::hours(2));
        let mut verification = verification_fixture(booking.id, booking.starts_at);
        verification.client_verified_at = Some(booking.starts_at);
        verification.companion_verified_at = Some(booking.starts_at);
        verification.both_verified_at = Some(booking.starts_at);
        h.store.put_booking(booking.clone());
        h.store.put_verification(verification);

        let outcome = h
            .lifecycle
            .complete_booking(booking.id, booking.companion_id, now)
            .await
            .unwrap();

        let completed = outcome.applied().unwrap();
        assert_eq!(completed.status, "completed");
        assert_eq!(completed.payment_status, "paid");
        assert_eq!(completed.completed_at, Some(now));
        assert_eq!(h.gateway.captures(), 1);
    }

    #[tokio::test]
    async fn lapsed_verification_with_only_client_present_cancels() {
        let h = harness();
        let now = Utc::now();
        let booking = confirmed_booking_fixture(now - Duration::minutes(30));
        let mut verification = verification_fixture(booking.id, now - Duration::minutes(20));
        verification.client_verified_at = Some(now - Duration::minutes(25));
        h.store.put_booking(booking.clone());

        let ended = h
            .lifecycle
            .resolve_lapsed(&booking, Some(&verification), now)
            .await
            .unwrap()
            .applied()
            .unwrap();

        assert_eq!(ended.status, "cancelled");
        assert_eq!(ended.cancelled_by.as_deref(), Some("system"));
        assert_eq!(ended.cancellation_reason.as_deref(), Some(REASON_COMPANION_NO_SHOW));
        assert_eq!(ended.payment_status, "cancelled");
    }
}
