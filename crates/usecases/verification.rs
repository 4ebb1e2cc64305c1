use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    domain::{
        entities::{
            booking_verifications::{BookingVerificationEntity, InsertBookingVerificationEntity},
            bookings::BookingEntity,
        },
        repositories::{
            booking_verifications::BookingVerificationRepository,
            bookings::BookingRepository,
            notification_channel::{Notification, NotificationChannel},
        },
        value_objects::{
            booking_events::BookingEventKind,
            booking_rules::BookingRules,
            enums::{
                booking_statuses::BookingStatus, parties::Party,
                verification_statuses::VerificationStatus,
            },
            meeting_phase::MeetingPhase,
            transitions::{PartyVerificationOutcome, TransitionOutcome},
            verification::{SubmitVerificationModel, VerificationRejection, VerificationStatusDto},
        },
    },
    realtime::broadcaster::EventBroadcaster,
    usecases::{
        errors::{BookingError, UseCaseResult},
        payment_coordinator::PaymentCoordinator,
    },
    utils::{
        geo::{Coordinates, haversine_meters},
        otp::{generate_code, hash_code, verify_code},
        time::format_local,
    },
};

pub const CODE_NOTIFICATION_KIND: &str = "verification_code";

/// Issues per-party codes, checks submissions against code and meeting point,
/// and records who showed up. Completing the pair triggers the capture.
pub struct VerificationEngine {
    bookings: Arc<dyn BookingRepository + Send + Sync>,
    verifications: Arc<dyn BookingVerificationRepository + Send + Sync>,
    notifications: Arc<dyn NotificationChannel + Send + Sync>,
    payments: Arc<PaymentCoordinator>,
    broadcaster: EventBroadcaster,
    rules: BookingRules,
}

impl VerificationEngine {
    pub fn new(
        bookings: Arc<dyn BookingRepository + Send + Sync>,
        verifications: Arc<dyn BookingVerificationRepository + Send + Sync>,
        notifications: Arc<dyn NotificationChannel + Send + Sync>,
        payments: Arc<PaymentCoordinator>,
        broadcaster: EventBroadcaster,
        rules: BookingRules,
    ) -> Self {
        Self {
            bookings,
            verifications,
            notifications,
            payments,
            broadcaster,
            rules,
        }
    }

    /// Booking and the caller's side of it.
    async fn load_for_party(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
    ) -> UseCaseResult<(BookingEntity, Party)> {
        let booking = self
            .bookings
            .find_by_id(booking_id)
            .await?
            .ok_or(BookingError::NotFound("booking"))?;
        let party = booking.party_of(user_id).ok_or(BookingError::Forbidden)?;
        Ok((booking, party))
    }

    async fn load_window(&self, booking_id: Uuid) -> UseCaseResult<BookingVerificationEntity> {
        self.verifications
            .find_by_booking(booking_id)
            .await?
            .ok_or(BookingError::Rejected(VerificationRejection::WindowNotOpen))
    }

    /// Creates the verification row with fresh codes for both parties and
    /// sends them out. `None` when the window was already open.
    pub async fn open_window(
        &self,
        booking: &BookingEntity,
        now: DateTime<Utc>,
    ) -> UseCaseResult<Option<BookingVerificationEntity>> {
        let status = booking.status()?;
        if status != BookingStatus::Confirmed {
            return Err(BookingError::invalid_transition("open verification for", status));
        }

        let client_code = generate_code();
        let companion_code = generate_code();
        let insert = InsertBookingVerificationEntity {
            booking_id: booking.id,
            client_otp_hash: Some(hash_code(booking.id, Party::Client, &client_code)),
            companion_otp_hash: Some(hash_code(booking.id, Party::Companion, &companion_code)),
            client_otp_generated_at: Some(now),
            companion_otp_generated_at: Some(now),
            expires_at: self.rules.window_closes_at(booking.starts_at),
            verification_status: VerificationStatus::Pending.to_string(),
        };

        let Some(verification) = self.verifications.open_window(insert).await? else {
            debug!(booking_id = %booking.id, "verification: window already open");
            return Ok(None);
        };

        info!(
            booking_id = %booking.id,
            expires_at = %verification.expires_at,
            "verification: window opened"
        );
        for (party, code) in [(Party::Client, client_code), (Party::Companion, companion_code)] {
            if let Err(err) = self.deliver_code(booking, party, &code, now).await {
                warn!(
                    booking_id = %booking.id,
                    %party,
                    error = %err,
                    "verification: code delivery failed, will retry"
                );
            }
        }

        self.broadcaster.emit_to_parties(
            booking,
            BookingEventKind::VerificationWindowOpened,
            json!({ "expires_at": verification.expires_at }),
        );
        Ok(Some(verification))
    }

    async fn deliver_code(
        &self,
        booking: &BookingEntity,
        party: Party,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let notification = Notification {
            kind: CODE_NOTIFICATION_KIND.to_string(),
            title: "Your meeting code".to_string(),
            body: format!(
                "Your code for the meeting at {} is {code}. Enter it yourself in the app once you \
                 are at the meeting point. It only works for your own account, so do not share it.",
                format_local(booking.starts_at, &booking.timezone),
            ),
            booking_id: Some(booking.id),
        };

        self.notifications
            .send(booking.user_for(party), notification)
            .await?;
        self.verifications
            .mark_code_sent(booking.id, party, now)
            .await?;
        Ok(())
    }

    /// Swaps in and sends a new code for every unverified party whose code
    /// never arrived. Returns how many codes went out.
    pub async fn redeliver_codes(
        &self,
        verification: &BookingVerificationEntity,
        booking: &BookingEntity,
        now: DateTime<Utc>,
    ) -> UseCaseResult<usize> {
        let mut delivered = 0;
        for party in [Party::Client, Party::Companion] {
            if verification.otp_sent_at(party).is_some() || verification.verified_at(party).is_some()
            {
                continue;
            }

            let code = generate_code();
            let outcome = self
                .verifications
                .replace_code(booking.id, party, hash_code(booking.id, party, &code), now)
                .await?;
            if !outcome.is_applied() {
                continue;
            }

            match self.deliver_code(booking, party, &code, now).await {
                Ok(()) => delivered += 1,
                Err(err) => warn!(
                    booking_id = %booking.id,
                    %party,
                    error = %err,
                    "verification: code redelivery failed"
                ),
            }
        }
        Ok(delivered)
    }

    /// Issues a new code for the caller while their side is unverified.
    pub async fn resend_code(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> UseCaseResult<()> {
        let (booking, party) = self.load_for_party(booking_id, user_id).await?;
        let status = booking.status()?;
        if status != BookingStatus::Confirmed {
            return Err(BookingError::invalid_transition("resend a code for", status));
        }

        let verification = self.load_window(booking.id).await?;
        self.check_open(&verification, party, now)?;
        if verification.failed_attempts(party) >= self.rules.otp_max_failed_attempts {
            return Err(VerificationRejection::TooManyAttempts.into());
        }

        let code = generate_code();
        let outcome = self
            .verifications
            .replace_code(booking.id, party, hash_code(booking.id, party, &code), now)
            .await?;
        if !outcome.is_applied() {
            return Err(VerificationRejection::WindowNotOpen.into());
        }

        self.deliver_code(&booking, party, &code, now)
            .await
            .map_err(|err| {
                warn!(booking_id = %booking.id, %party, error = %err, "verification: resend failed");
                BookingError::ExternalProvider(err)
            })?;
        info!(booking_id = %booking.id, %party, "verification: code resent");
        Ok(())
    }

    fn check_open(
        &self,
        verification: &BookingVerificationEntity,
        party: Party,
        now: DateTime<Utc>,
    ) -> Result<(), VerificationRejection> {
        if verification.verified_at(party).is_some() {
            return Err(VerificationRejection::AlreadyVerified);
        }
        if now >= verification.expires_at {
            return Err(VerificationRejection::CodeExpired);
        }
        let pending = verification
            .status()
            .is_ok_and(|status| status == VerificationStatus::Pending);
        if !pending || verification.both_verified_at.is_some() {
            return Err(VerificationRejection::WindowNotOpen);
        }
        Ok(())
    }

    /// Checks one party's code and position. A wrong code counts against the
    /// party's attempts; nothing else is written unless the submission passes.
    pub async fn submit(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
        submission: SubmitVerificationModel,
        now: DateTime<Utc>,
    ) -> UseCaseResult<VerificationStatusDto> {
        let (booking, party) = self.load_for_party(booking_id, user_id).await?;
        let status = booking.status()?;
        if status != BookingStatus::Confirmed {
            return Err(BookingError::invalid_transition("verify", status));
        }

        let verification = self.load_window(booking.id).await?;
        self.check_open(&verification, party, now)?;

        let max_attempts = self.rules.otp_max_failed_attempts;
        if verification.failed_attempts(party) >= max_attempts {
            return Err(VerificationRejection::TooManyAttempts.into());
        }

        let code_matches = verification
            .otp_hash(party)
            .is_some_and(|stored| verify_code(booking.id, party, &submission.code, stored));
        if !code_matches {
            let attempts = self
                .verifications
                .record_failed_attempt(booking.id, party, now)
                .await?;
            info!(booking_id = %booking.id, %party, attempts, "verification: wrong code");
            return Err(if attempts >= max_attempts {
                VerificationRejection::TooManyAttempts
            } else {
                VerificationRejection::InvalidCode
            }
            .into());
        }

        let location = self.check_location(&booking, party, &submission)?;

        let outcome = self
            .verifications
            .record_verification(booking.id, party, location, now)
            .await?;
        let verification = match outcome {
            PartyVerificationOutcome::Recorded(verification) => {
                info!(booking_id = %booking.id, %party, "verification: party verified");
                self.broadcaster.emit_to_parties(
                    &booking,
                    BookingEventKind::PartyVerified,
                    json!({ "party": party }),
                );
                verification
            }
            PartyVerificationOutcome::BothVerified(verification) => {
                info!(booking_id = %booking.id, %party, "verification: both parties verified");
                self.broadcaster.emit_to_parties(
                    &booking,
                    BookingEventKind::PartyVerified,
                    json!({ "party": party }),
                );
                self.broadcaster.emit_to_parties(
                    &booking,
                    BookingEventKind::VerificationCompleted,
                    json!({ "both_verified_at": verification.both_verified_at }),
                );
                self.capture_after_verification(&booking, now).await;
                verification
            }
            PartyVerificationOutcome::Stale => {
                let current = self.load_window(booking.id).await?;
                self.check_open(&current, party, now)?;
                return Err(VerificationRejection::WindowNotOpen.into());
            }
        };

        Ok(self.status_dto(&booking, Some(&verification), party, now))
    }

    /// Position check for in-person meetings. Virtual meetings skip it and
    /// any submitted position is ignored.
    fn check_location(
        &self,
        booking: &BookingEntity,
        party: Party,
        submission: &SubmitVerificationModel,
    ) -> UseCaseResult<Option<Coordinates>> {
        if !booking.meeting_type()?.requires_proximity() {
            return Ok(None);
        }

        let position = Coordinates::from_parts(submission.lat, submission.lon)
            .map_err(|err| BookingError::InvalidInput(err.to_string()))?
            .ok_or(VerificationRejection::LocationRequired)?;

        let meeting_point = booking.meeting_point().ok_or_else(|| {
            error!(booking_id = %booking.id, "verification: in-person booking has no meeting point");
            BookingError::DataIntegrity(format!(
                "in-person booking {} has no meeting coordinates",
                booking.id
            ))
        })?;

        let distance = haversine_meters(meeting_point, position);
        if distance > self.rules.verification_radius_meters {
            info!(
                booking_id = %booking.id,
                %party,
                distance_meters = distance.round(),
                radius_meters = self.rules.verification_radius_meters,
                "verification: submitted position out of range"
            );
            return Err(VerificationRejection::OutOfRange.into());
        }
        Ok(Some(position))
    }

    async fn capture_after_verification(&self, booking: &BookingEntity, now: DateTime<Utc>) {
        let current = match self.bookings.find_by_id(booking.id).await {
            Ok(Some(current)) => current,
            Ok(None) => return,
            Err(err) => {
                warn!(booking_id = %booking.id, error = %err, "verification: reload before capture failed");
                return;
            }
        };

        if let Err(err) = self.payments.capture(&current, now).await {
            warn!(
                booking_id = %booking.id,
                error = %err,
                "verification: capture after verification failed, completion sweep will retry"
            );
        }
    }

    /// One extra stretch of time per window, for either party.
    pub async fn extend_window(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> UseCaseResult<VerificationStatusDto> {
        let (booking, party) = self.load_for_party(booking_id, user_id).await?;
        let status = booking.status()?;
        if status != BookingStatus::Confirmed {
            return Err(BookingError::invalid_transition("extend verification for", status));
        }

        let verification = self.load_window(booking.id).await?;
        if verification.extended_at.is_some() {
            return Err(VerificationRejection::ExtensionUsed.into());
        }
        if !verification.is_window_open(now) {
            return Err(VerificationRejection::WindowNotOpen.into());
        }

        let new_expires_at = verification.expires_at + self.rules.verification_extension;
        let extended = match self
            .verifications
            .extend_window(booking.id, party, new_expires_at, now)
            .await?
        {
            TransitionOutcome::Applied(extended) => extended,
            TransitionOutcome::Stale => {
                let current = self.load_window(booking.id).await?;
                return Err(if current.extended_at.is_some() {
                    VerificationRejection::ExtensionUsed
                } else {
                    VerificationRejection::WindowNotOpen
                }
                .into());
            }
        };

        info!(
            booking_id = %booking.id,
            %party,
            expires_at = %extended.expires_at,
            "verification: window extended"
        );
        self.broadcaster.emit_to_parties(
            &booking,
            BookingEventKind::VerificationExtended,
            json!({ "expires_at": extended.expires_at, "requested_by": party }),
        );
        Ok(self.status_dto(&booking, Some(&extended), party, now))
    }

    pub async fn status(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> UseCaseResult<VerificationStatusDto> {
        let (booking, party) = self.load_for_party(booking_id, user_id).await?;
        let verification = self.verifications.find_by_booking(booking.id).await?;
        Ok(self.status_dto(&booking, verification.as_ref(), party, now))
    }

    fn status_dto(
        &self,
        booking: &BookingEntity,
        verification: Option<&BookingVerificationEntity>,
        party: Party,
        now: DateTime<Utc>,
    ) -> VerificationStatusDto {
        VerificationStatusDto {
            booking_id: booking.id,
            phase: MeetingPhase::derive(booking, verification, now),
            you: party,
            you_verified_at: verification.and_then(|v| v.verified_at(party)),
            other_party_verified: verification
                .is_some_and(|v| v.verified_at(party.other()).is_some()),
            expires_at: verification.map(|v| v.expires_at),
            both_verified_at: verification.and_then(|v| v.both_verified_at),
            can_extend: verification
                .is_some_and(|v| v.is_window_open(now) && v.extended_at.is_none()),
        }
    }

    /// `pending -> expired` for a window whose deadline passed without both
    /// parties verifying.
    pub async fn expire_window(
        &self,
        verification: &BookingVerificationEntity,
        now: DateTime<Utc>,
    ) -> UseCaseResult<TransitionOutcome<BookingVerificationEntity>> {
        let outcome = self
            .verifications
            .expire_window(verification.booking_id, now)
            .await?;

        if let TransitionOutcome::Applied(expired) = &outcome {
            info!(
                booking_id = %expired.booking_id,
                client_verified = expired.client_verified_at.is_some(),
                companion_verified = expired.companion_verified_at.is_some(),
                "verification: window expired"
            );
            if let Some(booking) = self.bookings.find_by_id(expired.booking_id).await? {
                self.broadcaster.emit_to_parties(
                    &booking,
                    BookingEventKind::VerificationExpired,
                    json!({
                        "client_verified": expired.client_verified_at.is_some(),
                        "companion_verified": expired.companion_verified_at.is_some(),
                    }),
                );
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::repositories::{
            booking_verifications::MockBookingVerificationRepository,
            bookings::MockBookingRepository,
            notification_channel::MockNotificationChannel,
            payment_gateway::MockPaymentGateway,
        },
        realtime::connection_registry::ConnectionRegistry,
        testing::{
            fakes::{FakePaymentGateway, RecordingNotificationChannel, code_from},
            fixtures::{MEETING_LAT, MEETING_LON, confirmed_booking_fixture, verification_fixture},
            in_memory::InMemoryStore,
        },
    };
    use chrono::Duration;
    use std::sync::atomic::Ordering;

    struct Harness {
        store: Arc<InMemoryStore>,
        gateway: Arc<FakePaymentGateway>,
        notifications: Arc<RecordingNotificationChannel>,
        engine: VerificationEngine,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(FakePaymentGateway::new());
        let notifications = Arc::new(RecordingNotificationChannel::new());
        let broadcaster = EventBroadcaster::new(Arc::new(ConnectionRegistry::new()));
        let payments = Arc::new(PaymentCoordinator::new(
            store.clone(),
            gateway.clone(),
            broadcaster.clone(),
        ));
        let engine = VerificationEngine::new(
            store.clone(),
            store.clone(),
            notifications.clone(),
            payments,
            broadcaster,
            BookingRules::default(),
        );
        Harness {
            store,
            gateway,
            notifications,
            engine,
        }
    }

    fn at_meeting_point(code: &str) -> SubmitVerificationModel {
        SubmitVerificationModel {
            code: code.to_string(),
            lat: Some(MEETING_LAT),
            lon: Some(MEETING_LON),
        }
    }

    /// Opens the window for a confirmed booking starting in five minutes and
    /// returns it with both delivered codes.
    async fn open(h: &Harness) -> (BookingEntity, String, String, DateTime<Utc>) {
        let now = Utc::now();
        let booking = confirmed_booking_fixture(now + Duration::minutes(5));
        h.store.put_booking(booking.clone());

        h.engine.open_window(&booking, now).await.unwrap().unwrap();
        let client_code = code_from(&h.notifications.sent_to(booking.client_id)[0]).unwrap();
        let companion_code =
            code_from(&h.notifications.sent_to(booking.companion_id)[0]).unwrap();
        (booking, client_code, companion_code, now)
    }

    #[tokio::test]
    async fn opening_window_sends_distinct_codes_once() {
        let h = harness();
        let (booking, client_code, companion_code, now) = open(&h).await;

        let verification = h.store.verification(booking.id).unwrap();
        assert!(verification.client_otp_sent_at.is_some());
        assert!(verification.companion_otp_sent_at.is_some());
        assert_eq!(verification.expires_at, booking.starts_at + Duration::minutes(10));
        assert_ne!(verification.client_otp_hash, verification.companion_otp_hash);
        assert_ne!(verification.client_otp_hash.as_deref(), Some(client_code.as_str()));
        assert_eq!(companion_code.len(), 6);

        assert!(h.engine.open_window(&booking, now).await.unwrap().is_none());
        assert_eq!(h.notifications.sent().len(), 2);
    }

    #[tokio::test]
    async fn both_parties_verifying_sets_both_verified_and_captures() {
        let h = harness();
        let (booking, client_code, companion_code, now) = open(&h).await;

        let first = h
            .engine
            .submit(booking.id, booking.client_id, at_meeting_point(&client_code), now)
            .await
            .unwrap();
        assert!(first.you_verified_at.is_some());
        assert!(first.both_verified_at.is_none());
        assert_eq!(h.gateway.captures(), 0);

        let second = h
            .engine
            .submit(booking.id, booking.companion_id, at_meeting_point(&companion_code), now)
            .await
            .unwrap();
        assert_eq!(second.both_verified_at, Some(now));
        assert!(second.other_party_verified);
        assert_eq!(second.phase, MeetingPhase::InProgress);

        let stored = h.store.booking(booking.id).unwrap();
        assert_eq!(stored.payment_status, "paid");
        assert_eq!(h.gateway.captures(), 1);
    }

    #[tokio::test]
    async fn one_party_alone_never_sets_both_verified() {
        let h = harness();
        let (booking, client_code, _, now) = open(&h).await;

        h.engine
            .submit(booking.id, booking.client_id, at_meeting_point(&client_code), now)
            .await
            .unwrap();
        let again = h
            .engine
            .submit(booking.id, booking.client_id, at_meeting_point(&client_code), now)
            .await;

        assert!(matches!(
            again,
            Err(BookingError::Rejected(VerificationRejection::AlreadyVerified))
        ));
        let verification = h.store.verification(booking.id).unwrap();
        assert!(verification.both_verified_at.is_none());
        assert_eq!(verification.verification_status, "pending");
    }

    #[tokio::test]
    async fn position_kilometres_away_is_out_of_range_and_not_an_attempt() {
        let h = harness();
        let (booking, client_code, _, now) = open(&h).await;

        // Roughly 8 km north of the meeting point.
        let far_away = SubmitVerificationModel {
            code: client_code.clone(),
            lat: Some(MEETING_LAT + 0.072),
            lon: Some(MEETING_LON),
        };
        let result = h
            .engine
            .submit(booking.id, booking.client_id, far_away, now)
            .await;

        assert!(matches!(
            result,
            Err(BookingError::Rejected(VerificationRejection::OutOfRange))
        ));
        let verification = h.store.verification(booking.id).unwrap();
        assert!(verification.client_verified_at.is_none());
        assert_eq!(verification.client_failed_attempts, 0);

        let missing = SubmitVerificationModel {
            code: client_code,
            lat: None,
            lon: None,
        };
        assert!(matches!(
            h.engine.submit(booking.id, booking.client_id, missing, now).await,
            Err(BookingError::Rejected(VerificationRejection::LocationRequired))
        ));
    }

    #[tokio::test]
    async fn virtual_meetings_skip_the_proximity_check() {
        let h = harness();
        let now = Utc::now();
        let mut booking = confirmed_booking_fixture(now + Duration::minutes(5));
        booking.meeting_type = "virtual".to_string();
        booking.meeting_location_lat = None;
        booking.meeting_location_lon = None;
        h.store.put_booking(booking.clone());
        h.engine.open_window(&booking, now).await.unwrap();
        let code = code_from(&h.notifications.sent_to(booking.client_id)[0]).unwrap();

        let submission = SubmitVerificationModel {
            code,
            lat: None,
            lon: None,
        };
        let status = h
            .engine
            .submit(booking.id, booking.client_id, submission, now)
            .await
            .unwrap();
        assert!(status.you_verified_at.is_some());
    }

    #[tokio::test]
    async fn repeated_wrong_codes_lock_the_party_out() {
        let h = harness();
        let (booking, client_code, _, now) = open(&h).await;
        let max = BookingRules::default().otp_max_failed_attempts;

        for attempt in 1..=max {
            let result = h
                .engine
                .submit(booking.id, booking.client_id, at_meeting_point("000000x"), now)
                .await;
            let expected = if attempt < max {
                VerificationRejection::InvalidCode
            } else {
                VerificationRejection::TooManyAttempts
            };
            assert!(matches!(result, Err(BookingError::Rejected(r)) if r == expected));
        }

        let locked = h
            .engine
            .submit(booking.id, booking.client_id, at_meeting_point(&client_code), now)
            .await;
        assert!(matches!(
            locked,
            Err(BookingError::Rejected(VerificationRejection::TooManyAttempts))
        ));
    }

    #[tokio::test]
    async fn codes_are_bound_to_their_party() {
        let h = harness();
        let (booking, client_code, _, now) = open(&h).await;

        let result = h
            .engine
            .submit(booking.id, booking.companion_id, at_meeting_point(&client_code), now)
            .await;
        assert!(matches!(
            result,
            Err(BookingError::Rejected(VerificationRejection::InvalidCode))
        ));
    }

    #[tokio::test]
    async fn each_party_enters_the_code_sent_to_them() {
        let h = harness();
        let (booking, client_code, companion_code, now) = open(&h).await;

        for user_id in [booking.client_id, booking.companion_id] {
            let body = &h.notifications.sent_to(user_id)[0].body;
            assert!(body.contains("Enter it yourself"));
            assert!(body.contains("do not share it"));
        }

        let swapped = h
            .engine
            .submit(booking.id, booking.client_id, at_meeting_point(&companion_code), now)
            .await;
        assert!(matches!(
            swapped,
            Err(BookingError::Rejected(VerificationRejection::InvalidCode))
        ));

        let own = h
            .engine
            .submit(booking.id, booking.client_id, at_meeting_point(&client_code), now)
            .await
            .unwrap();
        assert!(own.you_verified_at.is_some());
    }

    #[tokio::test]
    async fn expired_code_is_rejected() {
        let h = harness();
        let (booking, client_code, _, _) = open(&h).await;
        let late = booking.starts_at + Duration::minutes(11);

        let result = h
            .engine
            .submit(booking.id, booking.client_id, at_meeting_point(&client_code), late)
            .await;
        assert!(matches!(
            result,
            Err(BookingError::Rejected(VerificationRejection::CodeExpired))
        ));
    }

    #[tokio::test]
    async fn window_extends_once_and_keeps_verified_state() {
        let h = harness();
        let (booking, client_code, _, now) = open(&h).await;
        h.engine
            .submit(booking.id, booking.client_id, at_meeting_point(&client_code), now)
            .await
            .unwrap();
        let before = h.store.verification(booking.id).unwrap().expires_at;

        let extended = h
            .engine
            .extend_window(booking.id, booking.companion_id, now)
            .await
            .unwrap();
        assert_eq!(extended.expires_at, Some(before + Duration::minutes(10)));
        assert!(extended.other_party_verified);
        assert!(!extended.can_extend);

        let second = h
            .engine
            .extend_window(booking.id, booking.client_id, now)
            .await;
        assert!(matches!(
            second,
            Err(BookingError::Rejected(VerificationRejection::ExtensionUsed))
        ));
    }

    #[tokio::test]
    async fn failed_delivery_is_redelivered_with_a_new_code() {
        let h = harness();
        let now = Utc::now();
        let booking = confirmed_booking_fixture(now + Duration::minutes(5));
        h.store.put_booking(booking.clone());

        h.notifications.fail.store(true, Ordering::SeqCst);
        h.engine.open_window(&booking, now).await.unwrap();
        let verification = h.store.verification(booking.id).unwrap();
        assert!(verification.client_otp_sent_at.is_none());

        h.notifications.fail.store(false, Ordering::SeqCst);
        let delivered = h
            .engine
            .redeliver_codes(&verification, &booking, now)
            .await
            .unwrap();
        assert_eq!(delivered, 2);

        let code = code_from(&h.notifications.sent_to(booking.client_id)[0]).unwrap();
        assert!(
            h.engine
                .submit(booking.id, booking.client_id, at_meeting_point(&code), now)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn strangers_cannot_submit() {
        let h = harness();
        let (booking, client_code, _, now) = open(&h).await;

        let result = h
            .engine
            .submit(booking.id, Uuid::new_v4(), at_meeting_point(&client_code), now)
            .await;
        assert!(matches!(result, Err(BookingError::Forbidden)));
    }

    #[tokio::test]
    async fn wrong_code_touches_only_the_attempt_counter() {
        let now = Utc::now();
        let booking = confirmed_booking_fixture(now + Duration::minutes(5));
        let mut verification = verification_fixture(booking.id, now + Duration::minutes(15));
        verification.client_otp_hash = Some(hash_code(booking.id, Party::Client, "123456"));

        let mut bookings = MockBookingRepository::new();
        let found = booking.clone();
        bookings
            .expect_find_by_id()
            .returning(move |_| Ok(Some(found.clone())));

        let mut verifications = MockBookingVerificationRepository::new();
        verifications
            .expect_find_by_booking()
            .returning(move |_| Ok(Some(verification.clone())));
        verifications
            .expect_record_failed_attempt()
            .times(1)
            .returning(|_, _, _| Ok(1));
        verifications.expect_record_verification().times(0);

        let bookings: Arc<dyn BookingRepository + Send + Sync> = Arc::new(bookings);
        let broadcaster = EventBroadcaster::new(Arc::new(ConnectionRegistry::new()));
        let engine = VerificationEngine::new(
            Arc::clone(&bookings),
            Arc::new(verifications),
            Arc::new(MockNotificationChannel::new()),
            Arc::new(PaymentCoordinator::new(
                bookings,
                Arc::new(MockPaymentGateway::new()),
                broadcaster.clone(),
            )),
            broadcaster,
            BookingRules::default(),
        );

        let result = engine
            .submit(booking.id, booking.client_id, at_meeting_point("654321"), now)
            .await;
        assert!(matches!(
            result,
            Err(BookingError::Rejected(VerificationRejection::InvalidCode))
        ));
    }
}
