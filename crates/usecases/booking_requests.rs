use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    domain::{
        entities::{
            booking_requests::{BookingRequestEntity, InsertBookingRequestEntity},
            bookings::{BookingEntity, InsertBookingEntity},
        },
        repositories::booking_requests::BookingRequestRepository,
        value_objects::{
            booking_events::{BookingEvent, BookingEventKind},
            bookings::CreateBookingRequestModel,
            enums::{
                booking_request_statuses::BookingRequestStatus, booking_statuses::BookingStatus,
                payment_statuses::PaymentStatus,
            },
            transitions::{AcceptRequestOutcome, TransitionOutcome},
        },
    },
    realtime::broadcaster::EventBroadcaster,
    usecases::{
        booking_lifecycle::{BookingLifecycleUseCase, normalize_currency, resolve_slot},
        errors::{BookingError, UseCaseResult},
    },
};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AcceptedRequest {
    pub request: BookingRequestEntity,
    pub booking: BookingEntity,
}

pub struct BookingRequestUseCase {
    requests: Arc<dyn BookingRequestRepository + Send + Sync>,
    lifecycle: Arc<BookingLifecycleUseCase>,
    broadcaster: EventBroadcaster,
}

impl BookingRequestUseCase {
    pub fn new(
        requests: Arc<dyn BookingRequestRepository + Send + Sync>,
        lifecycle: Arc<BookingLifecycleUseCase>,
        broadcaster: EventBroadcaster,
    ) -> Self {
        Self {
            requests,
            lifecycle,
            broadcaster,
        }
    }

    async fn load(&self, request_id: Uuid) -> UseCaseResult<BookingRequestEntity> {
        self.requests
            .find_by_id(request_id)
            .await?
            .ok_or(BookingError::NotFound("booking request"))
    }

    fn notify(&self, request: &BookingRequestEntity, kind: BookingEventKind) {
        let event = BookingEvent::new(
            kind,
            request.booking_id,
            json!({
                "request_id": request.id,
                "status": request.status,
                "starts_at": request.starts_at,
            }),
        );
        self.broadcaster
            .emit_to_users(&[request.client_id, request.companion_id], &event);
    }

    pub async fn create_request(
        &self,
        client_id: Uuid,
        model: CreateBookingRequestModel,
        now: DateTime<Utc>,
    ) -> UseCaseResult<BookingRequestEntity> {
        if model.companion_id == client_id {
            return Err(BookingError::InvalidInput(
                "cannot send a request to yourself".to_string(),
            ));
        }
        if model.proposed_amount_minor <= 0 {
            return Err(BookingError::InvalidInput(
                "proposed amount must be positive".to_string(),
            ));
        }
        let currency = normalize_currency(&model.currency)?;
        let slot = resolve_slot(&model.slot, now)?;

        // A request cannot outlive the meeting it proposes.
        let expires_at = (now + self.lifecycle.rules().booking_request_ttl).min(slot.starts_at);

        let request = self
            .requests
            .insert(InsertBookingRequestEntity {
                client_id,
                companion_id: model.companion_id,
                starts_at: slot.starts_at,
                ends_at: slot.ends_at,
                duration_minutes: slot.duration_minutes,
                timezone: slot.timezone,
                proposed_amount_minor: model.proposed_amount_minor,
                currency,
                meeting_type: slot.meeting_type.to_string(),
                meeting_location: slot.meeting_location,
                meeting_location_lat: slot.meeting_point.map(|point| point.lat),
                meeting_location_lon: slot.meeting_point.map(|point| point.lon),
                payment_method_ref: model.payment_method_ref,
                message: model
                    .message
                    .map(|message| message.trim().to_string())
                    .filter(|message| !message.is_empty()),
                status: BookingRequestStatus::Pending.to_string(),
                payment_status: PaymentStatus::Unpaid.to_string(),
                expires_at,
            })
            .await?;

        info!(
            request_id = %request.id,
            %client_id,
            companion_id = %request.companion_id,
            %expires_at,
            "booking_requests: created"
        );
        self.notify(&request, BookingEventKind::BookingRequestCreated);
        Ok(request)
    }

    pub async fn list_requests(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> UseCaseResult<Vec<BookingRequestEntity>> {
        Ok(self.requests.list_for_user(user_id, limit).await?)
    }

    pub async fn get_request(
        &self,
        request_id: Uuid,
        user_id: Uuid,
    ) -> UseCaseResult<BookingRequestEntity> {
        let request = self.load(request_id).await?;
        if request.client_id != user_id && request.companion_id != user_id {
            return Err(BookingError::Forbidden);
        }
        Ok(request)
    }

    /// Companion accepts: the request flips to `accepted` and its booking is
    /// created in one transaction, then the booking goes through approval.
    /// If approval fails the booking stays pending for the companion to
    /// approve again.
    pub async fn accept_request(
        &self,
        request_id: Uuid,
        companion_id: Uuid,
        now: DateTime<Utc>,
    ) -> UseCaseResult<TransitionOutcome<AcceptedRequest>> {
        let request = self.load(request_id).await?;
        if request.companion_id != companion_id {
            return Err(BookingError::Forbidden);
        }
        match request.status()? {
            BookingRequestStatus::Pending => {}
            BookingRequestStatus::Accepted => return Ok(TransitionOutcome::Stale),
            other => {
                return Err(BookingError::InvalidTransition(format!(
                    "cannot accept a request that is {other}"
                )));
            }
        }
        if request.expires_at <= now {
            return Err(BookingError::InvalidTransition(
                "request has expired".to_string(),
            ));
        }

        let insert = InsertBookingEntity {
            client_id: request.client_id,
            companion_id: request.companion_id,
            booking_request_id: Some(request.id),
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            duration_minutes: request.duration_minutes,
            timezone: request.timezone.clone(),
            base_amount_minor: request.proposed_amount_minor,
            extra_amount_minor: 0,
            currency: request.currency.clone(),
            status: BookingStatus::Pending.to_string(),
            payment_status: PaymentStatus::Unpaid.to_string(),
            payment_method_ref: request.payment_method_ref.clone(),
            meeting_type: request.meeting_type.clone(),
            meeting_location: request.meeting_location.clone(),
            meeting_location_lat: request.meeting_location_lat,
            meeting_location_lon: request.meeting_location_lon,
        };

        let (request, mut booking) = match self.requests.accept(request.id, insert, now).await? {
            AcceptRequestOutcome::Accepted { request, booking } => (request, booking),
            AcceptRequestOutcome::Stale => return Ok(TransitionOutcome::Stale),
            AcceptRequestOutcome::Overlap => return Err(BookingError::Conflict),
        };

        info!(
            request_id = %request.id,
            booking_id = %booking.id,
            "booking_requests: accepted"
        );
        self.notify(&request, BookingEventKind::BookingRequestAccepted);
        self.lifecycle.announce_created(&booking);

        match self
            .lifecycle
            .approve_booking(booking.id, companion_id, now)
            .await
        {
            Ok(TransitionOutcome::Applied(confirmed)) => booking = confirmed,
            Ok(TransitionOutcome::Stale) => {}
            Err(err) => warn!(
                request_id = %request.id,
                booking_id = %booking.id,
                error = %err,
                "booking_requests: booking left pending, approval failed"
            ),
        }

        Ok(TransitionOutcome::Applied(AcceptedRequest { request, booking }))
    }

    pub async fn reject_request(
        &self,
        request_id: Uuid,
        companion_id: Uuid,
        now: DateTime<Utc>,
    ) -> UseCaseResult<TransitionOutcome<BookingRequestEntity>> {
        let request = self.load(request_id).await?;
        if request.companion_id != companion_id {
            return Err(BookingError::Forbidden);
        }
        self.close(
            request,
            BookingRequestStatus::Rejected,
            BookingEventKind::BookingRequestRejected,
            now,
        )
        .await
    }

    pub async fn cancel_request(
        &self,
        request_id: Uuid,
        client_id: Uuid,
        now: DateTime<Utc>,
    ) -> UseCaseResult<TransitionOutcome<BookingRequestEntity>> {
        let request = self.load(request_id).await?;
        if request.client_id != client_id {
            return Err(BookingError::Forbidden);
        }
        self.close(
            request,
            BookingRequestStatus::Cancelled,
            BookingEventKind::BookingRequestCancelled,
            now,
        )
        .await
    }

    /// Called by the expiry sweep for pending requests past `expires_at`.
    pub async fn expire_request(
        &self,
        request: BookingRequestEntity,
        now: DateTime<Utc>,
    ) -> UseCaseResult<TransitionOutcome<BookingRequestEntity>> {
        if request.expires_at > now {
            return Ok(TransitionOutcome::Stale);
        }
        self.close(
            request,
            BookingRequestStatus::Expired,
            BookingEventKind::BookingRequestExpired,
            now,
        )
        .await
    }

    async fn close(
        &self,
        request: BookingRequestEntity,
        next: BookingRequestStatus,
        event: BookingEventKind,
        now: DateTime<Utc>,
    ) -> UseCaseResult<TransitionOutcome<BookingRequestEntity>> {
        let status = request.status()?;
        if status == next {
            return Ok(TransitionOutcome::Stale);
        }
        if status != BookingRequestStatus::Pending {
            return Err(BookingError::InvalidTransition(format!(
                "cannot move a request that is {status} to {next}"
            )));
        }

        let outcome = self
            .requests
            .transition(request.id, BookingRequestStatus::Pending, next, now)
            .await?;
        if let TransitionOutcome::Applied(closed) = &outcome {
            info!(request_id = %closed.id, status = %next, "booking_requests: closed");
            self.notify(closed, event);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::value_objects::{
            booking_rules::BookingRules,
            bookings::MeetingSlotModel,
            enums::meeting_types::MeetingType,
        },
        realtime::connection_registry::ConnectionRegistry,
        testing::{fakes::FakePaymentGateway, in_memory::InMemoryStore},
        usecases::payment_coordinator::PaymentCoordinator,
    };
    use chrono::Duration;
    use std::sync::atomic::Ordering;

    struct Harness {
        store: Arc<InMemoryStore>,
        gateway: Arc<FakePaymentGateway>,
        requests: BookingRequestUseCase,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(FakePaymentGateway::new());
        let broadcaster = EventBroadcaster::new(Arc::new(ConnectionRegistry::new()));
        let payments = Arc::new(PaymentCoordinator::new(
            store.clone(),
            gateway.clone(),
            broadcaster.clone(),
        ));
        let lifecycle = Arc::new(BookingLifecycleUseCase::new(
            store.clone(),
            store.clone(),
            payments,
            broadcaster.clone(),
            BookingRules::default(),
        ));
        Harness {
            store: store.clone(),
            gateway,
            requests: BookingRequestUseCase::new(store, lifecycle, broadcaster),
        }
    }

    fn model(companion_id: Uuid, date: &str) -> CreateBookingRequestModel {
        CreateBookingRequestModel {
            companion_id,
            slot: MeetingSlotModel {
                date: date.to_string(),
                start_time: "20:00".to_string(),
                timezone: "Europe/Lisbon".to_string(),
                duration_minutes: 120,
                meeting_type: MeetingType::Virtual,
                meeting_location: None,
                meeting_location_lat: None,
                meeting_location_lon: None,
            },
            proposed_amount_minor: 30_000,
            currency: "eur".to_string(),
            payment_method_ref: Some("pm_card_visa".to_string()),
            message: Some("  Dinner and a show?  ".to_string()),
        }
    }

    #[tokio::test]
    async fn request_expiry_is_capped_by_ttl() {
        let h = harness();
        let now = Utc::now();

        let request = h
            .requests
            .create_request(Uuid::new_v4(), model(Uuid::new_v4(), "2031-06-01"), now)
            .await
            .unwrap();

        assert_eq!(request.status, "pending");
        assert_eq!(request.expires_at, now + Duration::hours(24));
        assert_eq!(request.message.as_deref(), Some("Dinner and a show?"));
        assert_eq!(request.currency, "EUR");
    }

    #[tokio::test]
    async fn accepting_creates_and_confirms_the_booking() {
        let h = harness();
        let now = Utc::now();
        let companion_id = Uuid::new_v4();
        let request = h
            .requests
            .create_request(Uuid::new_v4(), model(companion_id, "2031-06-01"), now)
            .await
            .unwrap();

        let accepted = h
            .requests
            .accept_request(request.id, companion_id, now)
            .await
            .unwrap()
            .applied()
            .unwrap();

        assert_eq!(accepted.request.status, "accepted");
        assert_eq!(accepted.request.booking_id, Some(accepted.booking.id));
        assert_eq!(accepted.booking.booking_request_id, Some(request.id));
        assert_eq!(accepted.booking.status, "confirmed");
        assert_eq!(accepted.booking.payment_status, "authorized");
        assert_eq!(accepted.booking.total_amount_minor(), 30_000);

        let again = h
            .requests
            .accept_request(request.id, companion_id, now)
            .await
            .unwrap();
        assert_eq!(again, TransitionOutcome::Stale);
        assert_eq!(h.store.bookings().len(), 1);
    }

    #[tokio::test]
    async fn failed_authorization_leaves_accepted_booking_pending() {
        let h = harness();
        let now = Utc::now();
        let companion_id = Uuid::new_v4();
        let request = h
            .requests
            .create_request(Uuid::new_v4(), model(companion_id, "2031-06-01"), now)
            .await
            .unwrap();
        h.gateway.fail_authorize.store(true, Ordering::SeqCst);

        let accepted = h
            .requests
            .accept_request(request.id, companion_id, now)
            .await
            .unwrap()
            .applied()
            .unwrap();

        assert_eq!(accepted.booking.status, "pending");
        assert_eq!(accepted.request.status, "accepted");
    }

    #[tokio::test]
    async fn only_pending_requests_can_be_closed() {
        let h = harness();
        let now = Utc::now();
        let client_id = Uuid::new_v4();
        let companion_id = Uuid::new_v4();
        let request = h
            .requests
            .create_request(client_id, model(companion_id, "2031-06-01"), now)
            .await
            .unwrap();

        assert!(matches!(
            h.requests.reject_request(request.id, client_id, now).await,
            Err(BookingError::Forbidden)
        ));

        let rejected = h
            .requests
            .reject_request(request.id, companion_id, now)
            .await
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(rejected.status, "rejected");
        assert!(rejected.responded_at.is_some());

        assert!(matches!(
            h.requests.cancel_request(request.id, client_id, now).await,
            Err(BookingError::InvalidTransition(_))
        ));
        assert!(matches!(
            h.requests.accept_request(request.id, companion_id, now).await,
            Err(BookingError::InvalidTransition(_))
        ));
    }

    #[tokio::test]
    async fn expired_request_cannot_be_accepted() {
        let h = harness();
        let now = Utc::now();
        let companion_id = Uuid::new_v4();
        let request = h
            .requests
            .create_request(Uuid::new_v4(), model(companion_id, "2031-06-01"), now)
            .await
            .unwrap();
        let later = request.expires_at + Duration::seconds(1);

        let expired = h
            .requests
            .expire_request(request.clone(), later)
            .await
            .unwrap();
        assert!(expired.is_applied());
        assert!(matches!(
            h.requests.accept_request(request.id, companion_id, later).await,
            Err(BookingError::InvalidTransition(_))
        ));

        let second_pass = h.requests.expire_request(request, later).await.unwrap();
        assert_eq!(second_pass, TransitionOutcome::Stale);
    }
}
