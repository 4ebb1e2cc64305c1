use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    domain::{
        entities::{
            bookings::{BookingChangeset, BookingEntity},
            webhook_failures::{InsertWebhookFailureEntity, WebhookFailureEntity},
        },
        repositories::{
            bookings::BookingRepository, payment_gateway::PaymentGateway,
            webhook_failures::WebhookFailureRepository,
        },
        value_objects::{
            booking_events::BookingEventKind,
            enums::{
                booking_statuses::BookingStatus, payment_statuses::PaymentStatus,
            },
            payment_webhook::{PaymentWebhookEvent, WebhookOutcome},
            transitions::{BookingGuard, TransitionOutcome},
        },
    },
    realtime::broadcaster::EventBroadcaster,
    usecases::errors::{BookingError, UseCaseResult},
};

pub const PROVIDER: &str = "stripe";

/// A payment-status change carried by one provider event.
struct PaymentUpdate {
    guard: BookingGuard,
    changes: BookingChangeset,
    target: PaymentStatus,
    /// Statuses that mean the event is already reflected on the row, or was
    /// overtaken by a later one.
    settled: &'static [PaymentStatus],
    event: Option<BookingEventKind>,
}

enum BookingLookup {
    Found(BookingEntity),
    /// The event is about a hold the booking no longer uses. It lost a race
    /// or was replaced and has already been reversed.
    Superseded,
    Missing,
}

/// Applies provider events to bookings. Processing never fails towards the
/// provider: anything that cannot be applied is stored as a webhook failure
/// and acknowledged, so the provider does not keep redelivering it.
pub struct PaymentWebhookUseCase {
    bookings: Arc<dyn BookingRepository + Send + Sync>,
    failures: Arc<dyn WebhookFailureRepository + Send + Sync>,
    gateway: Arc<dyn PaymentGateway + Send + Sync>,
    broadcaster: EventBroadcaster,
}

impl PaymentWebhookUseCase {
    pub fn new(
        bookings: Arc<dyn BookingRepository + Send + Sync>,
        failures: Arc<dyn WebhookFailureRepository + Send + Sync>,
        gateway: Arc<dyn PaymentGateway + Send + Sync>,
        broadcaster: EventBroadcaster,
    ) -> Self {
        Self {
            bookings,
            failures,
            gateway,
            broadcaster,
        }
    }

    /// Verifies the signature and processes the event. Only a bad signature
    /// is an error; the caller answers it with a client error.
    pub async fn handle(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: DateTime<Utc>,
    ) -> UseCaseResult<WebhookOutcome> {
        let event = self
            .gateway
            .verify_webhook_signature(payload, signature_header)
            .map_err(|err| {
                warn!(error = %err, "payment_webhook: signature rejected");
                BookingError::InvalidInput("invalid webhook signature".to_string())
            })?;

        Ok(self.process(event, now).await)
    }

    pub async fn process(&self, event: PaymentWebhookEvent, now: DateTime<Utc>) -> WebhookOutcome {
        debug!(
            event_id = ?event.id,
            event_type = %event.event_type,
            "payment_webhook: received"
        );

        match self.apply(&event, now).await {
            Ok(()) => WebhookOutcome::Processed,
            Err(err) => {
                let reason = err.to_string();
                warn!(
                    event_id = ?event.id,
                    event_type = %event.event_type,
                    %reason,
                    "payment_webhook: event not applied"
                );
                self.record_failure(&event, &reason, now).await;
                WebhookOutcome::Failed(reason)
            }
        }
    }

    async fn record_failure(&self, event: &PaymentWebhookEvent, reason: &str, now: DateTime<Utc>) {
        let error_message = match event.failure_message() {
            Some(decline) => format!("{reason} (provider: {decline})"),
            None => reason.to_string(),
        };
        let failure = InsertWebhookFailureEntity {
            provider: PROVIDER.to_string(),
            provider_event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            payload: serde_json::to_value(event).unwrap_or_default(),
            error_message,
        };

        match self.failures.record(failure, now).await {
            Ok(recorded) if recorded.retry_count > 0 => info!(
                failure_id = %recorded.id,
                retry_count = recorded.retry_count,
                "payment_webhook: repeated failure recorded"
            ),
            Ok(_) => {}
            Err(err) => error!(
                event_id = ?event.id,
                error = %err,
                "payment_webhook: failed to record webhook failure"
            ),
        }
    }

    async fn apply(&self, event: &PaymentWebhookEvent, now: DateTime<Utc>) -> Result<()> {
        let event_type = event.event_type.as_str();
        if let Some(transfer_status) = event_type.strip_prefix("transfer.") {
            return self.apply_transfer(event, transfer_status, now).await;
        }

        let update = match event_type {
            "payment_intent.amount_capturable_updated" => PaymentUpdate {
                guard: BookingGuard::statuses(&BookingStatus::holding()).payment(&[
                    PaymentStatus::Unpaid,
                    PaymentStatus::Pending,
                    PaymentStatus::Failed,
                ]),
                changes: BookingChangeset::at(now).payment_status(PaymentStatus::Authorized),
                target: PaymentStatus::Authorized,
                settled: &[
                    PaymentStatus::Authorized,
                    PaymentStatus::Paid,
                    PaymentStatus::Refunded,
                    PaymentStatus::Cancelled,
                ],
                event: Some(BookingEventKind::PaymentAuthorized),
            },
            "payment_intent.requires_action" | "payment_intent.processing" => PaymentUpdate {
                guard: BookingGuard::statuses(&BookingStatus::holding())
                    .payment(&[PaymentStatus::Unpaid]),
                changes: BookingChangeset::at(now).payment_status(PaymentStatus::Pending),
                target: PaymentStatus::Pending,
                settled: &[
                    PaymentStatus::Pending,
                    PaymentStatus::Authorized,
                    PaymentStatus::Paid,
                    PaymentStatus::Refunded,
                    PaymentStatus::Failed,
                    PaymentStatus::Cancelled,
                ],
                event: None,
            },
            "payment_intent.succeeded" => PaymentUpdate {
                guard: BookingGuard::statuses(&[BookingStatus::Confirmed, BookingStatus::Completed])
                    .payment(&[PaymentStatus::Authorized, PaymentStatus::Pending]),
                changes: BookingChangeset {
                    paid_at: Some(now),
                    ..BookingChangeset::at(now)
                }
                .payment_status(PaymentStatus::Paid),
                target: PaymentStatus::Paid,
                settled: &[PaymentStatus::Paid, PaymentStatus::Refunded],
                event: Some(BookingEventKind::PaymentCaptured),
            },
            // A declined authorization only marks the payment; the booking
            // stays where it is so the client can retry with another card.
            "payment_intent.payment_failed" => PaymentUpdate {
                guard: BookingGuard::statuses(&BookingStatus::holding())
                    .payment(&[PaymentStatus::Unpaid, PaymentStatus::Pending]),
                changes: BookingChangeset::at(now).payment_status(PaymentStatus::Failed),
                target: PaymentStatus::Failed,
                settled: &[
                    PaymentStatus::Failed,
                    PaymentStatus::Authorized,
                    PaymentStatus::Paid,
                    PaymentStatus::Refunded,
                    PaymentStatus::Cancelled,
                ],
                event: None,
            },
            "payment_intent.canceled" => PaymentUpdate {
                guard: BookingGuard::statuses(&BookingStatus::ALL)
                    .payment(&[PaymentStatus::Pending, PaymentStatus::Authorized]),
                changes: BookingChangeset::at(now).payment_status(PaymentStatus::Cancelled),
                target: PaymentStatus::Cancelled,
                settled: &[
                    PaymentStatus::Cancelled,
                    PaymentStatus::Unpaid,
                    PaymentStatus::Failed,
                    PaymentStatus::Refunded,
                ],
                event: None,
            },
            "charge.refunded" => PaymentUpdate {
                guard: BookingGuard::statuses(&BookingStatus::ALL).payment(&[PaymentStatus::Paid]),
                changes: BookingChangeset::at(now).payment_status(PaymentStatus::Refunded),
                target: PaymentStatus::Refunded,
                settled: &[PaymentStatus::Refunded],
                event: Some(BookingEventKind::PaymentRefunded),
            },
            other => bail!("unhandled event type `{other}`"),
        };

        match self.find_booking(event).await? {
            BookingLookup::Found(booking) => self.apply_payment_update(event, booking, update).await,
            BookingLookup::Superseded => Ok(()),
            BookingLookup::Missing => bail!(
                "no booking for payment intent {:?}",
                event.payment_intent_id()
            ),
        }
    }

    /// Looks the booking up by payment intent, falling back to the booking id
    /// in the intent metadata when the intent id was never stored locally.
    async fn find_booking(&self, event: &PaymentWebhookEvent) -> Result<BookingLookup> {
        let payment_intent_id = event
            .payment_intent_id()
            .ok_or_else(|| anyhow!("event carries no payment intent"))?;

        if let Some(booking) = self
            .bookings
            .find_by_payment_intent(payment_intent_id)
            .await?
        {
            return Ok(BookingLookup::Found(booking));
        }

        let Some(booking_id) = event.metadata_booking_id() else {
            return Ok(BookingLookup::Missing);
        };
        let Some(booking) = self.bookings.find_by_id(booking_id).await? else {
            return Ok(BookingLookup::Missing);
        };
        if booking.payment_intent_id.is_some() {
            info!(
                %booking_id,
                %payment_intent_id,
                event_type = %event.event_type,
                "payment_webhook: event for superseded payment intent ignored"
            );
            return Ok(BookingLookup::Superseded);
        }
        Ok(BookingLookup::Found(booking))
    }

    async fn apply_payment_update(
        &self,
        event: &PaymentWebhookEvent,
        booking: BookingEntity,
        update: PaymentUpdate,
    ) -> Result<()> {
        if update.settled.contains(&booking.payment_status()?) {
            debug!(
                booking_id = %booking.id,
                payment_status = %booking.payment_status,
                event_type = %event.event_type,
                "payment_webhook: already reflected"
            );
            return Ok(());
        }

        if update.target == PaymentStatus::Paid && !update.guard.statuses.contains(&booking.status()?) {
            error!(
                booking_id = %booking.id,
                status = %booking.status,
                "payment_webhook: charge succeeded for a booking that is not confirmed"
            );
            bail!(BookingError::DataIntegrity(format!(
                "booking {} is {} but its payment succeeded",
                booking.id, booking.status
            )));
        }

        let mut changes = update.changes;
        if booking.payment_intent_id.is_none() {
            changes.payment_intent_id = event.payment_intent_id().map(str::to_string);
        }

        match self
            .bookings
            .transition(booking.id, update.guard, changes)
            .await?
        {
            TransitionOutcome::Applied(updated) => {
                info!(
                    booking_id = %updated.id,
                    event_type = %event.event_type,
                    status = %updated.status,
                    payment_status = %updated.payment_status,
                    "payment_webhook: applied"
                );
                if update.target == PaymentStatus::Failed {
                    warn!(
                        booking_id = %updated.id,
                        decline = event.failure_message().unwrap_or("unknown"),
                        "payment_webhook: authorization declined"
                    );
                }
                if let Some(kind) = update.event {
                    self.broadcaster.emit_to_parties(
                        &updated,
                        kind,
                        json!({
                            "payment_status": updated.payment_status,
                            "source": PROVIDER,
                        }),
                    );
                }
                if updated.status != booking.status {
                    self.broadcaster.availability_changed(
                        updated.companion_id,
                        updated.starts_at,
                        updated.ends_at,
                    );
                }
                Ok(())
            }
            TransitionOutcome::Stale => {
                let current = self
                    .bookings
                    .find_by_id(booking.id)
                    .await?
                    .ok_or_else(|| anyhow!("booking {} disappeared", booking.id))?;
                if update.settled.contains(&current.payment_status()?) {
                    return Ok(());
                }
                bail!(
                    "booking {} is {}/{} and cannot take {}",
                    current.id,
                    current.status,
                    current.payment_status,
                    event.event_type
                )
            }
        }
    }

    async fn apply_transfer(
        &self,
        event: &PaymentWebhookEvent,
        transfer_status: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let transfer_id = event
            .object_id()
            .ok_or_else(|| anyhow!("transfer event without object id"))?;
        let booking = self
            .bookings
            .find_by_transfer(transfer_id)
            .await?
            .ok_or_else(|| anyhow!("no booking for transfer {transfer_id}"))?;

        if transfer_status == "updated"
            || booking.transfer_status.as_deref() == Some(transfer_status)
        {
            return Ok(());
        }

        let changes = BookingChangeset {
            transfer_status: Some(transfer_status.to_string()),
            ..BookingChangeset::at(now)
        };
        let outcome = self
            .bookings
            .transition(booking.id, BookingGuard::statuses(&BookingStatus::ALL), changes)
            .await?;
        if outcome.is_applied() {
            info!(
                booking_id = %booking.id,
                %transfer_id,
                %transfer_status,
                "payment_webhook: transfer status updated"
            );
            if transfer_status == "reversed" {
                warn!(booking_id = %booking.id, %transfer_id, "payment_webhook: payout reversed");
            }
        }
        Ok(())
    }

    pub async fn list_unresolved_failures(
        &self,
        limit: i64,
    ) -> UseCaseResult<Vec<WebhookFailureEntity>> {
        Ok(self.failures.list_unresolved(limit).await?)
    }

    pub async fn resolve_failure(
        &self,
        failure_id: Uuid,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> UseCaseResult<WebhookFailureEntity> {
        let resolved = self
            .failures
            .resolve(failure_id, note, now)
            .await?
            .ok_or(BookingError::NotFound("webhook failure"))?;
        info!(%failure_id, "payment_webhook: failure resolved");
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::repositories::{
            bookings::MockBookingRepository, payment_gateway::MockPaymentGateway,
            webhook_failures::MockWebhookFailureRepository,
        },
        realtime::connection_registry::ConnectionRegistry,
        testing::{
            fakes::{FakePaymentGateway, VALID_SIGNATURE},
            fixtures::{booking_fixture, confirmed_booking_fixture},
            in_memory::InMemoryStore,
            system::TestSystem,
        },
    };
    use chrono::Duration;

    struct Harness {
        store: Arc<InMemoryStore>,
        webhooks: PaymentWebhookUseCase,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let webhooks = PaymentWebhookUseCase::new(
            store.clone(),
            store.clone(),
            Arc::new(FakePaymentGateway::new()),
            EventBroadcaster::new(Arc::new(ConnectionRegistry::new())),
        );
        Harness { store, webhooks }
    }

    fn intent_event(id: &str, event_type: &str, payment_intent_id: &str) -> PaymentWebhookEvent {
        serde_json::from_value(json!({
            "id": id,
            "type": event_type,
            "data": { "object": { "id": payment_intent_id } }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn unknown_event_delivered_twice_leaves_one_failure_row() {
        let h = harness();
        let now = Utc::now();
        let event = intent_event("evt_unknown", "customer.created", "cus_1");

        let first = h.webhooks.process(event.clone(), now).await;
        let second = h.webhooks.process(event, now + Duration::seconds(30)).await;

        assert!(matches!(first, WebhookOutcome::Failed(_)));
        assert!(matches!(second, WebhookOutcome::Failed(_)));
        let failures = h.store.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].retry_count, 1);
        assert_eq!(failures[0].provider_event_id.as_deref(), Some("evt_unknown"));
        assert!(h.store.bookings().is_empty());
    }

    #[tokio::test]
    async fn duplicate_success_event_mutates_once() {
        let h = harness();
        let now = Utc::now();
        let booking = confirmed_booking_fixture(now - Duration::hours(1));
        let payment_intent_id = booking.payment_intent_id.clone().unwrap();
        h.store.put_booking(booking.clone());
        let event = intent_event("evt_paid", "payment_intent.succeeded", &payment_intent_id);

        let first = h.webhooks.process(event.clone(), now).await;
        let after_first = h.store.booking(booking.id).unwrap();
        let second = h
            .webhooks
            .process(event, now + Duration::minutes(5))
            .await;

        assert_eq!(first, WebhookOutcome::Processed);
        assert_eq!(second, WebhookOutcome::Processed);
        assert_eq!(after_first.payment_status, "paid");
        assert_eq!(h.store.booking(booking.id).unwrap(), after_first);
        assert!(h.store.failures().is_empty());
    }

    #[tokio::test]
    async fn success_for_unconfirmed_booking_is_recorded_not_applied() {
        let h = harness();
        let now = Utc::now();
        let mut booking = booking_fixture(now + Duration::days(1));
        booking.payment_status = "authorized".to_string();
        booking.payment_intent_id = Some("pi_pending".to_string());
        h.store.put_booking(booking.clone());

        let outcome = h
            .webhooks
            .process(
                intent_event("evt_bad", "payment_intent.succeeded", "pi_pending"),
                now,
            )
            .await;

        assert!(matches!(outcome, WebhookOutcome::Failed(reason) if reason.contains("data integrity")));
        assert_eq!(h.store.booking(booking.id).unwrap().payment_status, "authorized");
        assert_eq!(h.store.failures().len(), 1);
    }

    #[tokio::test]
    async fn declined_authorization_marks_payment_failed_and_keeps_booking_pending() {
        let h = harness();
        let now = Utc::now();
        let booking = booking_fixture(now + Duration::days(1));
        h.store.put_booking(booking.clone());

        let event: PaymentWebhookEvent = serde_json::from_value(json!({
            "id": "evt_declined",
            "type": "payment_intent.payment_failed",
            "data": { "object": {
                "id": "pi_declined",
                "metadata": { "booking_id": booking.id.to_string() },
                "last_payment_error": { "message": "Your card was declined." }
            } }
        }))
        .unwrap();

        let outcome = h.webhooks.process(event, now).await;

        assert_eq!(outcome, WebhookOutcome::Processed);
        let stored = h.store.booking(booking.id).unwrap();
        assert_eq!(stored.status, "pending");
        assert_eq!(stored.payment_status, "failed");
        assert_eq!(stored.cancelled_by, None);
        assert_eq!(stored.cancelled_at, None);
        assert!(h.store.failures().is_empty());
    }

    #[tokio::test]
    async fn unmatched_decline_keeps_the_provider_message() {
        let h = harness();
        let event: PaymentWebhookEvent = serde_json::from_value(json!({
            "id": "evt_stray_decline",
            "type": "payment_intent.payment_failed",
            "data": { "object": {
                "id": "pi_stray",
                "last_payment_error": { "message": "Insufficient funds." }
            } }
        }))
        .unwrap();

        let outcome = h.webhooks.process(event, Utc::now()).await;

        assert!(matches!(outcome, WebhookOutcome::Failed(_)));
        let failures = h.store.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].error_message.ends_with("(provider: Insufficient funds.)"));
    }

    #[tokio::test]
    async fn client_can_retry_after_a_declined_authorization() {
        let system = TestSystem::new();
        let now = Utc::now();
        let mut booking = booking_fixture(now + Duration::days(1));
        booking.payment_status = "pending".to_string();
        booking.payment_intent_id = Some("pi_3ds".to_string());
        system.store.put_booking(booking.clone());

        let outcome = system
            .webhooks
            .process(
                intent_event("evt_fail", "payment_intent.payment_failed", "pi_3ds"),
                now,
            )
            .await;
        assert_eq!(outcome, WebhookOutcome::Processed);

        let retried = system
            .lifecycle
            .approve_booking(booking.id, booking.companion_id, now)
            .await
            .unwrap();

        let confirmed = retried.applied().unwrap();
        assert_eq!(confirmed.status, "confirmed");
        assert_eq!(confirmed.payment_status, "authorized");
        assert_ne!(confirmed.payment_intent_id.as_deref(), Some("pi_3ds"));
    }

    #[tokio::test]
    async fn events_for_a_reversed_hold_are_ignored() {
        let h = harness();
        let now = Utc::now();
        let booking = confirmed_booking_fixture(now + Duration::days(1));
        h.store.put_booking(booking.clone());

        let event: PaymentWebhookEvent = serde_json::from_value(json!({
            "id": "evt_orphan",
            "type": "payment_intent.canceled",
            "data": { "object": {
                "id": "pi_orphan",
                "metadata": { "booking_id": booking.id.to_string() }
            } }
        }))
        .unwrap();

        assert_eq!(h.webhooks.process(event, now).await, WebhookOutcome::Processed);
        assert_eq!(h.store.booking(booking.id).unwrap(), booking);
        assert!(h.store.failures().is_empty());
    }

    #[tokio::test]
    async fn transfer_events_update_transfer_status() {
        let h = harness();
        let now = Utc::now();
        let mut booking = confirmed_booking_fixture(now - Duration::days(3));
        booking.status = "completed".to_string();
        booking.payment_status = "paid".to_string();
        booking.transfer_id = Some("tr_9".to_string());
        booking.transfer_status = Some("created".to_string());
        h.store.put_booking(booking.clone());

        let event = intent_event("evt_tr", "transfer.reversed", "tr_9");
        assert_eq!(h.webhooks.process(event, now).await, WebhookOutcome::Processed);
        assert_eq!(
            h.store.booking(booking.id).unwrap().transfer_status.as_deref(),
            Some("reversed")
        );
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_before_processing() {
        let h = harness();
        let payload = serde_json::to_vec(&json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": { "object": { "id": "pi_1" } }
        }))
        .unwrap();

        let rejected = h.webhooks.handle(&payload, "forged", Utc::now()).await;
        assert!(matches!(rejected, Err(BookingError::InvalidInput(_))));
        assert!(h.store.failures().is_empty());

        let accepted = h
            .webhooks
            .handle(&payload, VALID_SIGNATURE, Utc::now())
            .await
            .unwrap();
        assert!(matches!(accepted, WebhookOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn failure_store_outage_does_not_surface() {
        let mut bookings = MockBookingRepository::new();
        bookings.expect_find_by_payment_intent().returning(|_| Ok(None));
        let mut failures = MockWebhookFailureRepository::new();
        failures
            .expect_record()
            .times(1)
            .returning(|_, _| Err(anyhow!("database unavailable")));

        let webhooks = PaymentWebhookUseCase::new(
            Arc::new(bookings),
            Arc::new(failures),
            Arc::new(MockPaymentGateway::new()),
            EventBroadcaster::new(Arc::new(ConnectionRegistry::new())),
        );

        let outcome = webhooks
            .process(
                intent_event("evt_x", "payment_intent.succeeded", "pi_missing"),
                Utc::now(),
            )
            .await;
        assert!(matches!(outcome, WebhookOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn failures_can_be_resolved() {
        let h = harness();
        let now = Utc::now();
        h.webhooks
            .process(intent_event("evt_r", "customer.deleted", "cus_2"), now)
            .await;
        let failure = h.webhooks.list_unresolved_failures(10).await.unwrap().remove(0);

        let resolved = h
            .webhooks
            .resolve_failure(failure.id, Some("not ours".to_string()), now)
            .await
            .unwrap();
        assert!(resolved.resolved);
        assert!(h.webhooks.list_unresolved_failures(10).await.unwrap().is_empty());
        assert!(matches!(
            h.webhooks.resolve_failure(Uuid::new_v4(), None, now).await,
            Err(BookingError::NotFound(_))
        ));
    }
}
