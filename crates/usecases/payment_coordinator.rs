use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    domain::{
        entities::bookings::{BookingChangeset, BookingEntity},
        repositories::{
            bookings::BookingRepository,
            payment_gateway::{Authorization, AuthorizeRequest, PaymentGateway, TransferRequest},
        },
        value_objects::{
            booking_events::BookingEventKind,
            enums::{booking_statuses::BookingStatus, payment_statuses::PaymentStatus},
            transitions::{BookingGuard, TransitionOutcome},
        },
    },
    realtime::broadcaster::EventBroadcaster,
    usecases::errors::{BookingError, UseCaseResult},
};

/// Transfer status recorded right after a payout is created. Later values
/// come from `transfer.*` webhooks.
pub const TRANSFER_CREATED: &str = "created";

/// What cancelling did on the provider side, to be written together with the
/// booking status.
#[derive(Debug, Clone, PartialEq)]
pub struct CancellationSettlement {
    pub payment_status: PaymentStatus,
    pub refund_id: Option<String>,
}

/// Moves money at the provider and then records the result on the booking
/// row with a conditional update. Local state only changes after the
/// provider confirmed the call.
pub struct PaymentCoordinator {
    bookings: Arc<dyn BookingRepository + Send + Sync>,
    gateway: Arc<dyn PaymentGateway + Send + Sync>,
    broadcaster: EventBroadcaster,
}

impl PaymentCoordinator {
    pub fn new(
        bookings: Arc<dyn BookingRepository + Send + Sync>,
        gateway: Arc<dyn PaymentGateway + Send + Sync>,
        broadcaster: EventBroadcaster,
    ) -> Self {
        Self {
            bookings,
            gateway,
            broadcaster,
        }
    }

    /// Places a hold for the booking total. Nothing is written locally.
    pub async fn authorize(&self, booking: &BookingEntity) -> UseCaseResult<Authorization> {
        let payment_method_ref = booking.payment_method_ref.clone().ok_or_else(|| {
            BookingError::InvalidInput("booking has no payment method".to_string())
        })?;

        let request = AuthorizeRequest {
            booking_id: booking.id,
            client_id: booking.client_id,
            amount_minor: booking.total_amount_minor(),
            currency: booking.currency.clone(),
            payment_method_ref,
        };

        let authorization = self.gateway.authorize(request).await.map_err(|err| {
            warn!(
                booking_id = %booking.id,
                error = %err,
                "payments: authorization failed"
            );
            BookingError::ExternalProvider(err)
        })?;

        info!(
            booking_id = %booking.id,
            payment_intent_id = %authorization.payment_intent_id,
            status = %authorization.status,
            "payments: authorization placed"
        );
        Ok(authorization)
    }

    /// Reverses a hold nobody will use, e.g. one placed by the loser of a
    /// confirm race. Failure is logged; the provider expires the hold anyway.
    pub async fn void_authorization(&self, booking_id: Uuid, payment_intent_id: &str) {
        match self.gateway.cancel_authorization(payment_intent_id).await {
            Ok(()) => info!(
                %booking_id,
                %payment_intent_id,
                "payments: orphaned authorization reversed"
            ),
            Err(err) => error!(
                %booking_id,
                %payment_intent_id,
                error = %err,
                "payments: failed to reverse orphaned authorization"
            ),
        }
    }

    /// Provider side of ending a booking early: a hold is reversed, a charge
    /// is refunded in full, anything else is left as it is.
    pub async fn settle_cancellation(
        &self,
        booking: &BookingEntity,
    ) -> UseCaseResult<CancellationSettlement> {
        let payment_status = booking.payment_status()?;

        match (payment_status, booking.payment_intent_id.as_deref()) {
            (status, Some(payment_intent_id)) if status.holds_funds() => {
                self.gateway
                    .cancel_authorization(payment_intent_id)
                    .await
                    .map_err(|err| {
                        warn!(
                            booking_id = %booking.id,
                            %payment_intent_id,
                            error = %err,
                            "payments: failed to reverse authorization"
                        );
                        BookingError::ExternalProvider(err)
                    })?;
                Ok(CancellationSettlement {
                    payment_status: PaymentStatus::Cancelled,
                    refund_id: None,
                })
            }
            (status, None) if status.holds_funds() => Ok(CancellationSettlement {
                payment_status: PaymentStatus::Cancelled,
                refund_id: None,
            }),
            (PaymentStatus::Paid, Some(payment_intent_id)) => {
                let refund_id = self
                    .gateway
                    .refund(payment_intent_id, None)
                    .await
                    .map_err(|err| {
                        warn!(
                            booking_id = %booking.id,
                            %payment_intent_id,
                            error = %err,
                            "payments: refund failed"
                        );
                        BookingError::ExternalProvider(err)
                    })?;
                Ok(CancellationSettlement {
                    payment_status: PaymentStatus::Refunded,
                    refund_id: Some(refund_id),
                })
            }
            (PaymentStatus::Paid, None) => {
                error!(
                    booking_id = %booking.id,
                    "payments: booking is paid without a payment intent"
                );
                Err(BookingError::DataIntegrity(format!(
                    "booking {} is paid without a payment intent",
                    booking.id
                )))
            }
            (status, _) => Ok(CancellationSettlement {
                payment_status: status,
                refund_id: None,
            }),
        }
    }

    /// Charges the held funds of a confirmed, verified booking.
    pub async fn capture(
        &self,
        booking: &BookingEntity,
        now: DateTime<Utc>,
    ) -> UseCaseResult<TransitionOutcome<BookingEntity>> {
        let status = booking.status()?;
        let payment_status = booking.payment_status()?;

        if payment_status == PaymentStatus::Paid {
            debug!(booking_id = %booking.id, "payments: already captured");
            return Ok(TransitionOutcome::Stale);
        }

        let payment_intent_id = match booking.payment_intent_id.as_deref() {
            Some(id) if status == BookingStatus::Confirmed && payment_status == PaymentStatus::Authorized => id,
            _ => {
                error!(
                    booking_id = %booking.id,
                    %status,
                    %payment_status,
                    "payments: capture requested without a usable authorization"
                );
                return Err(BookingError::DataIntegrity(format!(
                    "capture requested for booking {} in {status}/{payment_status}",
                    booking.id
                )));
            }
        };

        self.gateway.capture(payment_intent_id).await.map_err(|err| {
            warn!(
                booking_id = %booking.id,
                %payment_intent_id,
                error = %err,
                "payments: capture failed, will retry"
            );
            BookingError::ExternalProvider(err)
        })?;

        let changes = BookingChangeset {
            paid_at: Some(now),
            ..BookingChangeset::at(now)
        }
        .payment_status(PaymentStatus::Paid);

        let outcome = self
            .bookings
            .transition(
                booking.id,
                BookingGuard::status(BookingStatus::Confirmed).payment(&[PaymentStatus::Authorized]),
                changes,
            )
            .await?;

        match &outcome {
            TransitionOutcome::Applied(captured) => {
                info!(booking_id = %captured.id, %payment_intent_id, "payments: captured");
                self.broadcaster.emit_to_parties(
                    captured,
                    BookingEventKind::PaymentCaptured,
                    json!({
                        "amount_minor": captured.total_amount_minor(),
                        "currency": captured.currency,
                    }),
                );
            }
            TransitionOutcome::Stale => {
                let current = self.bookings.find_by_id(booking.id).await?;
                let already_paid = current
                    .as_ref()
                    .is_some_and(|b| b.payment_status == PaymentStatus::Paid.as_str());
                if already_paid {
                    debug!(booking_id = %booking.id, "payments: capture recorded by another worker");
                } else {
                    error!(
                        booking_id = %booking.id,
                        %payment_intent_id,
                        current_status = ?current.as_ref().map(|b| b.status.clone()),
                        "payments: funds captured but the booking moved on"
                    );
                }
            }
        }

        Ok(outcome)
    }

    /// Pays the companion out once the dispute window is over.
    pub async fn release(
        &self,
        booking: &BookingEntity,
        now: DateTime<Utc>,
    ) -> UseCaseResult<TransitionOutcome<BookingEntity>> {
        let guard = BookingGuard::status(BookingStatus::Completed)
            .payment(&[PaymentStatus::Paid])
            .unreleased();
        if !guard.matches(booking) {
            return Ok(TransitionOutcome::Stale);
        }

        let destination_account = self
            .bookings
            .find_payout_account(booking.companion_id)
            .await?
            .ok_or_else(|| {
                error!(
                    booking_id = %booking.id,
                    companion_id = %booking.companion_id,
                    "payments: companion has no payout account"
                );
                BookingError::DataIntegrity(format!(
                    "companion {} has no payout account",
                    booking.companion_id
                ))
            })?;

        let transfer_id = self
            .gateway
            .transfer(TransferRequest {
                booking_id: booking.id,
                amount_minor: booking.total_amount_minor(),
                currency: booking.currency.clone(),
                destination_account,
            })
            .await
            .map_err(|err| {
                warn!(
                    booking_id = %booking.id,
                    error = %err,
                    "payments: transfer failed, will retry"
                );
                BookingError::ExternalProvider(err)
            })?;

        let changes = BookingChangeset {
            payment_released_at: Some(now),
            transfer_id: Some(transfer_id.clone()),
            transfer_status: Some(TRANSFER_CREATED.to_string()),
            ..BookingChangeset::at(now)
        };

        let outcome = self.bookings.transition(booking.id, guard, changes).await?;
        match &outcome {
            TransitionOutcome::Applied(released) => {
                info!(booking_id = %released.id, %transfer_id, "payments: released to companion");
                self.broadcaster.emit_to_parties(
                    released,
                    BookingEventKind::PaymentReleased,
                    json!({ "transfer_id": transfer_id }),
                );
            }
            TransitionOutcome::Stale => {
                warn!(
                    booking_id = %booking.id,
                    %transfer_id,
                    "payments: release already recorded"
                );
            }
        }

        Ok(outcome)
    }
}
