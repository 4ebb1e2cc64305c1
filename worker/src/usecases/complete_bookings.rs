use anyhow::Result;
use async_trait::async_trait;
use booking_core::{
    domain::repositories::bookings::BookingRepository,
    usecases::{booking_lifecycle::BookingLifecycleUseCase, payment_coordinator::PaymentCoordinator},
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::{MAX_REPORTED_IDS, block_on_integrity_failure};
use crate::services::scheduler_loop::SchedulerPass;

#[derive(Debug, Clone, Default)]
pub struct CompleteBookingsResult {
    pub captured: usize,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
    pub failed_ids: Vec<Uuid>,
}

impl CompleteBookingsResult {
    fn record_failure(&mut self, booking_id: Uuid) {
        self.failed += 1;
        if self.failed_ids.len() < MAX_REPORTED_IDS {
            self.failed_ids.push(booking_id);
        }
    }
}

/// Retries captures that did not go through right after verification, then
/// closes verified and paid bookings whose meeting has ended.
pub struct CompleteBookingsUseCase {
    bookings: Arc<dyn BookingRepository + Send + Sync>,
    payments: Arc<PaymentCoordinator>,
    lifecycle: Arc<BookingLifecycleUseCase>,
}

impl CompleteBookingsUseCase {
    pub fn new(
        bookings: Arc<dyn BookingRepository + Send + Sync>,
        payments: Arc<PaymentCoordinator>,
        lifecycle: Arc<BookingLifecycleUseCase>,
    ) -> Self {
        Self {
            bookings,
            payments,
            lifecycle,
        }
    }

    pub async fn run(&self, now: DateTime<Utc>, batch_size: i64) -> Result<CompleteBookingsResult> {
        let mut result = CompleteBookingsResult::default();

        let awaiting_capture = self.bookings.find_verified_awaiting_capture(batch_size).await?;
        for booking in awaiting_capture {
            match self.payments.capture(&booking, now).await {
                Ok(outcome) if outcome.is_applied() => result.captured += 1,
                Ok(_) => {}
                Err(err) => {
                    error!(
                        booking_id = %booking.id,
                        error = %err,
                        "booking_completion: capture retry failed"
                    );
                    result.record_failure(booking.id);
                    if block_on_integrity_failure(self.bookings.as_ref(), booking.id, &err, now).await {
                        result.blocked += 1;
                    }
                }
            }
        }

        let finished = self.bookings.find_completable(now, batch_size).await?;
        for booking in finished {
            match self.lifecycle.complete_verified(&booking, now).await {
                Ok(outcome) if outcome.is_applied() => result.completed += 1,
                Ok(_) => {}
                Err(err) => {
                    error!(
                        booking_id = %booking.id,
                        error = %err,
                        "booking_completion: failed to complete booking"
                    );
                    result.record_failure(booking.id);
                    if block_on_integrity_failure(self.bookings.as_ref(), booking.id, &err, now).await {
                        result.blocked += 1;
                    }
                }
            }
        }

        if result.captured + result.completed + result.failed > 0 {
            info!(
                captured = result.captured,
                completed = result.completed,
                failed = result.failed,
                blocked = result.blocked,
                "booking_completion: completed"
            );
        }
        Ok(result)
    }
}

#[async_trait]
impl SchedulerPass for CompleteBookingsUseCase {
    fn name(&self) -> &'static str {
        "booking_completion"
    }

    async fn run_once(&self, now: DateTime<Utc>, batch_size: i64) -> Result<()> {
        self.run(now, batch_size).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use booking_core::{
        domain::{
            entities::bookings::BookingEntity,
            value_objects::enums::{
                booking_statuses::BookingStatus, payment_statuses::PaymentStatus,
                verification_statuses::VerificationStatus,
            },
        },
        testing::{
            fixtures::{confirmed_booking_fixture, verification_fixture},
            system::TestSystem,
        },
    };
    use chrono::Duration;
    use std::sync::atomic::Ordering;

    fn verified_meeting(system: &TestSystem, starts_at: DateTime<Utc>) -> BookingEntity {
        let booking = confirmed_booking_fixture(starts_at);
        let mut verification = verification_fixture(booking.id, starts_at + Duration::minutes(10));
        verification.client_verified_at = Some(starts_at);
        verification.companion_verified_at = Some(starts_at);
        verification.both_verified_at = Some(starts_at);
        verification.verification_status = VerificationStatus::Verified.to_string();
        system.store.put_booking(booking.clone());
        system.store.put_verification(verification);
        booking
    }

    fn use_case(system: &TestSystem) -> CompleteBookingsUseCase {
        CompleteBookingsUseCase::new(
            system.store.clone(),
            system.payments.clone(),
            system.lifecycle.clone(),
        )
    }

    #[tokio::test]
    async fn failed_capture_is_retried_and_the_booking_completes_after_it_ends() {
        let system = TestSystem::new();
        let now = Utc::now();
        let booking = verified_meeting(&system, now - Duration::minutes(30));
        let pass = use_case(&system);

        system.gateway.fail_capture.store(true, Ordering::SeqCst);
        let failing = pass.run(now, 50).await.unwrap();
        assert_eq!(failing.failed, 1);
        assert_eq!(
            system.store.booking(booking.id).unwrap().payment_status,
            PaymentStatus::Authorized.as_str()
        );

        system.gateway.fail_capture.store(false, Ordering::SeqCst);
        let retried = pass.run(now + Duration::minutes(1), 50).await.unwrap();
        assert_eq!(retried.captured, 1);
        assert_eq!(retried.completed, 0);

        let after_end = pass.run(booking.ends_at + Duration::minutes(1), 50).await.unwrap();
        assert_eq!(after_end.completed, 1);
        let stored = system.store.booking(booking.id).unwrap();
        assert_eq!(stored.status, BookingStatus::Completed.as_str());
        assert!(stored.completed_at.is_some());

        let again = pass.run(booking.ends_at + Duration::minutes(2), 50).await.unwrap();
        assert_eq!(again.captured + again.completed, 0);
        assert_eq!(system.gateway.captures(), 2);
    }

    #[tokio::test]
    async fn unverified_meeting_is_never_captured() {
        let system = TestSystem::new();
        let now = Utc::now();
        let booking = confirmed_booking_fixture(now - Duration::hours(2));
        system.store.put_booking(booking.clone());
        system
            .store
            .put_verification(verification_fixture(booking.id, now + Duration::minutes(5)));

        let result = use_case(&system).run(now, 50).await.unwrap();

        assert_eq!(result.captured, 0);
        assert_eq!(system.gateway.captures(), 0);
    }
}
