use anyhow::Result;
use async_trait::async_trait;
use booking_core::{
    domain::{repositories::bookings::BookingRepository, value_objects::booking_rules::BookingRules},
    usecases::payment_coordinator::PaymentCoordinator,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::{MAX_REPORTED_IDS, block_on_integrity_failure};
use crate::services::scheduler_loop::SchedulerPass;

#[derive(Debug, Clone, Default)]
pub struct ReleasePaymentsResult {
    pub scanned: usize,
    pub released: usize,
    pub failed: usize,
    /// Failures that took the booking out of later scans.
    pub blocked: usize,
    pub failed_ids: Vec<Uuid>,
}

/// Pays companions for completed bookings once the dispute window is over.
pub struct ReleasePaymentsUseCase {
    bookings: Arc<dyn BookingRepository + Send + Sync>,
    payments: Arc<PaymentCoordinator>,
    rules: BookingRules,
}

impl ReleasePaymentsUseCase {
    pub fn new(
        bookings: Arc<dyn BookingRepository + Send + Sync>,
        payments: Arc<PaymentCoordinator>,
        rules: BookingRules,
    ) -> Self {
        Self {
            bookings,
            payments,
            rules,
        }
    }

    pub async fn run(&self, now: DateTime<Utc>, batch_size: i64) -> Result<ReleasePaymentsResult> {
        let releasable = self
            .bookings
            .find_releasable(self.rules.release_cutoff(now), batch_size)
            .await?;

        let mut result = ReleasePaymentsResult {
            scanned: releasable.len(),
            ..Default::default()
        };

        for booking in releasable {
            match self.payments.release(&booking, now).await {
                Ok(outcome) if outcome.is_applied() => result.released += 1,
                Ok(_) => {}
                Err(err) => {
                    result.failed += 1;
                    if result.failed_ids.len() < MAX_REPORTED_IDS {
                        result.failed_ids.push(booking.id);
                    }
                    if block_on_integrity_failure(self.bookings.as_ref(), booking.id, &err, now).await {
                        result.blocked += 1;
                    } else {
                        error!(
                            booking_id = %booking.id,
                            companion_id = %booking.companion_id,
                            error = %err,
                            "payment_release: failed to release payment, will retry"
                        );
                    }
                }
            }
        }

        if result.scanned > 0 {
            info!(
                scanned = result.scanned,
                released = result.released,
                failed = result.failed,
                blocked = result.blocked,
                "payment_release: completed"
            );
        }
        Ok(result)
    }
}

#[async_trait]
impl SchedulerPass for ReleasePaymentsUseCase {
    fn name(&self) -> &'static str {
        "payment_release"
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
            value_objects::enums::{booking_statuses::BookingStatus, payment_statuses::PaymentStatus},
        },
        testing::{fixtures::confirmed_booking_fixture, system::TestSystem},
    };
    use chrono::Duration;

    fn completed(completed_at: DateTime<Utc>) -> BookingEntity {
        let mut booking = confirmed_booking_fixture(completed_at - Duration::hours(1));
        booking.status = BookingStatus::Completed.to_string();
        booking.payment_status = PaymentStatus::Paid.to_string();
        booking.paid_at = Some(completed_at - Duration::minutes(50));
        booking.completed_at = Some(completed_at);
        booking
    }

    #[tokio::test]
    async fn releases_once_after_the_dispute_window() {
        let system = TestSystem::new();
        let now = Utc::now();
        let settled = completed(now - Duration::hours(49));
        let disputable = completed(now - Duration::hours(2));
        for booking in [&settled, &disputable] {
            system.store.put_booking(booking.clone());
            system.store.put_payout_account(booking.companion_id, "acct_companion");
        }
        let pass = ReleasePaymentsUseCase::new(system.store.clone(), system.payments.clone(), system.rules);

        let first = pass.run(now, 50).await.unwrap();
        let second = pass.run(now + Duration::minutes(5), 50).await.unwrap();

        assert_eq!(first.released, 1);
        assert_eq!(second.scanned, 0);
        assert_eq!(system.gateway.transfers(), 1);
        let stored = system.store.booking(settled.id).unwrap();
        assert!(stored.payment_released_at.is_some());
        assert!(stored.transfer_id.is_some());
        assert!(system.store.booking(disputable.id).unwrap().payment_released_at.is_none());
    }

    #[tokio::test]
    async fn missing_payout_account_does_not_stop_the_batch() {
        let system = TestSystem::new();
        let now = Utc::now();
        let orphan = completed(now - Duration::hours(60));
        let payable = completed(now - Duration::hours(50));
        system.store.put_booking(orphan.clone());
        system.store.put_booking(payable.clone());
        system.store.put_payout_account(payable.companion_id, "acct_payable");
        let pass = ReleasePaymentsUseCase::new(system.store.clone(), system.payments.clone(), system.rules);

        let result = pass.run(now, 50).await.unwrap();

        assert_eq!(result.released, 1);
        assert_eq!(result.failed_ids, vec![orphan.id]);
        assert!(system.store.booking(orphan.id).unwrap().payment_released_at.is_none());
    }

    #[tokio::test]
    async fn unpayable_bookings_are_parked_instead_of_filling_every_batch() {
        let system = TestSystem::new();
        let now = Utc::now();
        let oldest = completed(now - Duration::hours(70));
        let older = completed(now - Duration::hours(60));
        let payable = completed(now - Duration::hours(50));
        for booking in [&oldest, &older, &payable] {
            system.store.put_booking(booking.clone());
        }
        system.store.put_payout_account(payable.companion_id, "acct_payable");
        let pass = ReleasePaymentsUseCase::new(system.store.clone(), system.payments.clone(), system.rules);

        let first = pass.run(now, 2).await.unwrap();
        let second = pass.run(now + Duration::minutes(5), 2).await.unwrap();
        let third = pass.run(now + Duration::minutes(10), 2).await.unwrap();

        assert_eq!((first.scanned, first.released, first.blocked), (2, 0, 2));
        assert_eq!((second.scanned, second.released, second.blocked), (1, 1, 0));
        assert_eq!(third.scanned, 0);
        assert!(system.store.booking(payable.id).unwrap().payment_released_at.is_some());
        assert_eq!(system.gateway.transfers(), 1);
        for parked in [&oldest, &older] {
            let stored = system.store.booking(parked.id).unwrap();
            assert!(stored.blocked_at.is_some());
            assert!(stored.payment_released_at.is_none());
            assert!(stored.blocked_reason.unwrap().contains("payout account"));
        }
    }
}
