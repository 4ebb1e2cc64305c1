use anyhow::Result;
use async_trait::async_trait;
use booking_core::{
    domain::{
        repositories::{
            booking_verifications::BookingVerificationRepository, bookings::BookingRepository,
        },
        value_objects::booking_rules::BookingRules,
    },
    usecases::{errors::BookingError, verification::VerificationEngine},
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::MAX_REPORTED_IDS;
use crate::services::scheduler_loop::SchedulerPass;

#[derive(Debug, Clone, Default)]
pub struct IssueVerificationCodesResult {
    pub scanned: usize,
    pub windows_opened: usize,
    pub codes_redelivered: usize,
    pub failed: usize,
    pub failed_ids: Vec<Uuid>,
}

impl IssueVerificationCodesResult {
    fn record_failure(&mut self, booking_id: Uuid) {
        self.failed += 1;
        if self.failed_ids.len() < MAX_REPORTED_IDS {
            self.failed_ids.push(booking_id);
        }
    }
}

/// Opens the verification window for confirmed bookings that reached it and
/// re-sends codes whose delivery failed earlier.
pub struct IssueVerificationCodesUseCase {
    bookings: Arc<dyn BookingRepository + Send + Sync>,
    verifications: Arc<dyn BookingVerificationRepository + Send + Sync>,
    engine: Arc<VerificationEngine>,
    rules: BookingRules,
}

impl IssueVerificationCodesUseCase {
    pub fn new(
        bookings: Arc<dyn BookingRepository + Send + Sync>,
        verifications: Arc<dyn BookingVerificationRepository + Send + Sync>,
        engine: Arc<VerificationEngine>,
        rules: BookingRules,
    ) -> Self {
        Self {
            bookings,
            verifications,
            engine,
            rules,
        }
    }

    pub async fn run(
        &self,
        now: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<IssueVerificationCodesResult> {
        let entering = self
            .bookings
            .find_confirmed_entering_window(
                now + self.rules.otp_lead,
                now - self.rules.otp_valid_after_start,
                batch_size,
            )
            .await?;
        let undelivered = self
            .verifications
            .find_undelivered_codes(now, batch_size)
            .await?;

        let mut result = IssueVerificationCodesResult {
            scanned: entering.len() + undelivered.len(),
            ..Default::default()
        };

        for booking in entering {
            match self.engine.open_window(&booking, now).await {
                Ok(Some(_)) => result.windows_opened += 1,
                Ok(None) => {}
                Err(BookingError::InvalidTransition(reason)) => {
                    debug!(
                        booking_id = %booking.id,
                        %reason,
                        "verification_codes: booking moved on before the window opened"
                    );
                }
                Err(err) => {
                    error!(
                        booking_id = %booking.id,
                        error = %err,
                        "verification_codes: failed to open window"
                    );
                    result.record_failure(booking.id);
                }
            }
        }

        for (verification, booking) in undelivered {
            match self.engine.redeliver_codes(&verification, &booking, now).await {
                Ok(sent) => result.codes_redelivered += sent,
                Err(err) => {
                    error!(
                        booking_id = %booking.id,
                        error = %err,
                        "verification_codes: failed to redeliver codes"
                    );
                    result.record_failure(booking.id);
                }
            }
        }

        if result.scanned > 0 {
            info!(
                scanned = result.scanned,
                windows_opened = result.windows_opened,
                codes_redelivered = result.codes_redelivered,
                failed = result.failed,
                "verification_codes: completed"
            );
        }
        Ok(result)
    }
}

#[async_trait]
impl SchedulerPass for IssueVerificationCodesUseCase {
    fn name(&self) -> &'static str {
        "verification_codes"
    }

    async fn run_once(&self, now: DateTime<Utc>, batch_size: i64) -> Result<()> {
        self.run(now, batch_size).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use booking_core::testing::{
        fixtures::{confirmed_booking_fixture, verification_fixture},
        system::TestSystem,
    };
    use chrono::Duration;
    use std::sync::atomic::Ordering;

    fn use_case(system: &TestSystem) -> IssueVerificationCodesUseCase {
        IssueVerificationCodesUseCase::new(
            system.store.clone(),
            system.store.clone(),
            system.verification.clone(),
            system.rules,
        )
    }

    #[tokio::test]
    async fn opens_each_window_once() {
        let system = TestSystem::new();
        let now = Utc::now();
        let soon = confirmed_booking_fixture(now + Duration::minutes(20));
        let later = confirmed_booking_fixture(now + Duration::hours(3));
        system.store.put_booking(soon.clone());
        system.store.put_booking(later.clone());
        let pass = use_case(&system);

        let first = pass.run(now, 50).await.unwrap();
        let second = pass.run(now + Duration::seconds(30), 50).await.unwrap();

        assert_eq!(first.windows_opened, 1);
        assert_eq!(second.windows_opened, 0);
        assert!(system.store.verification(soon.id).is_some());
        assert!(system.store.verification(later.id).is_none());
        assert_eq!(system.notifications.sent().len(), 2);
    }

    #[tokio::test]
    async fn failed_delivery_is_retried_on_a_later_pass() {
        let system = TestSystem::new();
        let now = Utc::now();
        let booking = confirmed_booking_fixture(now + Duration::minutes(10));
        system.store.put_booking(booking.clone());
        let pass = use_case(&system);

        system.notifications.fail.store(true, Ordering::SeqCst);
        let first = pass.run(now, 50).await.unwrap();
        assert_eq!(first.windows_opened, 1);
        assert!(system.notifications.sent().is_empty());

        system.notifications.fail.store(false, Ordering::SeqCst);
        let second = pass.run(now + Duration::seconds(30), 50).await.unwrap();
        assert_eq!(second.codes_redelivered, 2);

        let third = pass.run(now + Duration::seconds(60), 50).await.unwrap();
        assert_eq!(third.codes_redelivered, 0);
        assert_eq!(system.notifications.sent().len(), 2);
    }

    #[tokio::test]
    async fn verified_party_gets_no_new_code() {
        let system = TestSystem::new();
        let now = Utc::now();
        let booking = confirmed_booking_fixture(now + Duration::minutes(5));
        let mut verification = verification_fixture(booking.id, booking.starts_at + Duration::minutes(10));
        verification.client_verified_at = Some(now - Duration::minutes(1));
        system.store.put_booking(booking.clone());
        system.store.put_verification(verification);

        let result = use_case(&system).run(now, 50).await.unwrap();

        assert_eq!(result.codes_redelivered, 1);
        assert!(system.notifications.sent_to(booking.client_id).is_empty());
        assert_eq!(system.notifications.sent_to(booking.companion_id).len(), 1);
    }
}
