use anyhow::Result;
use async_trait::async_trait;
use booking_core::{
    domain::{
        repositories::{
            booking_verifications::BookingVerificationRepository, bookings::BookingRepository,
        },
        value_objects::{booking_rules::BookingRules, transitions::TransitionOutcome},
    },
    usecases::{booking_lifecycle::BookingLifecycleUseCase, verification::VerificationEngine},
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::{MAX_REPORTED_IDS, block_on_integrity_failure};
use crate::services::scheduler_loop::SchedulerPass;

#[derive(Debug, Clone, Default)]
pub struct ExpireVerificationsResult {
    pub windows_expired: usize,
    pub bookings_resolved: usize,
    pub never_opened_resolved: usize,
    pub failed: usize,
    pub blocked: usize,
    pub failed_ids: Vec<Uuid>,
}

impl ExpireVerificationsResult {
    fn record_failure(&mut self, booking_id: Uuid) {
        self.failed += 1;
        if self.failed_ids.len() < MAX_REPORTED_IDS {
            self.failed_ids.push(booking_id);
        }
    }

    fn touched(&self) -> bool {
        self.windows_expired + self.bookings_resolved + self.never_opened_resolved + self.failed
            > 0
    }
}

/// Closes verification windows that ran out and settles the bookings behind
/// them. The booking step reads expired windows whose booking is still
/// confirmed, so a booking that failed to settle on one pass is picked up
/// again on the next.
pub struct ExpireVerificationsUseCase {
    bookings: Arc<dyn BookingRepository + Send + Sync>,
    verifications: Arc<dyn BookingVerificationRepository + Send + Sync>,
    engine: Arc<VerificationEngine>,
    lifecycle: Arc<BookingLifecycleUseCase>,
    rules: BookingRules,
}

impl ExpireVerificationsUseCase {
    pub fn new(
        bookings: Arc<dyn BookingRepository + Send + Sync>,
        verifications: Arc<dyn BookingVerificationRepository + Send + Sync>,
        engine: Arc<VerificationEngine>,
        lifecycle: Arc<BookingLifecycleUseCase>,
        rules: BookingRules,
    ) -> Self {
        Self {
            bookings,
            verifications,
            engine,
            lifecycle,
            rules,
        }
    }

    pub async fn run(&self, now: DateTime<Utc>, batch_size: i64) -> Result<ExpireVerificationsResult> {
        let mut result = ExpireVerificationsResult::default();

        let lapsed = self
            .verifications
            .find_pending_past_expiry(now, batch_size)
            .await?;
        for verification in lapsed {
            match self.engine.expire_window(&verification, now).await {
                Ok(TransitionOutcome::Applied(_)) => result.windows_expired += 1,
                Ok(TransitionOutcome::Stale) => {}
                Err(err) => {
                    error!(
                        booking_id = %verification.booking_id,
                        error = %err,
                        "verification_expiry: failed to expire window"
                    );
                    result.record_failure(verification.booking_id);
                }
            }
        }

        let expired = self
            .verifications
            .find_expired_with_confirmed_booking(batch_size)
            .await?;
        for (verification, booking) in expired {
            match self
                .lifecycle
                .resolve_lapsed(&booking, Some(&verification), now)
                .await
            {
                Ok(outcome) if outcome.is_applied() => result.bookings_resolved += 1,
                Ok(_) => {}
                Err(err) => {
                    result.record_failure(booking.id);
                    if block_on_integrity_failure(self.bookings.as_ref(), booking.id, &err, now).await {
                        result.blocked += 1;
                    } else {
                        error!(
                            booking_id = %booking.id,
                            error = %err,
                            "verification_expiry: failed to settle booking, will retry"
                        );
                    }
                }
            }
        }

        let never_opened = self
            .bookings
            .find_confirmed_unverified_started_before(self.rules.no_show_cutoff(now), batch_size)
            .await?;
        for booking in never_opened {
            match self.lifecycle.resolve_lapsed(&booking, None, now).await {
                Ok(outcome) if outcome.is_applied() => result.never_opened_resolved += 1,
                Ok(_) => {}
                Err(err) => {
                    result.record_failure(booking.id);
                    if block_on_integrity_failure(self.bookings.as_ref(), booking.id, &err, now).await {
                        result.blocked += 1;
                    } else {
                        error!(
                            booking_id = %booking.id,
                            error = %err,
                            "verification_expiry: failed to mark booking as no-show, will retry"
                        );
                    }
                }
            }
        }

        if result.touched() {
            info!(
                windows_expired = result.windows_expired,
                bookings_resolved = result.bookings_resolved,
                never_opened_resolved = result.never_opened_resolved,
                failed = result.failed,
                blocked = result.blocked,
                "verification_expiry: completed"
            );
        }
        Ok(result)
    }
}

#[async_trait]
impl SchedulerPass for ExpireVerificationsUseCase {
    fn name(&self) -> &'static str {
        "verification_expiry"
    }

    async fn run_once(&self, now: DateTime<Utc>, batch_size: i64) -> Result<()> {
        self.run(now, batch_size).await.map(|_| ())
    }
}
