use anyhow::Result;
use async_trait::async_trait;
use booking_core::{
    domain::{repositories::bookings::BookingRepository, value_objects::booking_rules::BookingRules},
    usecases::booking_lifecycle::BookingLifecycleUseCase,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::{MAX_REPORTED_IDS, block_on_integrity_failure};
use crate::services::scheduler_loop::SchedulerPass;

#[derive(Debug, Clone, Default)]
pub struct ExpireBookingsResult {
    pub scanned: usize,
    pub expired: usize,
    pub failed: usize,
    pub blocked: usize,
    pub failed_ids: Vec<Uuid>,
}

/// Pending bookings whose meeting started without the companion approving.
pub struct ExpireBookingsUseCase {
    bookings: Arc<dyn BookingRepository + Send + Sync>,
    lifecycle: Arc<BookingLifecycleUseCase>,
    rules: BookingRules,
}

impl ExpireBookingsUseCase {
    pub fn new(
        bookings: Arc<dyn BookingRepository + Send + Sync>,
        lifecycle: Arc<BookingLifecycleUseCase>,
        rules: BookingRules,
    ) -> Self {
        Self {
            bookings,
            lifecycle,
            rules,
        }
    }

    pub async fn run(&self, now: DateTime<Utc>, batch_size: i64) -> Result<ExpireBookingsResult> {
        let overdue = self
            .bookings
            .find_pending_started_before(self.rules.expiry_cutoff(now), batch_size)
            .await?;

        let mut result = ExpireBookingsResult {
            scanned: overdue.len(),
            ..Default::default()
        };

        for booking in overdue {
            match self.lifecycle.expire_pending(&booking, now).await {
                Ok(outcome) if outcome.is_applied() => result.expired += 1,
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
                            error = %err,
                            "booking_expiry: failed to expire booking, will retry"
                        );
                    }
                }
            }
        }

        if result.scanned > 0 {
            info!(
                scanned = result.scanned,
                expired = result.expired,
                failed = result.failed,
                blocked = result.blocked,
                "booking_expiry: completed"
            );
        }
        Ok(result)
    }
}

#[async_trait]
impl SchedulerPass for ExpireBookingsUseCase {
    fn name(&self) -> &'static str {
        "booking_expiry"
    }

    async fn run_once(&self, now: DateTime<Utc>, batch_size: i64) -> Result<()> {
        self.run(now, batch_size).await.map(|_| ())
    }
}
