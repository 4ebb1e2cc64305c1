use anyhow::Result;
use async_trait::async_trait;
use booking_core::{
    domain::repositories::booking_requests::BookingRequestRepository,
    usecases::booking_requests::BookingRequestUseCase,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info};

use crate::services::scheduler_loop::SchedulerPass;

#[derive(Debug, Clone, Default)]
pub struct ExpireBookingRequestsResult {
    pub scanned: usize,
    pub expired: usize,
    pub failed: usize,
}

pub struct ExpireBookingRequestsUseCase {
    requests: Arc<dyn BookingRequestRepository + Send + Sync>,
    booking_requests: Arc<BookingRequestUseCase>,
}

impl ExpireBookingRequestsUseCase {
    pub fn new(
        requests: Arc<dyn BookingRequestRepository + Send + Sync>,
        booking_requests: Arc<BookingRequestUseCase>,
    ) -> Self {
        Self {
            requests,
            booking_requests,
        }
    }

    pub async fn run(
        &self,
        now: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<ExpireBookingRequestsResult> {
        let overdue = self.requests.find_expired_pending(now, batch_size).await?;
        let mut result = ExpireBookingRequestsResult {
            scanned: overdue.len(),
            ..Default::default()
        };

        for request in overdue {
            let request_id = request.id;
            match self.booking_requests.expire_request(request, now).await {
                Ok(outcome) if outcome.is_applied() => result.expired += 1,
                Ok(_) => {}
                Err(err) => {
                    error!(
                        %request_id,
                        error = %err,
                        "booking_request_expiry: failed to expire request"
                    );
                    result.failed += 1;
                }
            }
        }

        if result.scanned > 0 {
            info!(
                scanned = result.scanned,
                expired = result.expired,
                failed = result.failed,
                "booking_request_expiry: completed"
            );
        }
        Ok(result)
    }
}

#[async_trait]
impl SchedulerPass for ExpireBookingRequestsUseCase {
    fn name(&self) -> &'static str {
        "booking_request_expiry"
    }

    async fn run_once(&self, now: DateTime<Utc>, batch_size: i64) -> Result<()> {
        self.run(now, batch_size).await.map(|_| ())
    }
}
