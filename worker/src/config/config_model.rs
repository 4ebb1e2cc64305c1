use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Rows claimed per pass. Whatever is left over is picked up next tick.
    pub batch_size: i64,
    pub intervals: SchedulerIntervals,
}

#[derive(Debug, Clone)]
pub struct SchedulerIntervals {
    pub verification_codes: Duration,
    pub verification_expiry: Duration,
    pub booking_expiry: Duration,
    pub booking_completion: Duration,
    pub payment_release: Duration,
    pub booking_request_expiry: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            intervals: SchedulerIntervals {
                verification_codes: Duration::from_secs(30),
                verification_expiry: Duration::from_secs(30),
                booking_expiry: Duration::from_secs(60),
                booking_completion: Duration::from_secs(60),
                payment_release: Duration::from_secs(300),
                booking_request_expiry: Duration::from_secs(60),
            },
        }
    }
}
