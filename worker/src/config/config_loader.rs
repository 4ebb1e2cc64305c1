use std::time::Duration;

use anyhow::{Context, Result, bail};

use super::config_model::{SchedulerConfig, SchedulerIntervals};

pub fn load() -> Result<SchedulerConfig> {
    dotenvy::dotenv().ok();

    let defaults = SchedulerConfig::default();
    let batch_size = std::env::var("SCHEDULER_BATCH_SIZE")
        .unwrap_or_else(|_| defaults.batch_size.to_string())
        .parse::<i64>()
        .context("SCHEDULER_BATCH_SIZE is invalid")?;
    if batch_size <= 0 {
        bail!("SCHEDULER_BATCH_SIZE must be positive");
    }

    let intervals = SchedulerIntervals {
        verification_codes: interval(
            "SCHEDULER_VERIFICATION_CODES_INTERVAL_SECS",
            defaults.intervals.verification_codes,
        )?,
        verification_expiry: interval(
            "SCHEDULER_VERIFICATION_EXPIRY_INTERVAL_SECS",
            defaults.intervals.verification_expiry,
        )?,
        booking_expiry: interval(
            "SCHEDULER_BOOKING_EXPIRY_INTERVAL_SECS",
            defaults.intervals.booking_expiry,
        )?,
        booking_completion: interval(
            "SCHEDULER_BOOKING_COMPLETION_INTERVAL_SECS",
            defaults.intervals.booking_completion,
        )?,
        payment_release: interval(
            "SCHEDULER_PAYMENT_RELEASE_INTERVAL_SECS",
            defaults.intervals.payment_release,
        )?,
        booking_request_expiry: interval(
            "SCHEDULER_BOOKING_REQUEST_EXPIRY_INTERVAL_SECS",
            defaults.intervals.booking_request_expiry,
        )?,
    };

    Ok(SchedulerConfig {
        batch_size,
        intervals,
    })
}

fn interval(name: &str, default: Duration) -> Result<Duration> {
    let secs = std::env::var(name)
        .unwrap_or_else(|_| default.as_secs().to_string())
        .parse::<u64>()
        .with_context(|| format!("{name} is invalid"))?;
    if secs == 0 {
        bail!("{name} must be at least one second");
    }
    Ok(Duration::from_secs(secs))
}
