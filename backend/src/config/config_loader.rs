use anyhow::{Context, Result, bail};
use booking_core::domain::value_objects::booking_rules::BookingRules;
use chrono::Duration;

use super::config_model::{
    BackendServer, Database, DotEnvyConfig, Internal, Notifications, Stripe, UserSecret,
};

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let backend_server = BackendServer {
        port: required("SERVER_PORT_BACKEND")?
            .parse()
            .context("SERVER_PORT_BACKEND is invalid")?,
        body_limit: required("SERVER_BODY_LIMIT")?
            .parse()
            .context("SERVER_BODY_LIMIT is invalid")?,
        timeout: required("SERVER_TIMEOUT")?
            .parse()
            .context("SERVER_TIMEOUT is invalid")?,
    };

    let database = Database {
        url: required("DATABASE_URL")?,
        max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS is invalid")?,
    };

    let user_secret = UserSecret {
        secret: required("JWT_USER_SECRET")?,
    };

    let stripe = Stripe {
        secret_key: required("STRIPE_SECRET_KEY")?,
        webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
    };

    let notifications = Notifications {
        webhook_url: optional("NOTIFICATION_WEBHOOK_URL"),
        timeout_secs: std::env::var("NOTIFICATION_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("NOTIFICATION_TIMEOUT_SECS is invalid")?,
    };

    let internal = Internal {
        api_token: optional("INTERNAL_API_TOKEN"),
    };

    let run_schedulers = std::env::var("RUN_SCHEDULERS")
        .unwrap_or_else(|_| "true".to_string())
        .parse()
        .context("RUN_SCHEDULERS is invalid")?;

    Ok(DotEnvyConfig {
        backend_server,
        database,
        user_secret,
        stripe,
        notifications,
        internal,
        booking_rules: load_booking_rules()?,
        run_schedulers,
    })
}

pub fn load_booking_rules() -> Result<BookingRules> {
    let defaults = BookingRules::default();

    let verification_radius_meters: f64 = std::env::var("VERIFICATION_RADIUS_METERS")
        .unwrap_or_else(|_| defaults.verification_radius_meters.to_string())
        .parse()
        .context("VERIFICATION_RADIUS_METERS is invalid")?;
    if !(verification_radius_meters.is_finite() && verification_radius_meters > 0.0) {
        bail!("VERIFICATION_RADIUS_METERS must be positive");
    }

    let otp_max_failed_attempts: i32 = std::env::var("OTP_MAX_FAILED_ATTEMPTS")
        .unwrap_or_else(|_| defaults.otp_max_failed_attempts.to_string())
        .parse()
        .context("OTP_MAX_FAILED_ATTEMPTS is invalid")?;
    if otp_max_failed_attempts < 1 {
        bail!("OTP_MAX_FAILED_ATTEMPTS must be at least 1");
    }

    Ok(BookingRules {
        verification_radius_meters,
        otp_lead: minutes("OTP_LEAD_MINUTES", defaults.otp_lead)?,
        otp_valid_after_start: minutes(
            "OTP_VALID_AFTER_START_MINUTES",
            defaults.otp_valid_after_start,
        )?,
        verification_extension: minutes(
            "VERIFICATION_EXTENSION_MINUTES",
            defaults.verification_extension,
        )?,
        otp_max_failed_attempts,
        no_show_grace: minutes("NO_SHOW_GRACE_MINUTES", defaults.no_show_grace)?,
        dispute_window: hours("DISPUTE_WINDOW_HOURS", defaults.dispute_window)?,
        booking_expiry_threshold: minutes(
            "BOOKING_EXPIRY_THRESHOLD_MINUTES",
            defaults.booking_expiry_threshold,
        )?,
        booking_request_ttl: hours("BOOKING_REQUEST_TTL_HOURS", defaults.booking_request_ttl)?,
    })
}

fn required(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{name} is not set"))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|value| {
        let trimmed = value.trim().to_string();
        (!trimmed.is_empty()).then_some(trimmed)
    })
}

fn minutes(name: &str, default: Duration) -> Result<Duration> {
    let value: i64 = std::env::var(name)
        .unwrap_or_else(|_| default.num_minutes().to_string())
        .parse()
        .with_context(|| format!("{name} is invalid"))?;
    if value < 0 {
        bail!("{name} must not be negative");
    }
    Ok(Duration::minutes(value))
}

fn hours(name: &str, default: Duration) -> Result<Duration> {
    let value: i64 = std::env::var(name)
        .unwrap_or_else(|_| default.num_hours().to_string())
        .parse()
        .with_context(|| format!("{name} is invalid"))?;
    if value < 0 {
        bail!("{name} must not be negative");
    }
    Ok(Duration::hours(value))
}
