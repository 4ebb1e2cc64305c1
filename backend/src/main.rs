use anyhow::Result;
use backend::{
    auth::JwtKeys,
    axum_http::{app_state::AppState, http_serve},
    config::config_loader,
};
use booking_core::{
    domain::repositories::notification_channel::NotificationChannel,
    infra::{
        db::{
            postgres::{migrations, postgres_connection},
            repositories::{
                booking_requests::BookingRequestPostgres,
                booking_verifications::BookingVerificationPostgres, bookings::BookingPostgres,
                webhook_failures::WebhookFailurePostgres,
            },
        },
        notifications::{http_channel::HttpNotificationChannel, log_channel::LogNotificationChannel},
    },
    payments::stripe_client::StripeClient,
    realtime::{broadcaster::EventBroadcaster, connection_registry::ConnectionRegistry},
    usecases::{
        booking_lifecycle::BookingLifecycleUseCase, booking_requests::BookingRequestUseCase,
        payment_coordinator::PaymentCoordinator, payment_webhook::PaymentWebhookUseCase,
        verification::VerificationEngine,
    },
};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};
use worker::SchedulerDeps;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        error!("Backend exited with error: {}", error);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    booking_core::observability::init_observability("backend")?;

    let dotenvy_env = config_loader::load()?;
    info!("ENV has been loaded");

    let postgres_pool = Arc::new(postgres_connection::establish_connection(
        &dotenvy_env.database.url,
        dotenvy_env.database.max_connections,
    )?);
    info!("Postgres connection has been established");

    let applied = migrations::run_pending_migrations(Arc::clone(&postgres_pool)).await?;
    info!(applied, "Migrations are up to date");

    let bookings = Arc::new(BookingPostgres::new(Arc::clone(&postgres_pool)));
    let verifications = Arc::new(BookingVerificationPostgres::new(Arc::clone(&postgres_pool)));
    let requests = Arc::new(BookingRequestPostgres::new(Arc::clone(&postgres_pool)));
    let failures = Arc::new(WebhookFailurePostgres::new(Arc::clone(&postgres_pool)));

    let gateway = Arc::new(StripeClient::new(
        dotenvy_env.stripe.secret_key.clone(),
        dotenvy_env.stripe.webhook_secret.clone(),
    ));

    let notifications: Arc<dyn NotificationChannel + Send + Sync> =
        match &dotenvy_env.notifications.webhook_url {
            Some(url) => Arc::new(HttpNotificationChannel::new(
                url,
                Duration::from_secs(dotenvy_env.notifications.timeout_secs),
            )?),
            None => {
                warn!("NOTIFICATION_WEBHOOK_URL is not set, notifications go to the log only");
                Arc::new(LogNotificationChannel)
            }
        };

    let registry = Arc::new(ConnectionRegistry::new());
    let broadcaster = EventBroadcaster::new(Arc::clone(&registry));
    let rules = dotenvy_env.booking_rules;

    let payments = Arc::new(PaymentCoordinator::new(
        bookings.clone(),
        gateway.clone(),
        broadcaster.clone(),
    ));
    let lifecycle = Arc::new(BookingLifecycleUseCase::new(
        bookings.clone(),
        verifications.clone(),
        Arc::clone(&payments),
        broadcaster.clone(),
        rules,
    ));
    let verification = Arc::new(VerificationEngine::new(
        bookings.clone(),
        verifications.clone(),
        notifications,
        Arc::clone(&payments),
        broadcaster.clone(),
        rules,
    ));
    let booking_requests = Arc::new(BookingRequestUseCase::new(
        requests.clone(),
        Arc::clone(&lifecycle),
        broadcaster.clone(),
    ));
    let webhooks = Arc::new(PaymentWebhookUseCase::new(
        bookings.clone(),
        failures,
        gateway,
        broadcaster,
    ));

    if dotenvy_env.run_schedulers {
        let scheduler_config = worker::config::config_loader::load()?;
        let deps = SchedulerDeps {
            bookings,
            verifications,
            requests,
            payments,
            lifecycle: Arc::clone(&lifecycle),
            verification: Arc::clone(&verification),
            booking_requests: Arc::clone(&booking_requests),
            rules,
        };
        tokio::spawn(async move {
            if let Err(err) = worker::run_schedulers(deps, scheduler_config).await {
                error!(error = %err, "schedulers: stopped");
            }
        });
    } else {
        info!("RUN_SCHEDULERS is off, schedulers are not started");
    }

    let state = AppState {
        lifecycle,
        requests: booking_requests,
        verification,
        webhooks,
        registry,
        jwt: Arc::new(JwtKeys::new(&dotenvy_env.user_secret.secret)),
        internal_token: dotenvy_env.internal.api_token.as_deref().map(Arc::from),
    };

    http_serve::start(Arc::new(dotenvy_env), state).await?;

    Ok(())
}
