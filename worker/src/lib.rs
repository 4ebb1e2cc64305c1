pub mod config;
pub mod services;
pub mod usecases;

use anyhow::Result;
use booking_core::{
    domain::{
        repositories::{
            booking_requests::BookingRequestRepository,
            booking_verifications::BookingVerificationRepository, bookings::BookingRepository,
        },
        value_objects::booking_rules::BookingRules,
    },
    usecases::{
        booking_lifecycle::BookingLifecycleUseCase, booking_requests::BookingRequestUseCase,
        payment_coordinator::PaymentCoordinator, verification::VerificationEngine,
    },
};
use config::config_model::SchedulerConfig;
use services::scheduler_loop::{SchedulerPass, run_scheduler_loop};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinSet;
use tracing::info;
use usecases::{
    complete_bookings::CompleteBookingsUseCase,
    expire_booking_requests::ExpireBookingRequestsUseCase, expire_bookings::ExpireBookingsUseCase,
    expire_verifications::ExpireVerificationsUseCase,
    issue_verification_codes::IssueVerificationCodesUseCase,
    release_payments::ReleasePaymentsUseCase,
};

/// The shared use cases and repositories the scheduler passes run against.
#[derive(Clone)]
pub struct SchedulerDeps {
    pub bookings: Arc<dyn BookingRepository + Send + Sync>,
    pub verifications: Arc<dyn BookingVerificationRepository + Send + Sync>,
    pub requests: Arc<dyn BookingRequestRepository + Send + Sync>,
    pub payments: Arc<PaymentCoordinator>,
    pub lifecycle: Arc<BookingLifecycleUseCase>,
    pub verification: Arc<VerificationEngine>,
    pub booking_requests: Arc<BookingRequestUseCase>,
    pub rules: BookingRules,
}

pub type Pass = Arc<dyn SchedulerPass + Send + Sync>;

pub fn build_passes(deps: &SchedulerDeps, config: &SchedulerConfig) -> Vec<(Pass, Duration)> {
    let intervals = &config.intervals;

    let verification_codes: Pass = Arc::new(IssueVerificationCodesUseCase::new(
        Arc::clone(&deps.bookings),
        Arc::clone(&deps.verifications),
        Arc::clone(&deps.verification),
        deps.rules,
    ));
    let verification_expiry: Pass = Arc::new(ExpireVerificationsUseCase::new(
        Arc::clone(&deps.bookings),
        Arc::clone(&deps.verifications),
        Arc::clone(&deps.verification),
        Arc::clone(&deps.lifecycle),
        deps.rules,
    ));
    let booking_expiry: Pass = Arc::new(ExpireBookingsUseCase::new(
        Arc::clone(&deps.bookings),
        Arc::clone(&deps.lifecycle),
        deps.rules,
    ));
    let booking_completion: Pass = Arc::new(CompleteBookingsUseCase::new(
        Arc::clone(&deps.bookings),
        Arc::clone(&deps.payments),
        Arc::clone(&deps.lifecycle),
    ));
    let payment_release: Pass = Arc::new(ReleasePaymentsUseCase::new(
        Arc::clone(&deps.bookings),
        Arc::clone(&deps.payments),
        deps.rules,
    ));
    let booking_request_expiry: Pass = Arc::new(ExpireBookingRequestsUseCase::new(
        Arc::clone(&deps.requests),
        Arc::clone(&deps.booking_requests),
    ));

    vec![
        (verification_codes, intervals.verification_codes),
        (verification_expiry, intervals.verification_expiry),
        (booking_expiry, intervals.booking_expiry),
        (booking_completion, intervals.booking_completion),
        (payment_release, intervals.payment_release),
        (booking_request_expiry, intervals.booking_request_expiry),
    ]
}

/// Spawns one interval loop per pass. Only returns if a loop task dies.
pub async fn run_schedulers(deps: SchedulerDeps, config: SchedulerConfig) -> Result<()> {
    let mut loops = JoinSet::new();
    for (pass, every) in build_passes(&deps, &config) {
        loops.spawn(run_scheduler_loop(pass, every, config.batch_size));
    }
    info!(schedulers = loops.len(), "schedulers: started");

    while let Some(result) = loops.join_next().await {
        result??;
    }
    Ok(())
}
