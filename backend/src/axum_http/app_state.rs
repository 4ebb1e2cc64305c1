use std::sync::Arc;

use axum::extract::FromRef;
use booking_core::{
    realtime::connection_registry::ConnectionRegistry,
    usecases::{
        booking_lifecycle::BookingLifecycleUseCase, booking_requests::BookingRequestUseCase,
        payment_webhook::PaymentWebhookUseCase, verification::VerificationEngine,
    },
};

use crate::auth::JwtKeys;

/// Shared handles every router pulls from.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<BookingLifecycleUseCase>,
    pub requests: Arc<BookingRequestUseCase>,
    pub verification: Arc<VerificationEngine>,
    pub webhooks: Arc<PaymentWebhookUseCase>,
    pub registry: Arc<ConnectionRegistry>,
    pub jwt: Arc<JwtKeys>,
    /// Bearer token for `/internal` routes; those routes are closed without it.
    pub internal_token: Option<Arc<str>>,
}

impl FromRef<AppState> for Arc<JwtKeys> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.jwt)
    }
}
