use std::sync::Arc;

use crate::{
    domain::value_objects::booking_rules::BookingRules,
    realtime::{broadcaster::EventBroadcaster, connection_registry::ConnectionRegistry},
    testing::{
        fakes::{FakePaymentGateway, RecordingNotificationChannel},
        in_memory::InMemoryStore,
    },
    usecases::{
        booking_lifecycle::BookingLifecycleUseCase, booking_requests::BookingRequestUseCase,
        payment_coordinator::PaymentCoordinator, payment_webhook::PaymentWebhookUseCase,
        verification::VerificationEngine,
    },
};

/// Every use case wired against one in-memory store and fake providers.
pub struct TestSystem {
    pub store: Arc<InMemoryStore>,
    pub gateway: Arc<FakePaymentGateway>,
    pub notifications: Arc<RecordingNotificationChannel>,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: EventBroadcaster,
    pub payments: Arc<PaymentCoordinator>,
    pub lifecycle: Arc<BookingLifecycleUseCase>,
    pub verification: Arc<VerificationEngine>,
    pub requests: Arc<BookingRequestUseCase>,
    pub webhooks: Arc<PaymentWebhookUseCase>,
    pub rules: BookingRules,
}

impl TestSystem {
    pub fn new() -> Self {
        Self::with_rules(BookingRules::default())
    }

    pub fn with_rules(rules: BookingRules) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(FakePaymentGateway::new());
        let notifications = Arc::new(RecordingNotificationChannel::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = EventBroadcaster::new(registry.clone());

        let payments = Arc::new(PaymentCoordinator::new(
            store.clone(),
            gateway.clone(),
            broadcaster.clone(),
        ));
        let lifecycle = Arc::new(BookingLifecycleUseCase::new(
            store.clone(),
            store.clone(),
            payments.clone(),
            broadcaster.clone(),
            rules,
        ));
        let verification = Arc::new(VerificationEngine::new(
            store.clone(),
            store.clone(),
            notifications.clone(),
            payments.clone(),
            broadcaster.clone(),
            rules,
        ));
        let requests = Arc::new(BookingRequestUseCase::new(
            store.clone(),
            lifecycle.clone(),
            broadcaster.clone(),
        ));
        let webhooks = Arc::new(PaymentWebhookUseCase::new(
            store.clone(),
            store.clone(),
            gateway.clone(),
            broadcaster.clone(),
        ));

        Self {
            store,
            gateway,
            notifications,
            registry,
            broadcaster,
            payments,
            lifecycle,
            verification,
            requests,
            webhooks,
            rules,
        }
    }
}

impl Default for TestSystem {
    fn default() -> Self {
        Self::new()
    }
}
