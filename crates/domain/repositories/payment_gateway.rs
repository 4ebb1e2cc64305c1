use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::value_objects::{
    enums::payment_statuses::PaymentStatus, payment_webhook::PaymentWebhookEvent,
};

#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizeRequest {
    pub booking_id: Uuid,
    pub client_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub payment_method_ref: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Authorization {
    pub payment_intent_id: String,
    /// `Authorized` when the hold is in place, `Pending` when the provider
    /// still needs customer action or is processing.
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub booking_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub destination_account: String,
}

/// Outbound calls to the payment provider. Capture, cancellation, transfer
/// and refund are keyed so a retry after an ambiguous failure does not move
/// money twice.
#[automock]
#[async_trait]
pub trait PaymentGateway {
    async fn authorize(&self, request: AuthorizeRequest) -> Result<Authorization>;

    async fn capture(&self, payment_intent_id: &str) -> Result<()>;

    async fn cancel_authorization(&self, payment_intent_id: &str) -> Result<()>;

    /// Returns the provider transfer id.
    async fn transfer(&self, request: TransferRequest) -> Result<String>;

    /// Full refund when `amount_minor` is `None`. Returns the refund id.
    async fn refund(&self, payment_intent_id: &str, amount_minor: Option<i64>) -> Result<String>;

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<PaymentWebhookEvent>;
}
