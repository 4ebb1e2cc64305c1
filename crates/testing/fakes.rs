use std::sync::{
    Mutex, PoisonError,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use anyhow::{Result, bail};
use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    domain::{
        repositories::{
            notification_channel::{Notification, NotificationChannel},
            payment_gateway::{Authorization, AuthorizeRequest, PaymentGateway, TransferRequest},
        },
        value_objects::{
            enums::payment_statuses::PaymentStatus, payment_webhook::PaymentWebhookEvent,
        },
    },
    utils::otp::OTP_DIGITS,
};

/// Signature header the fake gateway accepts.
pub const VALID_SIGNATURE: &str = "valid";

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    Authorize(AuthorizeRequest),
    Capture(String),
    CancelAuthorization(String),
    Transfer(TransferRequest),
    Refund(String, Option<i64>),
}

/// Payment provider stand-in that records every call. Each operation can be
/// switched to fail to exercise the provider-failure paths.
#[derive(Debug)]
pub struct FakePaymentGateway {
    calls: Mutex<Vec<GatewayCall>>,
    authorize_status: Mutex<PaymentStatus>,
    next_id: AtomicUsize,
    pub fail_authorize: AtomicBool,
    pub fail_capture: AtomicBool,
    pub fail_cancel: AtomicBool,
    pub fail_transfer: AtomicBool,
    pub fail_refund: AtomicBool,
}

impl Default for FakePaymentGateway {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            authorize_status: Mutex::new(PaymentStatus::Authorized),
            next_id: AtomicUsize::new(1),
            fail_authorize: AtomicBool::new(false),
            fail_capture: AtomicBool::new(false),
            fail_cancel: AtomicBool::new(false),
            fail_transfer: AtomicBool::new(false),
            fail_refund: AtomicBool::new(false),
        }
    }
}

impl FakePaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn captures(&self) -> usize {
        self.count(|call| matches!(call, GatewayCall::Capture(_)))
    }

    pub fn cancellations(&self) -> usize {
        self.count(|call| matches!(call, GatewayCall::CancelAuthorization(_)))
    }

    pub fn transfers(&self) -> usize {
        self.count(|call| matches!(call, GatewayCall::Transfer(_)))
    }

    pub fn refunds(&self) -> usize {
        self.count(|call| matches!(call, GatewayCall::Refund(..)))
    }

    pub fn set_authorize_status(&self, status: PaymentStatus) {
        *self
            .authorize_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = status;
    }

    fn count(&self, predicate: impl Fn(&GatewayCall) -> bool) -> usize {
        self.calls().iter().filter(|call| predicate(call)).count()
    }

    fn record(&self, call: GatewayCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}_{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl PaymentGateway for FakePaymentGateway {
    async fn authorize(&self, request: AuthorizeRequest) -> Result<Authorization> {
        self.record(GatewayCall::Authorize(request));
        if self.fail_authorize.load(Ordering::SeqCst) {
            bail!("card declined");
        }
        let status = *self
            .authorize_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(Authorization {
            payment_intent_id: self.next_id("pi"),
            status,
        })
    }

    async fn capture(&self, payment_intent_id: &str) -> Result<()> {
        self.record(GatewayCall::Capture(payment_intent_id.to_string()));
        if self.fail_capture.load(Ordering::SeqCst) {
            bail!("capture unavailable");
        }
        Ok(())
    }

    async fn cancel_authorization(&self, payment_intent_id: &str) -> Result<()> {
        self.record(GatewayCall::CancelAuthorization(payment_intent_id.to_string()));
        if self.fail_cancel.load(Ordering::SeqCst) {
            bail!("cancel unavailable");
        }
        Ok(())
    }

    async fn transfer(&self, request: TransferRequest) -> Result<String> {
        self.record(GatewayCall::Transfer(request));
        if self.fail_transfer.load(Ordering::SeqCst) {
            bail!("transfer unavailable");
        }
        Ok(self.next_id("tr"))
    }

    async fn refund(&self, payment_intent_id: &str, amount_minor: Option<i64>) -> Result<String> {
        self.record(GatewayCall::Refund(payment_intent_id.to_string(), amount_minor));
        if self.fail_refund.load(Ordering::SeqCst) {
            bail!("refund unavailable");
        }
        Ok(self.next_id("re"))
    }

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<PaymentWebhookEvent> {
        if signature_header != VALID_SIGNATURE {
            bail!("invalid webhook signature");
        }
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Pulls the six-digit code out of a verification notification.
pub fn code_from(notification: &Notification) -> Option<String> {
    notification
        .body
        .split(|c: char| !c.is_ascii_digit())
        .find(|run| run.len() == OTP_DIGITS)
        .map(str::to_string)
}

/// Notification channel that keeps what it was asked to send.
#[derive(Debug, Default)]
pub struct RecordingNotificationChannel {
    sent: Mutex<Vec<(Uuid, Notification)>>,
    pub fail: AtomicBool,
}

impl RecordingNotificationChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(Uuid, Notification)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn sent_to(&self, user_id: Uuid) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|(recipient, _)| *recipient == user_id)
            .map(|(_, notification)| notification)
            .collect()
    }
}

#[async_trait]
impl NotificationChannel for RecordingNotificationChannel {
    async fn send(&self, user_id: Uuid, notification: Notification) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("notification provider unavailable");
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((user_id, notification));
        Ok(())
    }
}
