use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use sha2::Sha256;
use tracing::error;

use crate::domain::{
    repositories::payment_gateway::{
        Authorization, AuthorizeRequest, PaymentGateway, TransferRequest,
    },
    value_objects::{enums::payment_statuses::PaymentStatus, payment_webhook::PaymentWebhookEvent},
};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_API_BASE: &str = "https://api.stripe.com";
/// Signed webhook timestamps older than this are rejected as replays.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Minimal Stripe client built on reqwest. Bookings are paid with
/// manual-capture PaymentIntents: authorize places a hold, capture charges it
/// after verification, and the companion is paid with a separate transfer.
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    webhook_secret: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetails,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetails {
    #[serde(rename = "type")]
    type_: Option<String>,
    code: Option<String>,
    message: Option<String>,
    decline_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeObjectRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripePaymentIntent {
    id: String,
    status: String,
}

impl StripeClient {
    pub fn new(secret_key: String, webhook_secret: String) -> Self {
        Self::with_api_base(secret_key, webhook_secret, DEFAULT_API_BASE.to_string())
    }

    pub fn with_api_base(secret_key: String, webhook_secret: String, api_base: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key,
            webhook_secret,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    async fn ensure_success(resp: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let request_id = resp
            .headers()
            .get("request-id")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let body = match resp.text().await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => "<empty response body>".to_string(),
            Err(err) => format!("<failed to read response body: {err}>"),
        };

        let details = serde_json::from_str::<StripeErrorEnvelope>(&body)
            .ok()
            .map(|envelope| envelope.error);

        error!(
            %status,
            stripe_request_id = ?request_id,
            stripe_error_type = ?details.as_ref().and_then(|d| d.type_.clone()),
            stripe_error_code = ?details.as_ref().and_then(|d| d.code.clone()),
            stripe_error_message = ?details.as_ref().and_then(|d| d.message.clone()),
            stripe_decline_code = ?details.as_ref().and_then(|d| d.decline_code.clone()),
            %context,
            "stripe: api request failed"
        );

        anyhow::bail!(
            "Stripe API request failed: {} (status {}, request_id={:?})",
            context,
            status,
            request_id
        );
    }

    async fn post_form(
        &self,
        path: &str,
        form: &[(String, String)],
        idempotency_key: Option<String>,
        context: &str,
    ) -> Result<reqwest::Response> {
        let mut request = self
            .http
            .post(format!("{}{}", self.api_base, path))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .form(form);

        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let resp = request.send().await?;
        Self::ensure_success(resp, context).await
    }

    /// https://stripe.com/docs/payments/place-a-hold-on-a-payment-method
    pub async fn create_manual_capture_intent(
        &self,
        request: &AuthorizeRequest,
    ) -> Result<Authorization> {
        let form = vec![
            ("amount".to_string(), request.amount_minor.to_string()),
            ("currency".to_string(), request.currency.to_lowercase()),
            ("payment_method".to_string(), request.payment_method_ref.clone()),
            ("capture_method".to_string(), "manual".to_string()),
            ("confirm".to_string(), "true".to_string()),
            ("payment_method_types[]".to_string(), "card".to_string()),
            ("metadata[booking_id]".to_string(), request.booking_id.to_string()),
            ("metadata[client_id]".to_string(), request.client_id.to_string()),
        ];

        let resp = self
            .post_form("/v1/payment_intents", &form, None, "create payment intent")
            .await?;
        let intent: StripePaymentIntent = resp.json().await?;

        let status = map_intent_status(&intent.status).ok_or_else(|| {
            anyhow!(
                "payment intent {} was not authorized (status {})",
                intent.id,
                intent.status
            )
        })?;

        Ok(Authorization {
            payment_intent_id: intent.id,
            status,
        })
    }

    /// Verifies the `Stripe-Signature` header. https://stripe.com/docs/webhooks/signatures
    pub fn verify_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
        now_unix: i64,
    ) -> Result<PaymentWebhookEvent> {
        let mut timestamp: Option<&str> = None;
        let mut signatures: Vec<&str> = Vec::new();

        for part in signature_header.split(',') {
            let part = part.trim();
            if let Some(rest) = part.strip_prefix("t=") {
                timestamp = Some(rest);
            } else if let Some(rest) = part.strip_prefix("v1=") {
                signatures.push(rest);
            }
        }

        let timestamp = timestamp.ok_or_else(|| anyhow!("missing timestamp in stripe-signature"))?;
        if signatures.is_empty() {
            anyhow::bail!("missing v1 in stripe-signature");
        }

        let signed_at: i64 = timestamp
            .parse()
            .map_err(|_| anyhow!("invalid timestamp in stripe-signature"))?;
        if (now_unix - signed_at).abs() > SIGNATURE_TOLERANCE_SECS {
            anyhow::bail!("webhook timestamp outside tolerance");
        }

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);

        // verify_slice compares in constant time
        let matched = signatures
            .iter()
            .filter_map(|signature| hex::decode(signature).ok())
            .any(|provided| mac.clone().verify_slice(&provided).is_ok());
        if !matched {
            anyhow::bail!("invalid webhook signature");
        }

        let event: PaymentWebhookEvent = serde_json::from_slice(payload)?;
        Ok(event)
    }
}

fn map_intent_status(status: &str) -> Option<PaymentStatus> {
    match status {
        "requires_capture" => Some(PaymentStatus::Authorized),
        "requires_action" | "requires_confirmation" | "processing" => Some(PaymentStatus::Pending),
        _ => None,
    }
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn authorize(&self, request: AuthorizeRequest) -> Result<Authorization> {
        self.create_manual_capture_intent(&request).await
    }

    async fn capture(&self, payment_intent_id: &str) -> Result<()> {
        self.post_form(
            &format!("/v1/payment_intents/{payment_intent_id}/capture"),
            &[],
            Some(format!("capture-{payment_intent_id}")),
            "capture payment intent",
        )
        .await?;
        Ok(())
    }

    async fn cancel_authorization(&self, payment_intent_id: &str) -> Result<()> {
        self.post_form(
            &format!("/v1/payment_intents/{payment_intent_id}/cancel"),
            &[],
            Some(format!("cancel-{payment_intent_id}")),
            "cancel payment intent",
        )
        .await?;
        Ok(())
    }

    async fn transfer(&self, request: TransferRequest) -> Result<String> {
        let form = vec![
            ("amount".to_string(), request.amount_minor.to_string()),
            ("currency".to_string(), request.currency.to_lowercase()),
            ("destination".to_string(), request.destination_account.clone()),
            ("transfer_group".to_string(), request.booking_id.to_string()),
            ("metadata[booking_id]".to_string(), request.booking_id.to_string()),
        ];

        let resp = self
            .post_form(
                "/v1/transfers",
                &form,
                Some(format!("release-{}", request.booking_id)),
                "create transfer",
            )
            .await?;
        let transfer: StripeObjectRef = resp.json().await?;
        Ok(transfer.id)
    }

    async fn refund(&self, payment_intent_id: &str, amount_minor: Option<i64>) -> Result<String> {
        let mut form = vec![("payment_intent".to_string(), payment_intent_id.to_string())];
        if let Some(amount) = amount_minor {
            form.push(("amount".to_string(), amount.to_string()));
        }

        let resp = self
            .post_form(
                "/v1/refunds",
                &form,
                Some(format!("refund-{payment_intent_id}")),
                "create refund",
            )
            .await?;
        let refund: StripeObjectRef = resp.json().await?;
        Ok(refund.id)
    }

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<PaymentWebhookEvent> {
        self.verify_signature(payload, signature_header, Utc::now().timestamp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.").as_bytes());
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    fn client() -> StripeClient {
        StripeClient::new("sk_test".to_string(), "whsec_test".to_string())
    }

    const PAYLOAD: &[u8] =
        br#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_1"}}}"#;

    #[test]
    fn accepts_valid_signature() {
        let now = 1_767_225_600;
        let header = format!("t={now},v1={}", sign("whsec_test", now, PAYLOAD));

        let event = client().verify_signature(PAYLOAD, &header, now + 10).unwrap();
        assert_eq!(event.event_type, "payment_intent.succeeded");
        assert_eq!(event.payment_intent_id(), Some("pi_1"));
    }

    #[test]
    fn accepts_any_matching_v1_entry() {
        let now = 1_767_225_600;
        let header = format!(
            "t={now},v1={},v1={}",
            "00".repeat(32),
            sign("whsec_test", now, PAYLOAD)
        );

        assert!(client().verify_signature(PAYLOAD, &header, now).is_ok());
    }

    #[test]
    fn rejects_truncated_or_tampered_signature() {
        let now = 1_767_225_600;
        let signature = sign("whsec_test", now, PAYLOAD);
        let truncated = format!("t={now},v1={}", &signature[..32]);
        let mut tampered_bytes = hex::decode(&signature).unwrap();
        tampered_bytes[0] ^= 0x01;
        let tampered = format!("t={now},v1={}", hex::encode(tampered_bytes));

        assert!(client().verify_signature(PAYLOAD, &truncated, now).is_err());
        assert!(client().verify_signature(PAYLOAD, &tampered, now).is_err());
    }

    #[test]
    fn rejects_wrong_secret_and_stale_timestamp() {
        let now = 1_767_225_600;
        let forged = format!("t={now},v1={}", sign("other_secret", now, PAYLOAD));
        assert!(client().verify_signature(PAYLOAD, &forged, now).is_err());

        let valid = format!("t={now},v1={}", sign("whsec_test", now, PAYLOAD));
        assert!(
            client()
                .verify_signature(PAYLOAD, &valid, now + SIGNATURE_TOLERANCE_SECS + 1)
                .is_err()
        );
    }

    #[test]
    fn rejects_malformed_header() {
        assert!(client().verify_signature(PAYLOAD, "v1=abcd", 0).is_err());
        assert!(client().verify_signature(PAYLOAD, "t=1", 1).is_err());
    }

    #[test]
    fn intent_status_mapping() {
        assert_eq!(map_intent_status("requires_capture"), Some(PaymentStatus::Authorized));
        assert_eq!(map_intent_status("requires_action"), Some(PaymentStatus::Pending));
        assert_eq!(map_intent_status("requires_payment_method"), None);
    }
}
