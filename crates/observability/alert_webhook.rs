use super::dispatcher::{AlertEvent, AlertSink};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use url::Url;

const TEXT_LIMIT: usize = 2000;

/// Posts alerts as JSON. The `text` field is a one-glance summary that chat
/// webhooks (Slack, Mattermost, Discord-compatible relays) render directly;
/// `event` carries the structured record.
pub(crate) struct AlertWebhookSink {
    webhook_url: Url,
    client: Client,
}

impl AlertWebhookSink {
    pub(crate) fn new(webhook_url: Url) -> Self {
        // A builder failure only loses the timeout; alerts still go out.
        let client = Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .unwrap_or_default();

        Self {
            webhook_url,
            client,
        }
    }
}

pub(crate) fn summary_text(event: &AlertEvent) -> String {
    let mut lines = vec![format!(
        "[{}] {} ({}/{}) {}",
        event.level,
        event.service_name,
        event.environment,
        event.component,
        event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
    )];

    if let Some(message) = event.message.as_deref().filter(|m| !m.trim().is_empty()) {
        lines.push(message.trim().to_string());
    }

    let location = event
        .location
        .as_deref()
        .map(|location| format!(" at {location}"))
        .unwrap_or_default();
    lines.push(format!("target: {}{}", event.target, location));

    for (key, value) in &event.fields {
        lines.push(format!("{key} = {value}"));
    }

    truncate(lines.join("\n"))
}

fn truncate(content: String) -> String {
    const SUFFIX: &str = "\n... (truncated)";

    if content.chars().count() <= TEXT_LIMIT {
        return content;
    }

    let allowed = TEXT_LIMIT.saturating_sub(SUFFIX.len());
    let mut truncated: String = content.chars().take(allowed).collect();
    truncated.push_str(SUFFIX);
    truncated
}

#[async_trait]
impl AlertSink for AlertWebhookSink {
    async fn send(&self, event: &AlertEvent) -> Result<()> {
        let response = self
            .client
            .post(self.webhook_url.clone())
            .json(&json!({ "text": summary_text(event), "event": event }))
            .send()
            .await
            .map_err(sanitize_reqwest_error)?;

        if response.status().is_success() {
            return Ok(());
        }

        Err(anyhow!(
            "alert webhook returned non-success status: {}",
            response.status()
        ))
    }

    fn sink_name(&self) -> &'static str {
        "alert_webhook"
    }
}

/// reqwest errors embed the request URL, which for webhooks is a secret.
fn sanitize_reqwest_error(error: reqwest::Error) -> anyhow::Error {
    if error.is_timeout() {
        return anyhow!("alert webhook request timed out");
    }
    if error.is_connect() {
        return anyhow!("alert webhook connection failed");
    }
    anyhow!("alert webhook request failed")
}
