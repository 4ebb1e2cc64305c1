mod alert_webhook;
mod config;
mod dispatcher;
mod layer;

use anyhow::Result;
use alert_webhook::AlertWebhookSink;
use config::ObservabilityConfig;
use dispatcher::AlertDispatcher;
use layer::OperatorAlertLayer;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Installs the global subscriber: RFC3339 fmt output filtered by `RUST_LOG`
/// (default `info`), plus the operator alert layer when
/// `OPS_ALERT_WEBHOOK_URL` is configured. Must be called inside a Tokio
/// runtime because the alert dispatcher spawns its delivery task.
pub fn init_observability(component: &str) -> Result<()> {
    let config = ObservabilityConfig::from_env(component);

    let alert_layer = config.alert.as_ref().map(|alert| {
        let dispatcher = AlertDispatcher::new(vec![Arc::new(AlertWebhookSink::new(
            alert.webhook_url.clone(),
        ))]);

        OperatorAlertLayer::new(dispatcher, config.service_context.clone())
            .with_filter(LevelFilter::from_level(alert.min_level))
    });

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(alert_layer)
        .with(env_filter)
        .try_init()?;

    for warning in &config.warnings {
        warn!(
            service = %config.service_context.service_name,
            component = %config.service_context.component,
            %warning,
            "observability: config warning"
        );
    }

    info!(
        service = %config.service_context.service_name,
        environment = %config.service_context.environment,
        component = %config.service_context.component,
        operator_alerts = config.alert.is_some(),
        "observability: initialised"
    );

    Ok(())
}
