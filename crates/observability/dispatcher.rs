use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SpanSummary {
    pub(crate) name: String,
    pub(crate) fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct AlertEvent {
    pub(crate) level: String,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) service_name: String,
    pub(crate) environment: String,
    pub(crate) component: String,
    pub(crate) target: String,
    pub(crate) location: Option<String>,
    pub(crate) message: Option<String>,
    pub(crate) fields: BTreeMap<String, String>,
    pub(crate) spans: Vec<SpanSummary>,
}

#[async_trait]
pub(crate) trait AlertSink: Send + Sync {
    async fn send(&self, event: &AlertEvent) -> Result<()>;
    fn sink_name(&self) -> &'static str;
}

/// Hands alert events to a background task so that logging never waits on
/// the network. A full queue drops the event.
#[derive(Clone)]
pub(crate) struct AlertDispatcher {
    tx: mpsc::Sender<AlertEvent>,
}

impl AlertDispatcher {
    pub(crate) fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        let (tx, mut rx) = mpsc::channel::<AlertEvent>(QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                for sink in &sinks {
                    if let Err(error) = sink.send(&event).await {
                        // Logged at WARN so it cannot re-enter an ERROR-level alert loop.
                        warn!(sink = sink.sink_name(), %error, "observability: alert sink failed");
                    }
                }
            }
        });

        Self { tx }
    }

    pub(crate) fn try_dispatch(&self, event: AlertEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("observability: alert queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("observability: alert queue closed, dropping event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct CollectingSink {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AlertSink for CollectingSink {
        async fn send(&self, event: &AlertEvent) -> Result<()> {
            self.seen
                .lock()
                .unwrap()
                .push(event.message.clone().unwrap_or_default());
            Ok(())
        }

        fn sink_name(&self) -> &'static str {
            "collecting"
        }
    }

    fn event(message: &str) -> AlertEvent {
        AlertEvent {
            level: "ERROR".to_string(),
            timestamp: Utc::now(),
            service_name: "svc".to_string(),
            environment: "test".to_string(),
            component: "backend".to_string(),
            target: "booking_core".to_string(),
            location: None,
            message: Some(message.to_string()),
            fields: BTreeMap::new(),
            spans: Vec::new(),
        }
    }

    #[tokio::test]
    async fn dispatched_events_reach_sinks() {
        let sink = Arc::new(CollectingSink {
            seen: Mutex::new(Vec::new()),
        });
        let dispatcher = AlertDispatcher::new(vec![sink.clone()]);

        dispatcher.try_dispatch(event("capture without authorization"));

        for _ in 0..50 {
            if !sink.seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            sink.seen.lock().unwrap().as_slice(),
            ["capture without authorization".to_string()]
        );
    }
}
