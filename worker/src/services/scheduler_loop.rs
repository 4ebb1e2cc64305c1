use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// One scan over the rows a scheduler is responsible for. A pass must be
/// safe to run concurrently with itself and with every other pass.
#[async_trait]
pub trait SchedulerPass {
    fn name(&self) -> &'static str;

    /// Errors returned here are for the scan as a whole (the query failed).
    /// Per-row failures are logged inside the pass and retried next tick.
    async fn run_once(&self, now: DateTime<Utc>, batch_size: i64) -> Result<()>;
}

pub async fn run_scheduler_loop(
    pass: Arc<dyn SchedulerPass + Send + Sync>,
    every: Duration,
    batch_size: i64,
) -> Result<()> {
    info!(
        scheduler = pass.name(),
        interval_secs = every.as_secs(),
        batch_size,
        "scheduler: starting loop"
    );

    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        debug!(scheduler = pass.name(), "scheduler: tick");
        if let Err(err) = pass.run_once(Utc::now(), batch_size).await {
            error!(
                scheduler = pass.name(),
                error = %err,
                "scheduler: pass failed, retrying next tick"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyPass {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl SchedulerPass for FlakyPass {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn run_once(&self, _now: DateTime<Utc>, _batch_size: i64) -> Result<()> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            if run % 2 == 0 {
                anyhow::bail!("database unavailable");
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn loop_keeps_running_after_a_failed_pass() {
        let pass = Arc::new(FlakyPass {
            runs: AtomicUsize::new(0),
        });
        let handle = tokio::spawn(run_scheduler_loop(
            pass.clone(),
            Duration::from_secs(10),
            50,
        ));

        tokio::time::sleep(Duration::from_secs(35)).await;
        handle.abort();

        assert!(pass.runs.load(Ordering::SeqCst) >= 4);
    }
}
