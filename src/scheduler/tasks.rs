use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, info};

use crate::config::PollConfig;
use crate::poll::Poller;
use crate::scheduler::Scheduler;

/// Register the response poll and the liveness heartbeat
pub async fn register_builtin_tasks(
    scheduler: &Scheduler,
    poller: Arc<Poller>,
    config: &PollConfig,
) -> anyhow::Result<()> {
    scheduler
        .add_interval_job(config.interval(), "poll-responses", move || {
            let poller = Arc::clone(&poller);
            async move {
                if let Err(e) = poller.tick().await {
                    error!("Poll tick failed: {:#}", e);
                }
            }
            .boxed()
        })
        .await?;

    // Liveness heartbeat
    scheduler
        .add_cron_job(&config.heartbeat_cron, "heartbeat", || {
            async {
                info!("Heartbeat: bot is alive");
            }
            .boxed()
        })
        .await?;

    Ok(())
}
