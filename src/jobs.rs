/// Background jobs
use crate::source::active_connection_count;
use serde_json::json;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, info};

/// Seconds between statistic broadcasts
const STATISTIC_INTERVAL_SECS: u64 = 5;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<crate::context::AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<crate::context::AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");
        tokio::spawn(Self::statistic_broadcast_job(Arc::clone(&self)));
        info!("Background jobs started");
    }

    /// Push a statistic frame to every connected widget (runs every 5s)
    async fn statistic_broadcast_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(STATISTIC_INTERVAL_SECS));

        loop {
            interval.tick().await;

            let text = match serde_json::to_string(&statistic_frame()) {
                Ok(text) => text,
                Err(_) => continue,
            };

            // send() errors only when no widget is listening
            match scheduler.context.broadcast_tx.send(text) {
                Ok(receivers) => debug!("Statistic frame sent to {} widgets", receivers),
                Err(_) => {}
            }
        }
    }
}

fn statistic_frame() -> serde_json::Value {
    json!({
        "type": "statistic",
        "data": {
            "activeConnectionCount": active_connection_count(),
        },
    })
}
