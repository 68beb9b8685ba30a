/// Outbound notifications and offsite sync
///
/// The notifier fires one-shot GET pings when a stream starts or ends;
/// failures are logged and never propagate into the pipeline. The
/// offsite sync periodically uploads a merged snapshot of the comments,
/// like and viewer documents to an external archive endpoint.
use crate::{
    config::{NotificationConfig, OffsiteSyncConfig},
    error::{OverlayError, Result},
    store::{CommentsLog, LikeLedger, ViewerCounter},
};
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info, warn};

const REQUEST_TIMEOUT_SECS: u64 = 30;

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|e| OverlayError::Internal(format!("Failed to build HTTP client: {}", e)))
}

/// One-shot stream lifecycle pings
pub struct Notifier {
    client: reqwest::Client,
    config: NotificationConfig,
}

impl Notifier {
    pub fn new(config: NotificationConfig) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            config,
        })
    }

    pub async fn notify_stream_start(&self) {
        if let Some(endpoint) = self.config.start_stream_endpoint.clone() {
            self.ping(&endpoint, "stream start").await;
        }
    }

    pub async fn notify_stream_end(&self) {
        if let Some(endpoint) = self.config.end_stream_endpoint.clone() {
            self.ping(&endpoint, "stream end").await;
        }
    }

    async fn ping(&self, endpoint: &str, label: &str) {
        let url = format!("{}{}", self.config.api_url, endpoint);
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                info!("Sent {} notification", label);
            }
            Ok(response) => {
                warn!(
                    "{} notification returned status {}",
                    label,
                    response.status()
                );
            }
            Err(e) => error!("Failed to send {} notification: {}", label, e),
        }
    }
}

/// Periodic upload of the session's documents to an offsite archive
pub struct OffsiteSync {
    client: reqwest::Client,
    config: OffsiteSyncConfig,
    comments: Arc<CommentsLog>,
    likes: Arc<LikeLedger>,
    viewers: Arc<ViewerCounter>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl OffsiteSync {
    pub fn new(
        config: OffsiteSyncConfig,
        comments: Arc<CommentsLog>,
        likes: Arc<LikeLedger>,
        viewers: Arc<ViewerCounter>,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            config,
            comments,
            likes,
            viewers,
            task: Mutex::new(None),
        })
    }

    /// Begin periodic uploads. Idempotent while a task is running.
    pub async fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            return;
        }
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        let sync = Arc::clone(self);
        let interval_secs = self.config.interval_secs;
        *task = Some(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(interval_secs));
            // First tick fires immediately; skip it so the first upload
            // lands a full interval after stream start
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sync.sync_once().await;
            }
        }));
        info!("Offsite sync started ({}s interval)", interval_secs);
    }

    /// Stop periodic uploads and push one final snapshot
    pub async fn stop(&self) {
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            task.abort();
            info!("Offsite sync stopped");
            self.sync_once().await;
        }
    }

    /// Upload a merged snapshot of all session documents
    pub async fn sync_once(&self) {
        let endpoint = match &self.config.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => return,
        };

        let comments = self.comments.snapshot();
        let init_timestamp = comments.init_timestamp;
        let merged = json!({
            "comments": comments,
            "likeData": self.likes.snapshot(),
            "viewerData": self.viewers.snapshot(),
        });

        let body = match serde_json::to_vec(&merged) {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to serialize sync snapshot: {}", e);
                return;
            }
        };

        let form = reqwest::multipart::Form::new()
            .text("key", extract_key(&endpoint))
            .part(
                "file",
                reqwest::multipart::Part::bytes(body)
                    .file_name(log_filename(init_timestamp))
                    .mime_str("application/json")
                    .unwrap_or_else(|_| reqwest::multipart::Part::text("")),
            );

        match self.client.post(&endpoint).multipart(form).send().await {
            Ok(response) if response.status().is_success() => {
                info!("Offsite sync upload complete");
            }
            Ok(response) => {
                warn!("Offsite sync returned status {}", response.status());
            }
            Err(e) => error!("Offsite sync upload failed: {}", e),
        }
    }
}

/// Pull the upload key out of the endpoint's `key=` query parameter
fn extract_key(endpoint: &str) -> String {
    endpoint
        .split_once('?')
        .map(|(_, query)| query)
        .unwrap_or("")
        .split('&')
        .find_map(|pair| pair.strip_prefix("key="))
        .unwrap_or("")
        .to_string()
}

/// Archive filename derived from the session's init timestamp
fn log_filename(init_timestamp: i64) -> String {
    let when = Utc
        .timestamp_millis_opt(init_timestamp)
        .single()
        .unwrap_or_else(Utc::now);
    format!("{}-stream-log.json", when.format("%Y-%m-%d-%H-%M-%S"))
}
