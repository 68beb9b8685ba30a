/// Session orchestrator
///
/// One `Session` exists per connected widget client. It owns at most one
/// live binding per platform: binding connects a source, pushes every
/// event to the client as a JSON frame, and routes normalized events
/// into the aggregation services. Rebinding a platform tears its
/// previous binding down first.
use crate::{
    context::AppContext,
    events::{CanonicalEvent, EventType, Platform},
    normalize::{gift_is_final, Normalizer},
    source::{LiveEventSource, PlatformASource, PlatformBSource, SourceEvent},
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct Binding {
    source: Arc<dyn LiveEventSource>,
    task: JoinHandle<()>,
}

impl Binding {
    async fn teardown(self) {
        self.source.disconnect().await;
        // Aborting also cancels a pending retry sleep
        self.task.abort();
    }
}

pub struct Session {
    ctx: AppContext,
    outbound: mpsc::Sender<String>,
    /// At most one binding per platform; both may be live at once
    bindings: Mutex<HashMap<Platform, Binding>>,
    /// Session-wide normalizer: the first-follow announce set must span
    /// both platform bindings, so the same user following twice is
    /// announced once
    normalizer: Arc<Mutex<Normalizer>>,
    /// Stream-start side effects fire once per session, not per platform
    /// or reconnect
    stream_started: Arc<AtomicBool>,
}

impl Session {
    pub fn new(ctx: AppContext, outbound: mpsc::Sender<String>) -> Self {
        let normalizer = Arc::new(Mutex::new(Normalizer::new(ctx.config.first_follow_only)));
        Self {
            ctx,
            outbound,
            bindings: Mutex::new(HashMap::new()),
            normalizer,
            stream_started: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bind this session to a live target, replacing any prior binding
    /// on the same platform. A binding on the other platform stays live.
    pub async fn bind(&self, platform: Platform, target_id: String) {
        let mut bindings = self.bindings.lock().await;
        if let Some(prior) = bindings.remove(&platform) {
            debug!("Replacing prior {} binding", platform.as_str());
            prior.teardown().await;
        }
        if bindings.is_empty() {
            // Fresh start for the session's stream-start side effects
            // and the first-follow announce set
            self.stream_started.store(false, Ordering::SeqCst);
            *self.normalizer.lock().await = Normalizer::new(self.ctx.config.first_follow_only);
        }

        let source: Arc<dyn LiveEventSource> = match platform {
            Platform::PlatformA => Arc::new(PlatformASource::new(
                self.ctx.config.platforms.platform_a_ws_url.clone(),
                target_id.clone(),
                &self.ctx.config.retry,
            )),
            Platform::PlatformB => Arc::new(PlatformBSource::new(
                self.ctx.platform_b_hub.clone(),
                target_id.clone(),
            )),
        };

        info!("Binding session to {} on {}", target_id, platform.as_str());
        let task = tokio::spawn(run_binding(
            self.ctx.clone(),
            Arc::clone(&source),
            self.outbound.clone(),
            Arc::clone(&self.normalizer),
            Arc::clone(&self.stream_started),
        ));

        bindings.insert(platform, Binding { source, task });
    }

    /// Tear down every binding. Idempotent.
    pub async fn unbind(&self) {
        let drained: Vec<(Platform, Binding)> =
            self.bindings.lock().await.drain().collect();
        for (platform, binding) in drained {
            debug!("Unbinding session from {}", platform.as_str());
            binding.teardown().await;
        }
        // If this session started the stream side effects, wind them
        // down: the offsite sync stops and pushes one final snapshot.
        if self.stream_started.swap(false, Ordering::SeqCst) {
            self.ctx.offsite_sync.stop().await;
        }
    }

    /// Platforms with an active binding
    pub async fn bound_platforms(&self) -> Vec<Platform> {
        self.bindings.lock().await.keys().copied().collect()
    }
}

/// Connect-with-retry loop for one binding. Retries wrap the initial
/// connect only; once live, a disconnect ends the binding and the client
/// rebinds explicitly.
async fn run_binding(
    ctx: AppContext,
    source: Arc<dyn LiveEventSource>,
    outbound: mpsc::Sender<String>,
    normalizer: Arc<Mutex<Normalizer>>,
    stream_started: Arc<AtomicBool>,
) {
    let retry = ctx.config.retry.clone();
    let mut attempt: i64 = 0;

    loop {
        attempt += 1;
        match source.connect().await {
            Ok((state, rx)) => {
                if !send_frame(&outbound, json!({ "type": "connected", "session": state })).await {
                    source.disconnect().await;
                    return;
                }

                if !stream_started.swap(true, Ordering::SeqCst) {
                    ctx.notifier.notify_stream_start().await;
                    ctx.offsite_sync.start().await;
                }

                pump(&ctx, source.platform(), rx, &outbound, &normalizer).await;
                return;
            }
            Err(e) => {
                warn!("Connect attempt {} failed: {}", attempt, e);
                let delivered = send_frame(
                    &outbound,
                    json!({
                        "type": "connectionAttempt",
                        "success": false,
                        "error": e.to_string(),
                        "retryCount": attempt,
                    }),
                )
                .await;
                if !delivered {
                    return;
                }

                if retry.max_retries >= 0 && attempt > retry.max_retries {
                    warn!("Giving up after {} connect attempts", attempt);
                    let _ = send_frame(
                        &outbound,
                        json!({ "type": "disconnected", "reason": "retries exhausted" }),
                    )
                    .await;
                    return;
                }
                tokio::time::sleep(Duration::from_secs(retry.retry_interval_secs)).await;
            }
        }
    }
}

/// Push every source event to the client and route normalized events
/// into the aggregation services until the source disconnects
async fn pump(
    ctx: &AppContext,
    platform: Platform,
    mut rx: mpsc::Receiver<SourceEvent>,
    outbound: &mpsc::Sender<String>,
    normalizer: &Arc<Mutex<Normalizer>>,
) {
    while let Some(source_event) = rx.recv().await {
        match source_event {
            SourceEvent::Raw(raw) => {
                let normalized = normalizer.lock().await.normalize(&raw, platform);
                match normalized {
                    Some(event) => {
                        let frame = json!({ "type": event.event_type.as_str(), "event": event });
                        if !send_frame(outbound, frame).await {
                            return;
                        }
                        route_event(ctx, event).await;
                    }
                    None => {
                        // Untracked events pass through for widgets that
                        // render platform-native payloads directly
                        let frame = json!({ "type": raw.name, "data": raw.data });
                        if !send_frame(outbound, frame).await {
                            return;
                        }
                    }
                }
            }
            SourceEvent::Disconnected(reason) => {
                info!("Live feed disconnected: {}", reason);
                let _ = send_frame(
                    outbound,
                    json!({ "type": "disconnected", "reason": reason }),
                )
                .await;
                return;
            }
        }
    }
}

/// Fan a normalized event out to the aggregation services
async fn route_event(ctx: &AppContext, event: CanonicalEvent) {
    match event.event_type {
        EventType::Chat => ctx.comments.update(event),
        EventType::Gift => {
            // Mid-streak ticks reach the widget but not the log; the
            // ledger applies its own finality check
            ctx.gifters.update(event.clone());
            if gift_is_final(&event) {
                ctx.comments.update(event);
            }
        }
        EventType::Like => ctx.likers.update(event),
        EventType::Follow => {
            ctx.followers.update(event.clone());
            ctx.comments.update(event);
        }
        EventType::Share
        | EventType::Subscribe
        | EventType::SubscriptionRenewal
        | EventType::SubscriptionGift
        | EventType::SuperFan => ctx.comments.update(event),
        EventType::ViewerCount => ctx.viewers.update(event),
        EventType::StreamEnd => {
            ctx.notifier.notify_stream_end().await;
            ctx.offsite_sync.stop().await;
        }
        EventType::StreamStart => {}
    }
}

async fn send_frame(outbound: &mpsc::Sender<String>, frame: serde_json::Value) -> bool {
    match serde_json::to_string(&frame) {
        Ok(text) => outbound.send(text).await.is_ok(),
        Err(e) => {
            warn!("Failed to serialize push frame: {}", e);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CommentsConfig, FollowerGoalConfig, LedgerConfig, LoggingConfig, NotificationConfig,
        OffsiteSyncConfig, PlatformsConfig, RetryConfig, ServerConfig, ServiceConfig,
        StorageConfig,
    };
    use crate::source::RawEvent;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    fn test_config(data_dir: &std::path::Path) -> ServerConfig {
        ServerConfig {
            service: ServiceConfig {
                hostname: "localhost".to_string(),
                port: 0,
                version: "0.1.0".to_string(),
                public_directory: data_dir.join("public"),
            },
            storage: StorageConfig {
                data_directory: data_dir.to_path_buf(),
                comments_path: data_dir.join("comments.json"),
                gifter_rank_path: data_dir.join("gifterRank.json"),
                like_rank_path: data_dir.join("likeRank.json"),
                follower_count_path: data_dir.join("followerCount.json"),
                viewers_path: data_dir.join("viewers.json"),
            },
            platforms: PlatformsConfig {
                // Unroutable on purpose; connect attempts must fail fast
                platform_a_ws_url: "ws://127.0.0.1:1".to_string(),
            },
            retry: RetryConfig {
                connect_timeout_secs: 1,
                retry_interval_secs: 1,
                max_retries: 0,
            },
            comments: CommentsConfig {
                max_comments_stored: 500,
                exclude_users: vec![],
            },
            gifters: LedgerConfig::default(),
            likers: LedgerConfig::default(),
            followers: LedgerConfig::default(),
            follower_goal: FollowerGoalConfig::default(),
            notifications: NotificationConfig::default(),
            offsite_sync: OffsiteSyncConfig::default(),
            first_follow_only: true,
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }

    async fn next_frame(rx: &mut mpsc::Receiver<String>) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("outbound channel closed");
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn test_webhook_event_reaches_client_and_log() {
        let dir = tempdir().unwrap();
        let ctx = AppContext::new(test_config(dir.path()), false).await.unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let session = Session::new(ctx.clone(), tx);

        session.bind(Platform::PlatformB, "channel1".to_string()).await;

        let connected = next_frame(&mut rx).await;
        assert_eq!(connected["type"], "connected");
        assert_eq!(connected["session"]["targetId"], "channel1");

        ctx.platform_b_hub.publish(
            "channel1".to_string(),
            RawEvent {
                name: "chat.message.sent".to_string(),
                data: json!({
                    "message_id": "m1",
                    "content": "hello stream",
                    "sender": {"username": "viewer1", "user_id": 7},
                }),
            },
        );

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["type"], "chat");
        assert_eq!(frame["event"]["payload"]["text"], "hello stream");

        // The aggregation path saw it too (applied just after the push)
        let mut applied = false;
        for _ in 0..50 {
            if ctx.comments.has_processed("b:m1") {
                applied = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(applied);

        session.unbind().await;
    }

    #[tokio::test]
    async fn test_failed_connect_reports_attempt_then_gives_up() {
        let dir = tempdir().unwrap();
        let ctx = AppContext::new(test_config(dir.path()), false).await.unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let session = Session::new(ctx, tx);

        session.bind(Platform::PlatformA, "streamer1".to_string()).await;

        let attempt = next_frame(&mut rx).await;
        assert_eq!(attempt["type"], "connectionAttempt");
        assert_eq!(attempt["success"], false);
        assert_eq!(attempt["retryCount"], 1);

        let terminal = next_frame(&mut rx).await;
        assert_eq!(terminal["type"], "disconnected");

        session.unbind().await;
    }

    #[tokio::test]
    async fn test_rebinding_replaces_prior_binding() {
        let dir = tempdir().unwrap();
        let ctx = AppContext::new(test_config(dir.path()), false).await.unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let session = Session::new(ctx.clone(), tx);

        session.bind(Platform::PlatformB, "channel1".to_string()).await;
        assert_eq!(next_frame(&mut rx).await["type"], "connected");

        session.bind(Platform::PlatformB, "channel2".to_string()).await;
        assert_eq!(session.bound_platforms().await, vec![Platform::PlatformB]);

        // Old binding is gone; only channel2 frames arrive now
        loop {
            let frame = next_frame(&mut rx).await;
            if frame["type"] == "connected" {
                assert_eq!(frame["session"]["targetId"], "channel2");
                break;
            }
        }

        session.unbind().await;
        session.unbind().await;
    }

    #[tokio::test]
    async fn test_both_platforms_bound_at_once() {
        let dir = tempdir().unwrap();
        let ctx = AppContext::new(test_config(dir.path()), false).await.unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let session = Session::new(ctx.clone(), tx);

        session.bind(Platform::PlatformB, "channel1".to_string()).await;
        assert_eq!(next_frame(&mut rx).await["type"], "connected");

        // Binding the other platform keeps the first binding live
        session.bind(Platform::PlatformA, "streamer1".to_string()).await;
        let mut bound = session.bound_platforms().await;
        bound.sort_by_key(|p| p.as_str());
        assert_eq!(bound, vec![Platform::PlatformA, Platform::PlatformB]);

        ctx.platform_b_hub.publish(
            "channel1".to_string(),
            RawEvent {
                name: "chat.message.sent".to_string(),
                data: json!({
                    "message_id": "m2",
                    "content": "still here",
                    "sender": {"username": "viewer1"},
                }),
            },
        );

        // Platform B frames keep flowing while platform A retries
        loop {
            let frame = next_frame(&mut rx).await;
            if frame["type"] == "chat" {
                assert_eq!(frame["event"]["payload"]["text"], "still here");
                break;
            }
        }

        session.unbind().await;
        assert!(session.bound_platforms().await.is_empty());
    }

    #[tokio::test]
    async fn test_follow_announced_once_per_session_across_bindings() {
        let dir = tempdir().unwrap();
        let ctx = AppContext::new(test_config(dir.path()), false).await.unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let session = Session::new(ctx.clone(), tx);

        // A second platform stays bound so replacing the first never
        // empties the session's bindings
        session.bind(Platform::PlatformA, "streamer1".to_string()).await;
        session.bind(Platform::PlatformB, "channel1".to_string()).await;

        loop {
            let frame = next_frame(&mut rx).await;
            if frame["type"] == "connected" && frame["session"]["targetId"] == "channel1" {
                break;
            }
        }

        ctx.platform_b_hub.publish(
            "channel1".to_string(),
            RawEvent {
                name: "channel.followed".to_string(),
                data: json!({"message_id": "f1", "follower": {"username": "fan1"}}),
            },
        );
        loop {
            let frame = next_frame(&mut rx).await;
            if frame["type"] == "follow" {
                assert_eq!(frame["event"]["actor"]["uniqueId"], "fan1");
                break;
            }
        }

        // Rebinding the platform keeps the session's announce set
        session.bind(Platform::PlatformB, "channel2".to_string()).await;
        loop {
            let frame = next_frame(&mut rx).await;
            if frame["type"] == "connected" && frame["session"]["targetId"] == "channel2" {
                break;
            }
        }

        ctx.platform_b_hub.publish(
            "channel2".to_string(),
            RawEvent {
                name: "channel.followed".to_string(),
                data: json!({"message_id": "f2", "follower": {"username": "fan1"}}),
            },
        );
        // The repeat follow is suppressed, surfacing only as a raw
        // pass-through frame
        loop {
            let frame = next_frame(&mut rx).await;
            assert_ne!(frame["type"], "follow");
            if frame["type"] == "channel.followed" {
                break;
            }
        }

        session.unbind().await;
    }

    #[tokio::test]
    async fn test_untracked_event_passes_through() {
        let dir = tempdir().unwrap();
        let ctx = AppContext::new(test_config(dir.path()), false).await.unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let session = Session::new(ctx.clone(), tx);

        session.bind(Platform::PlatformB, "channel1".to_string()).await;
        assert_eq!(next_frame(&mut rx).await["type"], "connected");

        ctx.platform_b_hub.publish(
            "channel1".to_string(),
            RawEvent {
                name: "channel.points.redeemed".to_string(),
                data: json!({"reward": "hydrate"}),
            },
        );

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["type"], "channel.points.redeemed");
        assert_eq!(frame["data"]["reward"], "hydrate");

        session.unbind().await;
    }
}
