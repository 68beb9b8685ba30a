/// Platform B live connection wrapper
///
/// Platform B delivers events as signed webhooks rather than a socket
/// feed. The inbound webhook route publishes verified events into a
/// process-wide hub; each `PlatformBSource` subscribes to the hub and
/// filters for its channel, presenting the same `LiveEventSource`
/// contract as the socket-based platform A wrapper.
use crate::{
    error::{OverlayError, Result},
    events::Platform,
    source::{
        ConnectionGuard, ConnectionState, LiveEventSource, RawEvent, SessionState, SourceEvent,
    },
};
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tracing::{debug, info};

/// Buffer size for the webhook fan-out channel
const HUB_BUFFER_SIZE: usize = 256;

/// A webhook event published into the hub
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    /// Channel the event belongs to; empty targets all subscribers
    pub channel: String,
    pub event: RawEvent,
}

/// Process-wide fan-out point for inbound platform B webhooks
#[derive(Clone)]
pub struct PlatformBHub {
    tx: broadcast::Sender<WebhookDelivery>,
}

impl Default for PlatformBHub {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformBHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(HUB_BUFFER_SIZE);
        Self { tx }
    }

    /// Publish a verified webhook event. Returns the number of live
    /// subscribers it reached.
    pub fn publish(&self, channel: String, event: RawEvent) -> usize {
        self.tx
            .send(WebhookDelivery { channel, event })
            .unwrap_or(0)
    }

    fn subscribe(&self) -> broadcast::Receiver<WebhookDelivery> {
        self.tx.subscribe()
    }
}

pub struct PlatformBSource {
    hub: PlatformBHub,
    channel: String,
    state: Mutex<ConnectionState>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl PlatformBSource {
    pub fn new(hub: PlatformBHub, channel: String) -> Self {
        Self {
            hub,
            channel,
            state: Mutex::new(ConnectionState::Idle),
            shutdown: Mutex::new(None),
        }
    }

    async fn pump(
        mut hub_rx: broadcast::Receiver<WebhookDelivery>,
        tx: mpsc::Sender<SourceEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
        channel: String,
    ) {
        let _guard = ConnectionGuard::acquire();

        let reason = loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break "client disconnect".to_string();
                    }
                }

                delivery = hub_rx.recv() => {
                    match delivery {
                        Ok(delivery) => {
                            if !delivery.channel.is_empty() && delivery.channel != channel {
                                continue;
                            }
                            if tx.send(SourceEvent::Raw(delivery.event)).await.is_err() {
                                debug!("Event channel closed for {}", channel);
                                return;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            debug!("Webhook hub lagged, {} events dropped", missed);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            break "webhook hub closed".to_string();
                        }
                    }
                }
            }
        };

        info!("Platform B feed for {} disconnected: {}", channel, reason);
        let _ = tx.send(SourceEvent::Disconnected(reason)).await;
    }
}

#[async_trait]
impl LiveEventSource for PlatformBSource {
    fn platform(&self) -> Platform {
        Platform::PlatformB
    }

    async fn connect(&self) -> Result<(SessionState, mpsc::Receiver<SourceEvent>)> {
        {
            let mut state = self.state.lock().await;
            if *state != ConnectionState::Idle {
                return Err(OverlayError::Connection(format!(
                    "connect() while not idle ({:?})",
                    *state
                )));
            }
            *state = ConnectionState::Connecting;
        }

        // Subscription handshake with the platform happens out of band;
        // here the live link is the hub subscription itself.
        let hub_rx = self.hub.subscribe();
        let (tx, rx) = mpsc::channel(HUB_BUFFER_SIZE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        *self.shutdown.lock().await = Some(shutdown_tx);
        *self.state.lock().await = ConnectionState::Connected;

        tokio::spawn(Self::pump(hub_rx, tx, shutdown_rx, self.channel.clone()));

        let state = SessionState {
            platform: Platform::PlatformB,
            target_id: self.channel.clone(),
            room_id: None,
        };
        info!("✓ Subscribed to platform B webhooks for {}", self.channel);
        Ok((state, rx))
    }

    async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        if *state == ConnectionState::Idle {
            return;
        }
        *state = ConnectionState::Disconnecting;
        drop(state);

        if let Some(shutdown) = self.shutdown.lock().await.take() {
            let _ = shutdown.send(true);
        }

        *self.state.lock().await = ConnectionState::Idle;
        debug!("Platform B source for {} disconnected", self.channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_reaches_connected_source() {
        let hub = PlatformBHub::new();
        let source = PlatformBSource::new(hub.clone(), "channel1".to_string());
        let (state, mut rx) = source.connect().await.unwrap();
        assert_eq!(state.target_id, "channel1");

        hub.publish(
            "channel1".to_string(),
            RawEvent {
                name: "chat.message.sent".to_string(),
                data: json!({"content": "hello"}),
            },
        );

        match rx.recv().await.unwrap() {
            SourceEvent::Raw(raw) => {
                assert_eq!(raw.name, "chat.message.sent");
                assert_eq!(raw.data["content"], "hello");
            }
            other => panic!("Expected raw event, got {:?}", other),
        }

        source.disconnect().await;
    }

    #[tokio::test]
    async fn test_other_channel_events_filtered() {
        let hub = PlatformBHub::new();
        let source = PlatformBSource::new(hub.clone(), "channel1".to_string());
        let (_, mut rx) = source.connect().await.unwrap();

        hub.publish(
            "other".to_string(),
            RawEvent {
                name: "chat.message.sent".to_string(),
                data: json!({}),
            },
        );
        hub.publish(
            "channel1".to_string(),
            RawEvent {
                name: "channel.followed".to_string(),
                data: json!({}),
            },
        );

        match rx.recv().await.unwrap() {
            SourceEvent::Raw(raw) => assert_eq!(raw.name, "channel.followed"),
            other => panic!("Expected raw event, got {:?}", other),
        }

        source.disconnect().await;
    }

    #[tokio::test]
    async fn test_disconnect_emits_disconnected_once() {
        let hub = PlatformBHub::new();
        let source = PlatformBSource::new(hub, "channel1".to_string());
        let (_, mut rx) = source.connect().await.unwrap();

        source.disconnect().await;
        source.disconnect().await;

        match rx.recv().await.unwrap() {
            SourceEvent::Disconnected(reason) => assert_eq!(reason, "client disconnect"),
            other => panic!("Expected disconnect, got {:?}", other),
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_connect_twice_rejected() {
        let hub = PlatformBHub::new();
        let source = PlatformBSource::new(hub, "channel1".to_string());
        let _ = source.connect().await.unwrap();
        assert!(source.connect().await.is_err());
        source.disconnect().await;
    }
}
