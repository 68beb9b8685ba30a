/// Platform A live connection wrapper
///
/// Maintains one WebSocket connection to platform A's webcast feed for a
/// single target channel. Frames arrive as JSON text with a `type`
/// discriminator and a `data` payload. A close frame whose reason carries
/// the platform's "stream ended" sentinel is surfaced as a synthetic
/// streamEnd raw event; ordinary network drops are not.
use crate::{
    config::RetryConfig,
    error::{OverlayError, Result},
    events::Platform,
    source::{
        ConnectionGuard, ConnectionState, LiveEventSource, RawEvent, SessionState, SourceEvent,
    },
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Close reason marker platform A sends when the broadcast itself ends
const STREAM_END_SENTINEL: &str = "stream has ended";

/// Buffer size for the source event channel
const EVENT_BUFFER_SIZE: usize = 256;

/// Incoming platform A frame envelope
#[derive(Debug, Deserialize)]
struct FrameEnvelope {
    #[serde(rename = "type")]
    name: String,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default, rename = "roomId")]
    room_id: Option<String>,
}

pub struct PlatformASource {
    ws_base_url: String,
    target_id: String,
    connect_timeout_secs: u64,
    state: Mutex<ConnectionState>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl PlatformASource {
    pub fn new(ws_base_url: String, target_id: String, retry: &RetryConfig) -> Self {
        Self {
            ws_base_url,
            target_id,
            connect_timeout_secs: retry.connect_timeout_secs,
            state: Mutex::new(ConnectionState::Idle),
            shutdown: Mutex::new(None),
        }
    }

    fn feed_url(&self) -> String {
        format!("{}/{}", self.ws_base_url.trim_end_matches('/'), self.target_id)
    }

    /// Read frames until close, error, or shutdown signal
    async fn read_loop(
        mut ws_stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        tx: mpsc::Sender<SourceEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
        target_id: String,
    ) {
        let _guard = ConnectionGuard::acquire();

        let reason = loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        let _ = ws_stream.send(Message::Close(None)).await;
                        break "client disconnect".to_string();
                    }
                }

                msg = ws_stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<FrameEnvelope>(&text) {
                                Ok(frame) => {
                                    let mut data = frame.data;
                                    if let (Some(room_id), Some(obj)) =
                                        (frame.room_id, data.as_object_mut())
                                    {
                                        obj.entry("roomId")
                                            .or_insert(serde_json::Value::String(room_id));
                                    }
                                    let raw = RawEvent { name: frame.name, data };
                                    if tx.send(SourceEvent::Raw(raw)).await.is_err() {
                                        debug!("Event channel closed for {}", target_id);
                                        return;
                                    }
                                }
                                Err(e) => {
                                    warn!("Unparseable frame from platform A: {}", e);
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if ws_stream.send(Message::Pong(data)).await.is_err() {
                                break "pong failed".to_string();
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame
                                .map(|f| f.reason.to_string())
                                .unwrap_or_else(|| "connection closed".to_string());
                            // A close carrying the broadcast-ended sentinel becomes
                            // a synthetic streamEnd, distinct from ordinary drops.
                            if reason.to_lowercase().contains(STREAM_END_SENTINEL) {
                                let _ = tx
                                    .send(SourceEvent::Raw(RawEvent {
                                        name: "streamEnd".to_string(),
                                        data: serde_json::Value::Null,
                                    }))
                                    .await;
                            }
                            break reason;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            break format!("websocket error: {}", e);
                        }
                        None => {
                            break "connection closed".to_string();
                        }
                    }
                }
            }
        };

        info!("Platform A feed for {} disconnected: {}", target_id, reason);
        let _ = tx.send(SourceEvent::Disconnected(reason)).await;
    }
}

#[async_trait]
impl LiveEventSource for PlatformASource {
    fn platform(&self) -> Platform {
        Platform::PlatformA
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

        let url = self.feed_url();
        info!("Connecting to platform A feed: {}", url);

        let connected = timeout(
            Duration::from_secs(self.connect_timeout_secs),
            connect_async(&url),
        )
        .await;

        let ws_stream = match connected {
            Err(_) => {
                *self.state.lock().await = ConnectionState::Idle;
                return Err(OverlayError::ConnectTimeout(self.connect_timeout_secs));
            }
            Ok(Err(e)) => {
                *self.state.lock().await = ConnectionState::Idle;
                return Err(OverlayError::Connection(e.to_string()));
            }
            Ok(Ok((ws_stream, _))) => ws_stream,
        };

        let (tx, rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        *self.shutdown.lock().await = Some(shutdown_tx);
        *self.state.lock().await = ConnectionState::Connected;

        tokio::spawn(Self::read_loop(
            ws_stream,
            tx,
            shutdown_rx,
            self.target_id.clone(),
        ));

        let state = SessionState {
            platform: Platform::PlatformA,
            target_id: self.target_id.clone(),
            room_id: None,
        };
        info!("✓ Connected to platform A feed for {}", self.target_id);
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
        debug!("Platform A source for {} disconnected", self.target_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;

    fn test_source() -> PlatformASource {
        let retry = RetryConfig {
            connect_timeout_secs: 1,
            retry_interval_secs: 60,
            max_retries: -1,
        };
        PlatformASource::new(
            "ws://127.0.0.1:1/live".to_string(),
            "streamer1".to_string(),
            &retry,
        )
    }

    #[test]
    fn test_feed_url() {
        let source = test_source();
        assert_eq!(source.feed_url(), "ws://127.0.0.1:1/live/streamer1");
    }

    #[test]
    fn test_frame_envelope_parse() {
        let frame: FrameEnvelope =
            serde_json::from_str(r#"{"type":"chat","data":{"comment":"hi"},"roomId":"r1"}"#)
                .unwrap();
        assert_eq!(frame.name, "chat");
        assert_eq!(frame.room_id.as_deref(), Some("r1"));
        assert_eq!(frame.data["comment"], "hi");
    }

    #[tokio::test]
    async fn test_connect_failure_returns_to_idle() {
        let source = test_source();
        // Nothing listens on port 1; the connect must fail, not hang.
        let result = source.connect().await;
        assert!(result.is_err());
        assert_eq!(*source.state.lock().await, ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_from_idle() {
        let source = test_source();
        source.disconnect().await;
        source.disconnect().await;
        assert_eq!(*source.state.lock().await, ConnectionState::Idle);
    }
}
