/// WebSocket push channel for overlay widgets
///
/// Each connected widget gets its own session. The widget drives the
/// session with JSON commands (bind to a live target, unbind) and
/// receives JSON frames: normalized events, raw pass-through events,
/// connection lifecycle notices and the periodic statistic broadcast.
///
/// Backpressure is a buffered per-session channel; a widget that stops
/// reading loses its session rather than stalling the pipeline. Pings
/// every 30 seconds detect dead connections.
use crate::{
    context::AppContext,
    events::Platform,
    session::Session,
};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

const OUTBOUND_BUFFER_SIZE: usize = 100;
const PING_INTERVAL_SECS: u64 = 30;

/// Commands a widget sends over the socket
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
enum ClientCommand {
    #[serde(rename_all = "camelCase")]
    Bind {
        platform: Platform,
        target_id: String,
        /// Platform-specific connection tuning, passed through as-is
        #[serde(default)]
        options: serde_json::Value,
    },
    Unbind,
}

pub fn routes() -> Router<AppContext> {
    Router::new().route("/ws", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(ctx): State<AppContext>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

async fn handle_socket(socket: WebSocket, ctx: AppContext) {
    info!("Widget connected");

    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER_SIZE);
    let mut broadcast_rx = ctx.broadcast_tx.subscribe();
    let session = Arc::new(Session::new(ctx, outbound_tx));

    let mut ping = interval(Duration::from_secs(PING_INTERVAL_SECS));
    ping.tick().await; // immediate first tick

    loop {
        tokio::select! {
            // Session frames: events, lifecycle notices
            frame = outbound_rx.recv() => {
                match frame {
                    Some(text) => {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // Server-wide statistic broadcasts
            broadcast = broadcast_rx.recv() => {
                match broadcast {
                    Ok(text) => {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        debug!("Widget lagged, {} broadcasts dropped", missed);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }

            // Commands from the widget
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_command(&session, &text).await;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if sender.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Widget socket error: {}", e);
                        break;
                    }
                }
            }

            // Keepalive
            _ = ping.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    session.unbind().await;
    info!("Widget disconnected");
}

async fn handle_command(session: &Session, text: &str) {
    match serde_json::from_str::<ClientCommand>(text) {
        Ok(ClientCommand::Bind {
            platform,
            target_id,
            options,
        }) => {
            if !options.is_null() {
                debug!("Bind options: {}", options);
            }
            session.bind(platform, target_id).await;
        }
        Ok(ClientCommand::Unbind) => {
            session.unbind().await;
        }
        Err(e) => {
            warn!("Unparseable widget command: {}", e);
        }
    }
}
