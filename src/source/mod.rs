/// Live event sources
///
/// A `LiveEventSource` owns one live connection to one external platform's
/// event stream for one session. Two implementations share the contract:
/// platform A is a WebSocket feed, platform B is fed by inbound webhooks.
/// The session orchestrator is written once against the trait.
pub mod platform_a;
pub mod platform_b;

pub use platform_a::PlatformASource;
pub use platform_b::{PlatformBHub, PlatformBSource};

use crate::error::Result;
use crate::events::Platform;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::mpsc;

/// Process-wide count of currently-active platform connections
static ACTIVE_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

/// Number of live platform connections across all sessions
pub fn active_connection_count() -> i64 {
    ACTIVE_CONNECTIONS.load(Ordering::Relaxed)
}

/// RAII guard for the active-connection counter.
/// Held by a source's reader task; dropping it on any exit path
/// (including task abort) decrements the counter.
pub struct ConnectionGuard;

impl ConnectionGuard {
    pub fn acquire() -> Self {
        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
    }
}

/// State handed back when a connection is established
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub platform: Platform,
    pub target_id: String,
    #[serde(default)]
    pub room_id: Option<String>,
}

/// A platform-native event before normalization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    /// Platform-native event name ("chat", "gift", "chat.message.sent", ...)
    pub name: String,
    /// Platform-native payload
    pub data: serde_json::Value,
}

/// Events a source delivers after `connect()` resolves.
/// `Disconnected` is emitted at most once per connection.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    Raw(RawEvent),
    Disconnected(String),
}

/// Connection lifecycle: Idle -> Connecting -> Connected -> Disconnecting -> Idle,
/// with Connecting -> Idle on timeout or failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

/// One live connection to one platform's event stream
#[async_trait]
pub trait LiveEventSource: Send + Sync {
    fn platform(&self) -> Platform;

    /// Establish the live link. Resolves or rejects within the configured
    /// connect timeout. The receiver carries raw events until disconnect.
    async fn connect(&self) -> Result<(SessionState, mpsc::Receiver<SourceEvent>)>;

    /// Tear down the connection. Valid from any state, idempotent.
    async fn disconnect(&self);
}
