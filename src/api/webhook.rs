/// Inbound webhook receiver for platform B
///
/// Platform B pushes events over HTTPS instead of a socket feed. Each
/// delivery names its event type in a header and carries the payload as
/// the JSON body. Accepted deliveries are published into the process
/// hub, where any bound platform B source picks them up.
use crate::{context::AppContext, error::OverlayError, source::RawEvent};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::post,
    Router,
};
use serde_json::{json, Value};
use tracing::{debug, warn};

const EVENT_TYPE_HEADER: &str = "x-event-type";

pub fn routes() -> Router<AppContext> {
    Router::new().route("/webhook/platform-b", post(receive_webhook))
}

async fn receive_webhook(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<Value>), OverlayError> {
    let event_type = headers
        .get(EVENT_TYPE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            OverlayError::Validation(format!("Missing {} header", EVENT_TYPE_HEADER))
        })?
        .to_string();

    let channel = extract_channel(&payload);
    debug!("Webhook delivery: {} for {:?}", event_type, channel);

    let receivers = ctx.platform_b_hub.publish(
        channel.unwrap_or_default(),
        RawEvent {
            name: event_type.clone(),
            data: payload,
        },
    );

    if receivers == 0 {
        warn!("Webhook {} arrived with no bound session", event_type);
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "accepted": true, "eventType": event_type })),
    ))
}

/// Pull the channel slug out of a delivery payload, checking the spots
/// the platform puts it for different event families
fn extract_channel(payload: &Value) -> Option<String> {
    payload
        .get("broadcaster")
        .and_then(|b| b.get("channel_slug"))
        .or_else(|| payload.get("channel_slug"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}
