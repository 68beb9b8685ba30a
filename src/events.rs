/// Canonical event taxonomy for the ingestion pipeline
///
/// Every platform-native payload is normalized into a `CanonicalEvent`
/// before it reaches the push channel or the aggregation services. The
/// `identity` field is the idempotency key: re-delivery of the same
/// identity must be a no-op in every aggregation document.
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic per-process sequence for synthesized identities
static IDENTITY_SEQ: AtomicU64 = AtomicU64::new(0);

/// Event type tags carried on the push channel and in documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    Chat,
    Gift,
    Follow,
    Subscribe,
    SubscriptionRenewal,
    SubscriptionGift,
    Share,
    Like,
    SuperFan,
    ViewerCount,
    StreamStart,
    StreamEnd,
}

impl EventType {
    /// Wire name of the event, also used as the push-frame tag
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Chat => "chat",
            EventType::Gift => "gift",
            EventType::Follow => "follow",
            EventType::Subscribe => "subscribe",
            EventType::SubscriptionRenewal => "subscriptionRenewal",
            EventType::SubscriptionGift => "subscriptionGift",
            EventType::Share => "share",
            EventType::Like => "like",
            EventType::SuperFan => "superFan",
            EventType::ViewerCount => "viewerCount",
            EventType::StreamStart => "streamStart",
            EventType::StreamEnd => "streamEnd",
        }
    }
}

/// Source platform of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Platform {
    PlatformA,
    PlatformB,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::PlatformA => "platformA",
            Platform::PlatformB => "platformB",
        }
    }
}

/// The user behind an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub unique_id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub is_moderator: bool,
    #[serde(default)]
    pub is_subscriber: bool,
    #[serde(default)]
    pub is_new_gifter: bool,
    #[serde(default)]
    pub is_new_subscriber: bool,
    #[serde(default)]
    pub team_level: u32,
}

/// Type-specific event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EventPayload {
    Chat {
        text: String,
    },
    Gift {
        gift_name: String,
        /// Diamond value of a single gift unit
        unit_value: u64,
        repeat_count: u64,
        is_repeat_final: bool,
        /// Streakable gifts repeat before the final count is known
        is_streakable: bool,
    },
    Like {
        like_count: u64,
    },
    ViewerCount {
        count: u64,
        #[serde(default)]
        room_id: Option<String>,
    },
    Follow,
    Subscribe,
    SubscriptionRenewal,
    SubscriptionGift {
        #[serde(default)]
        giftee_count: u64,
    },
    Share,
    SuperFan,
    StreamStart,
    StreamEnd,
}

/// The unit flowing through the whole pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEvent {
    pub event_type: EventType,
    pub platform: Platform,
    /// Stable opaque id, unique per event instance from its source
    pub identity: String,
    pub actor: Actor,
    pub payload: EventPayload,
    /// Epoch milliseconds, always numeric
    pub timestamp: i64,
}

impl CanonicalEvent {
    /// Total diamond value of a gift payload, zero for everything else
    pub fn gift_value(&self) -> u64 {
        match &self.payload {
            EventPayload::Gift {
                unit_value,
                repeat_count,
                ..
            } => unit_value * repeat_count,
            _ => 0,
        }
    }
}

/// Synthesize an identity for a source event that carries no native id.
///
/// Uses a monotonic per-process sequence combined with the actor id, so
/// legitimately repeated identical events are never falsely suppressed.
pub fn synthesize_identity(unique_id: &str, event_type: EventType) -> String {
    let seq = IDENTITY_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}:{}:{}", unique_id, event_type.as_str(), seq)
}

/// Current epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Deserialize a timestamp that may arrive as a number or a numeric string
pub fn de_timestamp<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(i64),
        Float(f64),
        Text(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::Float(f) => Ok(f as i64),
        NumberOrString::Text(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid timestamp: {}", s))),
    }
}

/// Same as [`de_timestamp`] but tolerates a missing field
pub fn de_opt_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "de_timestamp")] i64);

    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> CanonicalEvent {
        CanonicalEvent {
            event_type: EventType::Gift,
            platform: Platform::PlatformA,
            identity: "msg-1".to_string(),
            actor: Actor {
                unique_id: "viewer1".to_string(),
                display_name: "Viewer One".to_string(),
                ..Default::default()
            },
            payload: EventPayload::Gift {
                gift_name: "Rose".to_string(),
                unit_value: 5,
                repeat_count: 3,
                is_repeat_final: true,
                is_streakable: true,
            },
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_event_type_wire_names() {
        assert_eq!(EventType::Chat.as_str(), "chat");
        assert_eq!(EventType::SubscriptionRenewal.as_str(), "subscriptionRenewal");
        assert_eq!(EventType::ViewerCount.as_str(), "viewerCount");
        assert_eq!(EventType::StreamEnd.as_str(), "streamEnd");
    }

    #[test]
    fn test_canonical_event_round_trip() {
        let event = sample_event();
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"eventType\":\"gift\""));
        assert!(json.contains("\"platform\":\"platformA\""));

        let back: CanonicalEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_gift_value() {
        assert_eq!(sample_event().gift_value(), 15);

        let mut like = sample_event();
        like.payload = EventPayload::Like { like_count: 20 };
        assert_eq!(like.gift_value(), 0);
    }

    #[test]
    fn test_synthesized_identities_are_unique() {
        let a = synthesize_identity("user", EventType::Chat);
        let b = synthesize_identity("user", EventType::Chat);
        assert_ne!(a, b);
        assert!(a.starts_with("user:chat:"));
    }

    #[test]
    fn test_de_timestamp_accepts_string_and_number() {
        #[derive(Deserialize)]
        struct Wire {
            #[serde(deserialize_with = "de_timestamp")]
            create_time: i64,
        }

        let from_number: Wire = serde_json::from_str(r#"{"create_time": 1700000000000}"#).unwrap();
        assert_eq!(from_number.create_time, 1_700_000_000_000);

        let from_string: Wire =
            serde_json::from_str(r#"{"create_time": "1700000000000"}"#).unwrap();
        assert_eq!(from_string.create_time, 1_700_000_000_000);

        let bad = serde_json::from_str::<Wire>(r#"{"create_time": "not-a-number"}"#);
        assert!(bad.is_err());
    }
}
