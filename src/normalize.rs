/// Event normalization
///
/// Maps each platform's native event shape into a `CanonicalEvent`.
/// Returns `None` for event types the system does not track; those are
/// dropped silently (debug-logged), not treated as errors.
use crate::{
    events::{
        de_opt_timestamp, now_millis, synthesize_identity, Actor, CanonicalEvent, EventPayload,
        EventType, Platform,
    },
    source::RawEvent,
};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::debug;

/// Like batches at or above this size are doubled before accumulation.
/// Large batches under-report on the platform side.
const LIKE_DOUBLING_THRESHOLD: u64 = 15;

/// Social display type platform A uses for shares
const SHARE_DISPLAY_TYPE: i64 = 3;

/// True when a gift event is complete and aggregation-worthy: the final
/// tick of a streak, or a gift type that never streaks. Intermediate
/// streak ticks must not reach the ledgers or the comments log.
pub fn gift_is_final(event: &CanonicalEvent) -> bool {
    match &event.payload {
        EventPayload::Gift {
            is_repeat_final,
            is_streakable,
            ..
        } => *is_repeat_final || !*is_streakable,
        _ => false,
    }
}

/// Apply the like batching multiplier to a raw batch count
pub fn effective_like_count(like_count: u64) -> u64 {
    if like_count >= LIKE_DOUBLING_THRESHOLD {
        like_count * 2
    } else {
        like_count
    }
}

/// Platform A event payload, flattened the way the feed delivers it
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawPlatformA {
    msg_id: Option<String>,
    unique_id: Option<String>,
    nickname: Option<String>,
    profile_picture_url: Option<String>,
    comment: Option<String>,
    #[serde(deserialize_with = "de_opt_timestamp")]
    create_time: Option<i64>,
    user_identity: Option<RawPlatformAIdentity>,
    team_member_level: Option<u32>,
    gift_name: Option<String>,
    diamond_count: Option<u64>,
    repeat_count: Option<u64>,
    repeat_end: Option<bool>,
    gift_type: Option<i64>,
    like_count: Option<u64>,
    display_type: Option<i64>,
    label: Option<String>,
    viewer_count: Option<u64>,
    room_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawPlatformAIdentity {
    is_moderator_of_anchor: bool,
    is_subscriber_of_anchor: bool,
    is_new_gifter_of_anchor: bool,
    is_new_subscriber_of_anchor: bool,
}

/// Platform B webhook user object
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPlatformBUser {
    username: String,
    #[allow(dead_code)]
    user_id: Option<u64>,
    profile_picture: Option<String>,
}

/// Platform B webhook body, fields per event type
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPlatformB {
    message_id: Option<String>,
    sender: Option<RawPlatformBUser>,
    content: Option<String>,
    follower: Option<RawPlatformBUser>,
    subscriber: Option<RawPlatformBUser>,
    gifter: Option<RawPlatformBUser>,
    giftees: Vec<serde_json::Value>,
    is_live: Option<bool>,
    #[serde(deserialize_with = "de_opt_timestamp")]
    created_at: Option<i64>,
}

/// Stateful normalizer, one per session, shared by its platform bindings.
///
/// Carries the per-session set of already-announced followers used by the
/// first-follow-only policy; this is independent of the follower
/// counter's own persisted dedup by unique id.
pub struct Normalizer {
    first_follow_only: bool,
    announced_followers: HashSet<String>,
}

impl Normalizer {
    pub fn new(first_follow_only: bool) -> Self {
        Self {
            first_follow_only,
            announced_followers: HashSet::new(),
        }
    }

    pub fn normalize(&mut self, raw: &RawEvent, platform: Platform) -> Option<CanonicalEvent> {
        match platform {
            Platform::PlatformA => self.normalize_platform_a(raw),
            Platform::PlatformB => self.normalize_platform_b(raw),
        }
    }

    fn follow_suppressed(&mut self, unique_id: &str) -> bool {
        if !self.first_follow_only {
            return false;
        }
        !self.announced_followers.insert(unique_id.to_string())
    }

    fn normalize_platform_a(&mut self, raw: &RawEvent) -> Option<CanonicalEvent> {
        let msg: RawPlatformA = match serde_json::from_value(raw.data.clone()) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Dropping malformed platform A '{}' event: {}", raw.name, e);
                return None;
            }
        };

        let actor = Actor {
            unique_id: msg.unique_id.clone().unwrap_or_default(),
            display_name: msg
                .nickname
                .clone()
                .or_else(|| msg.unique_id.clone())
                .unwrap_or_default(),
            avatar_url: msg.profile_picture_url.clone(),
            is_moderator: msg
                .user_identity
                .as_ref()
                .is_some_and(|i| i.is_moderator_of_anchor),
            is_subscriber: msg
                .user_identity
                .as_ref()
                .is_some_and(|i| i.is_subscriber_of_anchor),
            is_new_gifter: msg
                .user_identity
                .as_ref()
                .is_some_and(|i| i.is_new_gifter_of_anchor),
            is_new_subscriber: msg
                .user_identity
                .as_ref()
                .is_some_and(|i| i.is_new_subscriber_of_anchor),
            team_level: msg.team_member_level.unwrap_or(0),
        };

        let (event_type, payload) = match raw.name.as_str() {
            "chat" => (
                EventType::Chat,
                EventPayload::Chat {
                    text: msg.comment.clone().unwrap_or_default(),
                },
            ),
            "gift" => (
                EventType::Gift,
                EventPayload::Gift {
                    gift_name: msg.gift_name.clone().unwrap_or_default(),
                    unit_value: msg.diamond_count.unwrap_or(0),
                    repeat_count: msg.repeat_count.unwrap_or(1),
                    is_repeat_final: msg.repeat_end.unwrap_or(false),
                    // Streak type 1 repeats before the final count is known
                    is_streakable: msg.gift_type == Some(1),
                },
            ),
            "like" => (
                EventType::Like,
                EventPayload::Like {
                    like_count: msg.like_count.unwrap_or(1),
                },
            ),
            "social" => {
                // Only share-flavored social events are tracked
                let is_share = msg.display_type == Some(SHARE_DISPLAY_TYPE)
                    || msg
                        .label
                        .as_deref()
                        .is_some_and(|l| l.contains("shared"));
                if !is_share {
                    debug!("Dropping non-share social event from {}", actor.unique_id);
                    return None;
                }
                (EventType::Share, EventPayload::Share)
            }
            "follow" => {
                if self.follow_suppressed(&actor.unique_id) {
                    debug!("Suppressing repeat follow from {}", actor.unique_id);
                    return None;
                }
                (EventType::Follow, EventPayload::Follow)
            }
            "subscribe" => (EventType::Subscribe, EventPayload::Subscribe),
            "superFan" => (EventType::SuperFan, EventPayload::SuperFan),
            "roomUser" => (
                EventType::ViewerCount,
                EventPayload::ViewerCount {
                    count: msg.viewer_count.unwrap_or(0),
                    room_id: msg.room_id.clone(),
                },
            ),
            "streamEnd" => (EventType::StreamEnd, EventPayload::StreamEnd),
            other => {
                debug!("Untracked platform A event type: {}", other);
                return None;
            }
        };

        let identity = msg
            .msg_id
            .clone()
            .unwrap_or_else(|| synthesize_identity(&actor.unique_id, event_type));

        Some(CanonicalEvent {
            event_type,
            platform: Platform::PlatformA,
            identity,
            actor,
            payload,
            timestamp: msg.create_time.unwrap_or_else(now_millis),
        })
    }

    fn normalize_platform_b(&mut self, raw: &RawEvent) -> Option<CanonicalEvent> {
        let msg: RawPlatformB = match serde_json::from_value(raw.data.clone()) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Dropping malformed platform B '{}' event: {}", raw.name, e);
                return None;
            }
        };

        let user = msg
            .sender
            .as_ref()
            .or(msg.follower.as_ref())
            .or(msg.subscriber.as_ref())
            .or(msg.gifter.as_ref());

        let actor = Actor {
            unique_id: user.map(|u| u.username.clone()).unwrap_or_default(),
            display_name: user.map(|u| u.username.clone()).unwrap_or_default(),
            avatar_url: user.and_then(|u| u.profile_picture.clone()),
            ..Default::default()
        };

        let (event_type, payload) = match raw.name.as_str() {
            "chat.message.sent" => (
                EventType::Chat,
                EventPayload::Chat {
                    text: msg.content.clone().unwrap_or_default(),
                },
            ),
            "channel.followed" => {
                if self.follow_suppressed(&actor.unique_id) {
                    debug!("Suppressing repeat follow from {}", actor.unique_id);
                    return None;
                }
                (EventType::Follow, EventPayload::Follow)
            }
            "channel.subscription.new" => (EventType::Subscribe, EventPayload::Subscribe),
            "channel.subscription.renewal" => (
                EventType::SubscriptionRenewal,
                EventPayload::SubscriptionRenewal,
            ),
            "channel.subscription.gifts" => (
                EventType::SubscriptionGift,
                EventPayload::SubscriptionGift {
                    giftee_count: msg.giftees.len() as u64,
                },
            ),
            "livestream.status.updated" => match msg.is_live {
                Some(true) => (EventType::StreamStart, EventPayload::StreamStart),
                _ => (EventType::StreamEnd, EventPayload::StreamEnd),
            },
            other => {
                debug!("Untracked platform B event type: {}", other);
                return None;
            }
        };

        let identity = msg
            .message_id
            .clone()
            .map(|id| format!("b:{}", id))
            .unwrap_or_else(|| synthesize_identity(&actor.unique_id, event_type));

        Some(CanonicalEvent {
            event_type,
            platform: Platform::PlatformB,
            identity,
            actor,
            payload,
            timestamp: msg.created_at.unwrap_or_else(now_millis),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(name: &str, data: serde_json::Value) -> RawEvent {
        RawEvent {
            name: name.to_string(),
            data,
        }
    }

    #[test]
    fn test_chat_normalization() {
        let mut n = Normalizer::new(true);
        let event = n
            .normalize(
                &raw(
                    "chat",
                    json!({
                        "msgId": "m1",
                        "uniqueId": "viewer1",
                        "nickname": "Viewer One",
                        "comment": "hello!",
                        "createTime": "1700000000000",
                        "userIdentity": {"isModeratorOfAnchor": true}
                    }),
                ),
                Platform::PlatformA,
            )
            .unwrap();

        assert_eq!(event.event_type, EventType::Chat);
        assert_eq!(event.identity, "m1");
        assert_eq!(event.timestamp, 1_700_000_000_000);
        assert!(event.actor.is_moderator);
        assert_eq!(
            event.payload,
            EventPayload::Chat {
                text: "hello!".to_string()
            }
        );
    }

    #[test]
    fn test_gift_streak_finality() {
        let mut n = Normalizer::new(true);
        let tick = n
            .normalize(
                &raw(
                    "gift",
                    json!({
                        "msgId": "g1", "uniqueId": "gifter1", "giftName": "Rose",
                        "diamondCount": 1, "repeatCount": 3,
                        "repeatEnd": false, "giftType": 1
                    }),
                ),
                Platform::PlatformA,
            )
            .unwrap();
        // Intermediate ticks still flow to the push channel,
        // but are not aggregation-worthy.
        assert!(!gift_is_final(&tick));

        let final_tick = n
            .normalize(
                &raw(
                    "gift",
                    json!({
                        "msgId": "g2", "uniqueId": "gifter1", "giftName": "Rose",
                        "diamondCount": 1, "repeatCount": 7,
                        "repeatEnd": true, "giftType": 1
                    }),
                ),
                Platform::PlatformA,
            )
            .unwrap();
        assert!(gift_is_final(&final_tick));
        assert_eq!(final_tick.gift_value(), 7);

        let non_streak = n
            .normalize(
                &raw(
                    "gift",
                    json!({
                        "msgId": "g3", "uniqueId": "gifter1", "giftName": "Lion",
                        "diamondCount": 500, "repeatCount": 1,
                        "repeatEnd": false, "giftType": 2
                    }),
                ),
                Platform::PlatformA,
            )
            .unwrap();
        assert!(gift_is_final(&non_streak));
    }

    #[test]
    fn test_like_multiplier() {
        assert_eq!(effective_like_count(20), 40);
        assert_eq!(effective_like_count(15), 30);
        assert_eq!(effective_like_count(10), 10);
        assert_eq!(effective_like_count(14), 14);
    }

    #[test]
    fn test_share_classification() {
        let mut n = Normalizer::new(true);

        let share = n.normalize(
            &raw(
                "social",
                json!({"uniqueId": "u1", "displayType": 3}),
            ),
            Platform::PlatformA,
        );
        assert_eq!(share.unwrap().event_type, EventType::Share);

        let by_label = n.normalize(
            &raw(
                "social",
                json!({"uniqueId": "u1", "label": "{0} shared the LIVE"}),
            ),
            Platform::PlatformA,
        );
        assert_eq!(by_label.unwrap().event_type, EventType::Share);

        let other_social = n.normalize(
            &raw(
                "social",
                json!({"uniqueId": "u1", "displayType": 1, "label": "{0} joined"}),
            ),
            Platform::PlatformA,
        );
        assert!(other_social.is_none());
    }

    #[test]
    fn test_first_follow_only_suppression() {
        let mut n = Normalizer::new(true);
        let follow = json!({"uniqueId": "fan1", "nickname": "Fan"});

        assert!(n
            .normalize(&raw("follow", follow.clone()), Platform::PlatformA)
            .is_some());
        assert!(n
            .normalize(&raw("follow", follow.clone()), Platform::PlatformA)
            .is_none());

        // With the policy off, repeats are announced every time
        let mut open = Normalizer::new(false);
        assert!(open
            .normalize(&raw("follow", follow.clone()), Platform::PlatformA)
            .is_some());
        assert!(open
            .normalize(&raw("follow", follow), Platform::PlatformA)
            .is_some());
    }

    #[test]
    fn test_untracked_events_dropped() {
        let mut n = Normalizer::new(true);
        assert!(n
            .normalize(&raw("linkMicBattle", json!({})), Platform::PlatformA)
            .is_none());
        assert!(n
            .normalize(&raw("moderation.banned", json!({})), Platform::PlatformB)
            .is_none());
    }

    #[test]
    fn test_room_user_becomes_viewer_count() {
        let mut n = Normalizer::new(true);
        let event = n
            .normalize(
                &raw("roomUser", json!({"viewerCount": 123, "roomId": "r1"})),
                Platform::PlatformA,
            )
            .unwrap();
        assert_eq!(event.event_type, EventType::ViewerCount);
        assert_eq!(
            event.payload,
            EventPayload::ViewerCount {
                count: 123,
                room_id: Some("r1".to_string())
            }
        );
        // No native id on room stats; identity is synthesized
        assert!(event.identity.contains(":viewerCount:"));
    }

    #[test]
    fn test_platform_b_chat_and_follow() {
        let mut n = Normalizer::new(true);
        let chat = n
            .normalize(
                &raw(
                    "chat.message.sent",
                    json!({
                        "message_id": "abc",
                        "sender": {"username": "chatterB", "user_id": 7},
                        "content": "hi there"
                    }),
                ),
                Platform::PlatformB,
            )
            .unwrap();
        assert_eq!(chat.event_type, EventType::Chat);
        assert_eq!(chat.identity, "b:abc");
        assert_eq!(chat.actor.unique_id, "chatterB");

        let follow = n
            .normalize(
                &raw(
                    "channel.followed",
                    json!({"follower": {"username": "fan2"}}),
                ),
                Platform::PlatformB,
            )
            .unwrap();
        assert_eq!(follow.event_type, EventType::Follow);
        assert_eq!(follow.actor.unique_id, "fan2");
    }

    #[test]
    fn test_platform_b_stream_status() {
        let mut n = Normalizer::new(true);
        let started = n
            .normalize(
                &raw("livestream.status.updated", json!({"is_live": true})),
                Platform::PlatformB,
            )
            .unwrap();
        assert_eq!(started.event_type, EventType::StreamStart);

        let ended = n
            .normalize(
                &raw("livestream.status.updated", json!({"is_live": false})),
                Platform::PlatformB,
            )
            .unwrap();
        assert_eq!(ended.event_type, EventType::StreamEnd);
    }
}
