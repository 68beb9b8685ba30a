/// Comments log service
///
/// Persists the rolling chat log, including the special-event entries
/// (gifts, shares, subscriptions, follows) that the overlay renders
/// inline with chat. The log is capped: once `max_comments_stored` is
/// exceeded, the oldest entries are evicted and become unreachable from
/// every read path.
use crate::{
    config::CommentsConfig,
    error::Result,
    events::{now_millis, CanonicalEvent, EventPayload, EventType},
    store::{document, UpdateQueue},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, error, info};

/// Per-commenter rollup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommenterStat {
    pub unique_id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub comment_count: u64,
    #[serde(default)]
    pub last_seen: Option<i64>,
}

/// Gift details attached to a gift-flavored log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftAnnotation {
    pub total_diamonds: u64,
    pub name: String,
    pub price: u64,
    pub count: u64,
}

/// One stored log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRecord {
    pub id: String,
    pub unique_id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub text: String,
    pub timestamp: i64,
    pub is_pinned: bool,
    pub is_highlighted: bool,
    pub is_moderator: bool,
    pub is_subscriber: bool,
    pub is_new_gifter: bool,
    pub is_new_subscriber: bool,
    pub team_level: u32,
    pub is_special_event: bool,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gift: Option<GiftAnnotation>,
}

/// The backing document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentsDocument {
    pub total_comments: u64,
    pub commenters: HashMap<String, CommenterStat>,
    pub comments_by_id: HashMap<String, CommentRecord>,
    /// Identities in insertion order; the eviction window
    pub comments_order: Vec<String>,
    pub init_timestamp: i64,
}

impl CommentsDocument {
    fn empty(init_timestamp: i64) -> Self {
        Self {
            total_comments: 0,
            commenters: HashMap::new(),
            comments_by_id: HashMap::new(),
            comments_order: Vec::new(),
            init_timestamp,
        }
    }

    /// Entries in insertion order, skipping anything already evicted
    fn ordered(&self) -> Vec<CommentRecord> {
        self.comments_order
            .iter()
            .filter_map(|id| self.comments_by_id.get(id))
            .cloned()
            .collect()
    }
}

/// Recent-comments query result
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentComments {
    pub total_comments: u64,
    pub comments: Vec<CommentRecord>,
    pub init_timestamp: i64,
}

/// Per-user query result
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserComments {
    pub commenter: Option<CommenterStat>,
    pub comments: Vec<CommentRecord>,
}

pub struct CommentsLog {
    path: PathBuf,
    config: CommentsConfig,
    init_timestamp: i64,
    queue: UpdateQueue<CanonicalEvent>,
    /// Serializes every load-mutate-write of the backing file. The queue
    /// drain and the pin/highlight toggles (which arrive straight from
    /// HTTP handlers, outside the queue) must never write concurrently.
    doc_lock: Mutex<()>,
}

impl CommentsLog {
    pub fn new(path: PathBuf, config: CommentsConfig) -> Self {
        Self {
            path,
            config,
            init_timestamp: now_millis(),
            queue: UpdateQueue::new(),
            doc_lock: Mutex::new(()),
        }
    }

    /// Create or preserve the backing document
    pub fn initialize(&self, continue_existing: bool) -> Result<()> {
        if continue_existing && self.path.exists() {
            info!("Preserving existing comments log at {}", self.path.display());
            return Ok(());
        }
        document::write(&self.path, &CommentsDocument::empty(self.init_timestamp))?;
        info!("Comments log initialized");
        Ok(())
    }

    /// Enqueue an event for exactly-once application to the log
    pub fn update(&self, event: CanonicalEvent) {
        self.queue.push_and_drain(event, |item| self.apply(item));
    }

    fn apply(&self, event: CanonicalEvent) {
        if self.config.exclude_users.contains(&event.actor.unique_id) {
            debug!("Excluding comment from {}", event.actor.unique_id);
            return;
        }

        let _guard = self.doc_lock.lock().expect("comments document lock poisoned");
        let mut data = self.load();

        if data.comments_by_id.contains_key(&event.identity) {
            return;
        }

        let commenter = data
            .commenters
            .entry(event.actor.unique_id.clone())
            .or_insert_with(|| CommenterStat {
                unique_id: event.actor.unique_id.clone(),
                display_name: event.actor.display_name.clone(),
                avatar_url: event.actor.avatar_url.clone(),
                comment_count: 0,
                last_seen: None,
            });
        commenter.comment_count += 1;
        commenter.last_seen = Some(event.timestamp);

        let gift = match &event.payload {
            EventPayload::Gift {
                gift_name,
                unit_value,
                repeat_count,
                ..
            } => Some(GiftAnnotation {
                total_diamonds: unit_value * repeat_count,
                name: gift_name.clone(),
                price: *unit_value,
                count: *repeat_count,
            }),
            _ => None,
        };

        let record = CommentRecord {
            id: event.identity.clone(),
            unique_id: event.actor.unique_id.clone(),
            display_name: event.actor.display_name.clone(),
            avatar_url: event.actor.avatar_url.clone(),
            text: display_text(&event),
            timestamp: event.timestamp,
            is_pinned: false,
            is_highlighted: false,
            is_moderator: event.actor.is_moderator,
            is_subscriber: event.actor.is_subscriber,
            is_new_gifter: event.actor.is_new_gifter,
            is_new_subscriber: event.actor.is_new_subscriber,
            team_level: event.actor.team_level,
            is_special_event: event.event_type != EventType::Chat,
            event_type: event.event_type,
            gift,
        };

        data.comments_by_id.insert(event.identity.clone(), record);
        data.comments_order.push(event.identity);
        data.total_comments += 1;

        // Evict oldest entries beyond the cap
        let cap = self.config.max_comments_stored;
        if data.comments_order.len() > cap {
            let overflow = data.comments_order.len() - cap;
            for id in data.comments_order.drain(..overflow) {
                data.comments_by_id.remove(&id);
            }
        }

        if let Err(e) = document::write(&self.path, &data) {
            // The in-memory mutation is lost; the queue keeps going
            error!("Failed to write comments log: {}", e);
        }
    }

    fn load(&self) -> CommentsDocument {
        document::read_or_default(&self.path, || CommentsDocument::empty(self.init_timestamp))
    }

    /// Full document snapshot, used by the offsite sync upload
    pub fn snapshot(&self) -> CommentsDocument {
        self.load()
    }

    /// Most recent `limit` entries, oldest first
    pub fn recent_comments(&self, limit: usize) -> RecentComments {
        let data = self.load();
        let mut comments = data.ordered();
        comments.sort_by_key(|c| c.timestamp);
        if comments.len() > limit {
            comments.drain(..comments.len() - limit);
        }
        RecentComments {
            total_comments: data.total_comments,
            comments,
            init_timestamp: data.init_timestamp,
        }
    }

    /// Pinned entries, oldest first
    pub fn pinned_comments(&self) -> Vec<CommentRecord> {
        let mut pinned: Vec<CommentRecord> = self
            .load()
            .ordered()
            .into_iter()
            .filter(|c| c.is_pinned)
            .collect();
        pinned.sort_by_key(|c| c.timestamp);
        pinned
    }

    /// Entries from one user, plus their rollup
    pub fn user_comments(&self, unique_id: &str) -> UserComments {
        let data = self.load();
        UserComments {
            commenter: data.commenters.get(unique_id).cloned(),
            comments: data
                .ordered()
                .into_iter()
                .filter(|c| c.unique_id == unique_id)
                .collect(),
        }
    }

    /// Pin or unpin one entry. Returns false when the identity is unknown.
    pub fn toggle_pin(&self, identity: &str, pinned: bool) -> Result<bool> {
        self.toggle_flag(identity, |record| record.is_pinned = pinned)
    }

    /// Highlight or unhighlight one entry
    pub fn toggle_highlight(&self, identity: &str, highlighted: bool) -> Result<bool> {
        self.toggle_flag(identity, |record| record.is_highlighted = highlighted)
    }

    fn toggle_flag<F: FnOnce(&mut CommentRecord)>(&self, identity: &str, mutate: F) -> Result<bool> {
        let _guard = self.doc_lock.lock().expect("comments document lock poisoned");
        let mut data = self.load();
        match data.comments_by_id.get_mut(identity) {
            Some(record) => {
                mutate(record);
                document::write(&self.path, &data)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Whether an identity has already been applied
    pub fn has_processed(&self, identity: &str) -> bool {
        self.load().comments_by_id.contains_key(identity)
    }
}

/// Log text for an event, decorated for the special-event flavors
fn display_text(event: &CanonicalEvent) -> String {
    match &event.payload {
        EventPayload::Chat { text } => text.clone(),
        EventPayload::Gift {
            gift_name,
            repeat_count,
            ..
        } => format!("Sent gift: {} x{}", gift_name, repeat_count),
        EventPayload::Share => "Shared the stream".to_string(),
        EventPayload::Subscribe => "Subscribed to the channel".to_string(),
        EventPayload::SubscriptionRenewal => "Renewed their subscription".to_string(),
        EventPayload::SubscriptionGift { giftee_count } => {
            format!("Gifted {} subscriptions", giftee_count)
        }
        EventPayload::Follow => "Followed the channel".to_string(),
        _ => String::new(),
    }
}
