/// Like ledger service
///
/// Accumulates like totals per user, keeping every counted batch as a
/// record under its sender. Batches at or above the doubling threshold
/// are credited at twice their count, so sustained tapping ranks higher
/// than the raw tap count alone.
use crate::{
    config::LedgerConfig,
    error::Result,
    events::{CanonicalEvent, EventPayload},
    normalize::effective_like_count,
    store::{document, UpdateQueue},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, error, info};

/// One counted like batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeRecord {
    pub like_count: u64,
    /// Count after the batch multiplier
    pub credited: u64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikerStat {
    pub unique_id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub total_likes: u64,
    /// Counted batches keyed by event identity; the idempotency record
    pub like_events: HashMap<String, LikeRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeDocument {
    pub total_likes: u64,
    pub likers: HashMap<String, LikerStat>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedLiker {
    pub rank: usize,
    pub unique_id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub total_likes: u64,
}

pub struct LikeLedger {
    path: PathBuf,
    config: LedgerConfig,
    queue: UpdateQueue<CanonicalEvent>,
}

impl LikeLedger {
    pub fn new(path: PathBuf, config: LedgerConfig) -> Self {
        Self {
            path,
            config,
            queue: UpdateQueue::new(),
        }
    }

    pub fn initialize(&self, continue_existing: bool) -> Result<()> {
        if continue_existing && self.path.exists() {
            info!("Preserving existing like ledger at {}", self.path.display());
            return Ok(());
        }
        document::write(&self.path, &LikeDocument::default())?;
        info!("Like ledger initialized");
        Ok(())
    }

    pub fn update(&self, event: CanonicalEvent) {
        self.queue.push_and_drain(event, |item| self.apply(item));
    }

    fn apply(&self, event: CanonicalEvent) {
        if self.config.exclude_users.contains(&event.actor.unique_id) {
            debug!("Excluding likes from {}", event.actor.unique_id);
            return;
        }
        let like_count = match &event.payload {
            EventPayload::Like { like_count } => *like_count,
            _ => return,
        };

        let mut data = self.load();

        let stat = data
            .likers
            .entry(event.actor.unique_id.clone())
            .or_insert_with(|| LikerStat {
                unique_id: event.actor.unique_id.clone(),
                display_name: event.actor.display_name.clone(),
                avatar_url: event.actor.avatar_url.clone(),
                total_likes: 0,
                like_events: HashMap::new(),
            });
        if stat.like_events.contains_key(&event.identity) {
            return;
        }

        let credited = effective_like_count(like_count);
        stat.display_name = event.actor.display_name.clone();
        stat.like_events.insert(
            event.identity,
            LikeRecord {
                like_count,
                credited,
                timestamp: event.timestamp,
            },
        );
        stat.total_likes += credited;
        data.total_likes += credited;

        if let Err(e) = document::write(&self.path, &data) {
            error!("Failed to write like ledger: {}", e);
        }
    }

    fn load(&self) -> LikeDocument {
        document::read_or_default(&self.path, LikeDocument::default)
    }

    /// Top `n` likers by credited total, ties broken by unique id
    pub fn top_likers(&self, n: usize) -> Vec<RankedLiker> {
        let data = self.load();
        let mut stats: Vec<LikerStat> = data.likers.into_values().collect();
        stats.sort_by(|a, b| {
            b.total_likes
                .cmp(&a.total_likes)
                .then_with(|| a.unique_id.cmp(&b.unique_id))
        });
        stats
            .into_iter()
            .take(n)
            .enumerate()
            .map(|(i, stat)| RankedLiker {
                rank: i + 1,
                unique_id: stat.unique_id,
                display_name: stat.display_name,
                avatar_url: stat.avatar_url,
                total_likes: stat.total_likes,
            })
            .collect()
    }

    pub fn total_likes(&self) -> u64 {
        self.load().total_likes
    }

    /// Full document snapshot, used by the offsite sync upload
    pub fn snapshot(&self) -> LikeDocument {
        self.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Actor, EventType, Platform};
    use tempfile::tempdir;

    fn test_ledger(dir: &std::path::Path) -> LikeLedger {
        let ledger = LikeLedger::new(
            dir.join("likeRank.json"),
            LedgerConfig {
                exclude_users: vec!["bot1".to_string()],
            },
        );
        ledger.initialize(false).unwrap();
        ledger
    }

    fn like(identity: &str, unique_id: &str, like_count: u64) -> CanonicalEvent {
        CanonicalEvent {
            event_type: EventType::Like,
            platform: Platform::PlatformA,
            identity: identity.to_string(),
            actor: Actor {
                unique_id: unique_id.to_string(),
                display_name: unique_id.to_string(),
                ..Default::default()
            },
            payload: EventPayload::Like { like_count },
            timestamp: 1,
        }
    }

    #[test]
    fn test_small_batch_credited_as_is() {
        let dir = tempdir().unwrap();
        let ledger = test_ledger(dir.path());

        ledger.update(like("l1", "viewer1", 14));
        assert_eq!(ledger.total_likes(), 14);
    }

    #[test]
    fn test_large_batch_doubled() {
        let dir = tempdir().unwrap();
        let ledger = test_ledger(dir.path());

        ledger.update(like("l1", "viewer1", 15));
        assert_eq!(ledger.total_likes(), 30);
        assert_eq!(ledger.top_likers(1)[0].total_likes, 30);
    }

    #[test]
    fn test_duplicate_identity_is_noop() {
        let dir = tempdir().unwrap();
        let ledger = test_ledger(dir.path());

        ledger.update(like("l1", "viewer1", 10));
        ledger.update(like("l1", "viewer1", 10));
        assert_eq!(ledger.total_likes(), 10);
    }

    #[test]
    fn test_ranking_and_tie_order() {
        let dir = tempdir().unwrap();
        let ledger = test_ledger(dir.path());

        ledger.update(like("l1", "zeta", 10));
        ledger.update(like("l2", "alpha", 10));
        ledger.update(like("l3", "big", 50));

        let top = ledger.top_likers(10);
        assert_eq!(top[0].unique_id, "big");
        assert_eq!(top[1].unique_id, "alpha");
        assert_eq!(top[2].unique_id, "zeta");
    }

    #[test]
    fn test_excluded_liker_dropped() {
        let dir = tempdir().unwrap();
        let ledger = test_ledger(dir.path());

        ledger.update(like("l1", "bot1", 100));
        assert_eq!(ledger.total_likes(), 0);
    }
}
