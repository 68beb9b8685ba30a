/// Gifter ledger service
///
/// Accumulates diamond totals per gifter, with every counted gift kept
/// as a record under its sender. Streakable gifts fire one event per
/// repeat tick; only the final tick of a streak (or any tick of a
/// non-streakable gift) is counted, using the full diamond value for
/// the whole streak.
use crate::{
    config::LedgerConfig,
    error::Result,
    events::{CanonicalEvent, EventPayload},
    normalize::gift_is_final,
    store::{document, UpdateQueue},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, error, info};

/// One counted gift
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftRecord {
    pub name: String,
    pub unit_value: u64,
    pub repeat_count: u64,
    pub total_diamonds: u64,
    pub timestamp: i64,
}

/// Per-gifter rollup with the gifts that produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GifterStat {
    pub unique_id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub total_diamonds: u64,
    /// Counted gifts keyed by event identity; the idempotency record
    pub gifts: HashMap<String, GiftRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GifterDocument {
    pub total_diamonds: u64,
    pub gifters: HashMap<String, GifterStat>,
}

/// A ranked entry returned by `top_gifters`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedGifter {
    pub rank: usize,
    pub unique_id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub total_diamonds: u64,
    pub gift_count: usize,
}

pub struct GifterLedger {
    path: PathBuf,
    config: LedgerConfig,
    queue: UpdateQueue<CanonicalEvent>,
}

impl GifterLedger {
    pub fn new(path: PathBuf, config: LedgerConfig) -> Self {
        Self {
            path,
            config,
            queue: UpdateQueue::new(),
        }
    }

    pub fn initialize(&self, continue_existing: bool) -> Result<()> {
        if continue_existing && self.path.exists() {
            info!("Preserving existing gifter ledger at {}", self.path.display());
            return Ok(());
        }
        document::write(&self.path, &GifterDocument::default())?;
        info!("Gifter ledger initialized");
        Ok(())
    }

    pub fn update(&self, event: CanonicalEvent) {
        self.queue.push_and_drain(event, |item| self.apply(item));
    }

    fn apply(&self, event: CanonicalEvent) {
        // Mid-streak ticks are display-only; they never hit the ledger
        if !gift_is_final(&event) {
            return;
        }
        if self.config.exclude_users.contains(&event.actor.unique_id) {
            debug!("Excluding gift from {}", event.actor.unique_id);
            return;
        }

        let (gift_name, unit_value, repeat_count) = match &event.payload {
            EventPayload::Gift {
                gift_name,
                unit_value,
                repeat_count,
                ..
            } => (gift_name.clone(), *unit_value, *repeat_count),
            _ => return,
        };
        let diamonds = unit_value * repeat_count;

        let mut data = self.load();

        let stat = data
            .gifters
            .entry(event.actor.unique_id.clone())
            .or_insert_with(|| GifterStat {
                unique_id: event.actor.unique_id.clone(),
                display_name: event.actor.display_name.clone(),
                avatar_url: event.actor.avatar_url.clone(),
                total_diamonds: 0,
                gifts: HashMap::new(),
            });
        if stat.gifts.contains_key(&event.identity) {
            return;
        }

        stat.display_name = event.actor.display_name.clone();
        stat.gifts.insert(
            event.identity,
            GiftRecord {
                name: gift_name.clone(),
                unit_value,
                repeat_count,
                total_diamonds: diamonds,
                timestamp: event.timestamp,
            },
        );
        stat.total_diamonds += diamonds;
        data.total_diamonds += diamonds;

        debug!(
            "Gift recorded: {} sent {} ({} diamonds)",
            event.actor.unique_id, gift_name, diamonds
        );

        if let Err(e) = document::write(&self.path, &data) {
            error!("Failed to write gifter ledger: {}", e);
        }
    }

    fn load(&self) -> GifterDocument {
        document::read_or_default(&self.path, GifterDocument::default)
    }

    /// Top `n` gifters by diamond total, ties broken by unique id
    pub fn top_gifters(&self, n: usize) -> Vec<RankedGifter> {
        let data = self.load();
        let mut stats: Vec<GifterStat> = data.gifters.into_values().collect();
        stats.sort_by(|a, b| {
            b.total_diamonds
                .cmp(&a.total_diamonds)
                .then_with(|| a.unique_id.cmp(&b.unique_id))
        });
        stats
            .into_iter()
            .take(n)
            .enumerate()
            .map(|(i, stat)| RankedGifter {
                rank: i + 1,
                unique_id: stat.unique_id,
                display_name: stat.display_name,
                avatar_url: stat.avatar_url,
                total_diamonds: stat.total_diamonds,
                gift_count: stat.gifts.len(),
            })
            .collect()
    }

    /// Running total across every counted gift
    pub fn total_diamonds(&self) -> u64 {
        self.load().total_diamonds
    }
}
