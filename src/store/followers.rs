/// Follower counter service
///
/// Counts unique followers for the on-screen follower goal. A user only
/// ever increments the count once, keyed by their unique id, regardless
/// of how many follow events they fire across the session. The counter
/// starts from a configurable base so a goal can continue across
/// sessions without replaying history.
use crate::{
    config::{FollowerGoalConfig, LedgerConfig},
    error::Result,
    events::CanonicalEvent,
    store::{document, UpdateQueue},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowerDocument {
    pub count: u64,
    /// Unique ids that have already been counted
    pub follower_ids: Vec<String>,
}

pub struct FollowerCounter {
    path: PathBuf,
    config: LedgerConfig,
    goal: FollowerGoalConfig,
    queue: UpdateQueue<CanonicalEvent>,
}

impl FollowerCounter {
    pub fn new(path: PathBuf, config: LedgerConfig, goal: FollowerGoalConfig) -> Self {
        Self {
            path,
            config,
            goal,
            queue: UpdateQueue::new(),
        }
    }

    pub fn initialize(&self, continue_existing: bool) -> Result<()> {
        if continue_existing && self.path.exists() {
            info!(
                "Preserving existing follower count at {}",
                self.path.display()
            );
            return Ok(());
        }
        document::write(
            &self.path,
            &FollowerDocument {
                count: self.goal.starting_count,
                follower_ids: Vec::new(),
            },
        )?;
        info!(
            "Follower counter initialized at {}",
            self.goal.starting_count
        );
        Ok(())
    }

    pub fn update(&self, event: CanonicalEvent) {
        self.queue.push_and_drain(event, |item| self.apply(item));
    }

    fn apply(&self, event: CanonicalEvent) {
        if self.config.exclude_users.contains(&event.actor.unique_id) {
            debug!("Excluding follow from {}", event.actor.unique_id);
            return;
        }

        let mut data = self.load();

        // Dedup by user, not by event identity: refollows never recount
        if data
            .follower_ids
            .contains(&event.actor.unique_id)
        {
            return;
        }

        data.follower_ids.push(event.actor.unique_id.clone());
        data.count += 1;
        debug!(
            "New follower {} ({} total)",
            event.actor.unique_id, data.count
        );

        if let Err(e) = document::write(&self.path, &data) {
            error!("Failed to write follower count: {}", e);
        }
    }

    fn load(&self) -> FollowerDocument {
        document::read_or_default(&self.path, || FollowerDocument {
            count: self.goal.starting_count,
            follower_ids: Vec::new(),
        })
    }

    pub fn count(&self) -> u64 {
        self.load().count
    }
}
