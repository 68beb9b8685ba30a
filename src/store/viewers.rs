/// Viewer count tracker
///
/// Records every viewer-count update the platform emits, keyed by event
/// identity, so the session's audience curve can be reconstructed after
/// the fact. Also serves the latest reading for the on-screen counter.
use crate::{
    error::Result,
    events::{CanonicalEvent, EventPayload},
    store::{document, UpdateQueue},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerSample {
    pub timestamp: i64,
    pub viewer_count: u64,
    #[serde(default)]
    pub room_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerDocument {
    pub total_updates: u64,
    pub samples: HashMap<String, ViewerSample>,
}

pub struct ViewerCounter {
    path: PathBuf,
    queue: UpdateQueue<CanonicalEvent>,
}

impl ViewerCounter {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            queue: UpdateQueue::new(),
        }
    }

    pub fn initialize(&self, continue_existing: bool) -> Result<()> {
        if continue_existing && self.path.exists() {
            info!(
                "Preserving existing viewer data at {}",
                self.path.display()
            );
            return Ok(());
        }
        document::write(&self.path, &ViewerDocument::default())?;
        info!("Viewer tracker initialized");
        Ok(())
    }

    pub fn update(&self, event: CanonicalEvent) {
        self.queue.push_and_drain(event, |item| self.apply(item));
    }

    fn apply(&self, event: CanonicalEvent) {
        let (count, room_id) = match &event.payload {
            EventPayload::ViewerCount { count, room_id } => (*count, room_id.clone()),
            _ => return,
        };

        let mut data = self.load();
        if data.samples.contains_key(&event.identity) {
            return;
        }

        data.samples.insert(
            event.identity,
            ViewerSample {
                timestamp: event.timestamp,
                viewer_count: count,
                room_id,
            },
        );
        data.total_updates += 1;

        if let Err(e) = document::write(&self.path, &data) {
            error!("Failed to write viewer data: {}", e);
        }
    }

    fn load(&self) -> ViewerDocument {
        document::read_or_default(&self.path, ViewerDocument::default)
    }

    /// The most recent reading, by sample timestamp
    pub fn latest(&self) -> Option<ViewerSample> {
        self.load()
            .samples
            .into_values()
            .max_by_key(|s| s.timestamp)
    }

    pub fn total_updates(&self) -> u64 {
        self.load().total_updates
    }

    /// Full document snapshot, used by the offsite sync upload
    pub fn snapshot(&self) -> ViewerDocument {
        self.load()
    }
}
