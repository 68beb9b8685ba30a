/// Application context and dependency injection
use crate::{
    config::ServerConfig,
    error::{OverlayError, Result},
    notify::{Notifier, OffsiteSync},
    source::platform_b::PlatformBHub,
    store::{CommentsLog, FollowerCounter, GifterLedger, LikeLedger, ViewerCounter},
};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Buffer size for the statistic broadcast fan-out
const BROADCAST_BUFFER_SIZE: usize = 64;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub comments: Arc<CommentsLog>,
    pub gifters: Arc<GifterLedger>,
    pub likers: Arc<LikeLedger>,
    pub followers: Arc<FollowerCounter>,
    pub viewers: Arc<ViewerCounter>,
    pub notifier: Arc<Notifier>,
    pub offsite_sync: Arc<OffsiteSync>,
    // Fan-out point for inbound platform B webhooks
    pub platform_b_hub: PlatformBHub,
    // Server-wide frames pushed to every connected widget
    pub broadcast_tx: broadcast::Sender<String>,
}

impl AppContext {
    /// Create a new application context from configuration.
    ///
    /// With `continue_existing` the on-disk documents from a previous
    /// session are preserved; otherwise every document is reset.
    pub async fn new(config: ServerConfig, continue_existing: bool) -> Result<Self> {
        config.validate()?;

        Self::ensure_directories(&config).await?;

        let comments = Arc::new(CommentsLog::new(
            config.storage.comments_path.clone(),
            config.comments.clone(),
        ));
        let gifters = Arc::new(GifterLedger::new(
            config.storage.gifter_rank_path.clone(),
            config.gifters.clone(),
        ));
        let likers = Arc::new(LikeLedger::new(
            config.storage.like_rank_path.clone(),
            config.likers.clone(),
        ));
        let followers = Arc::new(FollowerCounter::new(
            config.storage.follower_count_path.clone(),
            config.followers.clone(),
            config.follower_goal.clone(),
        ));
        let viewers = Arc::new(ViewerCounter::new(config.storage.viewers_path.clone()));

        comments.initialize(continue_existing)?;
        gifters.initialize(continue_existing)?;
        likers.initialize(continue_existing)?;
        followers.initialize(continue_existing)?;
        viewers.initialize(continue_existing)?;

        let notifier = Arc::new(Notifier::new(config.notifications.clone())?);
        let offsite_sync = Arc::new(OffsiteSync::new(
            config.offsite_sync.clone(),
            Arc::clone(&comments),
            Arc::clone(&likers),
            Arc::clone(&viewers),
        )?);

        let (broadcast_tx, _) = broadcast::channel(BROADCAST_BUFFER_SIZE);

        Ok(Self {
            config: Arc::new(config),
            comments,
            gifters,
            likers,
            followers,
            viewers,
            notifier,
            offsite_sync,
            platform_b_hub: PlatformBHub::new(),
            broadcast_tx,
        })
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> Result<()> {
        let dir = &config.storage.data_directory;
        if !dir.exists() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                OverlayError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
            })?;
        }
        Ok(())
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CommentsConfig, FollowerGoalConfig, LedgerConfig, LoggingConfig, NotificationConfig,
        OffsiteSyncConfig, PlatformsConfig, RetryConfig, ServiceConfig, StorageConfig,
    };
    use tempfile::tempdir;

    pub(crate) fn test_config(data_dir: &std::path::Path) -> ServerConfig {
        ServerConfig {
            service: ServiceConfig {
                hostname: "localhost".to_string(),
                port: 0,
                version: "0.1.0".to_string(),
                public_directory: data_dir.join("public"),
            },
            storage: StorageConfig {
                data_directory: data_dir.to_path_buf(),
                comments_path: data_dir.join("comments.json"),
                gifter_rank_path: data_dir.join("gifterRank.json"),
                like_rank_path: data_dir.join("likeRank.json"),
                follower_count_path: data_dir.join("followerCount.json"),
                viewers_path: data_dir.join("viewers.json"),
            },
            platforms: PlatformsConfig {
                platform_a_ws_url: "ws://127.0.0.1:1/live".to_string(),
            },
            retry: RetryConfig {
                connect_timeout_secs: 1,
                retry_interval_secs: 1,
                max_retries: 0,
            },
            comments: CommentsConfig {
                max_comments_stored: 500,
                exclude_users: vec![],
            },
            gifters: LedgerConfig::default(),
            likers: LedgerConfig::default(),
            followers: LedgerConfig::default(),
            follower_goal: FollowerGoalConfig::default(),
            notifications: NotificationConfig::default(),
            offsite_sync: OffsiteSyncConfig::default(),
            first_follow_only: true,
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_context_initializes_documents() {
        let dir = tempdir().unwrap();
        let ctx = AppContext::new(test_config(dir.path()), false).await.unwrap();

        assert!(dir.path().join("comments.json").exists());
        assert!(dir.path().join("gifterRank.json").exists());
        assert!(dir.path().join("likeRank.json").exists());
        assert!(dir.path().join("followerCount.json").exists());
        assert!(dir.path().join("viewers.json").exists());
        assert_eq!(ctx.followers.count(), 0);
    }

    #[tokio::test]
    async fn test_context_continue_preserves_documents() {
        let dir = tempdir().unwrap();
        let ctx = AppContext::new(test_config(dir.path()), false).await.unwrap();
        assert!(ctx.comments.toggle_pin("missing", true).unwrap() == false);

        // Second context with continue keeps the files in place
        let _ctx2 = AppContext::new(test_config(dir.path()), true).await.unwrap();
        assert!(dir.path().join("comments.json").exists());
    }

    #[tokio::test]
    async fn test_context_rejects_invalid_config() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.comments.max_comments_stored = 0;
        assert!(AppContext::new(config, false).await.is_err());
    }
}
