/// Configuration management for the Castlight overlay server
use crate::error::{OverlayError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub platforms: PlatformsConfig,
    pub retry: RetryConfig,
    pub comments: CommentsConfig,
    pub gifters: LedgerConfig,
    pub likers: LedgerConfig,
    pub followers: LedgerConfig,
    pub follower_goal: FollowerGoalConfig,
    pub notifications: NotificationConfig,
    pub offsite_sync: OffsiteSyncConfig,
    pub first_follow_only: bool,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
    /// Directory of static widget pages served to the overlay browser
    pub public_directory: PathBuf,
}

/// Flat-file document storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub comments_path: PathBuf,
    pub gifter_rank_path: PathBuf,
    pub like_rank_path: PathBuf,
    pub follower_count_path: PathBuf,
    pub viewers_path: PathBuf,
}

/// Upstream platform endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformsConfig {
    /// WebSocket base URL of platform A's live event feed
    pub platform_a_ws_url: String,
}

/// Connection retry configuration for live platform feeds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Seconds to wait for the initial connect before rejecting
    pub connect_timeout_secs: u64,
    /// Seconds between retry attempts after a failed connect
    pub retry_interval_secs: u64,
    /// Maximum retry attempts, -1 for unbounded
    pub max_retries: i64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
            retry_interval_secs: 60,
            max_retries: -1,
        }
    }
}

/// Comments log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentsConfig {
    /// Cap on stored comments; oldest evicted first
    pub max_comments_stored: usize,
    /// Unique ids (e.g. bots) whose events are dropped before aggregation
    pub exclude_users: Vec<String>,
}

/// Exclusion configuration shared by the gifter and like ledgers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub exclude_users: Vec<String>,
}

/// Follower counter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FollowerGoalConfig {
    /// Count the follower document starts from on a fresh session
    pub starting_count: u64,
}

/// Outbound one-shot notification endpoints (stream start/end pings)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub api_url: String,
    pub start_stream_endpoint: Option<String>,
    pub end_stream_endpoint: Option<String>,
}

/// Periodic offsite sync of the comments document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OffsiteSyncConfig {
    pub enabled: bool,
    pub endpoint: Option<String>,
    /// Seconds between sync uploads
    pub interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("CASTLIGHT_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("CASTLIGHT_PORT")
            .unwrap_or_else(|_| "8082".to_string())
            .parse()
            .map_err(|_| OverlayError::Validation("Invalid port number".to_string()))?;
        let version = env::var("CASTLIGHT_VERSION").unwrap_or_else(|_| "0.1.0".to_string());
        let public_directory: PathBuf = env::var("CASTLIGHT_PUBLIC_DIRECTORY")
            .unwrap_or_else(|_| "./public".to_string())
            .into();

        let data_directory: PathBuf = env::var("CASTLIGHT_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let comments_path = env::var("CASTLIGHT_COMMENTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("comments.json"));
        let gifter_rank_path = env::var("CASTLIGHT_GIFTER_RANK_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("gifterRank.json"));
        let like_rank_path = env::var("CASTLIGHT_LIKE_RANK_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("likeRank.json"));
        let follower_count_path = env::var("CASTLIGHT_FOLLOWER_COUNT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("followerCount.json"));
        let viewers_path = env::var("CASTLIGHT_VIEWERS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("viewers.json"));

        let platform_a_ws_url = env::var("CASTLIGHT_PLATFORM_A_WS_URL")
            .unwrap_or_else(|_| "wss://webcast.platform-a.example/live".to_string());

        let connect_timeout_secs = env::var("CASTLIGHT_CONNECT_TIMEOUT_SECS")
            .unwrap_or_else(|_| "15".to_string())
            .parse()
            .unwrap_or(15);
        let retry_interval_secs = env::var("CASTLIGHT_RETRY_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .unwrap_or(60);
        let max_retries = env::var("CASTLIGHT_MAX_RETRIES")
            .unwrap_or_else(|_| "-1".to_string())
            .parse()
            .unwrap_or(-1);

        let max_comments_stored = env::var("CASTLIGHT_MAX_COMMENTS_STORED")
            .unwrap_or_else(|_| "500".to_string())
            .parse()
            .unwrap_or(500);
        let comments_exclude = parse_list(env::var("CASTLIGHT_COMMENTS_EXCLUDE_USERS").ok());
        let gifters_exclude = parse_list(env::var("CASTLIGHT_GIFTERS_EXCLUDE_USERS").ok());
        let likers_exclude = parse_list(env::var("CASTLIGHT_LIKERS_EXCLUDE_USERS").ok());
        let followers_exclude = parse_list(env::var("CASTLIGHT_FOLLOWERS_EXCLUDE_USERS").ok());

        let follower_starting_count = env::var("CASTLIGHT_FOLLOWER_STARTING_COUNT")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .unwrap_or(0);

        let api_url = env::var("CASTLIGHT_API_URL").unwrap_or_default();
        let start_stream_endpoint = env::var("CASTLIGHT_START_STREAM_ENDPOINT").ok();
        let end_stream_endpoint = env::var("CASTLIGHT_END_STREAM_ENDPOINT").ok();

        let offsite_enabled = env::var("CASTLIGHT_OFFSITE_SYNC_ENABLED")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);
        let offsite_endpoint = env::var("CASTLIGHT_OFFSITE_SYNC_ENDPOINT").ok();
        let offsite_interval_secs = env::var("CASTLIGHT_OFFSITE_SYNC_INTERVAL_SECS")
            .unwrap_or_else(|_| "180".to_string())
            .parse()
            .unwrap_or(180);

        let first_follow_only = env::var("CASTLIGHT_FIRST_FOLLOW_ONLY")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
                public_directory,
            },
            storage: StorageConfig {
                data_directory,
                comments_path,
                gifter_rank_path,
                like_rank_path,
                follower_count_path,
                viewers_path,
            },
            platforms: PlatformsConfig {
                platform_a_ws_url,
            },
            retry: RetryConfig {
                connect_timeout_secs,
                retry_interval_secs,
                max_retries,
            },
            comments: CommentsConfig {
                max_comments_stored,
                exclude_users: comments_exclude,
            },
            gifters: LedgerConfig {
                exclude_users: gifters_exclude,
            },
            likers: LedgerConfig {
                exclude_users: likers_exclude,
            },
            followers: LedgerConfig {
                exclude_users: followers_exclude,
            },
            follower_goal: FollowerGoalConfig {
                starting_count: follower_starting_count,
            },
            notifications: NotificationConfig {
                api_url,
                start_stream_endpoint,
                end_stream_endpoint,
            },
            offsite_sync: OffsiteSyncConfig {
                enabled: offsite_enabled,
                endpoint: offsite_endpoint,
                interval_secs: offsite_interval_secs,
            },
            first_follow_only,
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.service.hostname.is_empty() {
            return Err(OverlayError::Validation(
                "Hostname cannot be empty".to_string(),
            ));
        }

        if self.comments.max_comments_stored == 0 {
            return Err(OverlayError::Validation(
                "max_comments_stored must be at least 1".to_string(),
            ));
        }

        if self.offsite_sync.enabled && self.offsite_sync.endpoint.is_none() {
            return Err(OverlayError::Validation(
                "Offsite sync enabled without an endpoint".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parse a comma-separated env list into trimmed, non-empty entries
fn parse_list(raw: Option<String>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
