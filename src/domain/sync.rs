//! Sync-related domain models and configuration.
//!
//! Contains the configuration sections for the remote source, the sync
//! policy and the paged view, plus the observable sync state snapshot.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::error::{AppError, FetchFailure, Result};

/// Remote source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Listing endpoint; `page` and `per_page` are appended as query parameters.
    #[serde(default = "default_repos_url")]
    pub repos_url: String,

    /// Optional bearer token.
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            repos_url: default_repos_url(),
            token: None,
            user_agent: default_user_agent(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_repos_url() -> String {
    "https://api.github.com/orgs/rust-lang/repos".to_string()
}

fn default_user_agent() -> String {
    concat!("repo-mirror/", env!("CARGO_PKG_VERSION")).to_string()
}

const fn default_timeout() -> u64 {
    30
}

/// Configuration for sync behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Remote page size, fixed for the session.
    #[serde(default = "default_per_page")]
    pub per_page: u32,

    /// Ask for the next remote page when the view reaches the end of local data.
    #[serde(default = "default_fetch_on_end")]
    pub fetch_on_end: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            per_page: default_per_page(),
            fetch_on_end: default_fetch_on_end(),
        }
    }
}

const fn default_per_page() -> u32 {
    30
}

const fn default_fetch_on_end() -> bool {
    true
}

/// Configuration for the paged view over the local store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PagingConfig {
    /// Rows per database page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Rows beyond the requested window that are loaded ahead of time.
    #[serde(default = "default_prefetch_distance")]
    pub prefetch_distance: usize,

    /// Rows loaded around the anchor when the view is (re)built.
    #[serde(default = "default_initial_load_size")]
    pub initial_load_size: usize,

    /// Upper bound on resident pages; 0 disables eviction.
    #[serde(default = "default_max_loaded_pages")]
    pub max_loaded_pages: usize,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            prefetch_distance: default_prefetch_distance(),
            initial_load_size: default_initial_load_size(),
            max_loaded_pages: default_max_loaded_pages(),
        }
    }
}

const fn default_page_size() -> usize {
    20
}

const fn default_prefetch_distance() -> usize {
    20
}

const fn default_initial_load_size() -> usize {
    60
}

const fn default_max_loaded_pages() -> usize {
    16
}

/// Path configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PathConfig {
    /// Base data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub paging: PagingConfig,

    #[serde(default)]
    pub paths: PathConfig,
}

impl AppConfig {
    /// Get the data directory, using default if not configured.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.paths
            .data_dir
            .clone()
            .unwrap_or_else(Self::default_data_dir)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".repo-mirror")
    }

    /// Get the storage database path.
    #[must_use]
    pub fn storage_db_path(&self) -> PathBuf {
        self.data_dir().join("repos.db")
    }

    /// Get the config file path.
    #[must_use]
    pub fn config_file_path(&self) -> PathBuf {
        self.data_dir().join("config.toml")
    }

    /// Reject settings the engine cannot run with.
    ///
    /// # Errors
    /// Returns `AppError::Config` when a page size is zero.
    pub fn validate(&self) -> Result<()> {
        if self.sync.per_page == 0 {
            return Err(AppError::Config {
                message: "sync.per_page must be greater than 0".into(),
            });
        }
        if self.paging.page_size == 0 {
            return Err(AppError::Config {
                message: "paging.page_size must be greater than 0".into(),
            });
        }
        if self.remote.repos_url.trim().is_empty() {
            return Err(AppError::Config {
                message: "remote.repos_url must not be empty".into(),
            });
        }
        Ok(())
    }
}

/// Snapshot of the observable sync state.
///
/// Starts as `{ false, None }`. The error is only replaced by the next
/// attempt's outcome, never reset on a timer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    /// Whether a fetch is currently in progress.
    pub is_fetch_in_progress: bool,

    /// Failure of the most recent attempt, if it failed.
    pub last_error: Option<FetchFailure>,
}
