//! Domain models for the mirrored repository listing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::FetchFailure;

/// One persisted repository snapshot, keyed by the remote identifier.
///
/// Rows are always replaced whole: a fetch supplies every field, and a
/// merge never patches individual columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRecord {
    /// Remote identifier; primary key of the store.
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub full_name: String,
    pub fork: bool,
    #[serde(default)]
    pub description: Option<String>,
    pub html_url: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub forks_count: u64,
    #[serde(default)]
    pub owner_login: String,
    #[serde(default)]
    pub owner_avatar_url: Option<String>,
    #[serde(default)]
    pub owner_html_url: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RepoRecord {
    /// Minimal record, mostly useful for tests and fixtures.
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id,
            html_url: format!("https://github.com/example/{name}"),
            full_name: format!("example/{name}"),
            name,
            fork: false,
            description: None,
            language: None,
            stargazers_count: 0,
            forks_count: 0,
            owner_login: "example".to_string(),
            owner_avatar_url: None,
            owner_html_url: None,
            updated_at: None,
        }
    }

    /// Mark as a fork.
    #[must_use]
    pub const fn forked(mut self) -> Self {
        self.fork = true;
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Description or an empty string.
    #[must_use]
    pub fn description_or_default(&self) -> &str {
        self.description.as_deref().unwrap_or_default()
    }
}

/// Result of one remote fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Items in server order.
    Success(Vec<RepoRecord>),
    Failure(FetchFailure),
}

impl FetchOutcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The failure, if this outcome is one.
    #[must_use]
    pub const fn failure(&self) -> Option<&FetchFailure> {
        match self {
            Self::Failure(f) => Some(f),
            Self::Success(_) => None,
        }
    }
}

/// A request for one remote page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRequest {
    /// 1-based page number.
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    /// Build a request, clamping the page to 1 and the size to at least 1.
    #[must_use]
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.max(1),
        }
    }

    #[must_use]
    pub fn first(per_page: u32) -> Self {
        Self::new(1, per_page)
    }
}

/// Row predicate for filtered store reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepoFilter {
    #[default]
    All,
    /// Only rows whose `fork` flag equals the given value.
    Fork(bool),
}

impl RepoFilter {
    /// Whether a record passes this filter.
    #[must_use]
    pub const fn matches(&self, record: &RepoRecord) -> bool {
        match self {
            Self::All => true,
            Self::Fork(fork) => record.fork == *fork,
        }
    }
}
