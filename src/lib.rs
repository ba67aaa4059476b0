//! Repo Mirror - a locally persisted, paginated mirror of a remote
//! repository listing.
//!
//! Pages fetched from the remote are merged into a `SQLite` table keyed by
//! repository id. The table is exposed as a windowed, live-updating listing
//! together with a loading flag and the last fetch error.

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;

pub use application::{PageWindow, PagedSnapshot, PagedView, SyncCoordinator, SyncFacade, SyncRequest};
pub use domain::{AppConfig, AppError, ErrorKind, FetchFailure, FetchOutcome, RepoRecord, Result};
pub use infrastructure::{HttpRepoFetcher, LiveStream, LiveValue, RemoteFetcher, RepoStore};
