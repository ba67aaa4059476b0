//! Domain layer - core types and configuration.
//!
//! This layer contains pure domain models and error types
//! without any external dependencies (DB, IO, etc.).

pub mod error;
pub mod models;
pub mod sync;

pub use error::{AppError, ErrorKind, FetchFailure, Result};
pub use models::{FetchOutcome, PageRequest, RepoFilter, RepoRecord};
pub use sync::{AppConfig, PagingConfig, PathConfig, RemoteConfig, SyncConfig, SyncState};
