//! Infrastructure layer - external adapters (database, network, filesystem).
//!
//! This layer handles all I/O operations and external dependencies.

pub mod config;
pub mod live;
pub mod remote;
pub mod repo_store;

pub use config::{config_file_path, ensure_config_exists, load_config, load_config_from_file};
pub use live::{LiveStream, LiveValue, Publication};
pub use remote::{HttpRepoFetcher, RemoteFetcher};
pub use repo_store::{ChangeKind, RepoStore, StoreChange};
