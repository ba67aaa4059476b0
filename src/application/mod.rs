//! Application layer - sync orchestration and paging.
//!
//! This layer contains the fetch/merge coordinator, the paged view over
//! the store and the facade the display layer talks to.

pub mod formatter;
pub mod paged_view;
pub mod sync_coordinator;
pub mod sync_facade;

#[cfg(test)]
pub(crate) mod testing;

pub use formatter::{format_repos_json, format_stats, format_window_table, OutputFormat};
pub use paged_view::{PageWindow, PagedSnapshot, PagedView, WindowItem};
pub use sync_coordinator::{CoordinatorPhase, SyncCoordinator, SyncRequest};
pub use sync_facade::SyncFacade;
