//! Single entry point for the display layer.
//!
//! Wires a [`SyncCoordinator`] and a [`PagedView`] over the same store and
//! exposes the paged listing, the loading flag, the error slot and the
//! imperative `refresh` / `clear_cache` operations.

use crate::domain::{
    AppConfig, FetchFailure, PageRequest, RepoFilter, Result, SyncConfig, SyncState,
};
use crate::infrastructure::{LiveStream, LiveValue, RemoteFetcher, RepoStore};

use super::paged_view::{PageWindow, PagedSnapshot, PagedView};
use super::sync_coordinator::{SyncCoordinator, SyncRequest};

/// Facade over sync and paging.
pub struct SyncFacade<F> {
    store: RepoStore,
    coordinator: SyncCoordinator<F>,
    view: PagedView,
    sync: SyncConfig,
}

impl<F: RemoteFetcher> SyncFacade<F> {
    /// Facade over the unfiltered listing.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or the initial view
    /// cannot be loaded.
    pub fn new(store: RepoStore, fetcher: F, config: &AppConfig) -> Result<Self> {
        Self::with_filter(store, fetcher, config, RepoFilter::All)
    }

    /// Facade whose paged listing only shows rows matching `filter`.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or the initial view
    /// cannot be loaded.
    pub fn with_filter(
        store: RepoStore,
        fetcher: F,
        config: &AppConfig,
        filter: RepoFilter,
    ) -> Result<Self> {
        config.validate()?;

        let view = PagedView::new(store.clone(), filter, config.paging)?;
        let coordinator = SyncCoordinator::new(store.clone(), fetcher);

        Ok(Self {
            store,
            coordinator,
            view,
            sync: config.sync.clone(),
        })
    }

    /// Live paged listing.
    #[must_use]
    pub fn paged_records(&self) -> LiveStream<PagedSnapshot> {
        self.view.subscribe()
    }

    #[must_use]
    pub const fn paged_view(&self) -> &PagedView {
        &self.view
    }

    #[must_use]
    pub fn is_loading(&self) -> &LiveValue<bool> {
        self.coordinator.is_loading()
    }

    #[must_use]
    pub fn last_error(&self) -> &LiveValue<Option<FetchFailure>> {
        self.coordinator.last_error()
    }

    #[must_use]
    pub const fn coordinator(&self) -> &SyncCoordinator<F> {
        &self.coordinator
    }

    /// Current loading flag and error, read together.
    #[must_use]
    pub fn sync_state(&self) -> SyncState {
        SyncState {
            is_fetch_in_progress: self.coordinator.is_loading().get(),
            last_error: self.coordinator.last_error().get(),
        }
    }

    /// Fetch the first remote page. No effect while a fetch is in flight.
    pub fn refresh(&self) -> SyncRequest {
        self.coordinator
            .request_sync(PageRequest::first(self.sync.per_page))
    }

    /// Fetch the remote page following the rows already stored.
    ///
    /// Skipped when the remote end has been reached or a fetch is in flight.
    ///
    /// # Errors
    /// Returns error if the store cannot be counted.
    pub fn load_more(&self) -> Result<SyncRequest> {
        if self.coordinator.remote_exhausted() {
            tracing::debug!("Remote listing exhausted, not fetching more");
            return Ok(SyncRequest::Skipped);
        }

        let per_page = self.sync.per_page;
        let stored = u32::try_from(self.store.count()?).unwrap_or(u32::MAX);
        let page = stored / per_page + 1;

        Ok(self.coordinator.request_sync(PageRequest::new(page, per_page)))
    }

    /// Window of the paged listing. Reaching the end of the local rows asks
    /// for the next remote page when `fetch_on_end` is enabled; the returned
    /// request is `Skipped` when no fetch was started.
    ///
    /// # Errors
    /// Returns error if the store cannot be read.
    pub fn window(&self, anchor: usize, size: usize) -> Result<(PageWindow, SyncRequest)> {
        let window = self.view.get_window(anchor, size)?;

        let fetch = if self.sync.fetch_on_end && window.reaches_end() {
            self.load_more()?
        } else {
            SyncRequest::Skipped
        };

        Ok((window, fetch))
    }

    /// Remove every stored row. Does not fetch again.
    ///
    /// A fetch already in flight still merges its page after the clear.
    ///
    /// # Errors
    /// Returns error if the delete fails.
    pub fn clear_cache(&self) -> Result<usize> {
        let removed = self.store.clear()?;
        tracing::info!(removed, "Local cache cleared");
        Ok(removed)
    }

    /// Rows stored locally.
    ///
    /// # Errors
    /// Returns error if the count query fails.
    pub fn count(&self) -> Result<usize> {
        self.store.count()
    }

    #[must_use]
    pub const fn store(&self) -> &RepoStore {
        &self.store
    }
}
