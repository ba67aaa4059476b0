//! Windowed, incrementally loaded view over the repository store.
//!
//! The view keeps an arena of loaded database pages keyed by page index.
//! Positions outside the loaded pages are placeholders. Any store mutation
//! throws the arena away; the view is rebuilt around the record that was at
//! the consumer's anchor, found again by id. A generation counter tags
//! every rebuild so stale snapshots can be told apart.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use crate::domain::{AppError, PagingConfig, RepoFilter, RepoRecord, Result};
use crate::infrastructure::live::lock;
use crate::infrastructure::{LiveStream, LiveValue, Publication, RepoStore, StoreChange};

/// One position of a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowItem {
    Loaded(RepoRecord),
    /// Position exists but its page is not loaded.
    Placeholder,
}

impl WindowItem {
    #[must_use]
    pub const fn record(&self) -> Option<&RepoRecord> {
        match self {
            Self::Loaded(record) => Some(record),
            Self::Placeholder => None,
        }
    }

    #[must_use]
    pub const fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder)
    }
}

/// Ordered slice `[start, start + items.len())` of the listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageWindow {
    /// View generation the window was cut from.
    pub generation: u64,
    /// Size of the whole listing.
    pub total: usize,
    pub start: usize,
    pub items: Vec<WindowItem>,
}

impl PageWindow {
    /// Position one past the last item.
    #[must_use]
    pub fn end(&self) -> usize {
        self.start + self.items.len()
    }

    /// Whether the window touches the last position of the listing.
    #[must_use]
    pub fn reaches_end(&self) -> bool {
        self.end() >= self.total
    }

    /// Loaded records, skipping placeholders.
    pub fn records(&self) -> impl Iterator<Item = &RepoRecord> {
        self.items.iter().filter_map(WindowItem::record)
    }

    #[must_use]
    pub fn placeholder_count(&self) -> usize {
        self.items.iter().filter(|i| i.is_placeholder()).count()
    }
}

/// Immutable picture of the view, as published to subscribers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PagedSnapshot {
    generation: u64,
    total: usize,
    page_size: usize,
    pages: BTreeMap<usize, Arc<[RepoRecord]>>,
}

impl PagedSnapshot {
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.total
    }

    /// Indices of the resident pages.
    #[must_use]
    pub fn loaded_pages(&self) -> Vec<usize> {
        self.pages.keys().copied().collect()
    }

    /// Item at `position`; `None` past the end of the listing.
    #[must_use]
    pub fn get(&self, position: usize) -> Option<WindowItem> {
        if position >= self.total || self.page_size == 0 {
            return None;
        }
        let record = self
            .pages
            .get(&(position / self.page_size))
            .and_then(|page| page.get(position % self.page_size));

        Some(record.map_or(WindowItem::Placeholder, |r| WindowItem::Loaded(r.clone())))
    }

    /// Window over `[start, start + len)`, clipped to the listing. Never
    /// triggers loading.
    #[must_use]
    pub fn window(&self, start: usize, len: usize) -> PageWindow {
        let start = start.min(self.total);
        let end = start.saturating_add(len).min(self.total);

        PageWindow {
            generation: self.generation,
            total: self.total,
            start,
            items: (start..end).filter_map(|p| self.get(p)).collect(),
        }
    }
}

#[derive(Default)]
struct PagerState {
    /// Store generation the arena was built from.
    store_generation: u64,
    generation: u64,
    total: usize,
    pages: BTreeMap<usize, Arc<[RepoRecord]>>,
    anchor: usize,
    anchor_id: Option<i64>,
}

impl PagerState {
    fn record_at(&self, position: usize, page_size: usize) -> Option<&RepoRecord> {
        self.pages
            .get(&(position / page_size))
            .and_then(|page| page.get(position % page_size))
    }
}

struct ViewInner {
    store: RepoStore,
    filter: RepoFilter,
    config: PagingConfig,
    state: Mutex<PagerState>,
    snapshot: LiveValue<PagedSnapshot>,
}

/// Paged view provider. Cheap to clone.
#[derive(Clone)]
pub struct PagedView {
    inner: Arc<ViewInner>,
}

impl PagedView {
    /// Build the view, load the first rows and start following the store.
    ///
    /// # Errors
    /// Returns `AppError::Config` for a zero page size, or a storage error
    /// from the initial load.
    pub fn new(store: RepoStore, filter: RepoFilter, config: PagingConfig) -> Result<Self> {
        if config.page_size == 0 {
            return Err(AppError::Config {
                message: "paging.page_size must be greater than 0".into(),
            });
        }

        let inner = Arc::new(ViewInner {
            store,
            filter,
            config,
            state: Mutex::new(PagerState::default()),
            snapshot: LiveValue::new(PagedSnapshot::default()),
        });

        let publication = {
            let mut state = lock(&inner.state);
            inner.rebuild(&mut state)?;
            inner.stage(&state)
        };
        publication.flush();

        let weak: Weak<ViewInner> = Arc::downgrade(&inner);
        inner.store.changes().observe(move |change: &StoreChange| {
            weak.upgrade().is_some_and(|inner| {
                inner.on_store_change(change);
                true
            })
        });

        Ok(Self { inner })
    }

    /// Window over `[anchor, anchor + size)`.
    ///
    /// Pages within the prefetch distance of the window are loaded first,
    /// pages far from the anchor are evicted beyond the configured limit,
    /// and subscribers get a new snapshot if anything changed.
    ///
    /// # Errors
    /// Returns error if a page cannot be read from the store.
    pub fn get_window(&self, anchor: usize, size: usize) -> Result<PageWindow> {
        let inner = &self.inner;
        let page_size = inner.config.page_size;
        let mut state = lock(&inner.state);
        let mut changed = false;
        // Subscribers are notified after the state lock is released.

        if state.store_generation != inner.store.generation() {
            inner.rebuild(&mut state)?;
            changed = true;
        }

        state.anchor = anchor.min(state.total.saturating_sub(1));
        let prefetch = inner.config.prefetch_distance;
        changed |= inner.load_pages(
            &mut state,
            anchor.saturating_sub(prefetch),
            anchor.saturating_add(size).saturating_add(prefetch),
        )?;
        changed |= inner.evict(&mut state, anchor, size);
        state.anchor_id = state.record_at(state.anchor, page_size).map(|r| r.id);

        let snapshot = inner.snapshot_of(&state);
        let window = snapshot.window(anchor, size);
        if !changed {
            return Ok(window);
        }

        tracing::debug!(
            anchor,
            size,
            generation = state.generation,
            pages = state.pages.len(),
            "Window loaded"
        );
        let publication = inner.snapshot.stage(snapshot);
        drop(state);
        publication.flush();

        Ok(window)
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> PagedSnapshot {
        self.inner.snapshot.get()
    }

    /// Live snapshots: the current one, then one per change.
    #[must_use]
    pub fn subscribe(&self) -> LiveStream<PagedSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Snapshot slot, for synchronous listeners.
    #[must_use]
    pub fn live(&self) -> &LiveValue<PagedSnapshot> {
        &self.inner.snapshot
    }
}

impl ViewInner {
    fn on_store_change(&self, change: &StoreChange) {
        let publication = {
            let mut state = lock(&self.state);
            if change.generation <= state.store_generation {
                return;
            }

            match self.rebuild(&mut state) {
                Ok(()) => self.stage(&state),
                // The generation stays stale, so the next window request retries.
                Err(e) => {
                    tracing::error!(error = %e, "Failed to rebuild paged view");
                    return;
                }
            }
        };
        publication.flush();
    }

    fn rebuild(&self, state: &mut PagerState) -> Result<()> {
        let store_generation = self.store.generation();
        let total = self.store.count_filtered(self.filter)?;

        let anchor = match state.anchor_id {
            Some(id) => self
                .store
                .position_of(self.filter, id)?
                .unwrap_or(state.anchor),
            None => state.anchor,
        };

        state.pages.clear();
        state.total = total;
        state.anchor = anchor.min(total.saturating_sub(1));
        state.generation += 1;

        let start = state.anchor.saturating_sub(self.config.prefetch_distance);
        let end = state
            .anchor
            .saturating_add(self.config.initial_load_size.max(1));
        self.load_pages(state, start, end)?;

        state.anchor_id = state
            .record_at(state.anchor, self.config.page_size)
            .map(|r| r.id);
        state.store_generation = store_generation;

        tracing::debug!(
            generation = state.generation,
            total,
            anchor = state.anchor,
            "Paged view rebuilt"
        );

        Ok(())
    }

    /// Load every missing page intersecting `[start, end)`.
    fn load_pages(&self, state: &mut PagerState, start: usize, end: usize) -> Result<bool> {
        let end = end.min(state.total);
        if start >= end {
            return Ok(false);
        }

        let page_size = self.config.page_size;
        let mut loaded = false;
        for index in (start / page_size)..=((end - 1) / page_size) {
            if state.pages.contains_key(&index) {
                continue;
            }
            let rows = self
                .store
                .load_range(self.filter, index * page_size, page_size)?;
            state.pages.insert(index, Arc::from(rows));
            loaded = true;
        }

        Ok(loaded)
    }

    /// Drop pages farthest from the anchor while over the limit. Pages
    /// covering the requested window are never dropped.
    fn evict(&self, state: &mut PagerState, anchor: usize, size: usize) -> bool {
        let max = self.config.max_loaded_pages;
        if max == 0 || state.pages.len() <= max {
            return false;
        }

        let page_size = self.config.page_size;
        let first = anchor / page_size;
        let last = anchor.saturating_add(size.max(1) - 1) / page_size;

        let mut candidates: Vec<usize> = state
            .pages
            .keys()
            .copied()
            .filter(|index| *index < first || *index > last)
            .collect();
        candidates.sort_by_key(|index| std::cmp::Reverse(index.abs_diff(first)));

        let mut evicted = false;
        for index in candidates {
            if state.pages.len() <= max {
                break;
            }
            state.pages.remove(&index);
            evicted = true;
        }

        evicted
    }

    fn snapshot_of(&self, state: &PagerState) -> PagedSnapshot {
        PagedSnapshot {
            generation: state.generation,
            total: state.total,
            page_size: self.config.page_size,
            pages: state.pages.clone(),
        }
    }

    fn stage(&self, state: &PagerState) -> Publication {
        self.snapshot.stage(self.snapshot_of(state))
    }
}
