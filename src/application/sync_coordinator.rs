//! Fetch-then-persist coordination.
//!
//! Each attempt walks `Idle -> Fetching -> Merging -> Idle` on success or
//! `Idle -> Fetching -> FailedReport -> Idle` on failure. Only one attempt
//! runs at a time; a request made while one is active is skipped, not queued.
//!
//! Merges replace whole rows keyed by id. The fetcher always supplies full
//! records, so no partial-field patching happens here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::domain::{FetchFailure, FetchOutcome, PageRequest, RepoRecord};
use crate::infrastructure::live::lock;
use crate::infrastructure::{LiveValue, RemoteFetcher, RepoStore};

/// Phase of the current sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorPhase {
    Idle,
    Fetching,
    Merging,
    FailedReport,
}

/// Handle returned by [`SyncCoordinator::request_sync`].
#[derive(Debug)]
pub enum SyncRequest {
    /// A new attempt was started on a background task.
    Started(JoinHandle<FetchOutcome>),
    /// An attempt was already in flight; nothing was started.
    Skipped,
}

impl SyncRequest {
    #[must_use]
    pub const fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }

    /// Wait for the attempt to finish. `None` when skipped.
    pub async fn wait(self) -> Option<FetchOutcome> {
        match self {
            Self::Started(handle) => match handle.await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    tracing::error!(error = %e, "Sync task did not complete");
                    None
                }
            },
            Self::Skipped => None,
        }
    }
}

struct CoordinatorInner<F> {
    store: RepoStore,
    fetcher: F,
    runtime: Option<Handle>,
    // Held while checking and staging phase changes so loading flips stay
    // paired. Never held while listeners run.
    transition: Mutex<()>,
    phase: LiveValue<CoordinatorPhase>,
    loading: LiveValue<bool>,
    outcome: LiveValue<Option<FetchOutcome>>,
    last_error: LiveValue<Option<FetchFailure>>,
    remote_exhausted: AtomicBool,
}

/// Owns the single fetch slot and is the only writer to the store.
pub struct SyncCoordinator<F> {
    inner: Arc<CoordinatorInner<F>>,
}

impl<F> Clone for SyncCoordinator<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: RemoteFetcher> SyncCoordinator<F> {
    /// Attempts run on the Tokio runtime current at construction, or on the
    /// caller's runtime when there was none.
    pub fn new(store: RepoStore, fetcher: F) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                store,
                fetcher,
                runtime: Handle::try_current().ok(),
                transition: Mutex::new(()),
                phase: LiveValue::new(CoordinatorPhase::Idle),
                loading: LiveValue::new(false),
                outcome: LiveValue::new(None),
                last_error: LiveValue::new(None),
                remote_exhausted: AtomicBool::new(false),
            }),
        }
    }

    /// Start fetching `request` unless an attempt is already running.
    ///
    /// The loading flag is raised before this returns, unless it is called
    /// from a listener, in which case it is raised once that listener
    /// returns. Skipped when no Tokio runtime is reachable.
    pub fn request_sync(&self, request: PageRequest) -> SyncRequest {
        let Some(runtime) = self
            .inner
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
        else {
            tracing::error!(page = request.page, "No Tokio runtime to run the sync on");
            return SyncRequest::Skipped;
        };

        let publication = {
            let _transition = lock(&self.inner.transition);
            if self.inner.phase.get() != CoordinatorPhase::Idle {
                tracing::debug!(page = request.page, "Sync already in progress, request skipped");
                return SyncRequest::Skipped;
            }
            self.inner.phase.stage(CoordinatorPhase::Fetching);
            self.inner.loading.stage(true)
        };
        publication.flush();

        let inner = Arc::clone(&self.inner);
        SyncRequest::Started(runtime.spawn(async move { inner.run(request).await }))
    }

    /// Loading flag: `true` from request until the outcome is published.
    #[must_use]
    pub fn is_loading(&self) -> &LiveValue<bool> {
        &self.inner.loading
    }

    /// Latest outcome; written once per finished attempt.
    #[must_use]
    pub fn outcome(&self) -> &LiveValue<Option<FetchOutcome>> {
        &self.inner.outcome
    }

    /// Failure of the latest attempt; cleared by the next success.
    #[must_use]
    pub fn last_error(&self) -> &LiveValue<Option<FetchFailure>> {
        &self.inner.last_error
    }

    #[must_use]
    pub fn phase(&self) -> &LiveValue<CoordinatorPhase> {
        &self.inner.phase
    }

    /// Whether the last successful page was shorter than requested.
    #[must_use]
    pub fn remote_exhausted(&self) -> bool {
        self.inner.remote_exhausted.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn store(&self) -> &RepoStore {
        &self.inner.store
    }
}

impl<F: RemoteFetcher> CoordinatorInner<F> {
    async fn run(&self, request: PageRequest) -> FetchOutcome {
        tracing::info!(page = request.page, per_page = request.per_page, "Starting sync");
        let start = Instant::now();

        let outcome = match self.fetcher.fetch_page(request).await {
            FetchOutcome::Success(items) => self.merge(request, items),
            failure @ FetchOutcome::Failure(_) => failure,
        };

        self.finish(&outcome);

        match &outcome {
            FetchOutcome::Success(items) => tracing::info!(
                page = request.page,
                items = items.len(),
                duration_ms = start.elapsed().as_millis(),
                "Sync completed"
            ),
            FetchOutcome::Failure(failure) => tracing::warn!(
                page = request.page,
                kind = %failure.kind,
                error = %failure.message,
                "Sync failed"
            ),
        }

        outcome
    }

    fn merge(&self, request: PageRequest, items: Vec<RepoRecord>) -> FetchOutcome {
        self.phase.set(CoordinatorPhase::Merging);

        // Full-record replace: the fetcher always supplies complete records and
        // every column of a matching row is overwritten.
        match self.store.upsert_batch(&items) {
            Ok(_) => {
                let short = items.len() < usize::try_from(request.per_page).unwrap_or(usize::MAX);
                if request.page == 1 || short {
                    self.remote_exhausted.store(short, Ordering::Release);
                }
                FetchOutcome::Success(items)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to merge fetched page");
                FetchOutcome::Failure(FetchFailure::from(e))
            }
        }
    }

    fn finish(&self, outcome: &FetchOutcome) {
        let publication = {
            let _transition = lock(&self.transition);

            match outcome {
                FetchOutcome::Success(_) => {
                    self.last_error.stage(None);
                }
                FetchOutcome::Failure(failure) => {
                    self.phase.stage(CoordinatorPhase::FailedReport);
                    self.last_error.stage(Some(failure.clone()));
                }
            }
            self.outcome.stage(Some(outcome.clone()));

            self.phase.stage(CoordinatorPhase::Idle);
            self.loading.stage(false)
        };
        publication.flush();
    }
}
