//! Test doubles shared by the application tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::domain::{ErrorKind, FetchFailure, FetchOutcome, PageRequest, RepoRecord};
use crate::infrastructure::live::lock;
use crate::infrastructure::RemoteFetcher;

/// In-memory fetcher that replays queued outcomes in FIFO order.
///
/// With an empty queue it answers with an empty page. A held gate keeps
/// every fetch pending until `release` is called.
#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    inner: Arc<ScriptedInner>,
}

#[derive(Default)]
struct ScriptedInner {
    outcomes: Mutex<VecDeque<FetchOutcome>>,
    requests: Mutex<Vec<PageRequest>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, outcome: FetchOutcome) -> &Self {
        lock(&self.inner.outcomes).push_back(outcome);
        self
    }

    pub fn push_success(&self, items: Vec<RepoRecord>) -> &Self {
        self.push(FetchOutcome::Success(items))
    }

    pub fn push_failure(&self, kind: ErrorKind, message: &str) -> &Self {
        self.push(FetchOutcome::Failure(FetchFailure::new(kind, message)))
    }

    /// Requests seen so far, in call order.
    pub fn requests(&self) -> Vec<PageRequest> {
        lock(&self.inner.requests).clone()
    }

    pub fn hold(&self) {
        *lock(&self.inner.gate) = Some(Arc::new(Notify::new()));
    }

    pub fn release(&self) {
        if let Some(gate) = lock(&self.inner.gate).take() {
            gate.notify_waiters();
            gate.notify_one();
        }
    }
}

impl RemoteFetcher for ScriptedFetcher {
    async fn fetch_page(&self, request: PageRequest) -> FetchOutcome {
        lock(&self.inner.requests).push(request);

        let gate = lock(&self.inner.gate).clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let next = lock(&self.inner.outcomes).pop_front();
        next.unwrap_or_else(|| FetchOutcome::Success(Vec::new()))
    }
}

/// One record per id in `range`, named `repo-{id}`.
pub fn records(range: std::ops::RangeInclusive<i64>) -> Vec<RepoRecord> {
    range.map(|id| RepoRecord::new(id, format!("repo-{id}"))).collect()
}
