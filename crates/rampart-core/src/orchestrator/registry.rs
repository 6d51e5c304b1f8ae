//! Live-assessment table owned by one orchestrator.
//!
//! Progress reads are copy-on-read snapshots. Every write to an assessment's
//! durable record that can race with cancellation happens under that
//! assessment's gate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::model::AssessmentProgress;

#[derive(Debug)]
struct LiveEntry {
    progress: AssessmentProgress,
    cancel: CancellationToken,
    gate: Arc<AsyncMutex<()>>,
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: Mutex<HashMap<String, LiveEntry>>,
}

impl Registry {
    /// Track a new assessment; returns its cancellation token.
    pub(crate) fn insert(&self, progress: AssessmentProgress) -> CancellationToken {
        let cancel = CancellationToken::new();
        let entry = LiveEntry {
            progress,
            cancel: cancel.clone(),
            gate: Arc::new(AsyncMutex::new(())),
        };
        self.lock()
            .insert(entry.progress.assessment_id.clone(), entry);
        cancel
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub(crate) fn snapshot(&self, id: &str) -> Option<AssessmentProgress> {
        self.lock().get(id).map(|e| e.progress.clone())
    }

    pub(crate) fn snapshots(&self) -> Vec<AssessmentProgress> {
        self.lock().values().map(|e| e.progress.clone()).collect()
    }

    pub(crate) fn token(&self, id: &str) -> Option<CancellationToken> {
        self.lock().get(id).map(|e| e.cancel.clone())
    }

    /// Lock the assessment's gate. `None` when it is no longer live, or
    /// became inactive while waiting.
    pub(crate) async fn lock_live(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Option<OwnedMutexGuard<()>> {
        let gate = self.lock().get(id).map(|e| Arc::clone(&e.gate))?;
        let guard = gate.lock_owned().await;
        (!cancel.is_cancelled() && self.contains(id)).then_some(guard)
    }

    /// Lock the gate of a live assessment regardless of its token.
    pub(crate) async fn lock_gate(&self, id: &str) -> Option<OwnedMutexGuard<()>> {
        let gate = self.lock().get(id).map(|e| Arc::clone(&e.gate))?;
        let guard = gate.lock_owned().await;
        self.contains(id).then_some(guard)
    }

    /// Mutate a non-terminal entry. Returns false if absent or terminal.
    pub(crate) fn update(&self, id: &str, f: impl FnOnce(&mut AssessmentProgress)) -> bool {
        match self.lock().get_mut(id) {
            Some(entry) if !entry.progress.status.is_terminal() => {
                f(&mut entry.progress);
                true
            }
            _ => false,
        }
    }

    /// Apply a final update and drop the entry in one step.
    pub(crate) fn finish(
        &self,
        id: &str,
        f: impl FnOnce(&mut AssessmentProgress),
    ) -> Option<AssessmentProgress> {
        let mut entry = self.lock().remove(id)?;
        f(&mut entry.progress);
        Some(entry.progress)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, LiveEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
