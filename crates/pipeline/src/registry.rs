//! Registry of live orchestrator tasks.
//!
//! One cancellation token per running orchestrator, keyed by run kind and
//! run ID. Cancellation is cooperative and double-tracked: `cancel` fires
//! the token for the fast path, and the caller also persists the
//! `cancelled` status so a loop that missed the token (or a worker that
//! restarted) still observes the request on its next status poll.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use campaign_core::types::DbId;
use tokio_util::sync::CancellationToken;

/// Which orchestrator a registry entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunKind {
    Query,
    Dispatch,
}

type RegistryMap = HashMap<(RunKind, DbId), CancellationToken>;

/// Shared map of live runs. Cheap to clone; all clones see the same state.
#[derive(Clone, Default)]
pub struct RunRegistry {
    inner: Arc<Mutex<RegistryMap>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryMap> {
        // The critical sections never panic, but recover from poison anyway.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a run as live and hand its loop the token to poll.
    /// Re-registering an existing key replaces the old token.
    pub fn register(&self, kind: RunKind, run_id: DbId) -> CancellationToken {
        let token = CancellationToken::new();
        self.lock().insert((kind, run_id), token.clone());
        token
    }

    /// True if an orchestrator for this run is currently registered.
    pub fn contains(&self, kind: RunKind, run_id: DbId) -> bool {
        self.lock().contains_key(&(kind, run_id))
    }

    /// Fire the cancellation token for a run, if it is live. Returns
    /// whether a token was found; `false` just means no loop is running,
    /// the persisted status write still takes effect.
    pub fn cancel(&self, kind: RunKind, run_id: DbId) -> bool {
        match self.lock().get(&(kind, run_id)) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop a run's entry once its loop has exited.
    pub fn deregister(&self, kind: RunKind, run_id: DbId) {
        self.lock().remove(&(kind, run_id));
    }

    /// Number of live runs, all kinds.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_cancel_deregister_cycle() {
        let registry = RunRegistry::new();
        let token = registry.register(RunKind::Query, 1);
        assert!(registry.contains(RunKind::Query, 1));
        assert!(!registry.contains(RunKind::Dispatch, 1));
        assert!(!token.is_cancelled());

        assert!(registry.cancel(RunKind::Query, 1));
        assert!(token.is_cancelled());

        registry.deregister(RunKind::Query, 1);
        assert!(!registry.contains(RunKind::Query, 1));
        assert!(registry.is_empty());
    }

    #[test]
    fn cancel_of_unknown_run_is_noop() {
        let registry = RunRegistry::new();
        assert!(!registry.cancel(RunKind::Dispatch, 99));
    }

    #[test]
    fn clones_share_state() {
        let registry = RunRegistry::new();
        let other = registry.clone();
        registry.register(RunKind::Dispatch, 7);
        assert!(other.contains(RunKind::Dispatch, 7));
        assert_eq!(other.len(), 1);
    }

    #[tokio::test]
    async fn token_observed_across_tasks() {
        let registry = RunRegistry::new();
        let token = registry.register(RunKind::Query, 5);
        let handle = tokio::spawn(async move {
            token.cancelled().await;
            true
        });
        registry.cancel(RunKind::Query, 5);
        assert!(handle.await.unwrap());
    }
}
