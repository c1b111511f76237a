//! Shared context injected into every orchestrator and service call.

use std::time::Duration;

use sqlx::PgPool;

use crate::registry::RunRegistry;

/// Fixed pause between processed items. Both loops pace themselves with it
/// so the external APIs are never hammered.
pub const DEFAULT_ITEM_DELAY: Duration = Duration::from_secs(1);

/// Progress checkpoint interval for the query loop, in items.
pub const QUERY_FLUSH_EVERY: u32 = 10;

/// Progress checkpoint interval for the dispatch loop, in items.
pub const DISPATCH_FLUSH_EVERY: u32 = 5;

/// Everything a run needs, passed explicitly instead of living in
/// process-global state. Cloning is cheap (pool handle + Arc registry).
#[derive(Clone)]
pub struct PipelineContext {
    pub pool: PgPool,
    pub registry: RunRegistry,
    pub item_delay: Duration,
    pub query_flush_every: u32,
    pub dispatch_flush_every: u32,
}

impl PipelineContext {
    /// Context with the default pacing and checkpoint intervals.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            registry: RunRegistry::new(),
            item_delay: DEFAULT_ITEM_DELAY,
            query_flush_every: QUERY_FLUSH_EVERY,
            dispatch_flush_every: DISPATCH_FLUSH_EVERY,
        }
    }

    /// Context without the inter-item pause. Tests use this so a full loop
    /// runs in milliseconds.
    pub fn without_delay(pool: PgPool) -> Self {
        Self {
            item_delay: Duration::ZERO,
            ..Self::new(pool)
        }
    }
}
