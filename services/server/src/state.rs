//! Shared application context. Everything process-wide (registry, fan-out,
//! rules cache) lives here and is injected through axum state, so tests can
//! spin up fully isolated instances.

use sqlx::PgPool;
use std::time::Instant;

use crate::fanout::StreamFanout;
use crate::feedback::RulesCache;
use crate::registry::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub sessions: SessionRegistry,
    pub fanout: StreamFanout,
    pub feedback_rules: RulesCache,
    started: Instant,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            sessions: SessionRegistry::new(),
            fanout: StreamFanout::new(),
            feedback_rules: RulesCache::default(),
            started: Instant::now(),
        }
    }

    /// Monotonic seconds since server start; the feedback state machine's
    /// clock.
    pub fn monotonic_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}
