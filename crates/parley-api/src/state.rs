//! Shared application state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use governor::{Quota, RateLimiter};
use tokio_util::sync::CancellationToken;

use parley_core::{ConversationRepository, EventBus, IdentityResolver};

use crate::config::RateLimitConfig;
use crate::services::{ConversationService, ReadStateSynchronizer};
use crate::stream::StreamConfig;

/// Global rate limiter type (direct quota, no keyed bucketing).
pub type GlobalRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// State shared by every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub conversations: Arc<dyn ConversationRepository>,
    pub identity: Arc<dyn IdentityResolver>,
    /// Process-wide event bus; the only one in the process.
    pub event_bus: Arc<EventBus>,
    pub stream_config: StreamConfig,
    /// Root shutdown token; every stream connection holds a child of it.
    pub shutdown: CancellationToken,
    /// Open streaming connection count.
    pub stream_connections: Arc<AtomicUsize>,
    /// Global rate limiter (None if rate limiting is disabled).
    pub rate_limiter: Option<Arc<GlobalRateLimiter>>,
}

impl AppState {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        identity: Arc<dyn IdentityResolver>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            conversations,
            identity,
            event_bus,
            stream_config: StreamConfig::default(),
            shutdown: CancellationToken::new(),
            stream_connections: Arc::new(AtomicUsize::new(0)),
            rate_limiter: None,
        }
    }

    pub fn with_stream_config(mut self, config: StreamConfig) -> Self {
        self.stream_config = config;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_rate_limit(mut self, config: &RateLimitConfig) -> Self {
        self.rate_limiter = build_rate_limiter(config);
        self
    }

    pub fn active_streams(&self) -> usize {
        self.stream_connections.load(Ordering::Relaxed)
    }

    pub fn read_state(&self) -> ReadStateSynchronizer {
        ReadStateSynchronizer::new(Arc::clone(&self.conversations), Arc::clone(&self.event_bus))
    }

    pub fn conversation_service(&self) -> ConversationService {
        ConversationService::new(Arc::clone(&self.conversations), Arc::clone(&self.event_bus))
    }
}

fn build_rate_limiter(config: &RateLimitConfig) -> Option<Arc<GlobalRateLimiter>> {
    if !config.enabled {
        return None;
    }
    let burst = std::num::NonZeroU32::new(config.requests)?;
    let quota = Quota::with_period(config.period / config.requests)?.allow_burst(burst);
    Some(Arc::new(RateLimiter::direct(quota)))
}
