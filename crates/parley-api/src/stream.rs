//! Streaming connection adapter.
//!
//! One [`EventStream`] binds one long-lived request to one bus subscription.
//! The bus callback never blocks: it `try_send`s into a bounded channel owned
//! by the connection, so a slow client only loses its own events. The stream
//! interleaves those events with a `keepalive` frame every
//! [`StreamConfig::keepalive_interval`].
//!
//! Teardown is owned by [`ConnectionGuard`] and is reachable from every exit
//! path: the cancellation token firing, the response body being dropped when
//! the peer goes away or a write fails, and the subscription channel closing.
//! It runs at most once no matter how many of those paths fire.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use parley_core::{defaults, ConversationEvent, DeliveryError, EventBus, Subscription};

/// Per-connection stream settings.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub keepalive_interval: Duration,
    /// Events buffered for a connection before further ones are dropped.
    pub buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: defaults::STREAM_KEEPALIVE,
            buffer: defaults::STREAM_BUFFER,
        }
    }
}

/// Why a connection was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// The cancellation token fired (explicit cancel or server shutdown).
    Cancelled,
    /// The response body was dropped: peer closed, or a write failed.
    Disconnected,
    /// The subscription channel closed underneath the stream.
    ChannelClosed,
}

impl TeardownReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TeardownReason::Cancelled => "cancelled",
            TeardownReason::Disconnected => "disconnected",
            TeardownReason::ChannelClosed => "channel_closed",
        }
    }
}

/// Owns the resources of one open connection and releases them exactly once.
pub struct ConnectionGuard {
    user_id: Uuid,
    subscription: Subscription,
    cancel: CancellationToken,
    active: Arc<AtomicUsize>,
    torn_down: AtomicBool,
    opened_at: Instant,
}

impl ConnectionGuard {
    /// Unsubscribe, cancel the connection token, and release the connection
    /// gauge. Returns `true` only for the call that actually tore down.
    pub fn teardown(&self, reason: TeardownReason) -> bool {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.subscription.unsubscribe();
        self.cancel.cancel();
        let remaining = self.active.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);

        info!(
            subsystem = "stream",
            component = "connection",
            op = "close",
            user_id = %self.user_id,
            subscription_id = %self.subscription.id(),
            reason = reason.as_str(),
            active_streams = remaining,
            duration_ms = self.opened_at.elapsed().as_millis() as u64,
            "Stream closed"
        );
        true
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.teardown(TeardownReason::Disconnected);
    }
}

enum Step {
    Cancelled,
    Event(Option<Arc<ConversationEvent>>),
    Keepalive,
}

/// Push channel of events for one authenticated user.
pub struct EventStream {
    receiver: mpsc::Receiver<Arc<ConversationEvent>>,
    keepalive: Option<Interval>,
    cancel: CancellationToken,
    guard: ConnectionGuard,
}

impl EventStream {
    /// Register the bus subscription and arm the keepalive timer.
    ///
    /// The subscription is live when this returns, before any frame is
    /// written. `cancel` should be a child of the server shutdown token.
    pub fn open(
        bus: &EventBus,
        user_id: Uuid,
        config: &StreamConfig,
        cancel: CancellationToken,
        active: Arc<AtomicUsize>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.buffer.max(1));

        let subscription = bus.subscribe(user_id, move |event| {
            match sender.try_send(Arc::clone(event)) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err(DeliveryError::Lagged),
                Err(TrySendError::Closed(_)) => Err(DeliveryError::Closed),
            }
        });

        let period = config.keepalive_interval;
        let mut keepalive = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let count = active.fetch_add(1, Ordering::AcqRel) + 1;
        info!(
            subsystem = "stream",
            component = "connection",
            op = "open",
            user_id = %user_id,
            subscription_id = %subscription.id(),
            active_streams = count,
            "Stream opened"
        );

        Self {
            receiver,
            keepalive: Some(keepalive),
            cancel: cancel.clone(),
            guard: ConnectionGuard {
                user_id,
                subscription,
                cancel,
                active,
                torn_down: AtomicBool::new(false),
                opened_at: Instant::now(),
            },
        }
    }

    /// Next frame to push, or `None` once the connection is torn down.
    pub async fn next_event(&mut self) -> Option<Arc<ConversationEvent>> {
        let keepalive = match (self.guard.is_torn_down(), self.keepalive.as_mut()) {
            (false, Some(keepalive)) => keepalive,
            _ => return None,
        };

        let step = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Step::Cancelled,
            // A due keepalive goes out even while events are queued.
            _ = keepalive.tick() => Step::Keepalive,
            event = self.receiver.recv() => Step::Event(event),
        };

        match step {
            Step::Event(Some(event)) => Some(event),
            Step::Keepalive => {
                debug!(
                    subsystem = "stream",
                    user_id = %self.guard.user_id,
                    "Keepalive"
                );
                Some(Arc::new(ConversationEvent::Keepalive))
            }
            Step::Cancelled => {
                self.close(TeardownReason::Cancelled);
                None
            }
            Step::Event(None) => {
                self.close(TeardownReason::ChannelClosed);
                None
            }
        }
    }

    /// Stop the keepalive timer and tear the connection down. Idempotent.
    pub fn close(&mut self, reason: TeardownReason) -> bool {
        self.keepalive = None;
        self.guard.teardown(reason)
    }

    pub fn guard(&self) -> &ConnectionGuard {
        &self.guard
    }

    /// Adapt into a `Stream`; dropping the stream tears the connection down.
    pub fn into_stream(self) -> impl Stream<Item = Arc<ConversationEvent>> + Send + 'static {
        futures::stream::unfold(self, |mut stream| async move {
            let event = stream.next_event().await?;
            Some((event, stream))
        })
    }
}
