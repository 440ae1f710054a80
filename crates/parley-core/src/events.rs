//! Conversation event types and the in-process event bus for real-time fan-out.
//!
//! Write paths publish a [`ConversationEvent`] addressed to an explicit set of
//! user ids. The [`EventBus`] invokes every subscription registered for those
//! users before `publish` returns. There is no queue and no replay: a user with
//! no open subscription simply misses the event.
//!
//! ## Wire Format
//!
//! Events serialize as a flat JSON object tagged by `type`:
//!
//! ```text
//! {"type":"read.updated","conversationId":"...","messageId":"...","actorUserId":"...","data":{"messageId":"..."}}
//! {"type":"keepalive"}
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Conversation, Message};

// ============================================================================
// Conversation Event (wire payloads)
// ============================================================================

/// Payload of `conversation.created` / `conversation.updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub participant_ids: Vec<Uuid>,
}

/// Payload of `message.created`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageData {
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Payload of `read.updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadData {
    pub message_id: Uuid,
}

/// Payload of `ping`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingData {
    pub typing: bool,
}

/// Closed set of events pushed to streaming clients.
///
/// Deserializing an unknown `type` is an error; consumers drop such frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConversationEvent {
    #[serde(rename = "conversation.created", rename_all = "camelCase")]
    ConversationCreated {
        conversation_id: Uuid,
        actor_user_id: Uuid,
        data: ConversationData,
    },
    #[serde(rename = "conversation.updated", rename_all = "camelCase")]
    ConversationUpdated {
        conversation_id: Uuid,
        actor_user_id: Uuid,
        data: ConversationData,
    },
    #[serde(rename = "message.created", rename_all = "camelCase")]
    MessageCreated {
        conversation_id: Uuid,
        message_id: Uuid,
        actor_user_id: Uuid,
        data: MessageData,
    },
    #[serde(rename = "read.updated", rename_all = "camelCase")]
    ReadUpdated {
        conversation_id: Uuid,
        message_id: Uuid,
        actor_user_id: Uuid,
        data: ReadData,
    },
    /// Typing signal.
    #[serde(rename = "ping", rename_all = "camelCase")]
    Ping {
        conversation_id: Uuid,
        actor_user_id: Uuid,
        data: PingData,
    },
    /// Connection liveness frame, emitted by the stream itself, never published.
    #[serde(rename = "keepalive")]
    Keepalive,
}

impl ConversationEvent {
    pub fn conversation_created(conversation: &Conversation, actor_user_id: Uuid) -> Self {
        ConversationEvent::ConversationCreated {
            conversation_id: conversation.id,
            actor_user_id,
            data: ConversationData {
                title: conversation.title.clone(),
                participant_ids: conversation.participant_ids(),
            },
        }
    }

    pub fn conversation_updated(conversation: &Conversation, actor_user_id: Uuid) -> Self {
        ConversationEvent::ConversationUpdated {
            conversation_id: conversation.id,
            actor_user_id,
            data: ConversationData {
                title: conversation.title.clone(),
                participant_ids: conversation.participant_ids(),
            },
        }
    }

    pub fn message_created(message: &Message) -> Self {
        ConversationEvent::MessageCreated {
            conversation_id: message.conversation_id,
            message_id: message.id,
            actor_user_id: message.sender_id,
            data: MessageData {
                content: message.content.clone(),
                created_at: message.created_at,
            },
        }
    }

    pub fn read_updated(conversation_id: Uuid, message_id: Uuid, reader_id: Uuid) -> Self {
        ConversationEvent::ReadUpdated {
            conversation_id,
            message_id,
            actor_user_id: reader_id,
            data: ReadData { message_id },
        }
    }

    pub fn typing(conversation_id: Uuid, user_id: Uuid) -> Self {
        ConversationEvent::Ping {
            conversation_id,
            actor_user_id: user_id,
            data: PingData { typing: true },
        }
    }

    /// Wire name carried in the `type` field.
    pub fn event_type(&self) -> &'static str {
        match self {
            ConversationEvent::ConversationCreated { .. } => "conversation.created",
            ConversationEvent::ConversationUpdated { .. } => "conversation.updated",
            ConversationEvent::MessageCreated { .. } => "message.created",
            ConversationEvent::ReadUpdated { .. } => "read.updated",
            ConversationEvent::Ping { .. } => "ping",
            ConversationEvent::Keepalive => "keepalive",
        }
    }

    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            ConversationEvent::ConversationCreated {
                conversation_id, ..
            }
            | ConversationEvent::ConversationUpdated {
                conversation_id, ..
            }
            | ConversationEvent::MessageCreated {
                conversation_id, ..
            }
            | ConversationEvent::ReadUpdated {
                conversation_id, ..
            }
            | ConversationEvent::Ping {
                conversation_id, ..
            } => Some(*conversation_id),
            ConversationEvent::Keepalive => None,
        }
    }

    pub fn message_id(&self) -> Option<Uuid> {
        match self {
            ConversationEvent::MessageCreated { message_id, .. }
            | ConversationEvent::ReadUpdated { message_id, .. } => Some(*message_id),
            _ => None,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Why a single subscriber did not accept an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Subscriber's buffer is full; this event is dropped for it.
    #[error("subscriber lagged")]
    Lagged,
    /// Subscriber is shutting down.
    #[error("subscriber closed")]
    Closed,
    #[error("delivery failed: {0}")]
    Failed(String),
}

/// Callback invoked synchronously for each event addressed to its user.
///
/// Callbacks must not block and must not call back into the bus.
pub type Subscriber =
    dyn Fn(&Arc<ConversationEvent>) -> std::result::Result<(), DeliveryError> + Send + Sync;

/// Process-unique subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Outcome counts of one `publish` / `broadcast` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

struct Entry {
    id: SubscriptionId,
    callback: Arc<Subscriber>,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<Uuid, Vec<Entry>>>,
}

impl Registry {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Vec<Entry>>> {
        // Callbacks run under catch_unwind, so poisoning can only come from a
        // panic inside the registry itself; the map is still consistent then.
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, user_id: Uuid, callback: Arc<Subscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut map = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        map.entry(user_id).or_default().push(Entry { id, callback });
        id
    }

    fn remove(&self, user_id: Uuid, id: SubscriptionId) -> bool {
        let mut map = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = map.get_mut(&user_id) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            map.remove(&user_id);
        }
        removed
    }
}

/// In-memory fan-out of conversation events to per-user subscriptions.
///
/// One instance is constructed by the server at startup and shared as
/// `Arc<EventBus>`. Subscribe, publish, and unsubscribe are safe to call from
/// any number of tasks concurrently. Publishing holds the registry's read lock
/// while callbacks run, so once [`Subscription::unsubscribe`] returns its
/// callback is never invoked again.
pub struct EventBus {
    registry: Arc<Registry>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry::default()),
        }
    }

    /// Register `callback` for every event addressed to `user_id`.
    ///
    /// Multiple subscriptions for the same user are independent and all
    /// receive the same events. The returned handle unsubscribes on
    /// [`Subscription::unsubscribe`] or when dropped.
    pub fn subscribe<F>(&self, user_id: Uuid, callback: F) -> Subscription
    where
        F: Fn(&Arc<ConversationEvent>) -> std::result::Result<(), DeliveryError>
            + Send
            + Sync
            + 'static,
    {
        let id = self.registry.insert(user_id, Arc::new(callback));
        tracing::debug!(
            subsystem = "bus",
            component = "event_bus",
            op = "subscribe",
            user_id = %user_id,
            subscription_id = %id,
            "Subscription registered"
        );
        Subscription {
            id,
            user_id,
            registry: Arc::downgrade(&self.registry),
            active: AtomicBool::new(true),
        }
    }

    /// Deliver `event` to every subscription of every user in `targets`.
    ///
    /// Duplicate ids in `targets` are delivered once. All callbacks have run
    /// when this returns. A failing or panicking subscriber is counted and
    /// logged; it never stops delivery to the others.
    pub fn publish(&self, targets: &[Uuid], event: ConversationEvent) -> PublishReport {
        let event = Arc::new(event);
        let mut report = PublishReport::default();
        let mut seen = HashSet::with_capacity(targets.len());

        let subscribers = self.registry.read();
        for user_id in targets {
            if !seen.insert(*user_id) {
                continue;
            }
            if let Some(entries) = subscribers.get(user_id) {
                for entry in entries {
                    deliver(entry, *user_id, &event, &mut report);
                }
            }
        }
        drop(subscribers);

        tracing::debug!(
            subsystem = "bus",
            component = "event_bus",
            op = "publish",
            event_type = event.event_type(),
            conversation_id = ?event.conversation_id(),
            target_count = seen.len(),
            delivered = report.delivered,
            failed = report.failed,
            "EventBus publish"
        );
        report
    }

    /// Deliver `event` to every subscription whose user satisfies `filter`.
    pub fn broadcast<F>(&self, event: ConversationEvent, filter: F) -> PublishReport
    where
        F: Fn(Uuid) -> bool,
    {
        let event = Arc::new(event);
        let mut report = PublishReport::default();

        let subscribers = self.registry.read();
        for (user_id, entries) in subscribers.iter() {
            if !filter(*user_id) {
                continue;
            }
            for entry in entries {
                deliver(entry, *user_id, &event, &mut report);
            }
        }
        drop(subscribers);

        tracing::debug!(
            subsystem = "bus",
            component = "event_bus",
            op = "broadcast",
            event_type = event.event_type(),
            delivered = report.delivered,
            failed = report.failed,
            "EventBus broadcast"
        );
        report
    }

    /// Total number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.registry.read().values().map(Vec::len).sum()
    }

    /// Number of live subscriptions for one user.
    pub fn subscriber_count_for(&self, user_id: Uuid) -> usize {
        self.registry.read().get(&user_id).map_or(0, Vec::len)
    }
}

fn deliver(
    entry: &Entry,
    user_id: Uuid,
    event: &Arc<ConversationEvent>,
    report: &mut PublishReport,
) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| (entry.callback)(event)));
    match outcome {
        Ok(Ok(())) => report.delivered += 1,
        Ok(Err(DeliveryError::Closed)) => {
            report.failed += 1;
            tracing::debug!(
                subsystem = "bus",
                user_id = %user_id,
                subscription_id = %entry.id,
                "Subscriber closed, event skipped"
            );
        }
        Ok(Err(err)) => {
            report.failed += 1;
            tracing::warn!(
                subsystem = "bus",
                user_id = %user_id,
                subscription_id = %entry.id,
                event_type = event.event_type(),
                error = %err,
                "Subscriber rejected event"
            );
        }
        Err(_) => {
            report.failed += 1;
            tracing::warn!(
                subsystem = "bus",
                user_id = %user_id,
                subscription_id = %entry.id,
                event_type = event.event_type(),
                "Subscriber panicked during delivery"
            );
        }
    }
}

/// Handle for one bus registration.
///
/// Unsubscribing is idempotent and also happens on drop. The handle does not
/// keep the bus alive.
pub struct Subscription {
    id: SubscriptionId,
    user_id: Uuid,
    registry: Weak<Registry>,
    active: AtomicBool,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Remove this registration. Returns `true` only for the call that
    /// actually removed it.
    pub fn unsubscribe(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        let removed = self
            .registry
            .upgrade()
            .is_some_and(|registry| registry.remove(self.user_id, self.id));
        tracing::debug!(
            subsystem = "bus",
            component = "event_bus",
            op = "unsubscribe",
            user_id = %self.user_id,
            subscription_id = %self.id,
            removed,
            "Subscription removed"
        );
        true
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("active", &self.is_active())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
