//! Core traits for parley's external collaborators.
//!
//! The conversation store and the identity provider live outside the
//! real-time core; these traits are the seams the API layer is written
//! against, with PostgreSQL and in-memory implementations in `parley-db`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// CONVERSATION REPOSITORY
// =============================================================================

/// Durable store for conversations, participants, messages, and read state.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Whether `user_id` currently has a Participant row in the conversation.
    /// A missing conversation is simply "not a member".
    async fn is_member(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool>;

    /// Current participant user ids, ordered by join time.
    async fn participant_ids(&self, conversation_id: Uuid) -> Result<Vec<Uuid>>;

    /// A single participant row, if present.
    async fn participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Participant>>;

    /// Atomically upsert the (message, user) read receipt and move the
    /// participant's `last_read_at` watermark, both to `read_at`.
    ///
    /// Fails with `Error::NotFound` when the message is not part of the
    /// conversation; nothing is written in that case.
    async fn record_read(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        read_at: DateTime<Utc>,
    ) -> Result<ReadReceipt>;

    /// Receipts recorded for one message.
    async fn read_receipts(&self, message_id: Uuid) -> Result<Vec<ReadReceipt>>;

    /// Case-insensitive substring search over message content, newest first.
    async fn search_messages(
        &self,
        conversation_id: Uuid,
        query: &str,
        limit: i64,
    ) -> Result<Vec<MessageHit>>;

    /// Create a conversation with its initial participants.
    async fn create_conversation(&self, req: CreateConversationRequest) -> Result<Conversation>;

    async fn get_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>>;

    /// Conversations the user participates in, most recently updated first.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>>;

    /// Set or clear the title and bump `updated_at`.
    async fn update_title(&self, conversation_id: Uuid, title: Option<String>) -> Result<()>;

    /// Add a participant. Returns `false` if the user was already one.
    async fn add_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool>;

    /// Remove a participant. Returns `false` if the user was not one.
    async fn remove_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool>;

    /// Insert a message and bump the conversation's `updated_at` in one unit.
    async fn insert_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> Result<Message>;

    async fn get_message(&self, message_id: Uuid) -> Result<Option<Message>>;

    /// Messages newest first, optionally strictly older than `before`.
    async fn list_messages(
        &self,
        conversation_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Message>>;
}

// =============================================================================
// IDENTITY
// =============================================================================

/// Resolves a bearer token to a user identity.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// `Ok(None)` for unknown, expired, or malformed tokens.
    async fn resolve(&self, token: &str) -> Result<Option<Uuid>>;
}
