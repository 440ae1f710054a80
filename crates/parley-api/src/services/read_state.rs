//! Read-state synchronizer: read receipts, typing signals, and search.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use parley_core::{
    defaults, ConversationEvent, ConversationRepository, EventBus, MessageHit, ReadReceipt, Result,
};

use super::{fan_out, ParticipantGate};

#[derive(Clone)]
pub struct ReadStateSynchronizer {
    repo: Arc<dyn ConversationRepository>,
    bus: Arc<EventBus>,
    gate: ParticipantGate,
}

impl ReadStateSynchronizer {
    pub fn new(repo: Arc<dyn ConversationRepository>, bus: Arc<EventBus>) -> Self {
        Self {
            gate: ParticipantGate::new(Arc::clone(&repo)),
            repo,
            bus,
        }
    }

    /// Mark `message_id` read by `user_id` and move their watermark, then
    /// tell every participant.
    ///
    /// The receipt upsert and the watermark move are one atomic unit; the
    /// `read.updated` event is published only after it commits.
    pub async fn record_read(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
    ) -> Result<ReadReceipt> {
        self.gate.require_member(conversation_id, user_id).await?;

        let receipt = self
            .repo
            .record_read(conversation_id, message_id, user_id, Utc::now())
            .await?;

        info!(
            subsystem = "api",
            component = "read_state",
            op = "record_read",
            conversation_id = %conversation_id,
            message_id = %message_id,
            user_id = %user_id,
            "Read receipt recorded"
        );

        fan_out(
            &self.gate,
            &self.bus,
            ConversationEvent::read_updated(conversation_id, message_id, user_id),
            &[],
        )
        .await;
        Ok(receipt)
    }

    /// Broadcast a typing signal. Touches no durable state.
    pub async fn notify_typing(&self, conversation_id: Uuid, user_id: Uuid) -> Result<()> {
        self.gate.require_member(conversation_id, user_id).await?;
        fan_out(
            &self.gate,
            &self.bus,
            ConversationEvent::typing(conversation_id, user_id),
            &[],
        )
        .await;
        Ok(())
    }

    /// Case-insensitive substring search, newest first, capped at
    /// [`defaults::SEARCH_RESULT_LIMIT`]. A blank query returns nothing
    /// without reaching the store or the gate.
    pub async fn search(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        query: &str,
    ) -> Result<Vec<MessageHit>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        self.gate.require_member(conversation_id, user_id).await?;
        self.repo
            .search_messages(conversation_id, query, defaults::SEARCH_RESULT_LIMIT)
            .await
    }
}
