//! Participant authorization gate.

use std::sync::Arc;

use uuid::Uuid;

use parley_core::{ConversationRepository, Error, Result};

/// Decides conversation membership against the store.
///
/// A conversation that does not exist is reported exactly like one the
/// caller is not a member of, so conversation ids cannot be probed.
#[derive(Clone)]
pub struct ParticipantGate {
    repo: Arc<dyn ConversationRepository>,
}

impl ParticipantGate {
    pub fn new(repo: Arc<dyn ConversationRepository>) -> Self {
        Self { repo }
    }

    pub async fn is_member(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.repo.is_member(conversation_id, user_id).await
    }

    /// `Error::Forbidden` unless `user_id` is a participant.
    pub async fn require_member(&self, conversation_id: Uuid, user_id: Uuid) -> Result<()> {
        if self.is_member(conversation_id, user_id).await? {
            Ok(())
        } else {
            tracing::debug!(
                subsystem = "api",
                component = "gate",
                conversation_id = %conversation_id,
                user_id = %user_id,
                "Rejected non-participant"
            );
            Err(Error::not_a_participant(conversation_id))
        }
    }

    /// The participant set as it is now. Never cached: a participant added
    /// concurrently with a write is still reached.
    pub async fn fanout_targets(&self, conversation_id: Uuid) -> Result<Vec<Uuid>> {
        self.repo.participant_ids(conversation_id).await
    }
}
