//! Domain models for conversations, participants, messages, and read receipts.
//!
//! These are owned by the conversation store; the real-time core only reads
//! membership from them and writes read state back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A conversation and its current participant set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub participants: Vec<Participant>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// User ids of every participant, in join order.
    pub fn participant_ids(&self) -> Vec<Uuid> {
        self.participants.iter().map(|p| p.user_id).collect()
    }

    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }
}

/// Membership of one user in one conversation.
///
/// At most one row exists per `(conversation_id, user_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
    /// Watermark: everything up to this instant has been read.
    pub last_read_at: Option<DateTime<Utc>>,
}

/// Listing row for a user's conversations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub participant_ids: Vec<Uuid>,
    pub updated_at: DateTime<Utc>,
    /// The caller's own watermark.
    pub last_read_at: Option<DateTime<Utc>>,
    /// Messages from other participants newer than the caller's watermark.
    pub unread_count: i64,
}

/// An immutable chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A search hit, shaped like the search endpoint's item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHit {
    pub id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for MessageHit {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            content: m.content,
            created_at: m.created_at,
        }
    }
}

/// "User has read message" fact. Unique per `(message_id, user_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub id: Uuid,
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub read_at: DateTime<Utc>,
}

/// Request for creating a conversation.
#[derive(Debug, Clone)]
pub struct CreateConversationRequest {
    pub creator_id: Uuid,
    /// Other participants. The creator is added even if absent; duplicates collapse.
    pub participant_ids: Vec<Uuid>,
    pub title: Option<String>,
}

impl CreateConversationRequest {
    /// Creator first, then the requested participants in order, deduplicated.
    pub fn member_ids(&self) -> Vec<Uuid> {
        let mut ids = vec![self.creator_id];
        for id in &self.participant_ids {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        ids
    }
}
