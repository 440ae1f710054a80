//! In-memory conversation store and static identity resolver.
//!
//! Used by the API's integration tests and by `STORE=memory` for local
//! development without PostgreSQL. Behaviour mirrors the PostgreSQL
//! repository: writes that touch two records apply both under one lock or
//! neither.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use parley_core::{
    Conversation, ConversationRepository, ConversationSummary, CreateConversationRequest, Error,
    IdentityResolver, Message, MessageHit, Participant, ReadReceipt, Result,
};

#[derive(Default)]
struct State {
    conversations: HashMap<Uuid, Conversation>,
    /// Insertion order is creation order.
    messages: Vec<Message>,
    receipts: HashMap<(Uuid, Uuid), ReadReceipt>,
}

/// In-memory implementation of [`ConversationRepository`].
#[derive(Default)]
pub struct MemoryConversationRepository {
    state: RwLock<State>,
    fail_writes: AtomicBool,
    search_calls: AtomicUsize,
}

impl MemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `Error::Internal` until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// How many times `search_messages` reached the store.
    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Internal("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationRepository for MemoryConversationRepository {
    async fn is_member(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state
            .conversations
            .get(&conversation_id)
            .is_some_and(|c| c.has_participant(user_id)))
    }

    async fn participant_ids(&self, conversation_id: Uuid) -> Result<Vec<Uuid>> {
        let state = self.state.read().await;
        Ok(state
            .conversations
            .get(&conversation_id)
            .map(Conversation::participant_ids)
            .unwrap_or_default())
    }

    async fn participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Participant>> {
        let state = self.state.read().await;
        Ok(state.conversations.get(&conversation_id).and_then(|c| {
            c.participants
                .iter()
                .find(|p| p.user_id == user_id)
                .cloned()
        }))
    }

    async fn record_read(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        read_at: DateTime<Utc>,
    ) -> Result<ReadReceipt> {
        self.check_writable()?;
        let mut state = self.state.write().await;

        let in_conversation = state
            .messages
            .iter()
            .any(|m| m.id == message_id && m.conversation_id == conversation_id);
        if !in_conversation {
            return Err(Error::NotFound(format!(
                "message {} in conversation {}",
                message_id, conversation_id
            )));
        }

        let participant = state
            .conversations
            .get_mut(&conversation_id)
            .and_then(|c| c.participants.iter_mut().find(|p| p.user_id == user_id))
            .ok_or_else(|| Error::not_a_participant(conversation_id))?;
        participant.last_read_at = Some(read_at);

        let receipt = state
            .receipts
            .entry((message_id, user_id))
            .and_modify(|r| r.read_at = read_at)
            .or_insert_with(|| ReadReceipt {
                id: Uuid::now_v7(),
                message_id,
                user_id,
                read_at,
            });
        Ok(receipt.clone())
    }

    async fn read_receipts(&self, message_id: Uuid) -> Result<Vec<ReadReceipt>> {
        let state = self.state.read().await;
        let mut receipts: Vec<_> = state
            .receipts
            .values()
            .filter(|r| r.message_id == message_id)
            .cloned()
            .collect();
        receipts.sort_by_key(|r| r.read_at);
        Ok(receipts)
    }

    async fn search_messages(
        &self,
        conversation_id: Uuid,
        query: &str,
        limit: i64,
    ) -> Result<Vec<MessageHit>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let needle = query.to_lowercase();
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .rev()
            .filter(|m| m.conversation_id == conversation_id)
            .filter(|m| m.content.to_lowercase().contains(&needle))
            .take(limit.max(0) as usize)
            .cloned()
            .map(MessageHit::from)
            .collect())
    }

    async fn create_conversation(&self, req: CreateConversationRequest) -> Result<Conversation> {
        self.check_writable()?;
        let id = Uuid::now_v7();
        let now = Utc::now();
        let conversation = Conversation {
            id,
            title: req.title.clone(),
            participants: req
                .member_ids()
                .into_iter()
                .map(|user_id| Participant {
                    conversation_id: id,
                    user_id,
                    joined_at: now,
                    last_read_at: None,
                })
                .collect(),
            created_at: now,
            updated_at: now,
        };
        self.state
            .write()
            .await
            .conversations
            .insert(id, conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        Ok(self
            .state
            .read()
            .await
            .conversations
            .get(&conversation_id)
            .cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>> {
        let state = self.state.read().await;
        let mut summaries: Vec<_> = state
            .conversations
            .values()
            .filter_map(|c| {
                let me = c.participants.iter().find(|p| p.user_id == user_id)?;
                let unread_count = state
                    .messages
                    .iter()
                    .filter(|m| m.conversation_id == c.id && m.sender_id != user_id)
                    .filter(|m| me.last_read_at.map_or(true, |seen| m.created_at > seen))
                    .count() as i64;
                Some(ConversationSummary {
                    id: c.id,
                    title: c.title.clone(),
                    participant_ids: c.participant_ids(),
                    updated_at: c.updated_at,
                    last_read_at: me.last_read_at,
                    unread_count,
                })
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn update_title(&self, conversation_id: Uuid, title: Option<String>) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let conversation = state
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| Error::NotFound(format!("conversation {}", conversation_id)))?;
        conversation.title = title;
        conversation.updated_at = Utc::now();
        Ok(())
    }

    async fn add_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let conversation = state
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| Error::NotFound(format!("conversation {}", conversation_id)))?;
        if conversation.has_participant(user_id) {
            return Ok(false);
        }
        let now = Utc::now();
        conversation.participants.push(Participant {
            conversation_id,
            user_id,
            joined_at: now,
            last_read_at: None,
        });
        conversation.updated_at = now;
        Ok(true)
    }

    async fn remove_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let Some(conversation) = state.conversations.get_mut(&conversation_id) else {
            return Ok(false);
        };
        let before = conversation.participants.len();
        conversation.participants.retain(|p| p.user_id != user_id);
        let removed = conversation.participants.len() != before;
        if removed {
            conversation.updated_at = Utc::now();
        }
        Ok(removed)
    }

    async fn insert_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> Result<Message> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let message = Message {
            id: Uuid::now_v7(),
            conversation_id,
            sender_id,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        let conversation = state
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| Error::NotFound(format!("conversation {}", conversation_id)))?;
        conversation.updated_at = message.created_at;
        state.messages.push(message.clone());
        Ok(message)
    }

    async fn get_message(&self, message_id: Uuid) -> Result<Option<Message>> {
        let state = self.state.read().await;
        Ok(state.messages.iter().find(|m| m.id == message_id).cloned())
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .rev()
            .filter(|m| m.conversation_id == conversation_id)
            .filter(|m| before.map_or(true, |b| m.created_at < b))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Fixed token → user map.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityResolver {
    tokens: HashMap<String, Uuid>,
}

impl StaticIdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, user_id: Uuid) -> Self {
        self.tokens.insert(token.into(), user_id);
        self
    }

    /// Parse `token=uuid` pairs separated by commas (the `STATIC_TOKENS` format).
    pub fn parse(raw: &str) -> Result<Self> {
        let mut resolver = Self::new();
        for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (token, user) = pair
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("expected token=uuid, got '{}'", pair)))?;
            let user_id = Uuid::parse_str(user.trim())
                .map_err(|e| Error::Config(format!("invalid user id '{}': {}", user, e)))?;
            resolver = resolver.with_token(token.trim(), user_id);
        }
        Ok(resolver)
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn resolve(&self, token: &str) -> Result<Option<Uuid>> {
        Ok(self.tokens.get(token).copied())
    }
}
