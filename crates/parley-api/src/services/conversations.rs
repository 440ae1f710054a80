//! Conversation write paths: create, rename, membership, and messages.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use parley_core::{
    defaults, Conversation, ConversationEvent, ConversationRepository, ConversationSummary,
    CreateConversationRequest, Error, EventBus, Message, ReadReceipt, Result,
};

use super::{fan_out, ParticipantGate};

#[derive(Clone)]
pub struct ConversationService {
    repo: Arc<dyn ConversationRepository>,
    bus: Arc<EventBus>,
    gate: ParticipantGate,
}

fn normalize_title(title: Option<String>) -> Option<String> {
    title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

impl ConversationService {
    pub fn new(repo: Arc<dyn ConversationRepository>, bus: Arc<EventBus>) -> Self {
        Self {
            gate: ParticipantGate::new(Arc::clone(&repo)),
            repo,
            bus,
        }
    }

    /// Create a conversation; the creator is always a participant.
    pub async fn create_conversation(
        &self,
        creator_id: Uuid,
        participant_ids: Vec<Uuid>,
        title: Option<String>,
    ) -> Result<Conversation> {
        let conversation = self
            .repo
            .create_conversation(CreateConversationRequest {
                creator_id,
                participant_ids,
                title: normalize_title(title),
            })
            .await?;

        info!(
            subsystem = "api",
            component = "conversations",
            op = "create",
            conversation_id = %conversation.id,
            user_id = %creator_id,
            target_count = conversation.participants.len(),
            "Conversation created"
        );

        fan_out(
            &self.gate,
            &self.bus,
            ConversationEvent::conversation_created(&conversation, creator_id),
            &[],
        )
        .await;
        Ok(conversation)
    }

    pub async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>> {
        self.repo.list_for_user(user_id).await
    }

    pub async fn get_conversation(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Conversation> {
        self.gate.require_member(conversation_id, user_id).await?;
        self.load(conversation_id).await
    }

    /// Rename (or clear the title of) a conversation.
    pub async fn update_conversation(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        title: Option<String>,
    ) -> Result<Conversation> {
        self.gate.require_member(conversation_id, user_id).await?;
        self.repo
            .update_title(conversation_id, normalize_title(title))
            .await?;
        let conversation = self.load(conversation_id).await?;

        fan_out(
            &self.gate,
            &self.bus,
            ConversationEvent::conversation_updated(&conversation, user_id),
            &[],
        )
        .await;
        Ok(conversation)
    }

    /// Add `new_user_id`. Adding an existing participant is a no-op and
    /// publishes nothing.
    pub async fn add_participant(
        &self,
        conversation_id: Uuid,
        actor_id: Uuid,
        new_user_id: Uuid,
    ) -> Result<Conversation> {
        self.gate.require_member(conversation_id, actor_id).await?;
        let added = self
            .repo
            .add_participant(conversation_id, new_user_id)
            .await?;
        let conversation = self.load(conversation_id).await?;

        if added {
            info!(
                subsystem = "api",
                component = "conversations",
                op = "add_participant",
                conversation_id = %conversation_id,
                user_id = %new_user_id,
                "Participant added"
            );
            fan_out(
                &self.gate,
                &self.bus,
                ConversationEvent::conversation_updated(&conversation, actor_id),
                &[],
            )
            .await;
        }
        Ok(conversation)
    }

    /// Remove the caller from the conversation. The remaining participants
    /// and the leaver are both notified.
    pub async fn leave_conversation(&self, conversation_id: Uuid, user_id: Uuid) -> Result<()> {
        self.gate.require_member(conversation_id, user_id).await?;
        let removed = self
            .repo
            .remove_participant(conversation_id, user_id)
            .await?;
        // A concurrent leave from another device already published.
        if !removed {
            return Ok(());
        }
        let conversation = self.load(conversation_id).await?;

        info!(
            subsystem = "api",
            component = "conversations",
            op = "leave",
            conversation_id = %conversation_id,
            user_id = %user_id,
            "Participant left"
        );

        fan_out(
            &self.gate,
            &self.bus,
            ConversationEvent::conversation_updated(&conversation, user_id),
            &[user_id],
        )
        .await;
        Ok(())
    }

    /// Append a message. Blank content is rejected before the gate runs.
    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> Result<Message> {
        if content.trim().is_empty() {
            return Err(Error::InvalidInput("content must not be empty".to_string()));
        }
        if content.chars().count() > defaults::MAX_MESSAGE_LEN {
            return Err(Error::InvalidInput(format!(
                "content exceeds {} characters",
                defaults::MAX_MESSAGE_LEN
            )));
        }

        self.gate.require_member(conversation_id, sender_id).await?;
        let message = self
            .repo
            .insert_message(conversation_id, sender_id, content)
            .await?;

        fan_out(
            &self.gate,
            &self.bus,
            ConversationEvent::message_created(&message),
            &[],
        )
        .await;
        Ok(message)
    }

    /// Messages newest first. `limit` defaults to 50 and is clamped to 1..=200.
    pub async fn list_messages(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: Option<i64>,
    ) -> Result<Vec<Message>> {
        self.gate.require_member(conversation_id, user_id).await?;
        self.repo
            .list_messages(conversation_id, before, defaults::clamp_page_size(limit))
            .await
    }

    pub async fn list_read_receipts(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<ReadReceipt>> {
        self.gate.require_member(conversation_id, user_id).await?;
        match self.repo.get_message(message_id).await? {
            Some(message) if message.conversation_id == conversation_id => {
                self.repo.read_receipts(message_id).await
            }
            _ => Err(Error::NotFound(format!(
                "message {} in conversation {}",
                message_id, conversation_id
            ))),
        }
    }

    async fn load(&self, conversation_id: Uuid) -> Result<Conversation> {
        self.repo
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conversation {}", conversation_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::Recorder;
    use parley_db::MemoryConversationRepository;

    fn service() -> (Arc<MemoryConversationRepository>, Arc<EventBus>, ConversationService) {
        let repo = Arc::new(MemoryConversationRepository::new());
        let bus = Arc::new(EventBus::new());
        let service = ConversationService::new(repo.clone(), bus.clone());
        (repo, bus, service)
    }

    #[tokio::test]
    async fn test_create_publishes_to_every_participant() {
        let (_repo, bus, service) = service();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let ra = Recorder::attach(&bus, a);
        let rb = Recorder::attach(&bus, b);

        let conversation = service
            .create_conversation(a, vec![b, b], Some("  Brake job  ".to_string()))
            .await
            .unwrap();
        assert_eq!(conversation.title.as_deref(), Some("Brake job"));
        assert_eq!(conversation.participant_ids(), vec![a, b]);
        assert_eq!(ra.types(), vec!["conversation.created"]);
        assert_eq!(rb.types(), vec!["conversation.created"]);
    }

    #[tokio::test]
    async fn test_send_message_scenario_no_replay() {
        let (_repo, bus, service) = service();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = service.create_conversation(a, vec![b], None).await.unwrap();

        let ra = Recorder::attach(&bus, a);
        service
            .send_message(conversation.id, a, "first")
            .await
            .unwrap();
        assert_eq!(ra.len(), 1);

        let rb = Recorder::attach(&bus, b);
        let second = service
            .send_message(conversation.id, a, "second")
            .await
            .unwrap();

        let events = rb.events.lock().unwrap().clone();
        assert_eq!(events, vec![ConversationEvent::message_created(&second)]);
    }

    #[tokio::test]
    async fn test_send_message_validation_and_gate() {
        let (repo, bus, service) = service();
        let a = Uuid::new_v4();
        let conversation = service.create_conversation(a, vec![], None).await.unwrap();
        let ra = Recorder::attach(&bus, a);

        let err = service.send_message(conversation.id, a, "  ").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let long = "x".repeat(defaults::MAX_MESSAGE_LEN + 1);
        let err = service.send_message(conversation.id, a, &long).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let err = service
            .send_message(conversation.id, Uuid::new_v4(), "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        assert!(repo
            .list_messages(conversation.id, None, 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(ra.len(), 0);
    }

    #[tokio::test]
    async fn test_failed_insert_publishes_nothing() {
        let (repo, bus, service) = service();
        let a = Uuid::new_v4();
        let conversation = service.create_conversation(a, vec![], None).await.unwrap();
        let ra = Recorder::attach(&bus, a);

        repo.set_fail_writes(true);
        let err = service
            .send_message(conversation.id, a, "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(ra.len(), 0);
    }

    #[tokio::test]
    async fn test_add_participant_is_idempotent() {
        let (_repo, bus, service) = service();
        let (a, c) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = service.create_conversation(a, vec![], None).await.unwrap();
        let rc = Recorder::attach(&bus, c);

        let updated = service.add_participant(conversation.id, a, c).await.unwrap();
        assert_eq!(updated.participant_ids(), vec![a, c]);
        assert_eq!(rc.types(), vec!["conversation.updated"]);

        let again = service.add_participant(conversation.id, a, c).await.unwrap();
        assert_eq!(again.participant_ids(), vec![a, c]);
        assert_eq!(rc.len(), 1);
    }

    #[tokio::test]
    async fn test_leave_notifies_remaining_and_leaver() {
        let (_repo, bus, service) = service();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = service.create_conversation(a, vec![b], None).await.unwrap();
        let ra = Recorder::attach(&bus, a);
        let rb = Recorder::attach(&bus, b);

        service.leave_conversation(conversation.id, b).await.unwrap();
        assert_eq!(ra.types(), vec!["conversation.updated"]);
        assert_eq!(rb.types(), vec!["conversation.updated"]);

        // b no longer receives anything from the conversation.
        service.send_message(conversation.id, a, "still here?").await.unwrap();
        assert_eq!(ra.len(), 2);
        assert_eq!(rb.len(), 1);

        let err = service.get_conversation(conversation.id, b).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_update_conversation_title() {
        let (_repo, bus, service) = service();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = service.create_conversation(a, vec![b], None).await.unwrap();
        let rb = Recorder::attach(&bus, b);

        let updated = service
            .update_conversation(conversation.id, a, Some("Order #1042".to_string()))
            .await
            .unwrap();
        assert_eq!(updated.title.as_deref(), Some("Order #1042"));
        assert!(updated.updated_at >= conversation.updated_at);

        let cleared = service
            .update_conversation(conversation.id, a, Some("   ".to_string()))
            .await
            .unwrap();
        assert!(cleared.title.is_none());
        assert_eq!(rb.types(), vec!["conversation.updated", "conversation.updated"]);
    }

    #[tokio::test]
    async fn test_read_receipts_scoped_to_conversation() {
        let (_repo, _bus, service) = service();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mine = service.create_conversation(a, vec![b], None).await.unwrap();
        let other = service.create_conversation(a, vec![], None).await.unwrap();
        let foreign = service.send_message(other.id, a, "elsewhere").await.unwrap();

        let err = service
            .list_read_receipts(mine.id, foreign.id, b)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let message = service.send_message(mine.id, a, "here").await.unwrap();
        assert!(service
            .list_read_receipts(mine.id, message.id, b)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_list_conversations_only_includes_membership() {
        let (_repo, _bus, service) = service();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        service.create_conversation(a, vec![b], None).await.unwrap();
        service.create_conversation(a, vec![], None).await.unwrap();

        assert_eq!(service.list_conversations(a).await.unwrap().len(), 2);
        assert_eq!(service.list_conversations(b).await.unwrap().len(), 1);
        assert!(service
            .list_conversations(Uuid::new_v4())
            .await
            .unwrap()
            .is_empty());
    }

    /// Store where another device's leave lands between the gate check and
    /// this caller's removal.
    struct ConcurrentLeave {
        inner: Arc<MemoryConversationRepository>,
    }

    #[axum::async_trait]
    impl ConversationRepository for ConcurrentLeave {
        async fn is_member(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
            self.inner.is_member(conversation_id, user_id).await
        }

        async fn participant_ids(&self, conversation_id: Uuid) -> Result<Vec<Uuid>> {
            self.inner.participant_ids(conversation_id).await
        }

        async fn participant(
            &self,
            conversation_id: Uuid,
            user_id: Uuid,
        ) -> Result<Option<parley_core::Participant>> {
            self.inner.participant(conversation_id, user_id).await
        }

        async fn record_read(
            &self,
            conversation_id: Uuid,
            message_id: Uuid,
            user_id: Uuid,
            read_at: DateTime<Utc>,
        ) -> Result<ReadReceipt> {
            self.inner
                .record_read(conversation_id, message_id, user_id, read_at)
                .await
        }

        async fn read_receipts(&self, message_id: Uuid) -> Result<Vec<ReadReceipt>> {
            self.inner.read_receipts(message_id).await
        }

        async fn search_messages(
            &self,
            conversation_id: Uuid,
            query: &str,
            limit: i64,
        ) -> Result<Vec<parley_core::MessageHit>> {
            self.inner.search_messages(conversation_id, query, limit).await
        }

        async fn create_conversation(&self, req: CreateConversationRequest) -> Result<Conversation> {
            self.inner.create_conversation(req).await
        }

        async fn get_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
            self.inner.get_conversation(conversation_id).await
        }

        async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>> {
            self.inner.list_for_user(user_id).await
        }

        async fn update_title(&self, conversation_id: Uuid, title: Option<String>) -> Result<()> {
            self.inner.update_title(conversation_id, title).await
        }

        async fn add_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
            self.inner.add_participant(conversation_id, user_id).await
        }

        async fn remove_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
            self.inner.remove_participant(conversation_id, user_id).await?;
            self.inner.remove_participant(conversation_id, user_id).await
        }

        async fn insert_message(
            &self,
            conversation_id: Uuid,
            sender_id: Uuid,
            content: &str,
        ) -> Result<Message> {
            self.inner
                .insert_message(conversation_id, sender_id, content)
                .await
        }

        async fn get_message(&self, message_id: Uuid) -> Result<Option<Message>> {
            self.inner.get_message(message_id).await
        }

        async fn list_messages(
            &self,
            conversation_id: Uuid,
            before: Option<DateTime<Utc>>,
            limit: i64,
        ) -> Result<Vec<Message>> {
            self.inner.list_messages(conversation_id, before, limit).await
        }
    }

    #[tokio::test]
    async fn test_leave_that_removes_nothing_publishes_nothing() {
        let inner = Arc::new(MemoryConversationRepository::new());
        let bus = Arc::new(EventBus::new());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = ConversationService::new(inner.clone(), bus.clone())
            .create_conversation(a, vec![b], None)
            .await
            .unwrap();
        let ra = Recorder::attach(&bus, a);
        let rb = Recorder::attach(&bus, b);

        let racing = ConversationService::new(Arc::new(ConcurrentLeave { inner: inner.clone() }), bus.clone());
        racing.leave_conversation(conversation.id, b).await.unwrap();

        assert_eq!(ra.len(), 0);
        assert_eq!(rb.len(), 0);
        assert!(!inner.is_member(conversation.id, b).await.unwrap());
    }
}
