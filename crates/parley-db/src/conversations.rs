//! PostgreSQL conversation repository.
//!
//! Multi-statement writes (read state, message insert, membership changes)
//! run inside a single transaction so callers observe both effects or
//! neither.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use parley_core::{
    Conversation, ConversationRepository, ConversationSummary, CreateConversationRequest, Error,
    Message, MessageHit, Participant, ReadReceipt, Result,
};

use crate::escape_like;

/// PostgreSQL implementation of [`ConversationRepository`].
#[derive(Clone)]
pub struct PgConversationRepository {
    pool: Pool<Postgres>,
}

impl PgConversationRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_participant(row: &PgRow) -> Participant {
        Participant {
            conversation_id: row.get("conversation_id"),
            user_id: row.get("user_id"),
            joined_at: row.get("joined_at"),
            last_read_at: row.get("last_read_at"),
        }
    }

    fn parse_message(row: &PgRow) -> Message {
        Message {
            id: row.get("id"),
            conversation_id: row.get("conversation_id"),
            sender_id: row.get("sender_id"),
            content: row.get("content"),
            created_at: row.get("created_at"),
        }
    }

    fn parse_receipt(row: &PgRow) -> ReadReceipt {
        ReadReceipt {
            id: row.get("id"),
            message_id: row.get("message_id"),
            user_id: row.get("user_id"),
            read_at: row.get("read_at"),
        }
    }

    async fn participants(&self, conversation_id: Uuid) -> Result<Vec<Participant>> {
        let rows = sqlx::query(
            "SELECT conversation_id, user_id, joined_at, last_read_at
             FROM conversation_participant
             WHERE conversation_id = $1
             ORDER BY joined_at, user_id",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_participant).collect())
    }
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn is_member(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                 SELECT 1 FROM conversation_participant
                 WHERE conversation_id = $1 AND user_id = $2
             )",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(exists)
    }

    async fn participant_ids(&self, conversation_id: Uuid) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM conversation_participant
             WHERE conversation_id = $1
             ORDER BY joined_at, user_id",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(ids)
    }

    async fn participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Participant>> {
        let row = sqlx::query(
            "SELECT conversation_id, user_id, joined_at, last_read_at
             FROM conversation_participant
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::parse_participant))
    }

    async fn record_read(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        read_at: DateTime<Utc>,
    ) -> Result<ReadReceipt> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let in_conversation: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM message WHERE id = $1 AND conversation_id = $2)",
        )
        .bind(message_id)
        .bind(conversation_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;
        if !in_conversation {
            return Err(Error::NotFound(format!(
                "message {} in conversation {}",
                message_id, conversation_id
            )));
        }

        let row = sqlx::query(
            "INSERT INTO read_receipt (id, message_id, user_id, read_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (message_id, user_id) DO UPDATE SET read_at = EXCLUDED.read_at
             RETURNING id, message_id, user_id, read_at",
        )
        .bind(Uuid::now_v7())
        .bind(message_id)
        .bind(user_id)
        .bind(read_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;
        let receipt = Self::parse_receipt(&row);

        let updated = sqlx::query(
            "UPDATE conversation_participant SET last_read_at = $1
             WHERE conversation_id = $2 AND user_id = $3",
        )
        .bind(read_at)
        .bind(conversation_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;
        if updated.rows_affected() == 0 {
            // Participant left between the gate check and this write.
            return Err(Error::not_a_participant(conversation_id));
        }

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "conversations",
            op = "record_read",
            conversation_id = %conversation_id,
            message_id = %message_id,
            user_id = %user_id,
            "Read state recorded"
        );
        Ok(receipt)
    }

    async fn read_receipts(&self, message_id: Uuid) -> Result<Vec<ReadReceipt>> {
        let rows = sqlx::query(
            "SELECT id, message_id, user_id, read_at FROM read_receipt
             WHERE message_id = $1
             ORDER BY read_at",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_receipt).collect())
    }

    async fn search_messages(
        &self,
        conversation_id: Uuid,
        query: &str,
        limit: i64,
    ) -> Result<Vec<MessageHit>> {
        let pattern = format!("%{}%", escape_like(query));
        let rows = sqlx::query(
            "SELECT id, content, created_at FROM message
             WHERE conversation_id = $1 AND content ILIKE $2 ESCAPE '\\'
             ORDER BY created_at DESC
             LIMIT $3",
        )
        .bind(conversation_id)
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .iter()
            .map(|row| MessageHit {
                id: row.get("id"),
                content: row.get("content"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn create_conversation(&self, req: CreateConversationRequest) -> Result<Conversation> {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let members = req.member_ids();

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        sqlx::query(
            "INSERT INTO conversation (id, title, created_at, updated_at)
             VALUES ($1, $2, $3, $3)",
        )
        .bind(id)
        .bind(&req.title)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        for user_id in &members {
            sqlx::query(
                "INSERT INTO conversation_participant (conversation_id, user_id, joined_at)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (conversation_id, user_id) DO NOTHING",
            )
            .bind(id)
            .bind(user_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }
        tx.commit().await.map_err(Error::Database)?;

        self.get_conversation(id)
            .await?
            .ok_or_else(|| Error::Internal(format!("conversation {} vanished after insert", id)))
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, title, created_at, updated_at FROM conversation WHERE id = $1",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let participants = self.participants(conversation_id).await?;
        Ok(Some(Conversation {
            id: row.get("id"),
            title: row.get("title"),
            participants,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }))
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>> {
        let rows = sqlx::query(
            "SELECT c.id, c.title, c.updated_at, p.last_read_at,
                    ARRAY(
                        SELECT cp.user_id FROM conversation_participant cp
                        WHERE cp.conversation_id = c.id
                        ORDER BY cp.joined_at, cp.user_id
                    ) AS participant_ids,
                    (
                        SELECT COUNT(*) FROM message m
                        WHERE m.conversation_id = c.id
                          AND m.sender_id <> $1
                          AND (p.last_read_at IS NULL OR m.created_at > p.last_read_at)
                    ) AS unread_count
             FROM conversation c
             JOIN conversation_participant p
               ON p.conversation_id = c.id AND p.user_id = $1
             ORDER BY c.updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .iter()
            .map(|row| ConversationSummary {
                id: row.get("id"),
                title: row.get("title"),
                participant_ids: row.get("participant_ids"),
                updated_at: row.get("updated_at"),
                last_read_at: row.get("last_read_at"),
                unread_count: row.get("unread_count"),
            })
            .collect())
    }

    async fn update_title(&self, conversation_id: Uuid, title: Option<String>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE conversation SET title = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(title)
        .bind(Utc::now())
        .bind(conversation_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("conversation {}", conversation_id)));
        }
        Ok(())
    }

    async fn add_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let inserted = sqlx::query(
            "INSERT INTO conversation_participant (conversation_id, user_id, joined_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (conversation_id, user_id) DO NOTHING",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?
        .rows_affected()
            == 1;

        if inserted {
            sqlx::query("UPDATE conversation SET updated_at = $1 WHERE id = $2")
                .bind(now)
                .bind(conversation_id)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;
        }
        tx.commit().await.map_err(Error::Database)?;
        Ok(inserted)
    }

    async fn remove_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let removed = sqlx::query(
            "DELETE FROM conversation_participant
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?
        .rows_affected()
            == 1;

        if removed {
            sqlx::query("UPDATE conversation SET updated_at = $1 WHERE id = $2")
                .bind(Utc::now())
                .bind(conversation_id)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;
        }
        tx.commit().await.map_err(Error::Database)?;
        Ok(removed)
    }

    async fn insert_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> Result<Message> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let row = sqlx::query(
            "INSERT INTO message (id, conversation_id, sender_id, content, created_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, conversation_id, sender_id, content, created_at",
        )
        .bind(Uuid::now_v7())
        .bind(conversation_id)
        .bind(sender_id)
        .bind(content)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;
        let message = Self::parse_message(&row);

        sqlx::query("UPDATE conversation SET updated_at = $1 WHERE id = $2")
            .bind(message.created_at)
            .bind(conversation_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(message)
    }

    async fn get_message(&self, message_id: Uuid) -> Result<Option<Message>> {
        let row = sqlx::query(
            "SELECT id, conversation_id, sender_id, content, created_at FROM message WHERE id = $1",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::parse_message))
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, sender_id, content, created_at FROM message
             WHERE conversation_id = $1
               AND ($2::timestamptz IS NULL OR created_at < $2)
             ORDER BY created_at DESC
             LIMIT $3",
        )
        .bind(conversation_id)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_message).collect())
    }
}
