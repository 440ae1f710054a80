//! # parley-db
//!
//! PostgreSQL conversation store for parley.
//!
//! This crate provides:
//! - Connection pool management
//! - [`PgConversationRepository`], the durable conversation/message/read-state store
//! - [`PgSessionRepository`], the bearer token lookup behind `IdentityResolver`
//! - In-memory equivalents for tests and local development
//!
//! ## Example
//!
//! ```rust,ignore
//! use parley_db::{ConversationRepository, CreateConversationRequest, Database};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/parley").await?;
//!
//!     let conversation = db.conversations.create_conversation(CreateConversationRequest {
//!         creator_id: uuid::Uuid::new_v4(),
//!         participant_ids: vec![],
//!         title: Some("Order #1042".to_string()),
//!     }).await?;
//!
//!     println!("Created conversation: {}", conversation.id);
//!     Ok(())
//! }
//! ```
pub mod conversations;
pub mod memory;
pub mod pool;
pub mod sessions;

// Test fixtures for integration tests
pub mod test_fixtures;

// Re-export core types
pub use parley_core::*;

pub use conversations::PgConversationRepository;
pub use memory::{MemoryConversationRepository, StaticIdentityResolver};
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use sessions::{hash_token, PgSessionRepository};

/// Escape LIKE/ILIKE wildcard characters (`%`, `_`, `\`) in user input.
pub fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Conversations, participants, messages, and read state.
    pub conversations: PgConversationRepository,
    /// Bearer token store.
    pub sessions: PgSessionRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            conversations: PgConversationRepository::new(pool.clone()),
            sessions: PgSessionRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
