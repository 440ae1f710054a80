//! Bearer token store backing [`IdentityResolver`].
//!
//! Tokens are issued elsewhere; only their SHA-256 digest is stored here.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use parley_core::{Error, IdentityResolver, Result};

/// Prefix of tokens minted by [`PgSessionRepository::issue`].
pub const TOKEN_PREFIX: &str = "pt_";

/// Hex-encoded SHA-256 digest of a token, as stored in `session_token`.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// PostgreSQL session token repository.
#[derive(Clone)]
pub struct PgSessionRepository {
    pool: Pool<Postgres>,
}

impl PgSessionRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Mint and store a token for `user_id`. `ttl = None` never expires.
    pub async fn issue(&self, user_id: Uuid, ttl: Option<Duration>) -> Result<String> {
        let secret: [u8; 32] = rand::thread_rng().gen();
        let token = format!("{}{}", TOKEN_PREFIX, hex::encode(secret));
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO session_token (token_hash, user_id, created_at, expires_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(hash_token(&token))
        .bind(user_id)
        .bind(now)
        .bind(ttl.map(|ttl| now + ttl))
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(token)
    }

    /// Delete a token. Returns `false` if it did not exist.
    pub async fn revoke(&self, token: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM session_token WHERE token_hash = $1")
            .bind(hash_token(token))
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl IdentityResolver for PgSessionRepository {
    async fn resolve(&self, token: &str) -> Result<Option<Uuid>> {
        if !token.starts_with(TOKEN_PREFIX) {
            return Ok(None);
        }
        let user_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM session_token
             WHERE token_hash = $1 AND (expires_at IS NULL OR expires_at > NOW())",
        )
        .bind(hash_token(token))
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(user_id)
    }
}
