//! Structured logging schema and field name constants for parley.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by the same names across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue (subscriber failure, lagged stream) |
//! | INFO  | Lifecycle events (startup, shutdown, stream open/close) |
//! | DEBUG | Fan-out counts, decision points |
//! | TRACE | Per-frame data |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID propagated from the `x-request-id` header.
pub const REQUEST_ID: &str = "request_id";

/// Subsystem originating the log event.
/// Values: "api", "bus", "stream", "db"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "event_bus", "read_state", "gate", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "publish", "record_read", "notify_typing", "teardown"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Conversation UUID being operated on.
pub const CONVERSATION_ID: &str = "conversation_id";

/// Message UUID being operated on.
pub const MESSAGE_ID: &str = "message_id";

/// Acting or subscribed user.
pub const USER_ID: &str = "user_id";

/// Bus subscription handle.
pub const SUBSCRIPTION_ID: &str = "subscription_id";

/// Wire name of an event (`"message.created"`, ...).
pub const EVENT_TYPE: &str = "event_type";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of results returned by a search or query.
pub const RESULT_COUNT: &str = "result_count";

/// Number of users an event was addressed to.
pub const TARGET_COUNT: &str = "target_count";

/// Number of subscriber callbacks that accepted an event.
pub const DELIVERED: &str = "delivered";

/// Number of subscriber callbacks that failed for an event.
pub const FAILED: &str = "failed";

/// Open streaming connections after a lifecycle change.
pub const ACTIVE_STREAMS: &str = "active_streams";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_field_names_are_distinct_identifiers() {
        let fields = [
            REQUEST_ID,
            SUBSYSTEM,
            COMPONENT,
            OPERATION,
            CONVERSATION_ID,
            MESSAGE_ID,
            USER_ID,
            SUBSCRIPTION_ID,
            EVENT_TYPE,
            DURATION_MS,
            RESULT_COUNT,
            TARGET_COUNT,
            DELIVERED,
            FAILED,
            ACTIVE_STREAMS,
            POOL_SIZE,
            POOL_IDLE,
            ERROR_MSG,
        ];
        let unique: HashSet<_> = fields.iter().collect();
        assert_eq!(unique.len(), fields.len());
        for field in fields {
            assert!(field
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
