//! Default values shared across crates.

use std::time::Duration;

/// Interval between `keepalive` frames on an idle stream.
pub const STREAM_KEEPALIVE: Duration = Duration::from_secs(30);

/// Per-connection event buffer. A connection that falls this far behind
/// drops further events until it catches up.
pub const STREAM_BUFFER: usize = 64;

/// Maximum number of hits returned by conversation search.
pub const SEARCH_RESULT_LIMIT: i64 = 50;

/// Default page size for message listing.
pub const MESSAGE_PAGE_SIZE: i64 = 50;

/// Upper bound for a caller-supplied message page size.
pub const MESSAGE_PAGE_SIZE_MAX: i64 = 200;

/// Maximum message body length, in characters.
pub const MAX_MESSAGE_LEN: usize = 10_000;

/// Clamp a requested page size into `1..=MESSAGE_PAGE_SIZE_MAX`.
pub fn clamp_page_size(limit: Option<i64>) -> i64 {
    limit
        .unwrap_or(MESSAGE_PAGE_SIZE)
        .clamp(1, MESSAGE_PAGE_SIZE_MAX)
}
