//! # parley-api
//!
//! HTTP API and real-time event stream for parley conversations.
//!
//! - [`stream`]: the streaming connection adapter behind `GET /api/v1/stream`
//! - [`services`]: the participant gate, read-state synchronizer, and
//!   conversation write paths that publish onto the event bus
//! - [`routes`]: the axum router and middleware stack

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod services;
pub mod state;
pub mod stream;

pub use config::{ServerConfig, StoreKind};
pub use error::ApiError;
pub use routes::build_router;
pub use state::AppState;
pub use stream::{EventStream, StreamConfig};
