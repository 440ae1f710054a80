//! # parley-core
//!
//! Core types, traits, and the in-process event bus for parley.
//!
//! This crate provides the domain models, the closed set of real-time
//! conversation events, the [`EventBus`] that fans them out to live
//! subscriptions, and the repository traits the other crates implement.

pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{
    ConversationEvent, DeliveryError, EventBus, PublishReport, Subscription, SubscriptionId,
};
pub use models::*;
pub use traits::*;
