//! Service layer: authorization gate and the conversation write paths.
//!
//! Every write path follows the same order: gate, durable write, then
//! [`fan_out`] to the participant set loaded after the write committed.

pub mod conversations;
pub mod gate;
pub mod read_state;

pub use conversations::ConversationService;
pub use gate::ParticipantGate;
pub use read_state::ReadStateSynchronizer;

use tracing::{debug, warn};
use uuid::Uuid;

use parley_core::{ConversationEvent, EventBus, PublishReport};

/// Publish `event` to the conversation's current participants, plus any
/// `extra` recipients (a user who just left, for instance).
///
/// Runs after the durable write has committed. If the participant set cannot
/// be loaded the event is dropped and logged; the write still stands.
pub(crate) async fn fan_out(
    gate: &ParticipantGate,
    bus: &EventBus,
    event: ConversationEvent,
    extra: &[Uuid],
) -> PublishReport {
    let event_type = event.event_type();
    let conversation_id = match event.conversation_id() {
        Some(id) => id,
        None => return PublishReport::default(),
    };

    let mut targets = match gate.fanout_targets(conversation_id).await {
        Ok(targets) => targets,
        Err(e) => {
            warn!(
                subsystem = "api",
                component = "fanout",
                conversation_id = %conversation_id,
                event_type,
                error = %e,
                "Failed to load participants; event not published"
            );
            return PublishReport::default();
        }
    };
    targets.extend_from_slice(extra);

    let report = bus.publish(&targets, event);
    debug!(
        subsystem = "api",
        component = "fanout",
        conversation_id = %conversation_id,
        event_type,
        target_count = targets.len(),
        delivered = report.delivered,
        failed = report.failed,
        "Event published"
    );
    report
}
