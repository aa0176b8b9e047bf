//! Delivery of push events to the UI channel.

use tokio::sync::mpsc;
use tracing::trace;

use devterm_core::SessionEvent;

/// Destination for session output and exit events.
///
/// `emit` is called from forwarding tasks and must not block.
pub trait EventSink: Send + Sync + 'static {
    /// Deliver one event.
    fn emit(&self, event: SessionEvent);
}

impl EventSink for mpsc::UnboundedSender<SessionEvent> {
    fn emit(&self, event: SessionEvent) {
        if self.send(event).is_err() {
            trace!("Event receiver dropped, discarding event");
        }
    }
}
