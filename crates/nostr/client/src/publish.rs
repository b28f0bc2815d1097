//! Publish acknowledgment tracking.

use crate::error::{ClientError, Result};
use crate::message::ClientMessage;
use crate::relay::RelayTransport;
use bookstr_core::Event;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Relay answer to a published event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishConfirmation {
    /// Event ID that was published
    pub event_id: String,
    /// Whether the relay accepted the event
    pub accepted: bool,
    /// Message from the relay (usually empty if accepted)
    pub message: String,
}

impl PublishConfirmation {
    /// Event id on acceptance, `PublishRejected` otherwise.
    pub fn into_result(self) -> Result<String> {
        if self.accepted {
            Ok(self.event_id)
        } else {
            Err(ClientError::PublishRejected {
                event_id: self.event_id,
                message: self.message,
            })
        }
    }
}

/// Removes the pending entry however the publish future ends.
struct PendingGuard<'a> {
    transport: &'a RelayTransport,
    event_id: &'a str,
    ticket: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.transport.cancel_publish(self.event_id, self.ticket);
    }
}

/// Send `["EVENT", event]` and wait up to `deadline` for the matching `OK`.
///
/// Acknowledgments for other ids never resolve this call.
pub(crate) async fn publish_on(
    transport: &RelayTransport,
    event: &Event,
    deadline: Duration,
) -> Result<PublishConfirmation> {
    let (ticket, rx) = transport.register_publish(&event.id)?;
    let _guard = PendingGuard {
        transport,
        event_id: &event.id,
        ticket,
    };

    transport.send(&ClientMessage::Event(event.clone()))?;
    debug!(relay = %transport.url(), event_id = %event.id, "event sent, awaiting OK");

    match timeout(deadline, rx).await {
        Ok(Ok(confirmation)) => Ok(confirmation),
        Ok(Err(_)) => Err(ClientError::Connection(format!(
            "connection closed before OK for event {}",
            event.id
        ))),
        Err(_) => Err(ClientError::Timeout(format!(
            "no OK for event {} within {:?}",
            event.id, deadline
        ))),
    }
}
