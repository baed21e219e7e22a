// Fan-out dispatcher: best-effort pushes layered on top of the durable
// write. The persisted row is the source of truth; none of these pushes is
// retried.

use innosphere_common::protocol::ws::OutboundEvent;

use crate::{metrics, registry::ConnectionRegistry, store::StoredMessage};

/// Which of the three pushes were accepted by a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanoutOutcome {
    /// `notification_update` signal to the receiver.
    pub notification_pushed: bool,
    /// Full payload to the receiver.
    pub receiver_pushed: bool,
    /// Acknowledgment echo to the sender.
    pub sender_echoed: bool,
}

/// Push a persisted message to its receiver (notification signal first, then
/// the payload) and echo the same payload back to the sender.
///
/// The receiver-side pushes silently no-op when the receiver is offline. The
/// sender echo normally succeeds since the sender is mid-send on a registered
/// connection; it only fails on a race with the sender's own disconnect.
pub async fn dispatch(
    registry: &ConnectionRegistry,
    message: &StoredMessage,
    sender_name: &str,
    temp_id: Option<String>,
) -> FanoutOutcome {
    let payload = OutboundEvent::NewMessage {
        id: message.id,
        sender_id: message.sender_id,
        receiver_id: message.receiver_id,
        content: message.content.clone(),
        timestamp: message.timestamp.to_rfc3339(),
        sender_name: sender_name.to_string(),
        temp_id,
    };

    let notification_pushed = registry
        .send(message.receiver_id, OutboundEvent::NotificationUpdate {})
        .await;
    let receiver_pushed = registry.send(message.receiver_id, payload.clone()).await;
    let sender_echoed = registry.send(message.sender_id, payload).await;

    metrics::record_push(notification_pushed);
    metrics::record_push(receiver_pushed);
    metrics::record_push(sender_echoed);

    FanoutOutcome { notification_pushed, receiver_pushed, sender_echoed }
}
