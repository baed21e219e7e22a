// WebSocket frame types for the chat relay.
//
// Inbound frames are plain objects (no type tag — the only thing a client can
// send is a message). Outbound events are tagged on `"type"` so the frontend
// can route them.

use serde::{Deserialize, Serialize};

use crate::types::{MessageId, UserId};

/// Client -> Server: one chat message.
///
/// `temp_id` is an opaque correlation token for the client's optimistic UI.
/// The server echoes it verbatim and never validates or stores it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboundFrame {
    pub receiver_id: Option<UserId>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub temp_id: Option<String>,
    #[serde(default)]
    pub attachment_url: Option<String>,
    #[serde(default)]
    pub attachment_type: Option<String>,
}

impl InboundFrame {
    /// A frame is deliverable when it names a receiver and carries either
    /// non-empty content or an attachment. Anything else is dropped silently.
    pub fn validate(&self) -> Option<ValidFrame> {
        let receiver_id = self.receiver_id?;
        let content = self.content.clone().unwrap_or_default();
        let attachment = match (&self.attachment_url, &self.attachment_type) {
            (Some(url), _) if !url.is_empty() => Some(Attachment {
                url: url.clone(),
                content_type: self.attachment_type.clone(),
            }),
            _ => None,
        };

        if content.is_empty() && attachment.is_none() {
            return None;
        }

        Some(ValidFrame { receiver_id, content, attachment, temp_id: self.temp_id.clone() })
    }
}

/// An inbound frame that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidFrame {
    pub receiver_id: UserId,
    pub content: String,
    pub attachment: Option<Attachment>,
    pub temp_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub content_type: Option<String>,
}

/// Server -> Client events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// Nudges the receiver to refetch its notification list.
    NotificationUpdate {},

    /// A newly persisted message, pushed to the receiver and echoed to the
    /// sender. `temp_id` is an explicit `null` when the client sent none.
    NewMessage {
        id: MessageId,
        sender_id: UserId,
        receiver_id: UserId,
        content: String,
        /// RFC 3339 persistence timestamp.
        timestamp: String,
        sender_name: String,
        temp_id: Option<String>,
    },
}

pub fn decode_frame(raw: &str) -> Result<InboundFrame, serde_json::Error> {
    serde_json::from_str::<InboundFrame>(raw)
}

pub fn encode_event(event: &OutboundEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}
