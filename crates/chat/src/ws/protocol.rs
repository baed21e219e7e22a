use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use innosphere_common::protocol::ws::{encode_event, OutboundEvent};

pub async fn send_event(socket: &mut WebSocket, event: &OutboundEvent) -> Result<(), ()> {
    let encoded = encode_event(event).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}

/// Close the socket with 1008 (policy violation), the status a client sees
/// when authentication fails.
pub async fn close_policy_violation(socket: &mut WebSocket, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: reason.into(),
        })))
        .await;
}
