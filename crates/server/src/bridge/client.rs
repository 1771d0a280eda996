//! Per-client send channel.
//!
//! Each connection gets a bounded buffer. A full buffer means the client
//! stopped draining; the channel is closed and the client dropped, and the
//! client re-syncs with `subscribe_table` after reconnecting.

use tokio::sync::mpsc;

use crate::protocol::ServerMessage;

/// Outbound frames buffered per client before the connection is dropped.
pub const SEND_BUFFER: usize = 256;

#[derive(Clone)]
pub struct ClientHandle {
    pub user_id: i64,
    tx: mpsc::Sender<ServerMessage>,
}

impl ClientHandle {
    pub fn new(user_id: i64) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(SEND_BUFFER);
        (ClientHandle { user_id, tx }, rx)
    }

    /// Non-blocking send. Returns false when the buffer is full or the
    /// connection is gone; the caller must drop the client.
    pub fn send(&self, msg: ServerMessage) -> bool {
        self.tx.try_send(msg).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_buffer_reports_failure() {
        let (handle, mut rx) = ClientHandle::new(1);
        for _ in 0..SEND_BUFFER {
            assert!(handle.send(ServerMessage::Pong));
        }
        assert!(!handle.send(ServerMessage::Pong));

        rx.recv().await.unwrap();
        assert!(handle.send(ServerMessage::Pong));
    }

    #[tokio::test]
    async fn closed_receiver_reports_failure() {
        let (handle, rx) = ClientHandle::new(1);
        drop(rx);
        assert!(!handle.send(ServerMessage::Pong));
    }
}
