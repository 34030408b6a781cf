//! Collaborators the gate uses to deliver a synthesized response.

use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::oneshot;

/// The channel was closed before the response could be delivered.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("proxy channel already closed")]
pub struct ChannelClosed;

/// The connection a request arrived on, used to answer it directly.
pub trait ProxyChannel: Send + Sync {
    /// Write a raw HTTP response.
    fn send(&self, raw_response: &[u8]) -> Result<(), ChannelClosed>;

    /// Close the channel. Closing twice is a no-op.
    fn close(&self);
}

/// Sink for responses the gate produced itself.
pub trait ResponseLog: Send + Sync {
    /// Attach a raw response to the request logged under `request_id`.
    fn log_response_by_id(&self, request_id: &str, raw_response: &[u8]);
}

/// A single-use channel that hands the raw response to an awaiting task.
pub struct ResponseSlot {
    sender: Mutex<Option<oneshot::Sender<Vec<u8>>>>,
}

impl ResponseSlot {
    /// Create a slot and the receiver the response will arrive on.
    pub fn new() -> (Self, oneshot::Receiver<Vec<u8>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            rx,
        )
    }
}

impl ProxyChannel for ResponseSlot {
    fn send(&self, raw_response: &[u8]) -> Result<(), ChannelClosed> {
        let mut sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = sender.take().ok_or(ChannelClosed)?;
        tx.send(raw_response.to_vec()).map_err(|_| ChannelClosed)
    }

    fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_slot_delivers_once() {
        let (slot, rx) = ResponseSlot::new();
        assert!(slot.send(b"HTTP/1.1 200 OK\r\n\r\n").is_ok());
        assert_eq!(slot.send(b"again"), Err(ChannelClosed));
        slot.close();

        let raw = rx.await.unwrap();
        assert_eq!(raw, b"HTTP/1.1 200 OK\r\n\r\n");
    }

    #[test]
    fn test_send_after_close_fails() {
        let (slot, _rx) = ResponseSlot::new();
        slot.close();
        slot.close();
        assert_eq!(slot.send(b"late"), Err(ChannelClosed));
    }

    #[test]
    fn test_send_after_receiver_dropped_fails() {
        let (slot, rx) = ResponseSlot::new();
        drop(rx);
        assert_eq!(slot.send(b"nobody listening"), Err(ChannelClosed));
    }
}
