//! Topic-based broadcast transport shared by all actors.

use sim_core::MarketMessage;
use tokio::sync::broadcast;
use tracing::debug;

/// A named broadcast topic carrying encoded market payloads.
///
/// Publishing is fire-and-forget: no acknowledgment, no retry, no
/// backpressure. A subscriber that falls behind loses the oldest buffered
/// messages and keeps going; it never stalls the publisher. Delivery to a
/// single subscriber is in-order.
#[derive(Clone)]
pub struct Topic {
    name: String,
    sender: broadcast::Sender<String>,
}

impl Topic {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            name: name.into(),
            sender,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Encode and publish one message. Delivery failures are not errors:
    /// a topic without subscribers simply drops the payload.
    pub fn publish(&self, message: &MarketMessage) {
        match message.encode() {
            Ok(raw) => {
                if self.sender.send(raw).is_err() {
                    debug!(topic = %self.name, "no subscribers, message dropped");
                }
            }
            Err(error) => debug!(topic = %self.name, %error, "unencodable message dropped"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }
}
