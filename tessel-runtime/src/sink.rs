//! Streaming sinks backed by channels.

use tokio::sync::mpsc;
use tracing::debug;

use tessel_core::TokenSink;

/// Forwards each cumulative text update over an unbounded channel.
///
/// Sending never blocks the decode loop. A dropped receiver is logged and the
/// update discarded; generation carries on.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    /// A sink together with the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TokenSink for ChannelSink {
    fn on_token(&mut self, text: &str) {
        if self.tx.send(text.to_string()).is_err() {
            debug!("token receiver dropped, discarding update");
        }
    }
}
