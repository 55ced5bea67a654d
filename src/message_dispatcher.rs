use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// The consumer of a connection's messages. Messages are passed to `on_message` in the order
///  they were sent, each exactly once.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageDispatcher: Send + Sync + 'static {
    async fn on_message(&self, msg_buf: &[u8]);

    /// Called once if the connection terminates because of a socket failure
    async fn on_error(&self, _error: &TransportError) {}
}

#[async_trait]
impl MessageDispatcher for UnboundedSender<Bytes> {
    async fn on_message(&self, msg_buf: &[u8]) {
        if self.send(Bytes::copy_from_slice(msg_buf)).is_err() {
            debug!("message receiver was dropped - discarding message");
        }
    }
}
