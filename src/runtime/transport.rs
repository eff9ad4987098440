use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::runtime::task::TaskMessage;
use anyhow::Result;

/// Delivery of wire envelopes toward whichever processor owns the target
/// instance. The real transport (websocket or similar) lives outside this
/// crate; the hub only needs send.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: TaskMessage) -> Result<()>;
}

/// In-process transport backed by an mpsc channel. Used by tests and by the
/// demo binary, where the "processor" is a local loop draining the receiver.
pub struct ChannelTransport {
    sender: mpsc::Sender<TaskMessage>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TaskMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { sender: tx }, rx)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, message: TaskMessage) -> Result<()> {
        self.sender
            .send(message)
            .await
            .map_err(|e| anyhow::anyhow!("Transport channel closed: {}", e))
    }
}
