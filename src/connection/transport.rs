use super::messages::{ClientMessage, ServiceMessage};
use crate::error::Result;
use tokio::sync::mpsc;

/// Capacity of the outbound queue between the session and a transport
pub const OUTBOUND_CAPACITY: usize = 256;

/// Both directions of an open framed channel to the service
///
/// Dropping every clone of `outbound` closes the channel; the transport then
/// finishes writing and ends `inbound`.
pub struct Channel {
    pub outbound: mpsc::Sender<ClientMessage>,
    pub inbound: mpsc::Receiver<Result<ServiceMessage>>,
}

/// Where the connection to the recognition service is opened
///
/// Implementations:
/// - `WebSocketTransport`: ws/wss endpoint, JSON text frames
/// - `NatsTransport`: NATS subjects per conversation
/// - `LoopbackTransport`: in-process service emulator (tests, offline runs)
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open a channel for one conversation
    ///
    /// Frames written to `outbound` reach the service in send order.
    async fn open(&self, conversation_id: &str) -> Result<Channel>;

    /// Transport name for logging
    fn name(&self) -> &str;
}
