//! Connection to the recognition service
//!
//! - `messages`: JSON wire protocol
//! - `transport`: the `Transport` seam opening a framed channel
//! - `client`: `Connection`, handshake + request/acknowledgment correlation
//! - `websocket`, `nats`, `loopback`: transport implementations

pub mod client;
pub mod loopback;
pub mod messages;
pub mod nats;
pub mod transport;
pub mod websocket;

pub use client::{Connection, ConnectionEvent, ConnectionTimeouts, EventSink, Handshake};
pub use loopback::{LoopbackTransport, SegmenterConfig};
pub use messages::{
    AudioFrameMessage, ClientMessage, ErrorCode, HypothesisMessage, ParticipantPayload,
    PhraseMessage, PhraseStatus, RosterAction, RosterOutcome, ServiceMessage, WordMessage,
};
pub use nats::NatsTransport;
pub use transport::{Channel, Transport};
pub use websocket::WebSocketTransport;
