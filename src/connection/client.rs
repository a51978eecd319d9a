use super::messages::{ClientMessage, ErrorCode, HypothesisMessage, PhraseMessage, ServiceMessage};
use super::transport::Transport;
use crate::audio::AudioFormat;
use crate::error::{Result, TranscriberError};
use crate::session::OutputFormat;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Unsolicited traffic from the service, forwarded to the owning session
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Recognizing(HypothesisMessage),
    Recognized(PhraseMessage),
    /// Fatal service error; the session is over
    Fault { code: ErrorCode, message: String },
    /// Link lost without a local close
    Disconnected { message: String },
}

/// Receives `ConnectionEvent`s on the connection's reader task
pub type EventSink = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

/// Parameters of the `connect` handshake
#[derive(Debug, Clone)]
pub struct Handshake {
    pub conversation_id: String,
    pub language: String,
    pub output_format: OutputFormat,
    pub audio: AudioFormat,
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionTimeouts {
    pub connect: Duration,
    pub request: Duration,
    pub keepalive: Duration,
}

type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<Result<ServiceMessage>>>>>;

/// An open, handshaken channel to the recognition service
///
/// Requests are correlated with their acknowledgments by id; everything
/// else the service sends goes to the `EventSink`.
pub struct Connection {
    session_id: String,
    outbound: Mutex<Option<mpsc::Sender<ClientMessage>>>,
    pending: PendingMap,
    closing: Arc<AtomicBool>,
    request_timeout: Duration,
    reader: JoinHandle<()>,
    keepalive: JoinHandle<()>,
}

impl Connection {
    /// Open a channel through `transport` and perform the handshake
    pub async fn open(
        transport: &dyn Transport,
        handshake: Handshake,
        timeouts: ConnectionTimeouts,
        sink: EventSink,
    ) -> Result<Self> {
        info!(
            "Opening {} connection for conversation {}",
            transport.name(),
            handshake.conversation_id
        );

        let channel = tokio::time::timeout(timeouts.connect, transport.open(&handshake.conversation_id))
            .await
            .map_err(|_| TranscriberError::Timeout {
                operation: "connect",
                waited: timeouts.connect,
            })??;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closing = Arc::new(AtomicBool::new(false));
        let ready = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(read_loop(
            channel.inbound,
            Arc::clone(&pending),
            Arc::clone(&closing),
            Arc::clone(&ready),
            sink,
        ));
        let keepalive = tokio::spawn(keepalive_loop(channel.outbound.clone(), timeouts.keepalive));

        let mut connection = Self {
            session_id: String::new(),
            outbound: Mutex::new(Some(channel.outbound)),
            pending,
            closing,
            request_timeout: timeouts.connect,
            reader,
            keepalive,
        };

        let ack = connection
            .request("connect", |request_id| ClientMessage::Connect {
                request_id,
                conversation_id: handshake.conversation_id.clone(),
                language: handshake.language.clone(),
                output_format: handshake.output_format,
                audio: handshake.audio,
            })
            .await;

        match ack {
            Ok(ServiceMessage::Connected { session_id, .. }) => {
                info!("Handshake complete, service session {}", session_id);
                connection.session_id = session_id;
                connection.request_timeout = timeouts.request;
                ready.store(true, Ordering::SeqCst);
                Ok(connection)
            }
            Ok(other) => {
                connection.close().await;
                Err(unexpected_ack("connect", &other))
            }
            Err(e) => {
                warn!("Handshake failed: {}", e);
                connection.close().await;
                Err(e)
            }
        }
    }

    /// Service-assigned session id from the handshake
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::SeqCst) || self.reader.is_finished()
    }

    /// Queue a message without waiting for an acknowledgment
    pub async fn send(&self, message: ClientMessage) -> Result<()> {
        let sender = self.sender()?;
        sender
            .send(message)
            .await
            .map_err(|_| TranscriberError::connection("connection is closed"))
    }

    /// Send a request and wait for the acknowledgment carrying its id
    pub async fn request(
        &self,
        operation: &'static str,
        build: impl FnOnce(Uuid) -> ClientMessage,
    ) -> Result<ServiceMessage> {
        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| TranscriberError::connection("pending request table poisoned"))?
            .insert(request_id, tx);

        if let Err(e) = self.send(build(request_id)).await {
            self.forget(request_id);
            return Err(e);
        }

        debug!("Sent {} request {}", operation, request_id);

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TranscriberError::connection(format!(
                "connection closed before {} was acknowledged",
                operation
            ))),
            Err(_) => {
                self.forget(request_id);
                Err(TranscriberError::Timeout {
                    operation,
                    waited: self.request_timeout,
                })
            }
        }
    }

    /// Say goodbye and release the channel; safe to call repeatedly
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Closing connection {}", self.session_id);
        self.keepalive.abort();

        let sender = self.outbound.lock().ok().and_then(|mut outbound| outbound.take());
        if let Some(sender) = sender {
            if sender.send(ClientMessage::Disconnect).await.is_err() {
                debug!("Service already gone at close");
            }
        }

        fail_pending(&self.pending, || TranscriberError::connection("connection closed"));
    }

    /// Synchronous teardown for drop paths
    pub fn abort(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.keepalive.abort();
        self.reader.abort();
        if let Ok(mut outbound) = self.outbound.lock() {
            outbound.take();
        }
    }

    fn sender(&self) -> Result<mpsc::Sender<ClientMessage>> {
        self.outbound
            .lock()
            .ok()
            .and_then(|outbound| outbound.clone())
            .ok_or_else(|| TranscriberError::connection("connection is closed"))
    }

    fn forget(&self, request_id: Uuid) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&request_id);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.keepalive.abort();
        self.reader.abort();
    }
}

async fn read_loop(
    mut inbound: mpsc::Receiver<Result<ServiceMessage>>,
    pending: PendingMap,
    closing: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
    sink: EventSink,
) {
    let mut failure = None;

    while let Some(message) = inbound.recv().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                failure = Some(e.to_string());
                break;
            }
        };

        if let Some(request_id) = message.request_id() {
            let waiter = pending.lock().ok().and_then(|mut p| p.remove(&request_id));
            match waiter {
                Some(waiter) => {
                    let result = match message {
                        ServiceMessage::Error { code, message, .. } => {
                            Err(TranscriberError::Service { code, message })
                        }
                        ack => Ok(ack),
                    };
                    let _ = waiter.send(result);
                }
                None => debug!("Acknowledgment {} has no waiter", request_id),
            }
            continue;
        }

        // Nothing is forwarded before the handshake completes
        if !ready.load(Ordering::SeqCst) {
            debug!("Dropping {:?} received before handshake", message);
            continue;
        }

        match message {
            ServiceMessage::Hypothesis(hypothesis) => sink(ConnectionEvent::Recognizing(hypothesis)),
            ServiceMessage::Phrase(phrase) => sink(ConnectionEvent::Recognized(phrase)),
            ServiceMessage::Error { code, message, .. } => {
                error!("Service error ({}): {}", code, message);
                sink(ConnectionEvent::Fault { code, message });
            }
            ServiceMessage::Pong => {}
            other => debug!("Ignoring unsolicited {:?}", other),
        }
    }

    if closing.load(Ordering::SeqCst) {
        debug!("Connection reader finished after close");
        return;
    }

    closing.store(true, Ordering::SeqCst);

    let message = failure.unwrap_or_else(|| "service closed the connection".to_string());
    warn!("Connection lost: {}", message);
    fail_pending(&pending, || TranscriberError::connection(message.clone()));
    if ready.load(Ordering::SeqCst) {
        sink(ConnectionEvent::Disconnected { message });
    }
}

async fn keepalive_loop(outbound: mpsc::Sender<ClientMessage>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.tick().await; // first tick completes immediately
    loop {
        ticker.tick().await;
        if outbound.send(ClientMessage::Ping).await.is_err() {
            break;
        }
    }
}

fn fail_pending(pending: &PendingMap, error: impl Fn() -> TranscriberError) {
    let waiters: Vec<_> = match pending.lock() {
        Ok(mut pending) => pending.drain().map(|(_, waiter)| waiter).collect(),
        Err(_) => return,
    };
    for waiter in waiters {
        let _ = waiter.send(Err(error()));
    }
}

pub(crate) fn unexpected_ack(operation: &'static str, message: &ServiceMessage) -> TranscriberError {
    TranscriberError::Service {
        code: ErrorCode::ServiceError,
        message: format!("unexpected acknowledgment for {}: {:?}", operation, message),
    }
}

/// Check that `message` is the acknowledgment `operation` expects
pub(crate) fn expect_ack(
    operation: &'static str,
    message: ServiceMessage,
    matches: impl Fn(&ServiceMessage) -> bool,
) -> Result<ServiceMessage> {
    if matches(&message) {
        Ok(message)
    } else {
        Err(unexpected_ack(operation, &message))
    }
}
