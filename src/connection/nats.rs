use super::messages::{ClientMessage, ServiceMessage};
use super::transport::{Channel, Transport, OUTBOUND_CAPACITY};
use crate::error::{Result, TranscriberError};
use futures::stream::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Transport that exchanges JSON messages over NATS subjects
///
/// Client frames go to `transcriber.<conversation>.client`, service frames
/// arrive on `transcriber.<conversation>.service`.
pub struct NatsTransport {
    url: String,
    token: Option<String>,
}

impl NatsTransport {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            url: url.into(),
            token,
        }
    }

    pub fn client_subject(conversation_id: &str) -> String {
        format!("transcriber.{}.client", subject_token(conversation_id))
    }

    pub fn service_subject(conversation_id: &str) -> String {
        format!("transcriber.{}.service", subject_token(conversation_id))
    }
}

/// NATS subjects cannot contain whitespace, dots or wildcards
fn subject_token(conversation_id: &str) -> String {
    conversation_id
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

#[async_trait::async_trait]
impl Transport for NatsTransport {
    async fn open(&self, conversation_id: &str) -> Result<Channel> {
        info!("Connecting to NATS at {}", self.url);

        let options = match &self.token {
            Some(token) => async_nats::ConnectOptions::with_token(token.clone()),
            None => async_nats::ConnectOptions::new(),
        };

        let client = options
            .connect(self.url.as_str())
            .await
            .map_err(|e| TranscriberError::connection(format!("NATS connect failed: {}", e)))?;

        info!("Connected to NATS successfully");

        let service_subject = Self::service_subject(conversation_id);
        let mut subscriber = client
            .subscribe(service_subject.clone())
            .await
            .map_err(|e| {
                TranscriberError::connection(format!("failed to subscribe to {}: {}", service_subject, e))
            })?;

        info!("Subscribed to {}", service_subject);

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientMessage>(OUTBOUND_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);

        let client_subject = Self::client_subject(conversation_id);
        let publisher = client.clone();
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let payload = match serde_json::to_vec(&message) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!("Failed to encode client message: {}", e);
                        continue;
                    }
                };

                if let Err(e) = publisher
                    .publish(client_subject.clone(), payload.into())
                    .await
                {
                    error!("Failed to publish to {}: {}", client_subject, e);
                    break;
                }
            }

            if let Err(e) = publisher.flush().await {
                warn!("Failed to flush NATS connection: {}", e);
            }
            debug!("NATS writer for {} stopped", client_subject);
        });

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = subscriber.next() => {
                        let Some(message) = message else {
                            let _ = inbound_tx
                                .send(Err(TranscriberError::connection("NATS subscription ended")))
                                .await;
                            break;
                        };
                        match serde_json::from_slice::<ServiceMessage>(&message.payload) {
                            Ok(parsed) => {
                                if inbound_tx.send(Ok(parsed)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("Failed to parse service message: {}", e),
                        }
                    }
                    _ = inbound_tx.closed() => break,
                }
            }

            if let Err(e) = subscriber.unsubscribe().await {
                debug!("Failed to unsubscribe: {}", e);
            }
            debug!("NATS reader for {} stopped", service_subject);
        });

        Ok(Channel {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }

    fn name(&self) -> &str {
        "nats"
    }
}
