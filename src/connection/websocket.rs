use super::messages::{ClientMessage, ServiceMessage};
use super::transport::{Channel, Transport, OUTBOUND_CAPACITY};
use crate::error::{Result, TranscriberError};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, protocol::Message},
};
use tracing::{debug, error, info, warn};

pub const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Transport over a WebSocket endpoint, one JSON message per text frame
pub struct WebSocketTransport {
    url: String,
    key: Option<String>,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>, key: Option<String>) -> Self {
        Self {
            url: url.into(),
            key,
        }
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, conversation_id: &str) -> Result<Channel> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TranscriberError::config(format!("invalid endpoint {}: {}", self.url, e)))?;

        if let Some(key) = &self.key {
            let value = HeaderValue::from_str(key)
                .map_err(|e| TranscriberError::config(format!("invalid subscription key: {}", e)))?;
            request.headers_mut().insert(SUBSCRIPTION_KEY_HEADER, value);
        }

        let (ws_stream, _) = connect_async(request).await.map_err(|e| {
            TranscriberError::connection(format!("WebSocket connect to {} failed: {}", self.url, e))
        })?;

        info!("WebSocket connected to {} for {}", self.url, conversation_id);

        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientMessage>(OUTBOUND_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to encode client message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    error!("WebSocket send failed: {}", e);
                    return;
                }
            }

            if let Err(e) = write.send(Message::Close(None)).await {
                debug!("WebSocket close frame not sent: {}", e);
            }
            debug!("WebSocket writer stopped");
        });

        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let parsed = match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServiceMessage>(&text) {
                        Ok(message) => Ok(message),
                        Err(e) => {
                            warn!("Failed to parse service message: {}", e);
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "closed by service".to_string());
                        debug!("WebSocket closed: {}", reason);
                        Err(TranscriberError::connection(format!(
                            "WebSocket closed: {}",
                            reason
                        )))
                    }
                    Ok(_) => continue, // Ping, Pong, Binary
                    Err(e) => Err(TranscriberError::connection(format!(
                        "WebSocket receive failed: {}",
                        e
                    ))),
                };

                let terminal = parsed.is_err();
                if inbound_tx.send(parsed).await.is_err() || terminal {
                    break;
                }
            }
            debug!("WebSocket reader stopped");
        });

        Ok(Channel {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }

    fn name(&self) -> &str {
        "websocket"
    }
}
