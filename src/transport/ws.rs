use super::{BoxFuture, Channel, Connector};
use crate::error::{Error, Result};
use crate::protocol::client_events::ClientMessage;
use crate::protocol::models::Setup;
use crate::protocol::server_events::ServerMessage;
use crate::{TRACE_LOG_MAX_BYTES, safe_truncate};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

pub const WS_BASE_URL: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects over WebSocket and performs the setup handshake.
#[derive(Debug, Clone)]
pub struct WsConnector {
    api_key: String,
    endpoint: String,
}

impl WsConnector {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: WS_BASE_URL.to_string(),
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl Connector for WsConnector {
    fn connect(&self, setup: Setup) -> BoxFuture<'static, Result<Box<dyn Channel>>> {
        let api_key = self.api_key.clone();
        let endpoint = self.endpoint.clone();
        Box::pin(async move {
            let mut channel = WsChannel::connect(&endpoint, &api_key).await?;
            channel.handshake(setup).await?;
            Ok(Box::new(channel) as Box<dyn Channel>)
        })
    }
}

#[must_use]
pub struct WsChannel {
    stream: WsStream,
}

impl WsChannel {
    /// Open the socket. No frames are exchanged yet.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the WebSocket handshake fails.
    pub async fn connect(endpoint: &str, api_key: &str) -> Result<Self> {
        let mut url = Url::parse(endpoint)?;
        url.query_pairs_mut().append_pair("key", api_key);

        let (stream, _) = connect_async(url.as_str()).await?;
        tracing::info!("Connected to streaming endpoint");
        Ok(Self { stream })
    }

    /// Send the setup frame and wait for the server to confirm it.
    ///
    /// # Errors
    /// Returns an error if the channel closes or fails before `setupComplete`.
    pub async fn handshake(&mut self, setup: Setup) -> Result<()> {
        self.send_message(ClientMessage::Setup(Box::new(setup))).await?;
        loop {
            match self.read_message().await? {
                Some(msg) if msg.is_setup_complete() => {
                    tracing::info!("Session setup complete");
                    return Ok(());
                }
                Some(_) => tracing::debug!("ignoring frame received before setupComplete"),
                None => return Err(Error::ConnectionClosed),
            }
        }
    }

    async fn send_message(&mut self, message: ClientMessage) -> Result<()> {
        let json = serde_json::to_string(&message)?;
        tracing::trace!("Sending frame: {}", safe_truncate(&json, TRACE_LOG_MAX_BYTES));
        self.stream.send(Message::Text(json.into())).await?;
        Ok(())
    }

    async fn read_message(&mut self) -> Result<Option<ServerMessage>> {
        while let Some(msg) = self.stream.next().await {
            let text = match msg? {
                Message::Text(text) => text.as_str().to_owned(),
                // The server also delivers JSON frames as binary messages.
                Message::Binary(bytes) => String::from_utf8(bytes.to_vec())
                    .map_err(|e| Error::Transport(format!("non-UTF-8 binary frame: {e}")))?,
                Message::Close(frame) => {
                    tracing::info!(?frame, "WebSocket connection closed by server");
                    return Ok(None);
                }
                Message::Ping(payload) => {
                    tracing::debug!("Received Ping, sending Pong");
                    self.stream.send(Message::Pong(payload)).await?;
                    continue;
                }
                _ => continue,
            };
            tracing::trace!("Received frame: {}", safe_truncate(&text, TRACE_LOG_MAX_BYTES));
            return Ok(Some(serde_json::from_str::<ServerMessage>(&text)?));
        }
        Ok(None)
    }
}

impl Channel for WsChannel {
    fn send(&mut self, message: ClientMessage) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.send_message(message).await })
    }

    fn next_message(&mut self) -> BoxFuture<'_, Result<Option<ServerMessage>>> {
        Box::pin(async move { self.read_message().await })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.stream.close(None).await?;
            Ok(())
        })
    }
}
