//! Streaming channel seams. The session controller only ever talks to a
//! `Box<dyn Channel>`; `ws` provides the WebSocket implementation.

pub mod ws;

use crate::Result;
use crate::feedback::Acknowledgment;
use crate::protocol::client_events::ClientMessage;
use crate::protocol::models::{MediaChunk, Setup};
use crate::protocol::server_events::ServerMessage;
use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An open, handshaken connection to the remote model.
pub trait Channel: Send {
    fn send(&mut self, message: ClientMessage) -> BoxFuture<'_, Result<()>>;

    /// Next server frame. `Ok(None)` means the remote closed the channel;
    /// `Err` is a transport failure.
    fn next_message(&mut self) -> BoxFuture<'_, Result<Option<ServerMessage>>>;

    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Outbound audio or image frame. Not awaited for delivery confirmation.
pub async fn send_media(channel: &mut dyn Channel, chunk: MediaChunk) -> Result<()> {
    channel.send(ClientMessage::media(chunk)).await
}

/// Reply to a pending tool call.
pub async fn send_acknowledgment(channel: &mut dyn Channel, ack: Acknowledgment) -> Result<()> {
    channel.send(ClientMessage::tool_response(ack.into())).await
}

/// Opens channels. The returned future resolves once the setup handshake
/// completed.
pub trait Connector: Send + Sync {
    fn connect(&self, setup: Setup) -> BoxFuture<'static, Result<Box<dyn Channel>>>;
}
