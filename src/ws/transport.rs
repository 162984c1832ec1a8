//! Connection abstraction beneath the streaming client.
//!
//! A [`Transport`] opens one connection per call and hands back its two halves: a sink of
//! [`Outbound`] frames and a stream of [`Inbound`] frames. [`TungsteniteTransport`] is the
//! production implementation; tests plug in in-memory transports.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, SinkExt as _, Stream, StreamExt as _, future};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use super::error::WsError;
use crate::Result;
use crate::error::Error;

/// Close code for a normal, client-initiated closure.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code reported when the connection ended without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code used when the peer stopped answering heartbeats.
pub const INTERNAL_ERROR: u16 = 1011;

/// Frame received from the server.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Pong,
    /// The peer closed the connection.
    Close { code: u16, reason: String },
}

/// Frame sent to the server.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Ping,
    Close { code: u16, reason: String },
}

pub type FrameSink = Pin<Box<dyn Sink<Outbound, Error = Error> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Inbound>> + Send>>;

/// Opens connections to a streaming endpoint.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens a fresh connection. Each returned pair is used for exactly one session.
    async fn open(&self, url: &str) -> Result<(FrameSink, FrameStream)>;
}

/// [`Transport`] over `tokio-tungstenite`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn open(&self, url: &str) -> Result<(FrameSink, FrameStream)> {
        let (ws_stream, _) = connect_async(url).await.map_err(WsError::Connection)?;
        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| Error::from(WsError::Connection(e)))
            .with(|frame: Outbound| future::ready(Ok::<_, Error>(to_message(frame))));

        let stream = read.filter_map(|message| future::ready(from_message(message)));

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

fn to_message(frame: Outbound) -> Message {
    match frame {
        Outbound::Text(text) => Message::Text(text.into()),
        Outbound::Ping => Message::Ping(Vec::<u8>::new().into()),
        Outbound::Close { code, reason } => Message::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        })),
    }
}

fn from_message(
    message: std::result::Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<Inbound>> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(Inbound::Text(text.to_string()))),
        Ok(Message::Pong(_)) => Some(Ok(Inbound::Pong)),
        Ok(Message::Close(frame)) => {
            let (code, reason) = frame.map_or((ABNORMAL_CLOSURE, String::new()), |frame| {
                (u16::from(frame.code), frame.reason.to_string())
            });
            Some(Ok(Inbound::Close { code, reason }))
        }
        // Pings are answered by tungstenite itself; binary frames are not part of the protocol.
        Ok(_) => None,
        Err(e) => Some(Err(WsError::Connection(e).into())),
    }
}
