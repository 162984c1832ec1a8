#![cfg(feature = "ws")]
#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Deeply nested uses in sub-modules are falsely flagged as being unused"
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use etoro_client_sdk::Result;
use etoro_client_sdk::auth::Credentials;
use etoro_client_sdk::error::Error;
use etoro_client_sdk::ws::transport::{FrameSink, FrameStream, Inbound, Outbound, Transport};
use futures::channel::mpsc as fmpsc;
use futures_util::{SinkExt as _, StreamExt as _};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const API_KEY: &str = "test-api-key";
pub const USER_KEY: &str = "test-user-key";
pub const ENDPOINT: &str = "wss://ws.example.test/ws";

#[must_use]
pub fn credentials() -> Credentials {
    Credentials::new(API_KEY.to_owned(), USER_KEY.to_owned())
}

/// Server side of one in-memory connection.
pub struct Peer {
    /// Frames written by the client
    pub written: fmpsc::UnboundedReceiver<Outbound>,
    /// Frames to deliver to the client
    pub incoming: fmpsc::UnboundedSender<Result<Inbound>>,
}

impl Peer {
    /// Next frame written by the client.
    pub async fn next_frame(&mut self) -> Option<Outbound> {
        timeout(Duration::from_secs(5), self.written.next())
            .await
            .ok()
            .flatten()
    }

    /// Next text frame written by the client, parsed as JSON. Other frames are skipped.
    pub async fn next_request(&mut self) -> Value {
        loop {
            match self.next_frame().await {
                Some(Outbound::Text(text)) => return serde_json::from_str(&text).unwrap(),
                Some(_) => {}
                None => panic!("connection closed before a request was written"),
            }
        }
    }

    pub fn send_json(&self, value: &Value) {
        self.send_text(&value.to_string());
    }

    pub fn send_text(&self, text: &str) {
        self.incoming
            .unbounded_send(Ok(Inbound::Text(text.to_owned())))
            .unwrap();
    }

    pub fn send_pong(&self) {
        self.incoming.unbounded_send(Ok(Inbound::Pong)).unwrap();
    }

    pub fn close(&self, code: u16, reason: &str) {
        self.incoming
            .unbounded_send(Ok(Inbound::Close {
                code,
                reason: reason.to_owned(),
            }))
            .unwrap();
    }

    /// Reads the `Authenticate` request and accepts it.
    pub async fn accept_auth(&mut self) -> Value {
        let request = self.next_request().await;
        assert_eq!(request["operation"], "Authenticate");
        self.send_json(&json!({ "operation": "Authenticate", "id": request["id"] }));
        request
    }

    /// Reads the `Authenticate` request and rejects it with `code`.
    pub async fn reject_auth(&mut self, code: &str) {
        let request = self.next_request().await;
        assert_eq!(request["operation"], "Authenticate");
        self.send_json(&json!({
            "operation": "Authenticate",
            "id": request["id"],
            "errorCode": code,
            "errorMessage": "invalid credentials"
        }));
    }
}

/// [`Transport`] over in-memory channels. Every `open` hands a fresh [`Peer`] to the test.
#[derive(Clone)]
pub struct ChannelTransport {
    peers: mpsc::UnboundedSender<Peer>,
    opens: Arc<AtomicUsize>,
    refuse: Arc<AtomicBool>,
}

impl ChannelTransport {
    #[must_use]
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Peer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let transport = Self {
            peers,
            opens: Arc::new(AtomicUsize::new(0)),
            refuse: Arc::new(AtomicBool::new(false)),
        };
        (transport, rx)
    }

    /// Number of `open` calls so far, including refused ones.
    #[must_use]
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Make subsequent `open` calls fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn open(&self, _url: &str) -> Result<(FrameSink, FrameStream)> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::validation("connection refused"));
        }

        let (out_tx, written) = fmpsc::unbounded::<Outbound>();
        let (incoming, in_rx) = fmpsc::unbounded::<Result<Inbound>>();

        _ = self.peers.send(Peer { written, incoming });

        let sink = out_tx.sink_map_err(|e| Error::validation(e.to_string()));
        Ok((Box::pin(sink), Box::pin(in_rx)))
    }
}
