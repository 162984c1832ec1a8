#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::future;
use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep_until};
use tokio_util::sync::CancellationToken;

use super::transport::{
    ABNORMAL_CLOSURE, FrameSink, FrameStream, INTERNAL_ERROR, Inbound, NORMAL_CLOSURE, Outbound,
};
use crate::error::Error;

pub(crate) const DISCONNECT_REASON: &str = "Client disconnect";
pub(crate) const KEEPALIVE_TIMEOUT_REASON: &str = "keepalive ping timeout";
const CONNECTION_LOST_REASON: &str = "connection lost";

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Opening the transport
    Connecting,
    /// Transport open, waiting for the `Authenticate` response
    Authenticating,
    /// Authenticated and streaming
    Ready {
        /// When authentication completed
        since: Instant,
    },
    /// Waiting to reconnect after an unexpected close
    Reconnecting {
        /// Current reconnection attempt number, starting at 1
        attempt: u32,
    },
    /// `disconnect` in progress
    Closing,
}

impl ConnectionState {
    /// Check if the connection is authenticated and streaming.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// How a session loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    /// Stopped through its cancellation token; a normal-closure frame was sent
    Cancelled,
    /// The connection went away on its own
    Closed { code: u16, reason: String },
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Heartbeat {
    /// Zero disables pings
    pub(crate) interval: Duration,
    pub(crate) timeout: Duration,
}

/// Receiver of everything the session loop observes.
pub(crate) trait SessionHandler: Send + Sync {
    fn on_text(&self, text: &str);

    fn on_pong(&self);

    /// Transport error that did not end the session.
    fn on_error(&self, error: Error);
}

/// Drives one connection until it closes or `cancel` fires.
///
/// The loop owns both halves of the connection: it is the only writer, so outbound frames queued
/// on `outbound` never interleave.
pub(crate) async fn run<H: SessionHandler>(
    mut sink: FrameSink,
    mut stream: FrameStream,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    cancel: CancellationToken,
    heartbeat: Heartbeat,
    handler: &H,
) -> SessionEnd {
    let mut ping_interval = (!heartbeat.interval.is_zero()).then(|| {
        let mut ping_interval = interval_at(
            Instant::now() + heartbeat.interval,
            heartbeat.interval,
        );
        ping_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ping_interval
    });
    // Set while a PING is unanswered.
    let mut pong_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                _ = sink
                    .send(Outbound::Close {
                        code: NORMAL_CLOSURE,
                        reason: DISCONNECT_REASON.to_owned(),
                    })
                    .await;
                _ = sink.close().await;
                return SessionEnd::Cancelled;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Inbound::Text(text))) => handler.on_text(&text),
                    Some(Ok(Inbound::Pong)) => {
                        pong_deadline = None;
                        handler.on_pong();
                    }
                    Some(Ok(Inbound::Close { code, reason })) => {
                        return SessionEnd::Closed { code, reason };
                    }
                    Some(Err(e)) => {
                        #[cfg(feature = "tracing")]
                        tracing::error!(error = %e, "WebSocket error");
                        handler.on_error(e);
                    }
                    None => {
                        return SessionEnd::Closed {
                            code: ABNORMAL_CLOSURE,
                            reason: CONNECTION_LOST_REASON.to_owned(),
                        };
                    }
                }
            }

            Some(frame) = outbound.recv() => {
                if let Err(e) = sink.send(frame).await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %e, "Failed to send WebSocket frame");
                    handler.on_error(e);
                }
            }

            () = expire(pong_deadline) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Heartbeat timeout: no PONG received within {:?}",
                    heartbeat.timeout
                );
                _ = sink
                    .send(Outbound::Close {
                        code: INTERNAL_ERROR,
                        reason: KEEPALIVE_TIMEOUT_REASON.to_owned(),
                    })
                    .await;
                return SessionEnd::Closed {
                    code: INTERNAL_ERROR,
                    reason: KEEPALIVE_TIMEOUT_REASON.to_owned(),
                };
            }

            () = tick(ping_interval.as_mut()) => {
                if pong_deadline.is_none() {
                    pong_deadline = Some(Instant::now() + heartbeat.timeout);
                }
                if let Err(e) = sink.send(Outbound::Ping).await {
                    handler.on_error(e);
                }
            }
        }
    }
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}
