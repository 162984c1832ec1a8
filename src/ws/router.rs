//! Topic-based classification of streamed messages.
//!
//! `instrument:<id>` topics carry [`InstrumentRate`] quotes, the `private` topic carries
//! [`PrivateEvent`]s and everything else is passed through untouched.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::error::WsError;
use super::types::response::{Envelope, InstrumentRate, PrivateEvent, WsMessage};
use crate::Result;

const INSTRUMENT_TOPIC_PREFIX: &str = "instrument:";
const PRIVATE_TOPIC: &str = "private";

/// Decodes the string-encoded `content` of a [`WsMessage`].
///
/// Implementations must be pure: the router may call them from any task.
pub trait PayloadCodec: Send + Sync + 'static {
    /// Decodes a quote. `Ok(None)` marks a heartbeat tick (no `Ask`/`Bid`).
    fn decode_rate(&self, content: &str) -> Result<Option<InstrumentRate>>;

    fn decode_private_event(&self, content: &str) -> Result<PrivateEvent>;
}

/// [`PayloadCodec`] for JSON payloads.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn decode_rate(&self, content: &str) -> Result<Option<InstrumentRate>> {
        let value: Value = serde_json::from_str(content).map_err(WsError::MessageParse)?;

        // Heartbeat ticks only carry `Date` and `PriceRateID`.
        if value.get("Ask").is_none() && value.get("Bid").is_none() {
            return Ok(None);
        }

        let rate = serde_json::from_value(value).map_err(WsError::MessageParse)?;
        Ok(Some(rate))
    }

    fn decode_private_event(&self, content: &str) -> Result<PrivateEvent> {
        Ok(serde_json::from_str(content).map_err(WsError::MessageParse)?)
    }
}

/// Classified topic message.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedMessage {
    InstrumentRate {
        instrument_id: u64,
        rate: InstrumentRate,
    },
    PrivateEvent(PrivateEvent),
    /// Message on a topic the router does not model
    Unknown(WsMessage),
}

#[derive(Clone)]
pub struct Router {
    codec: Arc<dyn PayloadCodec>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router").finish_non_exhaustive()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(JsonCodec)
    }
}

impl Router {
    #[must_use]
    pub fn new<C: PayloadCodec>(codec: C) -> Self {
        Self {
            codec: Arc::new(codec),
        }
    }

    /// Classifies every message of `envelope`.
    ///
    /// Messages that fail to decode are logged and skipped; the rest of the batch is still
    /// routed. Heartbeat ticks produce nothing.
    #[must_use]
    pub fn route(&self, envelope: &Envelope) -> Vec<RoutedMessage> {
        envelope
            .messages
            .iter()
            .filter_map(|message| {
                self.route_message(message)
                    .inspect_err(|e| {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(topic = %message.topic, error = %e, "Failed to decode WebSocket message");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &e;
                    })
                    .ok()
                    .flatten()
            })
            .collect()
    }

    /// Classifies a single message. `Ok(None)` means the message was a heartbeat tick.
    pub fn route_message(&self, message: &WsMessage) -> Result<Option<RoutedMessage>> {
        if let Some(id) = message.topic.strip_prefix(INSTRUMENT_TOPIC_PREFIX) {
            let instrument_id = id.parse::<u64>().map_err(|e| {
                crate::error::Error::validation(format!(
                    "invalid instrument topic `{}`: {e}",
                    message.topic
                ))
            })?;

            return Ok(self
                .codec
                .decode_rate(&message.content)?
                .map(|rate| RoutedMessage::InstrumentRate {
                    instrument_id,
                    rate,
                }));
        }

        if message.topic == PRIVATE_TOPIC {
            let event = self.codec.decode_private_event(&message.content)?;
            return Ok(Some(RoutedMessage::PrivateEvent(event)));
        }

        Ok(Some(RoutedMessage::Unknown(message.clone())))
    }
}

/// Parses a raw text frame into an [`Envelope`].
pub fn parse_envelope(text: &str) -> Result<Envelope> {
    Ok(serde_json::from_str(text).map_err(WsError::MessageParse)?)
}
