#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Kind};

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error connecting to or communicating with the WebSocket server
    Connection(tokio_tungstenite::tungstenite::Error),
    /// Error parsing a WebSocket message
    MessageParse(serde_json::Error),
    /// A request was issued while no connection is live
    NotConnected,
    /// WebSocket connection was closed
    ConnectionClosed,
    /// The server answered the `Authenticate` operation with an error code
    AuthenticationFailed {
        /// Error code reported by the server
        code: String,
    },
    /// No `Authenticate` response arrived within the configured deadline
    AuthenticationTimeout(Duration),
    /// Automatic reconnection gave up
    ReconnectExhausted {
        /// Number of reconnection attempts made
        attempts: u32,
    },
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::MessageParse(e) => write!(f, "Failed to parse WebSocket message: {e}"),
            Self::NotConnected => write!(f, "WebSocket not connected"),
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::AuthenticationFailed { code } => write!(f, "WS auth failed: {code}"),
            Self::AuthenticationTimeout(after) => {
                write!(f, "WebSocket authentication timed out after {after:?}")
            }
            Self::ReconnectExhausted { attempts } => {
                write!(f, "Max reconnect attempts reached ({attempts})")
            }
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            Self::MessageParse(e) => Some(e),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<WsError> for Error {
    fn from(e: WsError) -> Self {
        let kind = match e {
            WsError::AuthenticationFailed { .. } => Kind::Authentication,
            WsError::AuthenticationTimeout(_) => Kind::Timeout,
            _ => Kind::WebSocket,
        };
        Error::with_source(kind, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::with_source(Kind::WebSocket, WsError::Connection(e))
    }
}
