use secrecy::ExposeSecret as _;
use serde::Serialize;
use uuid::Uuid;

use crate::auth::Credentials;

/// Streaming operation name.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Operation {
    Authenticate,
    Subscribe,
    Unsubscribe,
}

/// Client to server operation: `{"id": ..., "operation": ..., "data": {...}}`.
///
/// Every request carries a fresh UUID so responses can be correlated.
#[non_exhaustive]
#[derive(Clone, Debug, Serialize)]
pub struct Request {
    pub id: String,
    pub operation: Operation,
    pub data: RequestData,
}

impl Request {
    /// Create an `Authenticate` request.
    #[must_use]
    pub fn authenticate(credentials: &Credentials) -> Self {
        Self::new(
            Operation::Authenticate,
            RequestData::Authenticate(credentials.clone()),
        )
    }

    /// Create a `Subscribe` request. `snapshot` asks the server for the current value of each
    /// topic.
    #[must_use]
    pub fn subscribe(topics: Vec<String>, snapshot: bool) -> Self {
        Self::new(
            Operation::Subscribe,
            RequestData::Subscribe { topics, snapshot },
        )
    }

    /// Create an `Unsubscribe` request.
    #[must_use]
    pub fn unsubscribe(topics: Vec<String>) -> Self {
        Self::new(Operation::Unsubscribe, RequestData::Unsubscribe { topics })
    }

    fn new(operation: Operation, data: RequestData) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation,
            data,
        }
    }
}

/// Operation payload.
///
/// # Security
///
/// When serialized, [`RequestData::Authenticate`] exposes the API and user keys in plaintext.
/// Requests are only written to the streaming connection and never logged.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub enum RequestData {
    Authenticate(Credentials),
    Subscribe { topics: Vec<String>, snapshot: bool },
    Unsubscribe { topics: Vec<String> },
}

impl Serialize for RequestData {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap as _;

        let mut map = serializer.serialize_map(None)?;

        match self {
            Self::Authenticate(credentials) => {
                map.serialize_entry("userKey", credentials.user_key().expose_secret())?;
                map.serialize_entry("apiKey", credentials.api_key().expose_secret())?;
            }
            Self::Subscribe { topics, snapshot } => {
                map.serialize_entry("topics", topics)?;
                map.serialize_entry("snapshot", snapshot)?;
            }
            Self::Unsubscribe { topics } => {
                map.serialize_entry("topics", topics)?;
            }
        }

        map.end()
    }
}
