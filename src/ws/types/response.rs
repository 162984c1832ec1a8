use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::serde_as;

use crate::serde_helpers::U64FromAny;
use crate::types::Decimal;

/// Batch of topic messages pushed by the server: `{"messages": [...]}`.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, Builder)]
pub struct Envelope {
    #[serde(default)]
    #[builder(default)]
    pub messages: Vec<WsMessage>,
}

/// One topic message inside an [`Envelope`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Builder)]
pub struct WsMessage {
    /// Topic the message was published on (e.g. `instrument:1001`, `private`)
    #[builder(into)]
    pub topic: String,
    /// JSON document encoded as a string
    #[builder(into)]
    pub content: String,
    #[serde(default)]
    #[builder(into, default)]
    pub id: String,
    #[serde(rename = "type", default)]
    #[builder(into, default)]
    pub msg_type: String,
}

/// Response to the `Authenticate` operation.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AuthResponse {
    /// Correlation id echoed from the request, when the server sends one
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "errorCode", default)]
    pub error_code: Option<Value>,
    #[serde(rename = "errorMessage", default)]
    pub error_message: Option<String>,
}

impl AuthResponse {
    /// The server's error code when the handshake was rejected.
    ///
    /// Null, `false`, `0` and the empty string mean success.
    #[must_use]
    pub fn rejection(&self) -> Option<String> {
        match self.error_code.as_ref()? {
            Value::Null | Value::Bool(false) => None,
            Value::String(code) if code.is_empty() => None,
            Value::String(code) => Some(code.clone()),
            Value::Number(code) if code.as_i64() == Some(0) => None,
            other => Some(other.to_string()),
        }
    }
}

/// Classified server frame.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Authenticate(AuthResponse),
    Data(Envelope),
    /// Anything else, kept as raw JSON
    Other(Value),
}

impl ServerMessage {
    /// Classifies a text frame by its shape.
    ///
    /// A frame whose `operation` or `type` is `Authenticate` is an auth response; a frame with a
    /// non-empty `messages` array is data.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(text)?;

        let is_auth = ["operation", "type"]
            .iter()
            .any(|key| value.get(key).and_then(Value::as_str) == Some("Authenticate"));
        if is_auth {
            return Ok(Self::Authenticate(serde_json::from_value(value)?));
        }

        let has_messages = value
            .get("messages")
            .and_then(Value::as_array)
            .is_some_and(|messages| !messages.is_empty());
        if has_messages {
            return Ok(Self::Data(serde_json::from_value(value)?));
        }

        Ok(Self::Other(value))
    }
}

/// Quote pushed on `instrument:<id>` topics.
#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Builder)]
pub struct InstrumentRate {
    #[serde(rename = "Ask")]
    pub ask: Decimal,
    #[serde(rename = "Bid")]
    pub bid: Decimal,
    #[serde(rename = "LastExecution", default)]
    #[builder(default)]
    pub last_execution: Decimal,
    /// Quote timestamp as sent by the server (ISO 8601)
    #[serde(rename = "Date", default)]
    #[builder(into, default)]
    pub date: String,
    #[serde_as(as = "U64FromAny")]
    #[serde(rename = "PriceRateID", default)]
    #[builder(default)]
    pub price_rate_id: u64,
}

/// Order and position lifecycle event pushed on the `private` topic.
///
/// Fields the SDK does not model are kept in [`PrivateEvent::extra`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Builder)]
#[serde(rename_all = "PascalCase")]
pub struct PrivateEvent {
    #[serde(rename = "OrderID")]
    pub order_id: i64,
    pub order_type: i64,
    #[serde(rename = "StatusID")]
    pub status_id: i64,
    #[serde(rename = "InstrumentID")]
    pub instrument_id: i64,
    /// Customer id
    #[serde(rename = "CID")]
    pub cid: i64,
    #[serde(default)]
    #[builder(default)]
    pub requested_units: Decimal,
    #[serde(default)]
    #[builder(default)]
    pub executed_units: Decimal,
    #[serde(default)]
    #[builder(default)]
    pub net_profit: Decimal,
    #[serde(default)]
    #[builder(into, default)]
    pub close_reason: String,
    #[serde(default)]
    #[builder(into, default)]
    pub open_date_time: String,
    #[serde(default)]
    #[builder(into, default)]
    pub request_occurred: String,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(rename = "PositionID", default)]
    pub position_id: Option<i64>,
    #[serde(default)]
    pub rate: Option<Decimal>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub is_buy: Option<bool>,
    #[serde(default)]
    pub leverage: Option<i64>,
    #[serde(flatten)]
    #[builder(default)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::dec;

    #[test]
    fn parse_envelope() {
        let text = r#"{"messages":[{"topic":"instrument:1001","content":"{\"Ask\":1}","id":"m1","type":"Trading.Instrument.Rate"}]}"#;

        let ServerMessage::Data(envelope) = ServerMessage::parse(text).unwrap() else {
            panic!("expected data frame");
        };
        assert_eq!(envelope.messages.len(), 1);
        assert_eq!(envelope.messages[0].topic, "instrument:1001");
        assert_eq!(envelope.messages[0].msg_type, "Trading.Instrument.Rate");
    }

    #[test]
    fn parse_auth_response_by_operation_or_type() {
        let by_operation = ServerMessage::parse(r#"{"operation":"Authenticate"}"#).unwrap();
        assert!(matches!(by_operation, ServerMessage::Authenticate(_)));

        let by_type = ServerMessage::parse(r#"{"type":"Authenticate","id":"abc"}"#).unwrap();
        let ServerMessage::Authenticate(response) = by_type else {
            panic!("expected auth response");
        };
        assert_eq!(response.id.as_deref(), Some("abc"));
        assert_eq!(response.rejection(), None);
    }

    #[test]
    fn auth_rejection_codes() {
        let response = |code: Value| AuthResponse {
            error_code: Some(code),
            ..AuthResponse::default()
        };

        assert_eq!(
            response(json!("INVALID_KEY")).rejection().as_deref(),
            Some("INVALID_KEY")
        );
        assert_eq!(response(json!(401)).rejection().as_deref(), Some("401"));
        assert_eq!(response(json!(0)).rejection(), None);
        assert_eq!(response(json!("")).rejection(), None);
        assert_eq!(response(Value::Null).rejection(), None);
    }

    #[test]
    fn empty_messages_are_not_data() {
        let parsed = ServerMessage::parse(r#"{"messages":[]}"#).unwrap();
        assert!(matches!(parsed, ServerMessage::Other(_)));
    }

    #[test]
    fn deserialize_instrument_rate() {
        let rate: InstrumentRate = serde_json::from_value(json!({
            "Ask": 150.25,
            "Bid": 150.10,
            "LastExecution": 150.2,
            "Date": "2025-01-15T14:30:00Z",
            "PriceRateID": 12345
        }))
        .unwrap();

        assert_eq!(rate.ask, dec!(150.25));
        assert_eq!(rate.bid, dec!(150.10));
        assert_eq!(rate.last_execution, dec!(150.2));
        assert_eq!(rate.price_rate_id, 12345);
    }

    #[test]
    fn deserialize_private_event_keeps_extra_fields() {
        let event: PrivateEvent = serde_json::from_value(json!({
            "OrderID": 1,
            "OrderType": 17,
            "StatusID": 3,
            "InstrumentID": 1001,
            "CID": 42,
            "ExecutedUnits": 2.5,
            "PositionID": 777,
            "IsBuy": true,
            "MirrorID": 0
        }))
        .unwrap();

        assert_eq!(event.order_id, 1);
        assert_eq!(event.executed_units, dec!(2.5));
        assert_eq!(event.requested_units, Decimal::ZERO);
        assert_eq!(event.position_id, Some(777));
        assert_eq!(event.is_buy, Some(true));
        assert_eq!(event.error_code, None);
        assert_eq!(event.extra.get("MirrorID"), Some(&json!(0)));
    }

    #[test]
    fn private_event_requires_identifiers() {
        let result = serde_json::from_value::<PrivateEvent>(json!({ "OrderID": 1 }));
        result.unwrap_err();
    }
}
