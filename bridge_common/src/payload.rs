//! Payloads received on the result, quote and event endpoints.
//!
//! Every inbound frame becomes a `Payload`. Frames that are not valid JSON
//! are turned into a synthetic error envelope instead of an error, so polling
//! loops only ever branch on `is_error()`:
//!
//! ```json
//! {"error": true, "description": "JSON decode error", "raw_error": "..."}
//! ```
//!
//! The conventional result envelope is `{error, description, data}`; `data`
//! is never interpreted here.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Description used by the synthetic envelope for unparseable frames.
pub const DECODE_ERROR: &str = "JSON decode error";

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Value);

impl Payload {
    /// Parses a text frame. Never fails: bad JSON yields the synthetic envelope.
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Payload(value),
            Err(e) => Self::decode_failure(&e.to_string()),
        }
    }

    /// Synthetic envelope describing a parse failure.
    pub fn decode_failure(raw_error: &str) -> Self {
        Payload(json!({
            "error": true,
            "description": DECODE_ERROR,
            "raw_error": raw_error,
        }))
    }

    /// `true` when the envelope's `error` flag is set.
    ///
    /// Payloads without an `error` field (ticks, events) are not errors.
    pub fn is_error(&self) -> bool {
        self.0.get("error").and_then(Value::as_bool).unwrap_or(false)
    }

    /// `true` for the synthetic envelope produced by `decode_failure`.
    pub fn is_decode_failure(&self) -> bool {
        self.is_error() && self.description() == Some(DECODE_ERROR) && self.0.get("raw_error").is_some()
    }

    /// Human-readable reason of an error envelope.
    pub fn description(&self) -> Option<&str> {
        self.0.get("description").and_then(Value::as_str)
    }

    /// The `data` member carried by most payloads.
    pub fn data(&self) -> Option<&Value> {
        self.0.get("data")
    }

    /// Top-level field lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Fields of an object payload, if it is one.
    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        self.0.as_object()
    }

    /// The raw JSON value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Unwraps the raw JSON value.
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Number of items when `data` is an array.
    pub fn data_len(&self) -> Option<usize> {
        self.data().and_then(Value::as_array).map(Vec::len)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload(value)
    }
}

/// Price sample carried by a quote push.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickData {
    /// Closed or forming bar: `[time_s, open, high, low, close, volume]`.
    #[allow(missing_docs)]
    Bar {
        time: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    },
    /// Bid/ask update: `[time_ms, bid, ask]`.
    #[allow(missing_docs)]
    Quote { time_ms: i64, bid: f64, ask: f64 },
}

impl TickData {
    fn from_array(items: &[Value]) -> Option<Self> {
        let numbers: Option<Vec<f64>> = items.iter().map(Value::as_f64).collect();
        let numbers = numbers?;
        match numbers.len() {
            n if n >= 6 => Some(TickData::Bar {
                time: numbers[0] as i64,
                open: numbers[1],
                high: numbers[2],
                low: numbers[3],
                close: numbers[4],
                volume: numbers[5],
            }),
            3..=5 => Some(TickData::Quote {
                time_ms: numbers[0] as i64,
                bid: numbers[1],
                ask: numbers[2],
            }),
            _ => None,
        }
    }

    /// Ask minus bid for quote samples.
    pub fn spread(&self) -> Option<f64> {
        match self {
            TickData::Quote { bid, ask, .. } => Some(ask - bid),
            TickData::Bar { .. } => None,
        }
    }
}

/// Typed view of a quote-endpoint push: `{symbol, timeframe, status, data}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    /// Instrument, e.g. `EURUSD`.
    pub symbol: String,
    /// `TICK` or a bar timeframe such as `M1`.
    pub timeframe: Option<String>,
    /// Stream status reported by the terminal.
    pub status: Option<String>,
    /// `None` when the push carries no price array (status-only updates).
    pub data: Option<TickData>,
}

impl Tick {
    /// Reads a tick from a payload; `None` when it has no `symbol`.
    pub fn from_payload(payload: &Payload) -> Option<Self> {
        let symbol = payload.get("symbol")?.as_str()?.to_string();
        let text = |key: &str| payload.get(key).and_then(Value::as_str).map(String::from);
        let data = payload
            .data()
            .and_then(Value::as_array)
            .and_then(|items| TickData::from_array(items));
        Some(Tick {
            symbol,
            timeframe: text("timeframe"),
            status: text("status"),
            data,
        })
    }
}

/// Typed view of an event-endpoint push: `{event, ticket, type, volume}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    /// Event name, e.g. `trade`.
    pub event: String,
    /// Order or position ticket.
    #[serde(default)]
    pub ticket: Option<u64>,
    /// Trade direction, `buy` or `sell`.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Lots traded.
    #[serde(default)]
    pub volume: Option<f64>,
    /// Instrument traded.
    #[serde(default)]
    pub symbol: Option<String>,
    /// Fill price.
    #[serde(default)]
    pub price: Option<f64>,
}

impl TradeEvent {
    /// Reads a trade event from a payload; `None` when the shape does not match.
    pub fn from_payload(payload: &Payload) -> Option<Self> {
        serde_json::from_value(payload.as_value().clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_accessors() {
        let payload = Payload::parse(r#"{"error": false, "data": {"balance": 10000}}"#);
        assert!(!payload.is_error());
        assert_eq!(payload.data().unwrap()["balance"], 10000);
        assert_eq!(payload.description(), None);

        let payload = Payload::parse(r#"{"error": true, "description": "Invalid symbol", "error_code": 4301}"#);
        assert!(payload.is_error());
        assert!(!payload.is_decode_failure());
        assert_eq!(payload.description(), Some("Invalid symbol"));
    }

    #[test]
    fn malformed_text_becomes_error_envelope() {
        let payload = Payload::parse("not json");
        assert!(payload.is_error());
        assert!(payload.is_decode_failure());
        assert!(payload.description().unwrap().contains("decode"));
        assert!(!payload.get("raw_error").unwrap().as_str().unwrap().is_empty());
    }

    #[test]
    fn pushes_without_error_field_are_not_errors() {
        let payload = Payload::parse(r#"{"symbol": "EURUSD", "data": [1, 2, 3]}"#);
        assert!(!payload.is_error());
        assert_eq!(payload.data_len(), Some(3));
    }

    #[test]
    fn reads_tick_and_bar_pushes() {
        let tick = Tick::from_payload(&Payload::parse(
            r#"{"symbol":"BTCUSD","timeframe":"TICK","status":"CONNECTED","data":[1736762400000,97000.5,97010.5]}"#,
        ))
        .unwrap();
        assert_eq!(tick.symbol, "BTCUSD");
        assert_eq!(tick.timeframe.as_deref(), Some("TICK"));
        assert_eq!(tick.data.unwrap().spread(), Some(10.0));

        let bar = Tick::from_payload(&Payload::parse(
            r#"{"symbol":"XAUUSD","timeframe":"M1","data":[1736762400,2650.1,2651.0,2649.8,2650.5,120]}"#,
        ))
        .unwrap();
        assert!(matches!(bar.data, Some(TickData::Bar { volume, .. }) if volume == 120.0));

        let status_only = Tick::from_payload(&Payload::parse(r#"{"symbol":"XAUUSD","status":"DISCONNECTED"}"#)).unwrap();
        assert_eq!(status_only.data, None);
        assert!(Tick::from_payload(&Payload::parse(r#"{"data":[1,2,3]}"#)).is_none());
    }

    #[test]
    fn reads_trade_events() {
        let event = TradeEvent::from_payload(&Payload::parse(
            r#"{"event":"trade","ticket":12345,"type":"buy","volume":0.1}"#,
        ))
        .unwrap();
        assert_eq!(event.ticket, Some(12345));
        assert_eq!(event.kind.as_deref(), Some("buy"));
        assert!(TradeEvent::from_payload(&Payload::parse(r#"{"ticket":1}"#)).is_none());
    }
}
