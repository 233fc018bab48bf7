//! Request objects sent on the command endpoint.
//!
//! A `Request` is a JSON object that always carries a non-empty string
//! `action` plus action-specific parameters. It is serialized to exactly one
//! text frame per send.
use serde_json::{Map, Value};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::error::BridgeError;
use crate::result::Result;

/// Name of the mandatory request field.
pub const ACTION: &str = "action";

/// Actions understood by the bridge. Any other non-empty string is forwarded as is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum Action {
    /// Account summary: balance, equity, margin.
    Account,
    /// Balance only.
    Balance,
    /// Subscribes a symbol/timeframe to the quote stream.
    Config,
    /// Historical bars or ticks for a time window.
    History,
    /// Opens, modifies or closes orders and positions.
    Trade,
    /// Contract specification of one symbol.
    SymbolInfo,
    /// Economic calendar entries.
    Calendar,
    /// Open positions.
    Positions,
    /// Pending orders.
    Orders,
    /// Tradable symbols.
    Instruments,
    /// Liveness check.
    Ping,
}

/// One command for the bridge: `{action, ...params}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    action: String,
    params: Map<String, Value>,
}

impl Request {
    /// Creates a request with no parameters. The action must not be blank.
    pub fn new(action: &str) -> Result<Self> {
        if action.trim().is_empty() {
            return Err(BridgeError::Config(String::from(
                "request action must be a non-empty string",
            )));
        }
        Ok(Self {
            action: String::from(action),
            params: Map::new(),
        })
    }

    /// Creates a request from an action and a parameter map.
    ///
    /// A parameter named `action` is dropped: the explicit action always wins.
    pub fn with_params(action: &str, mut params: Map<String, Value>) -> Result<Self> {
        let mut request = Self::new(action)?;
        params.remove(ACTION);
        request.params = params;
        Ok(request)
    }

    /// Adds or replaces one parameter.
    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        if key != ACTION {
            self.params.insert(String::from(key), value.into());
        }
        self
    }

    /// Action name as sent on the wire.
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Parameters sent next to `action`.
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// The request as one JSON object.
    pub fn to_value(&self) -> Value {
        let mut object = Map::with_capacity(self.params.len() + 1);
        object.insert(String::from(ACTION), Value::String(self.action.clone()));
        for (key, value) in &self.params {
            object.insert(key.clone(), value.clone());
        }
        Value::Object(object)
    }

    /// Serializes the request to a single-line JSON text frame.
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_value())?)
    }

    /// Parses a received frame back into a request (used by the simulator).
    pub fn from_frame(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(mut object) = value else {
            return Err(BridgeError::Config(String::from(
                "request frame is not a JSON object",
            )));
        };
        let action = match object.remove(ACTION) {
            Some(Value::String(action)) => action,
            _ => {
                return Err(BridgeError::Config(String::from(
                    "request frame has no string action",
                )));
            }
        };
        Self::with_params(&action, object)
    }
}

impl From<Action> for Request {
    fn from(action: Action) -> Self {
        Self {
            action: action.to_string(),
            params: Map::new(),
        }
    }
}
