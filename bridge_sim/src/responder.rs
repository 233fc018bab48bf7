//! Command handling of the simulated bridge.
//!
//! Every request is acknowledged on the command endpoint right away; the
//! actual answer is pushed afterwards as a result envelope
//! `{error, description, ...}`. Trades additionally push a trade event, and
//! `CONFIG` subscriptions start the quote stream.
use std::collections::HashMap;

use bridge_common::{Action, Endpoint, Request};
use chrono::Utc;
use crossbeam_channel::Sender;
use log::{info, warn};
use serde_json::{Value, json};

use crate::generator::Subscription;
use crate::model::account::{Account, contract_size};
use crate::model::quote::{self, TICK};

/// Most bars or ticks returned by one `HISTORY` request.
pub const HISTORY_LIMIT: i64 = 1000;
/// Symbols listed by `INSTRUMENTS`.
pub const INSTRUMENTS: [&str; 6] = ["EURUSD", "GBPUSD", "USDJPY", "XAUUSD", "BTCUSD", "ETHUSD"];

/// What the bridge sends back for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Reply on the command endpoint.
    pub ack: String,
    /// Frames queued on the push endpoints, in order.
    pub pushes: Vec<(Endpoint, Value)>,
}

fn success(mut fields: Value) -> Value {
    if let Some(object) = fields.as_object_mut() {
        object.insert(String::from("error"), Value::Bool(false));
        object
            .entry("description")
            .or_insert_with(|| Value::from("Success"));
    }
    fields
}

fn failure(description: &str) -> Value {
    json!({"error": true, "description": description})
}

fn text<'a>(request: &'a Request, key: &str) -> Option<&'a str> {
    request.params().get(key).and_then(Value::as_str)
}

fn number(request: &Request, key: &str) -> Option<f64> {
    request.params().get(key).and_then(Value::as_f64)
}

fn integer(request: &Request, key: &str) -> Option<i64> {
    let value = request.params().get(key)?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|v| v as i64))
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Turns requests into acknowledgments and pushes.
#[derive(Debug)]
pub struct Responder {
    account: Account,
    prices: HashMap<String, f64>,
    subscriptions: Sender<Subscription>,
}

impl Responder {
    pub fn new(subscriptions: Sender<Subscription>) -> Self {
        Self {
            account: Account::default(),
            prices: HashMap::new(),
            subscriptions,
        }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Handles one request frame.
    pub fn handle(&mut self, frame: &str) -> Outcome {
        let request = match Request::from_frame(frame) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejected request {:?}: {}", frame, e);
                return Outcome {
                    ack: json!({"status": "error", "description": format!("invalid request: {}", e)}).to_string(),
                    pushes: Vec::new(),
                };
            }
        };
        info!("Received command {}", request.action());
        Outcome {
            ack: json!({"status": "ok", "action": request.action()}).to_string(),
            pushes: self.dispatch(&request),
        }
    }

    fn dispatch(&mut self, request: &Request) -> Vec<(Endpoint, Value)> {
        let Ok(action) = request.action().parse::<Action>() else {
            return vec![(
                Endpoint::Result,
                json!({"error": true, "description": "Unknown action", "action": request.action()}),
            )];
        };
        let result = match action {
            Action::Ping => return Vec::new(),
            Action::Trade => return self.trade(request),
            Action::Account => self.account_info(),
            Action::Balance => self.balance(),
            Action::Config => self.configure(request),
            Action::History => self.history(request),
            Action::SymbolInfo => self.symbol_info(request),
            Action::Calendar => success(json!({"data": []})),
            Action::Positions => success(json!({"data": self.account.positions()})),
            Action::Orders => success(json!({"data": []})),
            Action::Instruments => success(json!({"data": INSTRUMENTS})),
        };
        vec![(Endpoint::Result, result)]
    }

    /// Next mid price of `symbol`, walking from its last value.
    fn price(&mut self, symbol: &str) -> f64 {
        let price = self
            .prices
            .entry(symbol.to_ascii_uppercase())
            .or_insert_with(|| quote::initial_price(symbol));
        *price = quote::next_price(*price);
        *price
    }

    fn account_info(&self) -> Value {
        success(json!({
            "broker": "Simulated Broker",
            "currency": "USD",
            "server": "Sim-Demo",
            "trading_allowed": true,
            "bot_trading": true,
            "data": {
                "balance": self.account.balance,
                "equity": self.account.equity(),
                "margin": self.account.margin(),
                "margin_free": self.account.margin_free(),
                "margin_level": self.account.margin_level(),
            }
        }))
    }

    fn balance(&self) -> Value {
        success(json!({
            "data": {
                "balance": self.account.balance,
                "equity": self.account.equity(),
                "margin": self.account.margin(),
                "margin_free": self.account.margin_free(),
            }
        }))
    }

    fn configure(&mut self, request: &Request) -> Value {
        let Some(symbol) = text(request, "symbol").filter(|s| !s.trim().is_empty()) else {
            return failure("Symbol is required");
        };
        let timeframe = text(request, "chartTF").unwrap_or("M1").to_ascii_uppercase();
        let subscription = Subscription {
            symbol: symbol.to_string(),
            timeframe: timeframe.clone(),
        };
        if self.subscriptions.send(subscription).is_err() {
            return failure("Quote feed is not running");
        }
        success(json!({"symbol": symbol, "timeframe": timeframe}))
    }

    fn history(&mut self, request: &Request) -> Value {
        let Some(symbol) = text(request, "symbol").map(str::to_string) else {
            return failure("Symbol is required");
        };
        let timeframe = text(request, "chartTF").unwrap_or("M1").to_ascii_uppercase();
        let to = integer(request, "toDate").unwrap_or_else(|| Utc::now().timestamp());
        let from = integer(request, "fromDate").unwrap_or(to - 3600);
        if from > to {
            return failure("fromDate is after toDate");
        }

        let step = if timeframe == TICK { 1 } else { quote::timeframe_secs(&timeframe) };
        let last = to - to.rem_euclid(step);
        let count = if last < from { 0 } else { ((last - from) / step + 1).min(HISTORY_LIMIT) };
        let mut price = self.price(&symbol);
        let data: Vec<Value> = (0..count)
            .map(|i| {
                let time = last - (count - 1 - i) * step;
                if timeframe == TICK {
                    price = quote::next_price(price);
                    let (bid, ask) = quote::bid_ask(price);
                    json!([time * 1000, bid, ask])
                } else {
                    let (bar, close) = quote::bar(time, price);
                    price = close;
                    bar
                }
            })
            .collect();
        success(json!({"symbol": symbol, "timeframe": timeframe, "data": data}))
    }

    fn symbol_info(&mut self, request: &Request) -> Value {
        let Some(symbol) = text(request, "symbol").map(str::to_string) else {
            return failure("Symbol is required");
        };
        let mid = self.price(&symbol);
        let (bid, ask) = quote::bid_ask(mid);
        let digits = quote::digits(mid);
        let point = 10f64.powi(-digits);
        success(json!({
            "data": {
                "symbol": symbol,
                "digits": digits,
                "point": point,
                "bid": bid,
                "ask": ask,
                "spread": ((ask - bid) / point).round(),
                "contract_size": contract_size(&symbol),
                "volume_min": 0.01,
                "volume_max": 100.0,
                "volume_step": 0.01,
            }
        }))
    }

    fn trade(&mut self, request: &Request) -> Vec<(Endpoint, Value)> {
        let action_type = text(request, "actionType").unwrap_or("ORDER_TYPE_BUY");
        let (result, event) = match action_type {
            "ORDER_TYPE_BUY" | "ORDER_TYPE_SELL" => match self.open_position(request, action_type) {
                Ok(pair) => pair,
                Err(description) => return vec![(Endpoint::Result, failure(description))],
            },
            "POSITION_CLOSE_ID" => {
                let Some(position) = integer(request, "id")
                    .and_then(|id| u64::try_from(id).ok())
                    .and_then(|id| self.account.close(id))
                else {
                    return vec![(Endpoint::Result, failure("Position not found"))];
                };
                let (bid, ask) = quote::bid_ask(self.price(&position.symbol));
                let price = if position.kind == "buy" { bid } else { ask };
                (
                    success(json!({"order": position.id, "volume": position.volume, "price": price})),
                    json!({
                        "event": "trade",
                        "ticket": position.id,
                        "type": "close",
                        "volume": position.volume,
                        "symbol": position.symbol,
                        "price": price,
                    }),
                )
            }
            other => {
                return vec![(
                    Endpoint::Result,
                    failure(&format!("Unsupported actionType: {}", other)),
                )];
            }
        };
        vec![(Endpoint::Result, result), (Endpoint::Event, event)]
    }

    fn open_position(&mut self, request: &Request, action_type: &str) -> Result<(Value, Value), &'static str> {
        let symbol = text(request, "symbol")
            .filter(|s| !s.trim().is_empty())
            .ok_or("Symbol is required")?
            .to_string();
        let volume = number(request, "volume")
            .filter(|v| *v > 0.0)
            .ok_or("Volume must be positive")?;
        let kind = if action_type == "ORDER_TYPE_BUY" { "buy" } else { "sell" };
        let (bid, ask) = quote::bid_ask(self.price(&symbol));
        let price = if kind == "buy" { ask } else { bid };
        let comment = text(request, "comment").unwrap_or_default();
        let ticket = self.account.open(&symbol, kind, volume, price, comment);
        Ok((
            success(json!({"order": ticket, "volume": volume, "price": price})),
            json!({
                "event": "trade",
                "ticket": ticket,
                "type": kind,
                "volume": volume,
                "symbol": symbol,
                "price": price,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_common::Payload;
    use bridge_common::payload::TradeEvent;
    use crossbeam_channel::Receiver;

    fn responder() -> (Responder, Receiver<Subscription>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Responder::new(tx), rx)
    }

    fn result(outcome: &Outcome) -> Payload {
        assert_eq!(outcome.pushes[0].0, Endpoint::Result);
        Payload::from(outcome.pushes[0].1.clone())
    }

    #[test]
    fn account_request_is_acknowledged_then_answered() {
        let (mut responder, _rx) = responder();
        let outcome = responder.handle(r#"{"action":"ACCOUNT"}"#);
        let ack: Value = serde_json::from_str(&outcome.ack).unwrap();
        assert_eq!(ack, json!({"status": "ok", "action": "ACCOUNT"}));

        let payload = result(&outcome);
        assert!(!payload.is_error());
        assert_eq!(payload.data().unwrap()["balance"], 10000.0);
    }

    #[test]
    fn unknown_and_invalid_requests() {
        let (mut responder, _rx) = responder();
        let outcome = responder.handle(r#"{"action":"FLY"}"#);
        let payload = result(&outcome);
        assert!(payload.is_error());
        assert_eq!(payload.description(), Some("Unknown action"));

        let outcome = responder.handle("not json");
        assert!(outcome.ack.contains("error"));
        assert!(outcome.pushes.is_empty());

        assert!(responder.handle(r#"{"action":"PING"}"#).pushes.is_empty());
    }

    #[test]
    fn config_subscribes_the_generator() {
        let (mut responder, rx) = responder();
        let outcome = responder.handle(r#"{"action":"CONFIG","symbol":"BTCUSD","chartTF":"tick"}"#);
        assert!(!result(&outcome).is_error());
        assert_eq!(
            rx.try_recv().unwrap(),
            Subscription {
                symbol: String::from("BTCUSD"),
                timeframe: String::from("TICK"),
            }
        );

        let outcome = responder.handle(r#"{"action":"CONFIG"}"#);
        assert_eq!(result(&outcome).description(), Some("Symbol is required"));
    }

    #[test]
    fn trade_pushes_result_and_event() {
        let (mut responder, _rx) = responder();
        let outcome = responder.handle(
            r#"{"action":"TRADE","actionType":"ORDER_TYPE_BUY","symbol":"EURUSD","volume":0.1}"#,
        );
        assert_eq!(outcome.pushes.len(), 2);
        let ticket = result(&outcome).get("order").unwrap().as_u64().unwrap();

        assert_eq!(outcome.pushes[1].0, Endpoint::Event);
        let event = TradeEvent::from_payload(&Payload::from(outcome.pushes[1].1.clone())).unwrap();
        assert_eq!(event.ticket, Some(ticket));
        assert_eq!(event.kind.as_deref(), Some("buy"));
        assert_eq!(responder.account().positions().len(), 1);

        let close = format!(r#"{{"action":"TRADE","actionType":"POSITION_CLOSE_ID","id":{}}}"#, ticket);
        let outcome = responder.handle(&close);
        assert!(!result(&outcome).is_error());
        assert!(responder.account().positions().is_empty());

        let outcome = responder.handle(&close);
        assert_eq!(result(&outcome).description(), Some("Position not found"));
    }

    #[test]
    fn trade_requires_volume() {
        let (mut responder, _rx) = responder();
        let outcome = responder.handle(r#"{"action":"TRADE","symbol":"EURUSD","volume":0}"#);
        assert_eq!(outcome.pushes.len(), 1);
        assert_eq!(result(&outcome).description(), Some("Volume must be positive"));
    }

    #[test]
    fn history_returns_aligned_bars() {
        let (mut responder, _rx) = responder();
        let outcome = responder.handle(
            r#"{"action":"HISTORY","symbol":"XAUUSD","chartTF":"M1","fromDate":1736762400,"toDate":1736766000}"#,
        );
        let payload = result(&outcome);
        assert_eq!(payload.data_len(), Some(61));
        let bars = payload.data().unwrap().as_array().unwrap();
        assert_eq!(bars[0][0], 1736762400);
        assert_eq!(bars[60][0], 1736766000);

        let outcome = responder.handle(
            r#"{"action":"HISTORY","symbol":"BTCUSD","chartTF":"TICK","fromDate":1736762400,"toDate":1736766000}"#,
        );
        assert_eq!(result(&outcome).data_len(), Some(HISTORY_LIMIT as usize));
    }
}
