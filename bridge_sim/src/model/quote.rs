//! Synthetic market data for the simulated bridge.
//!
//! A `SymbolFeed` keeps the last price of one subscribed symbol/timeframe and
//! produces the payloads the bridge pushes on its quote endpoint:
//! `{symbol, timeframe, status, data}` where `data` is `[time_ms, bid, ask]`
//! for `TICK` subscriptions and `[time_s, open, high, low, close, volume]`
//! for bar timeframes.
use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::{Value, json};

/// Timeframe name of bid/ask subscriptions.
pub const TICK: &str = "TICK";
/// Status reported with every push while the feed runs.
pub const STATUS_CONNECTED: &str = "CONNECTED";

/// Next price of a random walk: uniform change in `[-1%, +1%]`, never below 0.01.
pub fn next_price(current_price: f64) -> f64 {
    let mut rng = rand::rng();
    let change: f64 = rng.random_range(-0.01..0.01);
    let new_price = current_price * (1.0 + change);
    new_price.max(0.01)
}

/// Plausible starting price for well-known symbols.
pub fn initial_price(symbol: &str) -> f64 {
    let symbol = symbol.to_ascii_uppercase();
    if symbol.starts_with("XAU") {
        2650.0
    } else if symbol.starts_with("BTC") {
        97000.0
    } else if symbol.starts_with("ETH") {
        3300.0
    } else if symbol.starts_with("EUR") || symbol.starts_with("GBP") {
        1.08
    } else if symbol.ends_with("JPY") {
        155.0
    } else {
        100.0
    }
}

/// Bar length in seconds; unknown names count as one minute.
pub fn timeframe_secs(timeframe: &str) -> i64 {
    match timeframe.to_ascii_uppercase().as_str() {
        "M1" => 60,
        "M5" => 300,
        "M15" => 900,
        "M30" => 1800,
        "H1" => 3600,
        "H4" => 4 * 3600,
        "D1" => 24 * 3600,
        "W1" => 7 * 24 * 3600,
        "MN1" => 30 * 24 * 3600,
        _ => 60,
    }
}

/// Half the quoted spread as a fraction of price.
const HALF_SPREAD: f64 = 0.00005;

fn round(value: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits);
    (value * scale).round() / scale
}

/// Price digits used when quoting `price`.
pub fn digits(price: f64) -> i32 {
    if price < 10.0 { 5 } else { 2 }
}

/// Bid/ask pair around a mid price.
pub fn bid_ask(mid: f64) -> (f64, f64) {
    let digits = digits(mid);
    (round(mid * (1.0 - HALF_SPREAD), digits), round(mid * (1.0 + HALF_SPREAD), digits))
}

/// One bar starting at `open`, walking to a new close.
pub fn bar(time: i64, open: f64) -> (Value, f64) {
    let mut rng = rand::rng();
    let close = next_price(open);
    let high = open.max(close) * (1.0 + rng.random_range(0.0..0.002));
    let low = open.min(close) * (1.0 - rng.random_range(0.0..0.002));
    let volume: u32 = rng.random_range(1..500);
    let digits = digits(open);
    let data = json!([
        time,
        round(open, digits),
        round(high, digits),
        round(low, digits),
        round(close, digits),
        volume
    ]);
    (data, close)
}

/// Live price state of one subscription.
#[derive(Debug, Clone)]
pub struct SymbolFeed {
    symbol: String,
    timeframe: String,
    price: f64,
}

impl SymbolFeed {
    pub fn new(symbol: &str, timeframe: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_ascii_uppercase(),
            price: initial_price(symbol),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> &str {
        &self.timeframe
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    /// Advances the walk and returns the next push payload.
    pub fn next_payload(&mut self, now: DateTime<Utc>) -> Value {
        let data = if self.timeframe == TICK {
            self.price = next_price(self.price);
            let (bid, ask) = bid_ask(self.price);
            json!([now.timestamp_millis(), bid, ask])
        } else {
            let secs = timeframe_secs(&self.timeframe);
            let open_time = now.timestamp() - now.timestamp().rem_euclid(secs);
            let (data, close) = bar(open_time, self.price);
            self.price = close;
            data
        };
        json!({
            "symbol": self.symbol,
            "timeframe": self.timeframe,
            "status": STATUS_CONNECTED,
            "data": data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_common::Payload;
    use bridge_common::payload::{Tick, TickData};

    #[test]
    fn random_walk_stays_within_one_percent() {
        let mut price = 100.0;
        for _ in 0..1000 {
            let next = next_price(price);
            assert!((next / price - 1.0).abs() <= 0.01 + 1e-12);
            price = next;
        }
        assert_eq!(next_price(0.001), 0.01);
    }

    #[test]
    fn tick_feed_pushes_bid_ask() {
        let mut feed = SymbolFeed::new("BTCUSD", "tick");
        let now = DateTime::<Utc>::from_timestamp(1_736_762_400, 0).unwrap();
        let tick = Tick::from_payload(&Payload::from(feed.next_payload(now))).unwrap();
        assert_eq!(tick.symbol, "BTCUSD");
        assert_eq!(tick.timeframe.as_deref(), Some(TICK));
        match tick.data {
            Some(TickData::Quote { time_ms, bid, ask }) => {
                assert_eq!(time_ms, 1_736_762_400_000);
                assert!(ask > bid);
            }
            other => panic!("expected a quote, got {:?}", other),
        }
    }

    #[test]
    fn bar_feed_aligns_to_timeframe() {
        let mut feed = SymbolFeed::new("XAUUSD", "M5");
        let now = DateTime::<Utc>::from_timestamp(1_736_762_467, 0).unwrap();
        let tick = Tick::from_payload(&Payload::from(feed.next_payload(now))).unwrap();
        match tick.data {
            Some(TickData::Bar { time, open, high, low, close, .. }) => {
                assert_eq!(time % 300, 0);
                assert!(high >= open.max(close) && low <= open.min(close));
            }
            other => panic!("expected a bar, got {:?}", other),
        }
    }
}
