//! Simulated trading account: balance plus open positions.
use serde::Serialize;

/// Starting balance of every simulated account.
pub const INITIAL_BALANCE: f64 = 10_000.0;
/// Leverage used for the margin estimate.
pub const LEVERAGE: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub id: u64,
    pub magic: u64,
    pub symbol: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub volume: f64,
    pub open: f64,
    pub stoploss: f64,
    pub takeprofit: f64,
    pub comment: String,
}

impl Position {
    fn notional(&self) -> f64 {
        self.volume * self.open * contract_size(&self.symbol)
    }
}

/// Units per lot: 100k for currency pairs, 1 for everything else.
pub fn contract_size(symbol: &str) -> f64 {
    let symbol = symbol.to_ascii_uppercase();
    let is_pair = symbol.chars().take(6).filter(char::is_ascii_alphabetic).count() == 6
        && !symbol.starts_with("XAU")
        && !symbol.starts_with("BTC")
        && !symbol.starts_with("ETH");
    if is_pair { 100_000.0 } else { 1.0 }
}

#[derive(Debug, Clone)]
pub struct Account {
    pub balance: f64,
    positions: Vec<Position>,
    next_ticket: u64,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            balance: INITIAL_BALANCE,
            positions: Vec::new(),
            next_ticket: 100_001,
        }
    }
}

impl Account {
    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn margin(&self) -> f64 {
        self.positions.iter().map(Position::notional).sum::<f64>() / LEVERAGE
    }

    pub fn equity(&self) -> f64 {
        self.balance
    }

    pub fn margin_free(&self) -> f64 {
        self.equity() - self.margin()
    }

    pub fn margin_level(&self) -> f64 {
        let margin = self.margin();
        if margin > 0.0 { self.equity() / margin * 100.0 } else { 0.0 }
    }

    /// Opens a position and returns its ticket.
    pub fn open(&mut self, symbol: &str, kind: &str, volume: f64, price: f64, comment: &str) -> u64 {
        let id = self.next_ticket;
        self.next_ticket += 1;
        self.positions.push(Position {
            id,
            magic: 0,
            symbol: symbol.to_string(),
            kind: kind.to_string(),
            volume,
            open: price,
            stoploss: 0.0,
            takeprofit: 0.0,
            comment: comment.to_string(),
        });
        id
    }

    /// Closes the position with ticket `id`, returning it when it existed.
    pub fn close(&mut self, id: u64) -> Option<Position> {
        let index = self.positions.iter().position(|p| p.id == id)?;
        Some(self.positions.remove(index))
    }
}
