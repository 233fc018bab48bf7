//! Domain models of the simulated bridge.
//!
//! - `quote` — random-walk prices and the quote push payloads.
//! - `account` — balance and open positions behind ACCOUNT/BALANCE/TRADE.

pub mod account;
pub mod quote;
