//! Quote stream generator.
//!
//! `QuoteGenerator` runs a background thread holding one `SymbolFeed` per
//! subscribed symbol/timeframe. On every tick of its interval it advances all
//! feeds and hands the encoded payloads to the quote endpoint's queue.
//! Subscriptions arrive over a `crossbeam_channel` from the command handler.
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, select};
use log::{debug, info};

use crate::model::quote::SymbolFeed;

/// Request to start streaming one symbol/timeframe pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub symbol: String,
    pub timeframe: String,
}

/// Background market data generator.
pub struct QuoteGenerator;

impl QuoteGenerator {
    /// Starts the generator thread.
    ///
    /// Returns the subscription sender and the thread handle. The thread ends
    /// when `shutdown` is set, when every subscription sender is dropped, or
    /// when the quote queue is gone.
    pub fn start(
        interval: Duration,
        quotes: Sender<String>,
        shutdown: Arc<AtomicBool>,
    ) -> (Sender<Subscription>, JoinHandle<()>) {
        let (subscribe_tx, subscribe_rx) = crossbeam_channel::unbounded::<Subscription>();
        let handle = thread::spawn(move || Self::run(interval, subscribe_rx, quotes, shutdown));
        (subscribe_tx, handle)
    }

    fn run(interval: Duration, subscriptions: Receiver<Subscription>, quotes: Sender<String>, shutdown: Arc<AtomicBool>) {
        let ticker = crossbeam_channel::tick(interval);
        let mut feeds: HashMap<(String, String), SymbolFeed> = HashMap::new();
        info!("Quote generator started, interval {:?}", interval);

        loop {
            select! {
                recv(subscriptions) -> message => {
                    let Ok(subscription) = message else {
                        break;
                    };
                    let feed = SymbolFeed::new(&subscription.symbol, &subscription.timeframe);
                    let key = (feed.symbol().to_string(), feed.timeframe().to_string());
                    if !feeds.contains_key(&key) {
                        info!("Generator: streaming {} {}", key.0, key.1);
                        feeds.insert(key, feed);
                    }
                }
                recv(ticker) -> _ => {
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    let now = Utc::now();
                    for feed in feeds.values_mut() {
                        if quotes.send(feed.next_payload(now).to_string()).is_err() {
                            debug!("Generator: quote queue closed");
                            return;
                        }
                    }
                }
            }
        }
        info!("Quote generator stopped");
    }
}
