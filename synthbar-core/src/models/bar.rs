use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use typed_builder::TypedBuilder;

/// An OHLCV sample bucketed to a timeframe boundary.
///
/// `is_closed` is set exactly once per bucket, on the final snapshot published
/// when the next bucket's first tick supersedes this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct Bar {
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(rename = "isClosed")]
    #[builder(default = false)]
    pub is_closed: bool,
    #[serde(rename = "startTime", with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
}

impl Bar {
    /// First tick of a fresh bucket.
    pub fn open_at(symbol: impl Into<String>, start_time: OffsetDateTime, price: f64, quantity: f64) -> Self {
        Self::builder()
            .symbol(symbol.into())
            .open(price)
            .high(price)
            .low(price)
            .close(price)
            .volume(quantity)
            .start_time(start_time)
            .build()
    }

    /// Fold one more tick of the same bucket into the bar.
    pub fn apply(&mut self, price: f64, quantity: f64) {
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
        self.close = price;
        self.volume += quantity;
    }

    /// Fold a repeated snapshot of the same bucket into the retained bar.
    pub fn merge(&mut self, update: &Bar) {
        if update.high > self.high {
            self.high = update.high;
        }
        if update.low < self.low {
            self.low = update.low;
        }
        self.close = update.close;
        self.volume += update.volume;
    }
}
