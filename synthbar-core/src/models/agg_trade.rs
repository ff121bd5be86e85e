use std::num::ParseFloatError;

use serde::Deserialize;

/// Subset of a Binance aggTrade frame the pipeline actually reads.
///
/// Price and quantity arrive as decimal strings and are parsed lazily so a
/// frame with an unusable field can still be logged with its raw value.
#[derive(Debug, Clone, Deserialize)]
pub struct AggTradeEvent {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "q")]
    pub quantity: String,
    #[serde(rename = "E")]
    pub event_time_ms: i64,
}

impl AggTradeEvent {
    pub fn price(&self) -> Result<f64, ParseFloatError> {
        self.price.parse()
    }

    pub fn quantity(&self) -> Result<f64, ParseFloatError> {
        self.quantity.parse()
    }
}
