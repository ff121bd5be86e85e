//! Bus subject conventions. These strings are the wire contract between the
//! ingress, the aggregators and the portfolio monitors; symbols are always
//! lowercase and timeframes always canonical.

use crate::models::Timeframe;

pub fn ticks(symbol: &str) -> String {
    format!("binancef.ticks.{}", symbol.trim().to_lowercase())
}

pub fn bars(symbol: &str, timeframe: Timeframe) -> String {
    format!("binancef.bars.{}.{}", timeframe, symbol.trim().to_lowercase())
}

pub fn synthetic_bars(timeframe: Timeframe) -> String {
    format!("synthetic.bars.{}", timeframe)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subjects_are_lowercase_and_canonical() {
        assert_eq!(ticks(" BTCUSDT "), "binancef.ticks.btcusdt");
        assert_eq!(bars("ETHUSDT", "60s".parse().unwrap()), "binancef.bars.1m.ethusdt");
        assert_eq!(synthetic_bars(Timeframe::M5), "synthetic.bars.5m");
    }
}
