use serde::Deserialize;
use url::Url;

pub const BINANCE_WS_URL: &str = "wss://stream.binance.com:9443/ws";

/// `ws_url` is parsed as a [`Url`] during configuration load, so a malformed
/// endpoint is rejected at startup instead of looping through reconnects.
#[derive(Debug, Deserialize, Clone)]
pub struct IngestorConfig {
    pub ws_url: Url,
    pub symbols: Vec<String>,
}
