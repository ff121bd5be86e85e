use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use synthbar_core::prelude::*;

use crate::config::IngestorConfig;
use crate::errors::IngressError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Serialize)]
pub struct WsCommand {
    pub method: String,
    pub params: Vec<String>,
}

impl WsCommand {
    pub fn subscribe_agg_trades(symbols: &[String]) -> Self {
        Self {
            method: "SUBSCRIBE".to_string(),
            params: symbols.iter().map(|symbol| format!("{symbol}@aggTrade")).collect(),
        }
    }
}

/// Consumes the Binance aggTrade stream for a fixed symbol set and forwards
/// each raw frame to `binancef.ticks.<symbol>` on the bus.
///
/// The read loop and the reconnect supervisor form one state machine:
/// connect → subscribe → read, and on any read error back off 1–3 s, re-dial
/// and re-subscribe everything. Only cancellation ends the loop.
pub struct BinanceIngestor {
    config: IngestorConfig,
    bus: Arc<dyn Bus>,
    shutdown: CancellationToken,
}

impl BinanceIngestor {
    pub fn new(bus: Arc<dyn Bus>, shutdown: CancellationToken, config: IngestorConfig) -> Self {
        let config = IngestorConfig {
            symbols: config.symbols.iter().map(|s| s.trim().to_lowercase()).collect(),
            ..config
        };
        Self { config, bus, shutdown }
    }

    pub async fn start(&self) -> Result<(), anyhow::Error> {
        info!(url = %self.config.ws_url, "starting binance ingestor");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            match self.connect().await {
                Ok(stream) => {
                    info!("connected to binance");
                    match self.read_loop(stream).await {
                        // Read loop only returns Ok on cancellation.
                        Ok(()) => break,
                        Err(err) => error!(%err, "binance connection lost, reconnecting"),
                    }
                }
                Err(err) => warn!(%err, "failed to connect to binance"),
            }

            let backoff = Duration::from_secs(rand::rng().random_range(1..=3));
            debug!(?backoff, "backing off before reconnect");
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.shutdown.cancelled() => break,
            }
        }

        info!("binance ingestor terminated");
        Ok(())
    }

    async fn connect(&self) -> Result<WsStream, IngressError> {
        debug!(url = %self.config.ws_url, "dialing binance");
        let (mut stream, _) = connect_async(self.config.ws_url.as_str()).await?;

        if !self.config.symbols.is_empty() {
            let command = WsCommand::subscribe_agg_trades(&self.config.symbols);
            let frame = serde_json::to_string(&command)?;
            stream.send(Message::text(frame)).await?;
        }

        Ok(stream)
    }

    async fn read_loop(&self, mut stream: WsStream) -> Result<(), IngressError> {
        loop {
            tokio::select! {
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.forward(text.as_str()).await,
                    Some(Ok(Message::Ping(payload))) => stream.send(Message::Pong(payload)).await?,
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "binance closed the connection");
                        return Err(IngressError::ConnectionClosed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(err.into()),
                    None => return Err(IngressError::StreamEnded),
                },
                _ = self.shutdown.cancelled() => return Ok(()),
            }
        }
    }

    /// Publish one raw frame under its tick subject. Subscription echoes and
    /// unusable frames are dropped.
    async fn forward(&self, raw: &str) {
        let Some(symbol) = tick_symbol(raw) else {
            return;
        };

        let subject = subjects::ticks(&symbol);
        if let Err(err) = self.bus.publish(&subject, Bytes::copy_from_slice(raw.as_bytes())).await {
            error!(%err, subject, "failed to publish tick");
        }
    }
}

/// Extracts the lowercase symbol of a trade frame. Returns `None` for
/// subscription response echoes (any frame carrying a `result` key) and for
/// frames that are malformed or carry no `s` field.
fn tick_symbol(raw: &str) -> Option<String> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            warn!(%err, "failed to parse frame");
            return None;
        }
    };

    if value.get("result").is_some() {
        return None;
    }

    match value.get("s").and_then(Value::as_str) {
        Some(symbol) => Some(symbol.to_lowercase()),
        None => {
            warn!("frame without symbol field");
            None
        }
    }
}
