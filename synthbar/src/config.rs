use std::env;

use anyhow::{Context, Result};
use config::{Environment, File};
use serde::Deserialize;

use synthbar_core::prelude::Timeframe;
use synthbar_ingestor::{IngestorConfig, BINANCE_WS_URL};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub nats_url: String,
    pub server_addr: String,
    pub timeframes: Vec<Timeframe>,
    pub ingestor: IngestorConfig,
}

/// Layered configuration: `configs/{RUN_MODE}` YAML file, then the
/// environment, so `NATS_URL` and `SERVER_ADDR` always win. `NATS_URL` has no
/// default and is required from one of the sources. `ingestor.ws_url` is
/// validated as a URL here, at load time.
pub fn load() -> Result<Config> {
    let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "default".into());
    let config_dir = env::var("CONFIG_DIR").unwrap_or_else(|_| "configs".into());

    let loaded = config::Config::builder()
        .set_default("server_addr", ":8080")?
        .set_default("timeframes", vec!["1m", "5m"])?
        .set_default("ingestor.ws_url", BINANCE_WS_URL)?
        .set_default("ingestor.symbols", vec!["btcusdt", "ethusdt"])?
        .add_source(File::with_name(&format!("{config_dir}/{run_mode}")).required(false))
        .add_source(Environment::default())
        .build()
        .context("failed to build configuration")?;

    loaded.try_deserialize().context("failed to load configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn parses_shipped_default_config() {
        let raw = include_str!("../../configs/default.yaml");
        let config: Config = config::Config::builder()
            .add_source(File::from_str(raw, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.nats_url, "nats://localhost:4222");
        assert_eq!(config.server_addr, ":8080");
        assert_eq!(config.timeframes, vec![Timeframe::M1, Timeframe::M5]);
        assert_eq!(config.ingestor.ws_url.as_str(), BINANCE_WS_URL);
        assert_eq!(config.ingestor.symbols, vec!["btcusdt", "ethusdt"]);
    }

    #[test]
    fn malformed_ws_url_fails_at_load() {
        let result: Result<Config, _> = config::Config::builder()
            .set_default("nats_url", "nats://localhost:4222")
            .unwrap()
            .set_default("server_addr", ":8080")
            .unwrap()
            .set_default("timeframes", vec!["1m"])
            .unwrap()
            .set_default("ingestor.ws_url", "not a url")
            .unwrap()
            .set_default("ingestor.symbols", vec!["btcusdt"])
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize();

        assert!(result.is_err());
    }

    #[test]
    fn nats_url_is_required() {
        let result: Result<Config, _> = config::Config::builder()
            .set_default("server_addr", ":8080")
            .unwrap()
            .set_default("timeframes", vec!["1m"])
            .unwrap()
            .set_default("ingestor.ws_url", BINANCE_WS_URL)
            .unwrap()
            .set_default("ingestor.symbols", vec!["btcusdt"])
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize();

        assert!(result.is_err());
    }
}
