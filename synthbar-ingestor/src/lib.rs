mod binance;
mod config;
mod errors;

pub use binance::*;
pub use config::*;
pub use errors::*;
