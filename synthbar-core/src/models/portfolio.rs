use serde::{Deserialize, Serialize};

use super::Timeframe;

/// A user-declared synthetic instrument: an arithmetic combination of symbols
/// evaluated on synchronized bars of one timeframe. Immutable once accepted.
///
/// Symbols are kept as submitted; the formula references them under that
/// exact spelling. Subjects and bar keys lowercase independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: String,
    pub symbols: Vec<String>,
    pub formula: String,
    pub timeframe: Timeframe,
}
