use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::ExchangeError;

/// Exchange-level position classification. `Both` is one-way mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PositionSide {
    #[serde(rename = "LONG")]
    Long,
    #[serde(rename = "SHORT")]
    Short,
    #[default]
    #[serde(rename = "BOTH")]
    Both,
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
            PositionSide::Both => "BOTH",
        };
        f.write_str(s)
    }
}

/// Futures position snapshot as reported by the exchange. Decimal fields come
/// over the wire as strings; accessors parse on demand. Immutable per query,
/// staleness is the caller's problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol: String,
    pub position_amt: String,
    #[serde(default)]
    pub position_side: PositionSide,
    #[serde(default)]
    pub entry_price: String,
    #[serde(default)]
    pub mark_price: String,
    #[serde(default)]
    pub leverage: String,
}

impl Position {
    /// Signed position amount; sign encodes direction. Unparseable → 0.
    pub fn amount(&self) -> f64 {
        self.position_amt.parse().unwrap_or(0.0)
    }

    pub fn is_open(&self) -> bool {
        self.amount() != 0.0
    }

    pub fn entry(&self) -> f64 {
        self.entry_price.parse().unwrap_or(0.0)
    }

    pub fn mark(&self) -> f64 {
        self.mark_price.parse().unwrap_or(0.0)
    }
}

/// Spot balance record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: String,
    pub locked: String,
}

impl Balance {
    /// A zero-balance record for an asset the account has never touched.
    pub fn zero(asset: &str) -> Self {
        Self {
            asset: asset.to_string(),
            free: "0".to_string(),
            locked: "0".to_string(),
        }
    }

    pub fn free_amount(&self) -> f64 {
        self.free.parse().unwrap_or(0.0)
    }
}

/// Outcome of closing one position.
#[derive(Debug, Clone)]
pub enum CloseOutcome {
    /// The exchange acknowledgement for the market close order.
    Closed(serde_json::Value),
    /// No open position matched; informational, not an error.
    NoPosition,
}

/// Per-symbol entry in a close-all run. Failures on one symbol never stop the
/// rest; callers get the full ordered ledger.
#[derive(Debug)]
pub struct SymbolCloseResult {
    pub symbol: String,
    pub outcome: Result<CloseOutcome, ExchangeError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_parses_signed_amount() {
        let p: Position = serde_json::from_str(
            r#"{"symbol":"BTCUSDT","positionAmt":"-2.5","positionSide":"SHORT","entryPrice":"104000.0","markPrice":"103500.0","leverage":"20"}"#,
        )
        .unwrap();
        assert_eq!(p.amount(), -2.5);
        assert!(p.is_open());
        assert_eq!(p.position_side, PositionSide::Short);
        assert_eq!(p.entry(), 104000.0);
    }

    #[test]
    fn flat_position_is_not_open() {
        let p: Position = serde_json::from_str(
            r#"{"symbol":"ETHUSDT","positionAmt":"0.000"}"#,
        )
        .unwrap();
        assert!(!p.is_open());
        assert_eq!(p.position_side, PositionSide::Both);
    }

    #[test]
    fn zero_balance_record() {
        let b = Balance::zero("DOGE");
        assert_eq!(b.asset, "DOGE");
        assert_eq!(b.free_amount(), 0.0);
    }
}
