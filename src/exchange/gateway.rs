use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use super::error::ExchangeError;
use super::order::{build_futures_order_params, build_spot_order_params, close_order_for};
use super::transport::{Endpoint, ExchangeTransport};
use super::types::{Balance, CloseOutcome, Position, PositionSide, SymbolCloseResult};

type Result<T> = std::result::Result<T, ExchangeError>;

/// Execution gateway: translates trading intent into exchange order
/// parameters and runs the position-closing protocol.
///
/// No client-side locking, no caching, no internal retry. Concurrent calls
/// against the same symbol are arbitrated by the exchange.
pub struct Gateway {
    transport: Arc<dyn ExchangeTransport>,
}

impl Gateway {
    pub fn new(transport: Arc<dyn ExchangeTransport>) -> Self {
        Self { transport }
    }

    // ---- account ----

    pub async fn account_info(&self) -> Result<Value> {
        self.transport
            .request(Method::GET, Endpoint::Spot, "/api/v3/account", vec![], true)
            .await
    }

    pub async fn account_balances(&self) -> Result<Vec<Balance>> {
        let account = self.account_info().await?;
        let balances = account.get("balances").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(balances)
            .map_err(|e| ExchangeError::Transport(format!("bad balances payload: {}", e)))
    }

    /// Balance record for one asset. An asset the account has never held
    /// yields a zero record, never an error.
    pub async fn asset_balance(&self, asset: &str) -> Result<Balance> {
        let balances = self.account_balances().await?;
        Ok(balances
            .into_iter()
            .find(|b| b.asset == asset)
            .unwrap_or_else(|| Balance::zero(asset)))
    }

    pub async fn usdt_balance(&self) -> Result<f64> {
        Ok(self.asset_balance("USDT").await?.free_amount())
    }

    pub async fn futures_account(&self) -> Result<Value> {
        self.transport
            .request(Method::GET, Endpoint::Futures, "/fapi/v2/account", vec![], true)
            .await
    }

    pub async fn futures_balances(&self) -> Result<Value> {
        let account = self.futures_account().await?;
        Ok(account.get("assets").cloned().unwrap_or(Value::Array(vec![])))
    }

    pub async fn futures_usdt_balance(&self) -> Result<f64> {
        let account = self.futures_account().await?;
        Ok(f64_field(&account, "totalWalletBalance"))
    }

    pub async fn futures_available_balance(&self) -> Result<f64> {
        let account = self.futures_account().await?;
        Ok(f64_field(&account, "availableBalance"))
    }

    // ---- positions ----

    pub async fn futures_positions(&self) -> Result<Vec<Position>> {
        let raw = self
            .transport
            .request(
                Method::GET,
                Endpoint::Futures,
                "/fapi/v2/positionRisk",
                vec![],
                true,
            )
            .await?;
        serde_json::from_value(raw)
            .map_err(|e| ExchangeError::Transport(format!("bad positions payload: {}", e)))
    }

    pub async fn active_positions(&self) -> Result<Vec<Position>> {
        Ok(self
            .futures_positions()
            .await?
            .into_iter()
            .filter(Position::is_open)
            .collect())
    }

    // ---- market data ----

    pub async fn ticker_price(&self, symbol: Option<&str>) -> Result<Value> {
        let params = symbol
            .map(|s| vec![("symbol".to_string(), s.to_string())])
            .unwrap_or_default();
        self.transport
            .request(Method::GET, Endpoint::Spot, "/api/v3/ticker/price", params, false)
            .await
    }

    pub async fn ticker_24h(&self, symbol: &str) -> Result<Value> {
        let params = vec![("symbol".to_string(), symbol.to_string())];
        self.transport
            .request(Method::GET, Endpoint::Spot, "/api/v3/ticker/24hr", params, false)
            .await
    }

    pub async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<Value> {
        let mut params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("interval".to_string(), interval.to_string()),
            ("limit".to_string(), limit.to_string()),
        ];
        if let Some(t) = start_time {
            params.push(("startTime".to_string(), t.to_string()));
        }
        if let Some(t) = end_time {
            params.push(("endTime".to_string(), t.to_string()));
        }
        self.transport
            .request(Method::GET, Endpoint::Spot, "/api/v3/klines", params, false)
            .await
    }

    pub async fn order_book(&self, symbol: &str, limit: u32) -> Result<Value> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("limit".to_string(), limit.to_string()),
        ];
        self.transport
            .request(Method::GET, Endpoint::Spot, "/api/v3/depth", params, false)
            .await
    }

    pub async fn funding_rate(&self, symbol: &str) -> Result<Value> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("limit".to_string(), "1".to_string()),
        ];
        let rates = self
            .transport
            .request(Method::GET, Endpoint::Futures, "/fapi/v1/fundingRate", params, false)
            .await?;
        Ok(rates
            .as_array()
            .and_then(|a| a.first().cloned())
            .unwrap_or(Value::Null))
    }

    pub async fn futures_exchange_info(&self, symbol: Option<&str>) -> Result<Value> {
        let info = self
            .transport
            .request(
                Method::GET,
                Endpoint::Futures,
                "/fapi/v1/exchangeInfo",
                vec![],
                false,
            )
            .await?;
        match symbol {
            None => Ok(info),
            Some(sym) => Ok(info
                .get("symbols")
                .and_then(Value::as_array)
                .and_then(|arr| {
                    arr.iter()
                        .find(|s| s.get("symbol").and_then(Value::as_str) == Some(sym))
                        .cloned()
                })
                .unwrap_or(Value::Null)),
        }
    }

    // ---- spot trading ----

    #[allow(clippy::too_many_arguments)]
    pub async fn create_spot_order(
        &self,
        symbol: &str,
        side: &str,
        order_type: &str,
        quantity: Option<f64>,
        price: Option<f64>,
        quote_order_qty: Option<f64>,
        time_in_force: &str,
        extra: Vec<(String, String)>,
    ) -> Result<Value> {
        let mut params = build_spot_order_params(
            symbol,
            side,
            order_type,
            quantity,
            price,
            quote_order_qty,
            time_in_force,
        );
        params.extend(extra);
        self.transport
            .request(Method::POST, Endpoint::Spot, "/api/v3/order", params, true)
            .await
    }

    pub async fn cancel_spot_order(
        &self,
        symbol: &str,
        order_id: Option<u64>,
        orig_client_order_id: Option<&str>,
    ) -> Result<Value> {
        let params = cancel_params(symbol, order_id, orig_client_order_id);
        self.transport
            .request(Method::DELETE, Endpoint::Spot, "/api/v3/order", params, true)
            .await
    }

    pub async fn cancel_all_spot_orders(&self, symbol: &str) -> Result<Value> {
        let params = vec![("symbol".to_string(), symbol.to_string())];
        self.transport
            .request(Method::DELETE, Endpoint::Spot, "/api/v3/openOrders", params, true)
            .await
    }

    pub async fn get_spot_order(&self, symbol: &str, order_id: u64) -> Result<Value> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("orderId".to_string(), order_id.to_string()),
        ];
        self.transport
            .request(Method::GET, Endpoint::Spot, "/api/v3/order", params, true)
            .await
    }

    pub async fn open_orders(&self, symbol: Option<&str>) -> Result<Value> {
        let params = symbol
            .map(|s| vec![("symbol".to_string(), s.to_string())])
            .unwrap_or_default();
        self.transport
            .request(Method::GET, Endpoint::Spot, "/api/v3/openOrders", params, true)
            .await
    }

    // ---- futures trading ----

    pub async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<Value> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("leverage".to_string(), leverage.to_string()),
        ];
        self.transport
            .request(Method::POST, Endpoint::Futures, "/fapi/v1/leverage", params, true)
            .await
    }

    pub async fn set_margin_type(&self, symbol: &str, margin_type: &str) -> Result<Value> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("marginType".to_string(), margin_type.to_string()),
        ];
        self.transport
            .request(Method::POST, Endpoint::Futures, "/fapi/v1/marginType", params, true)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_futures_order(
        &self,
        symbol: &str,
        side: &str,
        order_type: &str,
        quantity: Option<f64>,
        price: Option<f64>,
        position_side: PositionSide,
        reduce_only: bool,
        time_in_force: &str,
        extra: Vec<(String, String)>,
    ) -> Result<Value> {
        let mut params = build_futures_order_params(
            symbol,
            side,
            order_type,
            quantity,
            price,
            position_side,
            reduce_only,
            time_in_force,
        );
        params.extend(extra);
        self.transport
            .request(Method::POST, Endpoint::Futures, "/fapi/v1/order", params, true)
            .await
    }

    pub async fn cancel_futures_order(
        &self,
        symbol: &str,
        order_id: Option<u64>,
        orig_client_order_id: Option<&str>,
    ) -> Result<Value> {
        let params = cancel_params(symbol, order_id, orig_client_order_id);
        self.transport
            .request(Method::DELETE, Endpoint::Futures, "/fapi/v1/order", params, true)
            .await
    }

    pub async fn cancel_all_futures_orders(&self, symbol: &str) -> Result<Value> {
        let params = vec![("symbol".to_string(), symbol.to_string())];
        self.transport
            .request(
                Method::DELETE,
                Endpoint::Futures,
                "/fapi/v1/allOpenOrders",
                params,
                true,
            )
            .await
    }

    pub async fn get_futures_order(&self, symbol: &str, order_id: u64) -> Result<Value> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("orderId".to_string(), order_id.to_string()),
        ];
        self.transport
            .request(Method::GET, Endpoint::Futures, "/fapi/v1/order", params, true)
            .await
    }

    pub async fn futures_open_orders(&self, symbol: Option<&str>) -> Result<Value> {
        let params = symbol
            .map(|s| vec![("symbol".to_string(), s.to_string())])
            .unwrap_or_default();
        self.transport
            .request(Method::GET, Endpoint::Futures, "/fapi/v1/openOrders", params, true)
            .await
    }

    pub async fn position_mode(&self) -> Result<Value> {
        self.transport
            .request(
                Method::GET,
                Endpoint::Futures,
                "/fapi/v1/positionSide/dual",
                vec![],
                true,
            )
            .await
    }

    pub async fn set_position_mode(&self, dual_side: bool) -> Result<Value> {
        let params = vec![("dualSidePosition".to_string(), dual_side.to_string())];
        self.transport
            .request(
                Method::POST,
                Endpoint::Futures,
                "/fapi/v1/positionSide/dual",
                params,
                true,
            )
            .await
    }

    // ---- closing protocol ----

    /// Close the first open position matching `symbol` (and `position_side`
    /// unless it is BOTH) with a market order opposing the exposure. No match
    /// is informational, not an error. Multiple matches for the same symbol
    /// are NOT aggregated; one call closes one position.
    pub async fn close_position(
        &self,
        symbol: &str,
        position_side: PositionSide,
    ) -> Result<CloseOutcome> {
        let positions = self.futures_positions().await?;
        for pos in positions {
            if pos.symbol != symbol || !pos.is_open() {
                continue;
            }
            if position_side != PositionSide::Both && pos.position_side != position_side {
                continue;
            }
            let (side, quantity) = close_order_for(&pos);
            info!(
                "📉 Closing {} {}: {} {} @ MARKET",
                pos.position_side, symbol, side, quantity
            );
            let ack = self
                .create_futures_order(
                    symbol,
                    side,
                    "MARKET",
                    Some(quantity),
                    None,
                    pos.position_side,
                    false,
                    "GTC",
                    vec![],
                )
                .await?;
            return Ok(CloseOutcome::Closed(ack));
        }
        info!("No open {} position to close", symbol);
        Ok(CloseOutcome::NoPosition)
    }

    /// Flatten every open position, optionally restricted to one symbol.
    ///
    /// Per symbol: cancel all open orders, then close the position. Symbols
    /// are processed strictly sequentially and independently: an error on one
    /// is recorded in its slot and the loop moves on. One bad symbol must
    /// never prevent flattening the others.
    pub async fn close_all_positions(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<SymbolCloseResult>> {
        let positions = self.active_positions().await?;
        let mut results = Vec::new();

        for pos in positions {
            if let Some(filter) = symbol {
                if pos.symbol != filter {
                    continue;
                }
            }

            let outcome = self.cancel_then_close(&pos).await;
            if let Err(e) = &outcome {
                warn!("⚠️ Failed to flatten {}: {}", pos.symbol, e);
            }
            results.push(SymbolCloseResult {
                symbol: pos.symbol,
                outcome,
            });
        }
        Ok(results)
    }

    async fn cancel_then_close(&self, pos: &Position) -> Result<CloseOutcome> {
        self.cancel_all_futures_orders(&pos.symbol).await?;
        self.close_position(&pos.symbol, pos.position_side).await
    }
}

fn cancel_params(
    symbol: &str,
    order_id: Option<u64>,
    orig_client_order_id: Option<&str>,
) -> Vec<(String, String)> {
    let mut params = vec![("symbol".to_string(), symbol.to_string())];
    if let Some(id) = order_id {
        params.push(("orderId".to_string(), id.to_string()));
    }
    if let Some(id) = orig_client_order_id {
        params.push(("origClientOrderId".to_string(), id.to_string()));
    }
    params
}

fn f64_field(value: &Value, key: &str) -> f64 {
    match value.get(key) {
        Some(Value::String(s)) => s.parse().unwrap_or(0.0),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}
