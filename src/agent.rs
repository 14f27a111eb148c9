use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::exchange::{BinanceHttpTransport, Gateway, Position, PositionSide};
use crate::llm::{
    trading_session, AccountSnapshot, DirectiveAction, LlmClient, MarketSnapshot,
    PositionSnapshot, TradeRecord, TradingDirective,
};

/// Periodic trading loop wiring the decision source to the gateway.
///
/// Deliberately thin: it schedules inference calls, filters directives, and
/// invokes the gateway. Signal generation and risk policy live elsewhere;
/// the snapshot carries neutral indicator values until an indicator feed is
/// wired in.
pub struct Agent {
    config: Config,
    llm: LlmClient,
    gateway: Gateway,
    history: Vec<TradeRecord>,
    opened_at: HashMap<String, DateTime<Utc>>,
    cooldown_until: Option<Instant>,
}

impl Agent {
    pub fn new(config: Config) -> Result<Self> {
        let llm = LlmClient::new(&config.llm)?;
        let transport = Arc::new(BinanceHttpTransport::new(&config.binance)?);
        let gateway = Gateway::new(transport);
        Ok(Self {
            config,
            llm,
            gateway,
            history: Vec::new(),
            opened_at: HashMap::new(),
            cooldown_until: None,
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        let session = trading_session();
        info!(
            "Session: {} (volatility {}, UTC hour {})",
            session.name, session.volatility, session.utc_hour
        );

        let mut ticker = interval(Duration::from_secs(self.config.trading.interval_secs));
        loop {
            ticker.tick().await;

            if let Some(until) = self.cooldown_until {
                if Instant::now() < until {
                    info!("⏸  Cooling down after a failure, skipping cycle");
                    continue;
                }
                self.cooldown_until = None;
            }

            if let Err(e) = self.review_positions().await {
                error!("Position review failed: {}", e);
            }

            for symbol in self.config.trading.symbols.clone() {
                if let Err(e) = self.decision_cycle(&symbol).await {
                    error!("Cycle failed for {}: {}", symbol, e);
                    self.cooldown_until = Some(
                        Instant::now() + Duration::from_secs(self.config.trading.cooldown_secs),
                    );
                    break;
                }
            }
        }
    }

    async fn decision_cycle(&mut self, symbol: &str) -> Result<()> {
        let market = self.snapshot_market(symbol).await?;
        let account = self.snapshot_account().await?;

        let outcome = self
            .llm
            .analyze_market_and_decide(&market, &account, &self.history)
            .await?;

        let directive = &outcome.directive;
        info!(
            "📊 {} directive: {:?} (confidence {}, leverage {}x, size {}%): {}",
            symbol,
            directive.action,
            directive.confidence,
            directive.leverage,
            directive.position_size,
            directive.reasoning
        );

        if directive.is_hold() {
            return Ok(());
        }
        if directive.confidence < self.config.trading.min_confidence {
            info!(
                "⏭️  Confidence {} below threshold {}, skipping",
                directive.confidence, self.config.trading.min_confidence
            );
            return Ok(());
        }

        self.execute_directive(symbol, &market, &account, directive)
            .await
    }

    /// Ask the model whether each open position should be closed. The prompt
    /// constrains it to CLOSE/HOLD; any other action is treated as HOLD here
    /// (see DESIGN.md).
    async fn review_positions(&mut self) -> Result<()> {
        let positions = self.gateway.active_positions().await?;
        for pos in positions {
            let market = self.snapshot_market(&pos.symbol).await?;
            let snapshot = self.position_snapshot(&pos);
            // Roll tracking lives in an external collaborator; until one is
            // wired in, every position reports zero rolls.
            let directive = self
                .llm
                .evaluate_position_for_closing(&snapshot, &market, 0, self.config.rolling.max_rolls)
                .await;

            if directive.action != DirectiveAction::Close {
                continue;
            }
            info!(
                "📉 Model wants {} closed: {}",
                pos.symbol, directive.reasoning
            );
            if self.config.trading.paper_trading {
                info!("📝 [PAPER] close {}", pos.symbol);
                continue;
            }
            let results = self.gateway.close_all_positions(Some(&pos.symbol)).await?;
            for r in &results {
                match &r.outcome {
                    Ok(_) => {
                        info!("✅ Flattened {}", r.symbol);
                        self.opened_at.remove(&r.symbol);
                    }
                    Err(e) => warn!("⚠️ Could not flatten {}: {}", r.symbol, e),
                }
            }
        }
        Ok(())
    }

    fn position_snapshot(&self, pos: &Position) -> PositionSnapshot {
        let amount = pos.amount();
        let side = if amount >= 0.0 { "LONG" } else { "SHORT" };
        let entry = pos.entry();
        let mark = pos.mark();
        let leverage: u32 = pos.leverage.parse().unwrap_or(1);
        let direction = if amount >= 0.0 { 1.0 } else { -1.0 };
        let price_move = if entry > 0.0 {
            (mark - entry) / entry * 100.0
        } else {
            0.0
        };
        let holding_time = self
            .opened_at
            .get(&pos.symbol)
            .map(|t| format_duration(Utc::now() - *t))
            .unwrap_or_else(|| "unknown".to_string());

        PositionSnapshot {
            symbol: pos.symbol.clone(),
            side: side.to_string(),
            entry_price: entry,
            current_price: mark,
            unrealized_pnl_pct: price_move * direction * leverage as f64,
            leverage,
            holding_time,
        }
    }

    async fn execute_directive(
        &mut self,
        symbol: &str,
        market: &MarketSnapshot,
        account: &AccountSnapshot,
        directive: &TradingDirective,
    ) -> Result<()> {
        if self.config.trading.paper_trading {
            info!(
                "📝 [PAPER] {} {:?}, order id paper-{}",
                symbol,
                directive.action,
                uuid::Uuid::new_v4()
            );
            self.record_trade(symbol, directive);
            return Ok(());
        }

        match directive.action {
            DirectiveAction::OpenLong | DirectiveAction::OpenShort => {
                let side = if directive.action == DirectiveAction::OpenLong {
                    "BUY"
                } else {
                    "SELL"
                };
                let notional =
                    account.available_balance * directive.position_size / 100.0;
                let quantity = notional * directive.leverage as f64 / market.current_price;

                warn!(
                    "🚨 LIVE {} {}: qty {} at ~${}",
                    side, symbol, quantity, market.current_price
                );
                self.gateway
                    .set_leverage(symbol, directive.leverage)
                    .await?;
                self.gateway
                    .create_futures_order(
                        symbol,
                        side,
                        "MARKET",
                        Some(quantity),
                        None,
                        PositionSide::Both,
                        false,
                        "GTC",
                        vec![],
                    )
                    .await?;
                self.opened_at.insert(symbol.to_string(), Utc::now());
            }
            DirectiveAction::Close => {
                let results = self.gateway.close_all_positions(Some(symbol)).await?;
                for r in &results {
                    match &r.outcome {
                        Ok(_) => {
                            info!("✅ Flattened {}", r.symbol);
                            self.opened_at.remove(&r.symbol);
                        }
                        Err(e) => warn!("⚠️ Could not flatten {}: {}", r.symbol, e),
                    }
                }
            }
            DirectiveAction::Hold => {}
        }

        self.record_trade(symbol, directive);
        Ok(())
    }

    fn record_trade(&mut self, symbol: &str, directive: &TradingDirective) {
        self.history.push(TradeRecord {
            symbol: symbol.to_string(),
            action: format!("{:?}", directive.action),
            pnl_pct: 0.0,
        });
        // Only the recent tail is fed back into prompts.
        if self.history.len() > 20 {
            self.history.remove(0);
        }
    }

    async fn snapshot_market(&self, symbol: &str) -> Result<MarketSnapshot> {
        let ticker = self.gateway.ticker_24h(symbol).await?;
        let current_price = str_field(&ticker, "lastPrice");
        let price_change_24h = str_field(&ticker, "priceChangePercent");
        let trend = if price_change_24h >= 0.0 { "up" } else { "down" };

        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            current_price,
            price_change_24h,
            // Neutral until an indicator feed is attached.
            rsi: 50.0,
            macd_histogram: 0.0,
            trend: trend.to_string(),
        })
    }

    async fn snapshot_account(&self) -> Result<AccountSnapshot> {
        let balance = self.gateway.futures_usdt_balance().await?;
        let available_balance = self.gateway.futures_available_balance().await?;
        Ok(AccountSnapshot {
            balance,
            available_balance,
        })
    }
}

fn str_field(value: &serde_json::Value, key: &str) -> f64 {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0)
}

fn format_duration(d: chrono::Duration) -> String {
    let mins = d.num_minutes().max(0);
    if mins >= 60 {
        format!("{}h {:02}m", mins / 60, mins % 60)
    } else {
        format!("{}m", mins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ticker_fields_parse_from_strings() {
        let ticker = json!({"lastPrice": "103500.5", "priceChangePercent": "-1.25"});
        assert_eq!(str_field(&ticker, "lastPrice"), 103500.5);
        assert_eq!(str_field(&ticker, "priceChangePercent"), -1.25);
        assert_eq!(str_field(&ticker, "missing"), 0.0);
    }

    #[test]
    fn durations_format_for_prompts() {
        assert_eq!(format_duration(chrono::Duration::minutes(45)), "45m");
        assert_eq!(format_duration(chrono::Duration::minutes(135)), "2h 15m");
        assert_eq!(format_duration(chrono::Duration::minutes(-5)), "0m");
    }
}
