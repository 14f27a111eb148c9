use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Market indicators handed to the model. Assembled by the trading loop from
/// exchange tickers and locally computed indicators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub current_price: f64,
    pub price_change_24h: f64,
    pub rsi: f64,
    pub macd_histogram: f64,
    pub trend: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balance: f64,
    pub available_balance: f64,
}

/// One prior trade, fed back to the model as context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub action: String,
    pub pnl_pct: f64,
}

/// Snapshot of an open position being evaluated for closure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    /// "LONG" or "SHORT"
    pub side: String,
    pub entry_price: f64,
    pub current_price: f64,
    pub unrealized_pnl_pct: f64,
    pub leverage: u32,
    /// Human-readable holding duration, e.g. "2h 15m".
    pub holding_time: String,
}

/// Operational policy for the open/hold decision path.
pub const DECISION_SYSTEM_PROMPT: &str = "\
You are a trade execution bot.

## Goal
Capture profit quickly; the system takes profit and closes automatically.

## Available actions
- OPEN_LONG: open a long position
- OPEN_SHORT: open a short position
- CLOSE: close the position
- HOLD: stay out

## Handled by the system
- Profit rolling (adds to winners at >=0.8% unrealized gain)
- Risk control and order execution

## Your authority
- Full discretion over every trading decision
- You read the market, pick the leverage, size the position

Output one JSON object describing the action.
Format: {\"action\":\"OPEN_LONG\",\"confidence\":85,\"reasoning\":\"bullish\",\"leverage\":60,\"position_size\":50}
Output the JSON directly with no surrounding text.";

/// Stricter variant used on the reasoning path: JSON only, no prose.
pub const STRICT_JSON_SYSTEM_PROMPT: &str = "\
You are a trade execution bot. You MUST follow these rules:

## Goal
Maximize account returns.

## Available actions
- OPEN_LONG: open a long position
- OPEN_SHORT: open a short position
- CLOSE: close the position
- HOLD: stay out

## Rules (breaking one = failure)
1. Output exactly ONE JSON object
2. NO non-JSON content (no explanation, no warnings, no code, no blank lines)
3. NO ```json fences
4. The FIRST character of your output must be `{`
5. The LAST character must be `}`

## Output format (character for character)
{\"action\":\"OPEN_LONG\",\"confidence\":90,\"reasoning\":\"breakout above 103500\",\"leverage\":60,\"position_size\":50}

## Output the JSON now. Do not talk. Do not think out loud.";

/// Policy for the close/hold evaluation of an existing position.
pub const CLOSE_EVAL_SYSTEM_PROMPT: &str = "\
You are a professional trader deciding whether to close a position. You MUST follow these rules:

## Rules (breaking one = failure)
1. Output exactly ONE JSON object
2. NO non-JSON content
3. NO ```json fences
4. Start with `{` and end with `}`

## Output format (character for character)
{\"action\":\"CLOSE\",\"confidence\":90,\"reasoning\":\"momentum fading\",\"leverage\":60,\"position_size\":50}

## Output the JSON now.";

/// Render the market/account context into the user prompt.
///
/// Deterministic: identical inputs always produce identical text, so prompts
/// can be audited and asserted in tests.
pub fn build_trading_prompt(
    market: &MarketSnapshot,
    account: &AccountSnapshot,
    history: &[TradeRecord],
) -> String {
    let mut prompt = format!(
        "Market data ({}):\n\
         - Price: ${}\n\
         - 24h change: {}%\n\
         - RSI: {}\n\
         - MACD histogram: {}\n\
         - Trend: {}\n\
         \n\
         Account:\n\
         - Balance: ${}\n\
         - Available: ${}\n",
        market.symbol,
        market.current_price,
        market.price_change_24h,
        market.rsi,
        market.macd_histogram,
        market.trend,
        account.balance,
        account.available_balance,
    );

    if !history.is_empty() {
        prompt.push_str("\nRecent trades:\n");
        for t in history {
            let _ = writeln!(prompt, "- {} {} ({:+.2}%)", t.symbol, t.action, t.pnl_pct);
        }
    }

    prompt.push_str("\nMake your trading decision.");
    prompt
}

/// Render the close-evaluation user prompt for an open position.
pub fn build_close_eval_prompt(
    position: &PositionSnapshot,
    market: &MarketSnapshot,
    roll_count: u32,
    max_rolls: u32,
) -> String {
    format!(
        "Currently holding a {} {} position:\n\
         - Entry price: ${}\n\
         - Current price: ${}\n\
         - PnL: {:+.2}%\n\
         - Leverage: {}x\n\
         - Holding time: {}\n\
         - Rolls used: {}/{}\n\
         \n\
         Market data:\n\
         - RSI: {}\n\
         - MACD histogram: {}\n\
         - Trend: {}\n\
         - 24h change: {}%\n\
         \n\
         System behavior already configured:\n\
         - Rolls profit automatically at >=0.8% gain\n\
         - At most {} rolls\n\
         \n\
         Decide: CLOSE the position or HOLD it?",
        position.symbol,
        if position.side == "LONG" { "long" } else { "short" },
        position.entry_price,
        position.current_price,
        position.unrealized_pnl_pct,
        position.leverage,
        position.holding_time,
        roll_count,
        max_rolls,
        market.rsi,
        market.macd_histogram,
        market.trend,
        market.price_change_24h,
        max_rolls,
    )
}
