pub mod client;
pub mod directive;
pub mod prompt;

pub use client::{trading_session, DecisionOutcome, LlmClient, LlmError};
pub use directive::{parse_directive, DirectiveAction, TradingDirective};
pub use prompt::{AccountSnapshot, MarketSnapshot, PositionSnapshot, TradeRecord};
