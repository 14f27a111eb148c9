use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub binance: BinanceConfig,
    pub llm: LlmConfig,
    pub trading: TradingConfig,
    pub rolling: RollingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BinanceConfig {
    pub api_key: String,
    pub api_secret: String,
    pub testnet: bool,
    pub rest_host: String,
    pub futures_host: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    pub api_key: String,
    pub model_name: String,
    pub api_port: u16,
    pub max_tokens: u32,
    pub temperature: f64,
    pub api_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TradingConfig {
    pub symbols: Vec<String>,
    pub initial_capital: f64,
    pub max_position_pct: f64,
    pub default_leverage: u32,
    pub interval_secs: u64,
    pub cooldown_secs: u64,
    pub min_confidence: u8,
    pub paper_trading: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RollingConfig {
    pub profit_threshold_pct: f64,
    pub ratio: f64,
    pub max_rolls: u32,
}

impl LlmConfig {
    /// Chat endpoint URL for the configured Ollama port.
    pub fn chat_url(&self) -> String {
        format!("http://localhost:{}/api/chat", self.api_port)
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let testnet = env::var("BINANCE_TESTNET")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        let binance = BinanceConfig {
            api_key: env::var("BINANCE_API_KEY").unwrap_or_default(),
            api_secret: env::var("BINANCE_API_SECRET").unwrap_or_default(),
            testnet,
            rest_host: env::var("BINANCE_REST_HOST").unwrap_or_else(|_| {
                if testnet {
                    "https://testnet.binance.vision".to_string()
                } else {
                    "https://api.binance.com".to_string()
                }
            }),
            futures_host: env::var("BINANCE_FUTURES_HOST").unwrap_or_else(|_| {
                if testnet {
                    "https://testnet.binancefuture.com".to_string()
                } else {
                    "https://fapi.binance.com".to_string()
                }
            }),
        };

        let llm = LlmConfig {
            api_key: env::var("OLLAMA_API_KEY").unwrap_or_default(),
            model_name: env::var("OLLAMA_MODEL_NAME").unwrap_or_default(),
            api_port: env::var("OLLAMA_API_PORT")
                .unwrap_or_else(|_| "11434".to_string())
                .parse()
                .unwrap_or(11434),
            max_tokens: env::var("OLLAMA_MAX_TOKENS")
                .unwrap_or_else(|_| "32768".to_string())
                .parse()
                .unwrap_or(32768),
            temperature: env::var("OLLAMA_TEMPERATURE")
                .unwrap_or_else(|_| "0.3".to_string())
                .parse()
                .unwrap_or(0.3),
            api_timeout_secs: env::var("OLLAMA_API_TIMEOUT")
                .unwrap_or_else(|_| "150".to_string())
                .parse()
                .unwrap_or(150),
        };

        let symbols_raw = env::var("TRADING_SYMBOLS")
            .unwrap_or_else(|_| "BTCUSDT,ETHUSDT,SOLUSDT,BNBUSDT,DOGEUSDT,XRPUSDT".to_string());
        let symbols = symbols_raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let trading = TradingConfig {
            symbols,
            initial_capital: env::var("INITIAL_CAPITAL")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .unwrap_or(20.0),
            max_position_pct: env::var("MAX_POSITION_PCT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10.0),
            default_leverage: env::var("DEFAULT_LEVERAGE")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),
            interval_secs: env::var("TRADING_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .unwrap_or(120),
            cooldown_secs: env::var("TRADE_COOLDOWN_SECONDS")
                .unwrap_or_else(|_| "900".to_string())
                .parse()
                .unwrap_or(900),
            min_confidence: env::var("MIN_CONFIDENCE")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            paper_trading: env::var("PAPER_TRADING")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
        };

        let rolling = RollingConfig {
            profit_threshold_pct: env::var("ROLLING_PROFIT_THRESHOLD_PCT")
                .unwrap_or_else(|_| "0.8".to_string())
                .parse()
                .unwrap_or(0.8),
            ratio: env::var("ROLLING_RATIO")
                .unwrap_or_else(|_| "0.6".to_string())
                .parse()
                .unwrap_or(0.6),
            max_rolls: env::var("ROLLING_MAX_ROLLS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),
        };

        Ok(Config {
            binance,
            llm,
            trading,
            rolling,
        })
    }
}
