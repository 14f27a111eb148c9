use chrono::{Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::LlmConfig;
use crate::llm::directive::{parse_directive, TradingDirective};
use crate::llm::prompt::{
    build_close_eval_prompt, build_trading_prompt, AccountSnapshot, MarketSnapshot,
    PositionSnapshot, TradeRecord, CLOSE_EVAL_SYSTEM_PROMPT, DECISION_SYSTEM_PROMPT,
    STRICT_JSON_SYSTEM_PROMPT,
};

/// Two immediate attempts, no backoff.
const MAX_ATTEMPTS: u32 = 2;

/// Total communication failure after retry exhaustion. Malformed response
/// *content* is never an error: it degrades to the default directive.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("inference request timed out")]
    Timeout,
    #[error("inference API error: HTTP {0}")]
    Api(u16),
    #[error("inference transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    max_tokens: u32,
    stream: bool,
}

/// OpenAI-compatible completion shape; the native Ollama response is
/// normalized into this.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletion {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatContent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatContent {
    pub content: String,
}

impl ChatCompletion {
    pub fn content(&self) -> &str {
        self.choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or("")
    }
}

/// Native Ollama chat response: `{"message": {"content": "..."}}`.
#[derive(Debug, Deserialize)]
struct NativeChatResponse {
    message: ChatContent,
}

/// Successful outcome of a directive analysis.
#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub directive: TradingDirective,
    pub raw_response: String,
    pub model: String,
}

/// Current trading session, derived from the UTC hour. Logging only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingSession {
    pub name: &'static str,
    pub volatility: &'static str,
    pub utc_hour: u32,
}

pub fn trading_session() -> TradingSession {
    session_for_hour(Utc::now().hour())
}

fn session_for_hour(utc_hour: u32) -> TradingSession {
    let (name, volatility) = match utc_hour {
        13..=16 => ("EU/US overlap", "high"),
        8..=12 => ("European", "medium"),
        17..=21 => ("US", "medium"),
        _ => ("Asian", "low"),
    };
    TradingSession {
        name,
        volatility,
        utc_hour,
    }
}

/// Client for a local Ollama-style chat endpoint.
///
/// Stateless between calls; configuration (model, sampling, timeout) is
/// captured at construction.
pub struct LlmClient {
    http: reqwest::Client,
    chat_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl LlmClient {
    /// Fails only if the HTTP client cannot be built with the configured
    /// inference timeout.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| LlmError::Transport(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            http,
            chat_url: config.chat_url(),
            api_key: config.api_key.clone(),
            model: config.model_name.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    /// Point the client at a different chat endpoint (proxies, tests).
    pub fn with_chat_url(mut self, url: impl Into<String>) -> Self {
        self.chat_url = url.into();
        self
    }

    async fn post_chat(&self, messages: &[ChatMessage]) -> Result<reqwest::Response, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };

        self.http
            .post(&self.chat_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Transport(e.to_string())
                }
            })
    }

    /// One chat round trip, normalized to the OpenAI-compatible shape
    /// whichever of the two response formats the endpoint speaks.
    pub async fn chat_completion(
        &self,
        messages: &[ChatMessage],
    ) -> Result<ChatCompletion, LlmError> {
        let response = self.post_chat(messages).await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Inference API error {}: {}", status, body);
            return Err(LlmError::Api(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        Ok(normalize_completion(&body))
    }

    /// Analyze the market and produce a directive, with the bounded retry.
    ///
    /// Never fails on malformed *content*, only on total communication
    /// failure after both attempts.
    pub async fn analyze_market_and_decide(
        &self,
        market: &MarketSnapshot,
        account: &AccountSnapshot,
        history: &[TradeRecord],
    ) -> Result<DecisionOutcome, LlmError> {
        let prompt = build_trading_prompt(market, account, history);
        let messages = [
            ChatMessage::system(DECISION_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ];

        let mut last_err = LlmError::Transport("no attempt made".into());
        for attempt in 1..=MAX_ATTEMPTS {
            info!("Inference attempt {}/{}...", attempt, MAX_ATTEMPTS);
            match self.chat_completion(&messages).await {
                Ok(completion) => {
                    let content = completion.content().to_string();
                    let directive = parse_directive(&content);
                    info!("✅ Inference succeeded (attempt {})", attempt);
                    return Ok(DecisionOutcome {
                        directive,
                        raw_response: content,
                        model: self.model.clone(),
                    });
                }
                Err(e) => {
                    error!("❌ Inference attempt {}/{} failed: {}", attempt, MAX_ATTEMPTS, e);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// Same flow under the strict JSON-only policy. Single attempt; the
    /// caller's scheduling loop owns any retry.
    pub async fn analyze_with_reasoning(
        &self,
        market: &MarketSnapshot,
        account: &AccountSnapshot,
        history: &[TradeRecord],
    ) -> Result<DecisionOutcome, LlmError> {
        let prompt = build_trading_prompt(market, account, history);
        let messages = [
            ChatMessage::system(STRICT_JSON_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ];

        let completion = self.chat_completion(&messages).await?;
        let content = completion.content().to_string();
        let directive = parse_directive(&content);
        Ok(DecisionOutcome {
            directive,
            raw_response: content,
            model: self.model.clone(),
        })
    }

    /// Evaluate an open position for closure. The prompt constrains the model
    /// to CLOSE/HOLD but the parser still accepts any action; enforcement is
    /// the caller's call. Endpoint failure degrades to a HOLD directive with
    /// the error recorded in `narrative`; this path never returns an error.
    pub async fn evaluate_position_for_closing(
        &self,
        position: &PositionSnapshot,
        market: &MarketSnapshot,
        roll_count: u32,
        max_rolls: u32,
    ) -> TradingDirective {
        let prompt = build_close_eval_prompt(position, market, roll_count, max_rolls);
        let messages = [
            ChatMessage::system(CLOSE_EVAL_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ];

        match self.chat_completion(&messages).await {
            Ok(completion) => parse_directive(completion.content()),
            Err(e) => {
                error!("Position evaluation failed for {}: {}", position.symbol, e);
                let mut directive = TradingDirective::hold_default("");
                directive.confidence = 0;
                directive.narrative = format!("inference failure: {}", e);
                directive
            }
        }
    }
}

/// Accept either the OpenAI-compatible shape or the native Ollama shape; an
/// undecodable body normalizes to an empty completion (the parser then
/// produces the default directive from the empty content).
fn normalize_completion(body: &str) -> ChatCompletion {
    if let Ok(completion) = serde_json::from_str::<ChatCompletion>(body) {
        return completion;
    }
    if let Ok(native) = serde_json::from_str::<NativeChatResponse>(body) {
        return ChatCompletion {
            choices: vec![ChatChoice {
                message: native.message,
            }],
        };
    }
    warn!("Unrecognized completion body: {}", body);
    ChatCompletion { choices: vec![] }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use crate::llm::directive::DirectiveAction;

    fn test_config(timeout_secs: u64) -> LlmConfig {
        LlmConfig {
            api_key: "test-key".into(),
            model_name: "qwen3:14b".into(),
            api_port: 11434,
            max_tokens: 1024,
            temperature: 0.3,
            api_timeout_secs: timeout_secs,
        }
    }

    fn market() -> MarketSnapshot {
        MarketSnapshot {
            symbol: "BTCUSDT".into(),
            current_price: 103500.0,
            price_change_24h: 1.1,
            rsi: 55.0,
            macd_histogram: 3.2,
            trend: "up".into(),
        }
    }

    fn account() -> AccountSnapshot {
        AccountSnapshot {
            balance: 20.0,
            available_balance: 18.0,
        }
    }

    #[test]
    fn session_labels_cover_the_clock() {
        assert_eq!(session_for_hour(14).name, "EU/US overlap");
        assert_eq!(session_for_hour(9).name, "European");
        assert_eq!(session_for_hour(19).name, "US");
        assert_eq!(session_for_hour(2).name, "Asian");
        assert_eq!(session_for_hour(2).volatility, "low");
    }

    #[test]
    fn native_shape_is_normalized() {
        let completion =
            normalize_completion(r#"{"message":{"content":"{\"action\":\"CLOSE\"}"}}"#);
        assert_eq!(completion.content(), r#"{"action":"CLOSE"}"#);
    }

    #[test]
    fn openai_shape_passes_through() {
        let completion = normalize_completion(
            r#"{"choices":[{"message":{"content":"{\"action\":\"HOLD\"}"}}]}"#,
        );
        assert_eq!(completion.content(), r#"{"action":"HOLD"}"#);
    }

    #[tokio::test]
    async fn directive_from_native_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_body(
                r#"{"message":{"content":"{\"action\":\"OPEN_LONG\",\"confidence\":80,\"leverage\":15}"}}"#,
            )
            .create_async()
            .await;

        let client = LlmClient::new(&test_config(5)).unwrap()
            .with_chat_url(format!("{}/api/chat", server.url()));
        let outcome = client
            .analyze_market_and_decide(&market(), &account(), &[])
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(outcome.directive.action, DirectiveAction::OpenLong);
        assert_eq!(outcome.directive.confidence, 80);
        assert_eq!(outcome.directive.leverage, 15);
        assert_eq!(outcome.model, "qwen3:14b");
    }

    #[tokio::test]
    async fn malformed_content_degrades_to_hold_not_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_body(r#"{"message":{"content":"the market feels frothy, no json for you"}}"#)
            .create_async()
            .await;

        let client = LlmClient::new(&test_config(5)).unwrap()
            .with_chat_url(format!("{}/api/chat", server.url()));
        let outcome = client
            .analyze_market_and_decide(&market(), &account(), &[])
            .await
            .unwrap();

        assert_eq!(outcome.directive.action, DirectiveAction::Hold);
        assert!(outcome.raw_response.contains("frothy"));
    }

    #[tokio::test]
    async fn server_error_retries_exactly_twice() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .with_status(500)
            .with_body("upstream exploded")
            .expect(2)
            .create_async()
            .await;

        let client = LlmClient::new(&test_config(5)).unwrap()
            .with_chat_url(format!("{}/api/chat", server.url()));
        let err = client
            .analyze_market_and_decide(&market(), &account(), &[])
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, LlmError::Api(500)));
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn timeout_surfaces_after_exactly_two_attempts() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        // A listener that accepts connections but never responds, so each
        // attempt runs into the client timeout. Counting the accepted
        // connections pins the retry budget at two.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        std::thread::spawn(move || {
            let mut held = Vec::new();
            for stream in listener.incoming() {
                match stream {
                    Ok(s) => {
                        counter.fetch_add(1, Ordering::SeqCst);
                        held.push(s);
                    }
                    Err(_) => break,
                }
            }
        });

        let client = LlmClient::new(&test_config(1)).unwrap()
            .with_chat_url(format!("http://{}/api/chat", addr));
        let err = client
            .analyze_market_and_decide(&market(), &account(), &[])
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::Timeout));
        assert!(err.to_string().contains("timed out"));

        // The accept thread may lag the client by a beat.
        for _ in 0..50 {
            if accepted.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn close_evaluation_absorbs_endpoint_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(503)
            .create_async()
            .await;

        let client = LlmClient::new(&test_config(5)).unwrap()
            .with_chat_url(format!("{}/api/chat", server.url()));
        let position = PositionSnapshot {
            symbol: "BTCUSDT".into(),
            side: "LONG".into(),
            entry_price: 100000.0,
            current_price: 101000.0,
            unrealized_pnl_pct: 1.0,
            leverage: 10,
            holding_time: "30m".into(),
        };

        let directive = client
            .evaluate_position_for_closing(&position, &market(), 0, 3)
            .await;

        assert_eq!(directive.action, DirectiveAction::Hold);
        assert_eq!(directive.confidence, 0);
        assert!(directive.narrative.contains("inference failure"));
    }
}
