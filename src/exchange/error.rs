use thiserror::Error;

/// Uniform failure for every gateway operation.
///
/// The exchange reports structured errors as `{code, msg}` bodies; everything
/// else (DNS, TLS, timeouts, undecodable bodies) is a transport failure. Both
/// are logged at the call site that produced them before being returned.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("API error: {code} - {message}")]
    Api { code: i64, message: String },
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        ExchangeError::Transport(e.to_string())
    }
}
