use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::BinanceConfig;
use super::error::ExchangeError;

/// Generous tolerance window so clock drift does not trip error -1021.
const RECV_WINDOW_MS: u64 = 60_000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Which API family a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Spot,
    Futures,
}

/// Raw exchange handle the gateway is built on. One method keeps the trait
/// object-safe and trivially mockable in tests.
#[async_trait]
pub trait ExchangeTransport: Send + Sync {
    async fn request(
        &self,
        method: Method,
        endpoint: Endpoint,
        path: &str,
        params: Vec<(String, String)>,
        signed: bool,
    ) -> Result<Value, ExchangeError>;
}

/// Shape of an exchange error body.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

/// Signed REST transport for Binance-style spot and futures APIs.
#[derive(Debug)]
pub struct BinanceHttpTransport {
    http: reqwest::Client,
    api_secret: String,
    rest_host: String,
    futures_host: String,
}

impl BinanceHttpTransport {
    /// Fails if the API key cannot be carried as a header value or the HTTP
    /// client cannot be built with the request timeout.
    pub fn new(config: &BinanceConfig) -> Result<Self, ExchangeError> {
        let mut headers = reqwest::header::HeaderMap::new();
        let key = reqwest::header::HeaderValue::from_str(&config.api_key)
            .map_err(|e| ExchangeError::Transport(format!("API key rejected: {}", e)))?;
        headers.insert("X-MBX-APIKEY", key);

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|e| ExchangeError::Transport(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            http,
            api_secret: config.api_secret.clone(),
            rest_host: config.rest_host.clone(),
            futures_host: config.futures_host.clone(),
        })
    }

    /// One unauthenticated round trip to confirm connectivity and clock
    /// sanity. Failure is logged, not fatal: the recv window is already wide.
    pub async fn check_server_time(&self) {
        match self
            .request(Method::GET, Endpoint::Futures, "/fapi/v1/time", vec![], false)
            .await
        {
            Ok(v) => info!("Exchange time sync ok: {}", v),
            Err(e) => warn!("Exchange time sync failed: {} (recvWindow is relaxed)", e),
        }
    }

    fn host(&self, endpoint: Endpoint) -> &str {
        match endpoint {
            Endpoint::Spot => &self.rest_host,
            Endpoint::Futures => &self.futures_host,
        }
    }
}

#[async_trait]
impl ExchangeTransport for BinanceHttpTransport {
    async fn request(
        &self,
        method: Method,
        endpoint: Endpoint,
        path: &str,
        mut params: Vec<(String, String)>,
        signed: bool,
    ) -> Result<Value, ExchangeError> {
        if signed {
            params.push(("recvWindow".to_string(), RECV_WINDOW_MS.to_string()));
            params.push((
                "timestamp".to_string(),
                Utc::now().timestamp_millis().to_string(),
            ));
        }

        let mut query = build_query(&params);
        if signed {
            let signature = sign_query(&self.api_secret, &query)?;
            query.push_str("&signature=");
            query.push_str(&signature);
        }

        let mut url = format!("{}{}", self.host(endpoint), path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }

        debug!("{} {}", method, path);
        let response = self
            .http
            .request(method, &url)
            .send()
            .await
            .map_err(|e| {
                let err = ExchangeError::from(e);
                error!("Exchange request failed: {}", err);
                err
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let err = match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(api) => ExchangeError::Api {
                    code: api.code,
                    message: api.msg,
                },
                Err(_) => ExchangeError::Transport(format!("HTTP {}: {}", status, body)),
            };
            error!("Exchange error on {}: {}", path, err);
            return Err(err);
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| {
            let err = ExchangeError::Transport(format!("undecodable body: {}", e));
            error!("Exchange error on {}: {}", path, err);
            err
        })
    }
}

fn build_query(params: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .finish()
}

fn sign_query(secret: &str, query: &str) -> Result<String, ExchangeError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Transport(format!("signing key rejected: {}", e)))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_exchange_reference_vector() {
        // Vector from the Binance signed-endpoint documentation.
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign_query(secret, query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn query_preserves_parameter_order() {
        let q = build_query(&[
            ("symbol".into(), "BTCUSDT".into()),
            ("side".into(), "SELL".into()),
            ("quantity".into(), "2.5".into()),
        ]);
        assert_eq!(q, "symbol=BTCUSDT&side=SELL&quantity=2.5");
    }

    #[test]
    fn empty_params_make_empty_query() {
        assert_eq!(build_query(&[]), "");
    }

    fn test_binance_config(api_key: &str) -> BinanceConfig {
        BinanceConfig {
            api_key: api_key.into(),
            api_secret: "secret".into(),
            testnet: false,
            rest_host: "https://api.binance.com".into(),
            futures_host: "https://fapi.binance.com".into(),
        }
    }

    #[test]
    fn transport_builds_with_valid_api_key() {
        assert!(BinanceHttpTransport::new(&test_binance_config("key-123")).is_ok());
    }

    #[test]
    fn transport_rejects_api_key_with_control_characters() {
        let err = BinanceHttpTransport::new(&test_binance_config("bad\nkey")).unwrap_err();
        assert!(matches!(err, ExchangeError::Transport(_)));
        assert!(err.to_string().contains("API key rejected"));
    }
}
