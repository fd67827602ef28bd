use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{HeaderMap, ACCEPT, ORIGIN};
use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::error::AppError;
use crate::host::MAINNET_HOST;
use crate::request::RequestConfiguration;

pub const DEFAULT_SCHEME: &str = "https";
pub const DEFAULT_PORT: u16 = 443;
pub const DEFAULT_API_VERSION: &str = "v1";
pub const DEFAULT_ORIGIN: &str = "https://github.com/cardano-community/koios-cli";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 200;

/// Connection settings, fixed for the lifetime of a [`KoiosClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub api_version: String,
    pub origin: String,
    pub timeout: Duration,
    pub auth_token: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            scheme: DEFAULT_SCHEME.to_string(),
            host: MAINNET_HOST.to_string(),
            port: DEFAULT_PORT,
            api_version: DEFAULT_API_VERSION.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            timeout: DEFAULT_TIMEOUT,
            auth_token: None,
        }
    }
}

impl ClientOptions {
    /// `{scheme}://{host}[:{port}]/api/{version}`, omitting the scheme's default port.
    pub fn base_url(&self) -> String {
        let default_port = match self.scheme.as_str() {
            "https" => Some(443),
            "http" => Some(80),
            _ => None,
        };
        if default_port == Some(self.port) {
            format!("{}://{}/api/{}", self.scheme, self.host, self.api_version)
        } else {
            format!(
                "{}://{}:{}/api/{}",
                self.scheme, self.host, self.port, self.api_version
            )
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// One endpoint invocation: path, endpoint parameters and optional JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    pub method: HttpMethod,
    pub endpoint: &'static str,
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiCall {
    pub fn get(endpoint: &'static str) -> Self {
        Self {
            method: HttpMethod::Get,
            endpoint,
            params: Vec::new(),
            body: None,
        }
    }

    pub fn post(endpoint: &'static str, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            endpoint,
            params: Vec::new(),
            body: Some(body),
        }
    }

    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }

    pub fn param_opt(self, key: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.param(key, value),
            None => self,
        }
    }
}

/// Decoded response body plus transport statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub elapsed: Duration,
    pub headers: HeaderMap,
    pub data: Value,
}

impl ApiResponse {
    /// Value of a response header, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// Anything that can carry an [`ApiCall`] to a Koios instance.
#[async_trait]
pub trait KoiosTransport: Send + Sync {
    async fn execute(
        &self,
        call: &ApiCall,
        config: &RequestConfiguration,
    ) -> Result<ApiResponse, AppError>;

    /// Base URL, for logging and health reports.
    fn base_url(&self) -> &str;
}

/// reqwest-backed Koios REST client.
#[derive(Clone)]
pub struct KoiosClient {
    base_url: String,
    origin: String,
    auth_token: Option<String>,
    http: Client,
}

impl KoiosClient {
    pub fn new(options: ClientOptions) -> Result<Self, AppError> {
        let http = Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|err| AppError::Network(err.to_string()))?;

        Ok(Self {
            base_url: options.base_url(),
            origin: options.origin,
            auth_token: options.auth_token,
            http,
        })
    }

    fn build_request(
        &self,
        call: &ApiCall,
        config: &RequestConfiguration,
    ) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, call.endpoint);

        let mut request = match (call.method, &call.body) {
            (HttpMethod::Post, Some(body)) => self.http.post(&url).json(body),
            (HttpMethod::Post, None) => self.http.post(&url),
            (HttpMethod::Get, _) => self.http.get(&url),
        };

        request = request
            .query(&call.params)
            .query(&config.query_pairs())
            .header(ACCEPT, "application/json")
            .header(ORIGIN, &self.origin);

        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        request
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Exponential backoff with up to 100ms of random jitter.
fn backoff_delay(attempt: u32) -> Duration {
    let base = BASE_BACKOFF_MS * 2u64.pow(attempt.saturating_sub(1));
    let jitter = rand::thread_rng().gen_range(0..100);
    Duration::from_millis(base + jitter)
}

#[async_trait]
impl KoiosTransport for KoiosClient {
    async fn execute(
        &self,
        call: &ApiCall,
        config: &RequestConfiguration,
    ) -> Result<ApiResponse, AppError> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            tracing::debug!(
                "{:?} {}/{} (attempt {}, page {}, usage {:?})",
                call.method,
                self.base_url,
                call.endpoint,
                attempt,
                config.current_page(),
                config.usage_stamp()
            );

            let started = Instant::now();
            let result = self.build_request(call, config).send().await;

            let response = match result {
                Ok(response) => response,
                Err(err) if (err.is_connect() || err.is_timeout()) && attempt < MAX_ATTEMPTS => {
                    tracing::warn!("Request to {} failed, retrying: {}", call.endpoint, err);
                    tokio::time::sleep(backoff_delay(attempt)).await;
                    continue;
                }
                Err(err) => return Err(AppError::Network(err.to_string())),
            };

            let status = response.status();
            if !status.is_success() {
                if is_retryable(status) && attempt < MAX_ATTEMPTS {
                    tracing::warn!("Koios returned HTTP {} for {}, retrying", status, call.endpoint);
                    tokio::time::sleep(backoff_delay(attempt)).await;
                    continue;
                }
                let body = response.text().await.unwrap_or_default();
                return Err(AppError::Network(format!(
                    "Koios returned HTTP {}: {}",
                    status,
                    body.trim()
                )));
            }

            let headers = response.headers().clone();
            let text = response
                .text()
                .await
                .map_err(|err| AppError::Network(err.to_string()))?;
            let data = if text.trim().is_empty() {
                Value::Null
            } else {
                serde_json::from_str(&text).map_err(|err| AppError::Parse(err.to_string()))?
            };

            return Ok(ApiResponse {
                status: status.as_u16(),
                elapsed: started.elapsed(),
                headers,
                data,
            });
        }
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{compose, Pagination};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, token: Option<&str>) -> KoiosClient {
        KoiosClient::new(ClientOptions {
            scheme: "http".into(),
            host: server.address().ip().to_string(),
            port: server.address().port(),
            timeout: Duration::from_secs(5),
            auth_token: token.map(String::from),
            ..ClientOptions::default()
        })
        .unwrap()
    }

    #[test]
    fn base_url_omits_default_port() {
        assert_eq!(ClientOptions::default().base_url(), "https://api.koios.rest/api/v1");

        let custom = ClientOptions {
            scheme: "http".into(),
            host: "localhost".into(),
            port: 8053,
            ..ClientOptions::default()
        };
        assert_eq!(custom.base_url(), "http://localhost:8053/api/v1");
    }

    #[tokio::test]
    async fn get_sends_pagination_overlay_and_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/totals"))
            .and(query_param("_epoch_no", "320"))
            .and(query_param("offset", "0"))
            .and(query_param("limit", "5"))
            .and(query_param("order", "epoch_no.desc"))
            .and(header("authorization", "Bearer test-token"))
            .and(header("origin", DEFAULT_ORIGIN))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"epoch_no": 320}])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Some("test-token"));
        let config = compose(&Pagination::default(), Some("limit=5&order=epoch_no.desc"), None).unwrap();
        let call = ApiCall::get("totals").param("_epoch_no", 320);

        let response = client.execute(&call, &config).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.data, json!([{"epoch_no": 320}]));
    }

    #[tokio::test]
    async fn post_sends_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/tx_status"))
            .and(body_json(json!({"_tx_hashes": ["abc"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"tx_hash": "abc", "num_confirmations": 7}])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        let config = compose(&Pagination::default(), None, None).unwrap();
        let call = ApiCall::post("tx_status", json!({"_tx_hashes": ["abc"]}));

        let response = client.execute(&call, &config).await.unwrap();
        assert_eq!(response.data[0]["num_confirmations"], 7);
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tip"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tip"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"block_no": 1}])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        let config = compose(&Pagination::default(), None, None).unwrap();

        let response = client.execute(&ApiCall::get("tip"), &config).await.unwrap();
        assert_eq!(response.data, json!([{"block_no": 1}]));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tip"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Some("bad"));
        let config = compose(&Pagination::default(), None, None).unwrap();

        let err = client.execute(&ApiCall::get("tip"), &config).await.unwrap_err();
        match err {
            AppError::Network(message) => {
                assert!(message.contains("401"));
                assert!(message.contains("invalid token"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn response_headers_are_exposed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/blocks"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-range", "0-999/*")
                    .set_body_json(json!([])),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        let config = compose(&Pagination::default(), None, None).unwrap();

        let response = client.execute(&ApiCall::get("blocks"), &config).await.unwrap();
        assert_eq!(response.header("content-range"), Some("0-999/*"));
        assert_eq!(response.header("x-missing"), None);
    }

    #[tokio::test]
    async fn invalid_json_body_is_a_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/genesis"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        let config = compose(&Pagination::default(), None, None).unwrap();

        let err = client.execute(&ApiCall::get("genesis"), &config).await.unwrap_err();
        assert!(matches!(err, AppError::Parse(_)));
    }
}
