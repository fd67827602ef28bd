//! In-memory [`KoiosTransport`] for command handler tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;

use crate::error::AppError;
use crate::request::RequestConfiguration;
use crate::services::koios::{ApiCall, ApiResponse, KoiosTransport};

/// Canned answer for calls to one endpoint, optionally narrowed to calls
/// carrying a specific parameter.
struct Route {
    endpoint: &'static str,
    param: Option<(String, String)>,
    response: Result<Value, String>,
}

impl Route {
    fn matches(&self, call: &ApiCall) -> bool {
        self.endpoint == call.endpoint
            && self.param.as_ref().map_or(true, |param| call.params.contains(param))
    }
}

/// Returns canned bodies (or errors) and records every call it receives.
///
/// Routes are tried in insertion order; calls matching none of them get the
/// default response.
pub struct MockKoiosClient {
    response: Result<Value, String>,
    routes: Vec<Route>,
    headers: HeaderMap,
    calls: Mutex<Vec<(ApiCall, RequestConfiguration)>>,
}

impl MockKoiosClient {
    pub fn new() -> Self {
        Self {
            response: Ok(Value::Array(Vec::new())),
            routes: Vec::new(),
            headers: HeaderMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.response = Ok(body);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.response = Err(message.into());
        self
    }

    pub fn with_route(mut self, endpoint: &'static str, body: Value) -> Self {
        self.routes.push(Route {
            endpoint,
            param: None,
            response: Ok(body),
        });
        self
    }

    pub fn with_param_route(
        mut self,
        endpoint: &'static str,
        key: &str,
        value: &str,
        body: Value,
    ) -> Self {
        self.routes.push(Route {
            endpoint,
            param: Some((key.to_string(), value.to_string())),
            response: Ok(body),
        });
        self
    }

    pub fn with_route_error(mut self, endpoint: &'static str, message: impl Into<String>) -> Self {
        self.routes.push(Route {
            endpoint,
            param: None,
            response: Err(message.into()),
        });
        self
    }

    /// Header attached to every successful response.
    pub fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers.insert(name, HeaderValue::from_static(value));
        self
    }

    pub fn calls(&self) -> Vec<(ApiCall, RequestConfiguration)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl KoiosTransport for MockKoiosClient {
    async fn execute(
        &self,
        call: &ApiCall,
        config: &RequestConfiguration,
    ) -> Result<ApiResponse, AppError> {
        self.calls.lock().unwrap().push((call.clone(), config.clone()));
        let response = self
            .routes
            .iter()
            .find(|route| route.matches(call))
            .map_or(&self.response, |route| &route.response);

        match response {
            Ok(data) => Ok(ApiResponse {
                status: 200,
                elapsed: Duration::from_millis(12),
                headers: self.headers.clone(),
                data: data.clone(),
            }),
            Err(message) => Err(AppError::Network(message.clone())),
        }
    }

    fn base_url(&self) -> &str {
        "http://mock.koios/api/v1"
    }
}
