//! Generic REST connector.
//!
//! Authenticated JSON-over-HTTP calls with retry on transient failures. Also
//! the transport underneath [`super::CatalogConnector`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use super::types::{ConnectorResult, ConnectorStatus, ConnectorType};
use super::Connector;
use crate::config::{ConnectorAuth, ConnectorConfig};
use crate::error::ConnectorError;

const CAPABILITIES: &[&str] = &["request", "get", "post", "put", "delete"];

/// Error bodies are cut to this many characters.
const MAX_ERROR_BODY: usize = 500;

/// One HTTP call as described by operation parameters.
#[derive(Debug, Clone, Default)]
pub struct RestRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: HashMap<String, String>,
}

impl RestRequest {
    pub fn get(path: &str) -> Self {
        Self {
            method: Method::GET,
            path: path.to_string(),
            ..Self::default()
        }
    }

    /// Build from operation params: `{path, query?, body?, headers?, method?}`.
    fn from_params(default_method: Method, params: &Value) -> Result<Self, String> {
        let method = match params.get("method").and_then(Value::as_str) {
            Some(m) => Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                .map_err(|_| format!("invalid HTTP method '{}'", m))?,
            None => default_method,
        };
        let path = params
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or("/")
            .to_string();
        let query = params
            .get("query")
            .or_else(|| params.get("params"))
            .and_then(Value::as_object)
            .map(|obj| {
                obj.iter()
                    .map(|(k, v)| {
                        let v = match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (k.clone(), v)
                    })
                    .collect()
            })
            .unwrap_or_default();
        let body = params.get("body").or_else(|| params.get("json")).cloned();
        let headers = params
            .get("headers")
            .and_then(Value::as_object)
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            method,
            path,
            query,
            body,
            headers,
        })
    }
}

pub struct RestConnector {
    name: String,
    config: ConnectorConfig,
    base_url: String,
    client: RwLock<Option<Client>>,
    connected: AtomicBool,
}

impl RestConnector {
    pub fn new(name: &str, config: ConnectorConfig) -> Self {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Self {
            name: name.to_string(),
            config,
            base_url,
            client: RwLock::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    fn not_configured(&self) -> ConnectorError {
        ConnectorError::NotConfigured(self.name.clone(), "base_url is empty".into())
    }

    fn default_headers(&self) -> Result<HeaderMap, ConnectorError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let invalid = |what: &str| {
            ConnectorError::NotConfigured(self.name.clone(), format!("invalid header {}", what))
        };

        match &self.config.auth {
            Some(ConnectorAuth::Bearer { token }) if !token.is_empty() => {
                let value = HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|_| invalid("Authorization"))?;
                headers.insert(AUTHORIZATION, value);
            }
            Some(ConnectorAuth::ApiKey { header, key }) if !key.is_empty() => {
                let name = HeaderName::from_bytes(header.as_bytes())
                    .map_err(|_| invalid(header.as_str()))?;
                let value = HeaderValue::from_str(key).map_err(|_| invalid(header.as_str()))?;
                headers.insert(name, value);
            }
            _ => {}
        }

        for (k, v) in &self.config.headers {
            let name =
                HeaderName::from_bytes(k.as_bytes()).map_err(|_| invalid(k.as_str()))?;
            let value = HeaderValue::from_str(v).map_err(|_| invalid(k.as_str()))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    fn build_client(&self) -> Result<Client, ConnectorError> {
        Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs.max(1)))
            .default_headers(self.default_headers()?)
            .build()
            .map_err(|e| ConnectorError::NotConfigured(self.name.clone(), e.to_string()))
    }

    /// The connected client, or a one-off client when not connected.
    fn client(&self) -> Result<Client, ConnectorError> {
        let existing = self
            .client
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        match existing {
            Some(client) => Ok(client),
            None => self.build_client(),
        }
    }

    /// Send one request, retrying connect errors, timeouts, 429 and 5xx.
    ///
    /// HTTP-level failures come back as an unsuccessful [`ConnectorResult`];
    /// only configuration problems are `Err`.
    pub async fn request(&self, req: RestRequest) -> Result<ConnectorResult, ConnectorError> {
        if self.base_url.is_empty() {
            return Err(self.not_configured());
        }
        let client = self.client()?;
        let url = format!("{}/{}", self.base_url, req.path.trim_start_matches('/'));
        let attempts = self.config.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let mut builder = client.request(req.method.clone(), &url).query(&req.query);
            if let Some(ConnectorAuth::Basic { username, password }) = &self.config.auth {
                builder = builder.basic_auth(username, Some(password));
            }
            for (k, v) in &req.headers {
                builder = builder.header(k.as_str(), v.as_str());
            }
            if let Some(body) = &req.body {
                builder = builder.json(body);
            }

            match builder.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(parse_body(resp).await);
                    }
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                        let snippet: String = text.chars().take(MAX_ERROR_BODY).collect();
                        return Ok(ConnectorResult::failure(format!(
                            "HTTP {}: {}",
                            status.as_u16(),
                            snippet
                        ))
                        .with_metadata("status", json!(status.as_u16())));
                    }
                    last_error = format!("HTTP {}", status.as_u16());
                }
                Err(e) if e.is_connect() || e.is_timeout() => {
                    last_error = e.to_string();
                }
                Err(e) => {
                    return Ok(ConnectorResult::failure(format!("Request failed: {}", e)));
                }
            }

            if attempt < attempts {
                let delay = Duration::from_secs(1 << (attempt - 1));
                debug!(
                    connector = %self.name,
                    path = %req.path,
                    attempt,
                    max = attempts,
                    "REST request failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        Ok(ConnectorResult::failure(format!(
            "Request failed after {} attempts: {}",
            attempts, last_error
        )))
    }

    pub async fn get(&self, path: &str) -> Result<ConnectorResult, ConnectorError> {
        self.request(RestRequest::get(path)).await
    }

    pub(crate) async fn get_with_query(
        &self,
        path: &str,
        query: Vec<(String, String)>,
    ) -> Result<ConnectorResult, ConnectorError> {
        self.request(RestRequest {
            query,
            ..RestRequest::get(path)
        })
        .await
    }
}

async fn parse_body(resp: reqwest::Response) -> ConnectorResult {
    let status = resp.status().as_u16();
    let is_json = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("application/json"))
        .unwrap_or(false);
    let text = match resp.text().await {
        Ok(t) => t,
        Err(e) => return ConnectorResult::failure(format!("Failed to read body: {}", e)),
    };
    let data = if is_json {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    } else {
        Value::String(text)
    };
    ConnectorResult::data(data).with_metadata("status", json!(status))
}

#[async_trait]
impl Connector for RestConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn connector_type(&self) -> ConnectorType {
        ConnectorType::RestApi
    }

    fn capabilities(&self) -> Vec<String> {
        CAPABILITIES.iter().map(|s| s.to_string()).collect()
    }

    async fn connect(&self) -> Result<(), ConnectorError> {
        if self.base_url.is_empty() {
            return Err(self.not_configured());
        }
        let client = self.build_client()?;
        *self
            .client
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(client);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ConnectorError> {
        self.client
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn health_check(&self) -> ConnectorStatus {
        if self.base_url.is_empty() {
            return ConnectorStatus::NotConfigured;
        }
        match self.get(&self.config.health_path).await {
            Ok(result) if result.success => ConnectorStatus::Healthy,
            // The service answered with an error status.
            Ok(result) if result.metadata.contains_key("status") => ConnectorStatus::Degraded,
            Ok(_) | Err(_) => ConnectorStatus::Unreachable,
        }
    }

    async fn execute(
        &self,
        operation: &str,
        params: Value,
    ) -> Result<ConnectorResult, ConnectorError> {
        let method = match operation {
            "request" | "get" => Method::GET,
            "post" => Method::POST,
            "put" => Method::PUT,
            "delete" => Method::DELETE,
            other => {
                return Err(ConnectorError::UnsupportedOperation {
                    connector: self.name.clone(),
                    operation: other.to_string(),
                    supported: CAPABILITIES.join(", "),
                })
            }
        };
        // Only the generic `request` operation may override the verb.
        let mut req = RestRequest::from_params(method.clone(), &params)
            .map_err(|e| ConnectorError::Failed(self.name.clone(), e))?;
        if operation != "request" {
            req.method = method;
        }
        self.request(req).await
    }
}
