//! The `http.request` node.
//!
//! Parameters come from the node's configuration:
//!
//! | name         | required | default |
//! |--------------|----------|---------|
//! | `url`        | yes      |         |
//! | `method`     | no       | `GET`   |
//! | `headers`    | no       | `{}`    |
//! | `body`       | no       |         |
//! | `credential` | no       |         |
//! | `timeoutMs`  | no       | 30000   |
//!
//! Output is `{status, headers, body}`. The body is parsed as JSON when
//! possible and kept as a string otherwise. Any non-2xx status fails the
//! node with `HTTP <status>`.

use crate::credential::{AccessTokenProvider, CredentialData, StoredTokenProvider};
use crate::error::CredentialError;
use async_trait::async_trait;
use flowloom_workflow::{
    ExecutionContext, ExecutionResult, JsonMap, Node, NodeCategory, NodeDefinition, NodeExecutor,
    ParameterDefinition, ParameterKind,
};
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const HTTP_REQUEST: &str = "http.request";

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

fn default_method() -> String {
    "GET".to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestParams {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: BTreeMap<String, JsonValue>,
    #[serde(default)]
    body: Option<JsonValue>,
    #[serde(default)]
    credential: Option<String>,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

/// Sends one HTTP request per execution.
pub struct HttpRequestExecutor {
    client: Client,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl HttpRequestExecutor {
    /// Uses a default client and [`StoredTokenProvider`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_client(Client::new(), Arc::new(StoredTokenProvider))
    }

    #[must_use]
    pub fn with_client(client: Client, tokens: Arc<dyn AccessTokenProvider>) -> Self {
        Self { client, tokens }
    }

    async fn authorize(
        &self,
        request: RequestBuilder,
        name: &str,
        context: &ExecutionContext,
    ) -> Result<RequestBuilder, String> {
        let raw = context.credential(name).ok_or_else(|| {
            CredentialError::NotFound {
                name: name.to_string(),
            }
            .to_string()
        })?;
        let credential = CredentialData::from_value(name, raw).map_err(|e| e.to_string())?;

        Ok(match &credential {
            CredentialData::Oauth2 { .. } | CredentialData::BearerToken { .. } => {
                let token = self
                    .tokens
                    .valid_access_token(name, &credential)
                    .await
                    .map_err(|report| report.to_string())?;
                request.bearer_auth(token)
            }
            CredentialData::ApiKey { key, header_name } => request.header(
                header_name.as_deref().unwrap_or(DEFAULT_API_KEY_HEADER),
                key.as_str(),
            ),
            CredentialData::BasicAuth { username, password } => {
                request.basic_auth(username, Some(password))
            }
        })
    }

    async fn send(&self, params: RequestParams, context: &ExecutionContext) -> ExecutionResult {
        let Ok(method) = Method::from_bytes(params.method.to_ascii_uppercase().as_bytes()) else {
            return ExecutionResult::failure(format!("unsupported HTTP method '{}'", params.method));
        };

        let mut request = self.client.request(method.clone(), &params.url);
        for (name, value) in &params.headers {
            let value = match value {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            request = request.header(name.as_str(), value);
        }
        if let Some(name) = &params.credential {
            request = match self.authorize(request, name, context).await {
                Ok(request) => request,
                Err(error) => return ExecutionResult::failure(error),
            };
        }
        match params.body {
            Some(JsonValue::String(text)) => request = request.body(text),
            Some(JsonValue::Null) | None => {}
            Some(body) => request = request.json(&body),
        }

        debug!(method = %method, url = %params.url, "sending request");
        let timeout = Duration::from_millis(params.timeout_ms);
        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let headers: JsonMap = response
                .headers()
                .iter()
                .filter_map(|(k, v)| {
                    v.to_str()
                        .ok()
                        .map(|v| (k.as_str().to_string(), JsonValue::String(v.to_string())))
                })
                .collect();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, headers, text))
        };

        let (status, headers, text) = match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(parts)) => parts,
            Ok(Err(e)) => return ExecutionResult::failure(format!("request failed: {e}")),
            Err(_) => {
                return ExecutionResult::failure(format!(
                    "request timed out after {}ms",
                    params.timeout_ms
                ));
            }
        };

        if !status.is_success() {
            return ExecutionResult::failure(format!("HTTP {}", status.as_u16()));
        }

        let body = serde_json::from_str::<JsonValue>(&text).unwrap_or(JsonValue::String(text));
        let mut output = JsonMap::new();
        output.insert("status".to_string(), json!(status.as_u16()));
        output.insert("headers".to_string(), JsonValue::Object(headers));
        output.insert("body".to_string(), body);
        ExecutionResult::success(output)
    }
}

impl Default for HttpRequestExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for HttpRequestExecutor {
    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new(HTTP_REQUEST, "HTTP Request", NodeCategory::Action)
            .with_description("Sends an HTTP request and outputs the response")
            .with_parameter(ParameterDefinition::required("url", ParameterKind::String))
            .with_parameter(
                ParameterDefinition::optional("method", ParameterKind::String)
                    .with_default(json!("GET")),
            )
            .with_parameter(ParameterDefinition::optional("headers", ParameterKind::Object))
            .with_parameter(ParameterDefinition::optional("body", ParameterKind::Any))
            .with_parameter(
                ParameterDefinition::optional("credential", ParameterKind::String)
                    .with_description("Name of a run credential used to authenticate"),
            )
            .with_parameter(
                ParameterDefinition::optional("timeoutMs", ParameterKind::Number)
                    .with_default(json!(DEFAULT_TIMEOUT_MS)),
            )
    }

    async fn execute(&self, node: &Node, context: &ExecutionContext) -> ExecutionResult {
        match serde_json::from_value::<RequestParams>(JsonValue::Object(node.config.clone())) {
            Ok(params) => self.send(params, context).await,
            Err(e) => ExecutionResult::failure(format!("invalid request parameters: {e}")),
        }
    }
}
