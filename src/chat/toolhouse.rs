use std::future::Future;

use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::chat::completion::CompletionResponse;
use crate::chat::message::Message;
use crate::chat::transport::{RequestFailure, post_json};

/// Toolhouse REST API root; `get_tools` and `run_tools` live below it.
pub const TOOLHOUSE_API_URL: &str = "https://api.toolhouse.ai/v1";

/// Tool schemas are requested in OpenAI function-calling format, which is
/// what the completion endpoint speaks.
const TOOL_PROVIDER: &str = "openai";

/// Key/value settings attached to every tool-service call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeMetadata {
    pub id: String,
    pub timezone: i32,
}

impl Default for RuntimeMetadata {
    fn default() -> Self {
        Self {
            id: "10566".to_string(),
            timezone: -8,
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("missing field `{field}` in {context}")]
    MissingField {
        field: &'static str,
        context: &'static str,
    },
    #[error("tool service request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("tool service API error {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("tool service response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ToolError {
    /// Missing-field failures get their own banner and a per-choice dump.
    pub fn is_missing_field(&self) -> bool {
        matches!(self, Self::MissingField { .. })
    }
}

impl From<RequestFailure> for ToolError {
    fn from(failure: RequestFailure) -> Self {
        match failure {
            RequestFailure::Request(source) => Self::Request(source),
            RequestFailure::Api { status, body } => Self::Api { status, body },
        }
    }
}

/// Remote tool catalog and execution.
pub trait ToolService {
    /// Tool schemas to offer the model.
    fn catalog(&self) -> impl Future<Output = Result<Vec<Value>, ToolError>> + Send;

    /// Executes the tool invocation carried by `response` and returns the
    /// single message to append to the conversation.
    fn run_tools(
        &self,
        response: &CompletionResponse,
    ) -> impl Future<Output = Result<Message, ToolError>> + Send;
}

impl<S: ToolService> ToolService for &S {
    fn catalog(&self) -> impl Future<Output = Result<Vec<Value>, ToolError>> + Send {
        (**self).catalog()
    }

    fn run_tools(
        &self,
        response: &CompletionResponse,
    ) -> impl Future<Output = Result<Message, ToolError>> + Send {
        (**self).run_tools(response)
    }
}

#[derive(Debug, Serialize)]
struct ToolServiceRequest<'a> {
    provider: &'static str,
    metadata: &'a RuntimeMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    bundle: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a Value>,
}

#[derive(Debug, Clone)]
pub struct ToolhouseClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    metadata: RuntimeMetadata,
    bundle: Option<String>,
    timeout_secs: Option<u64>,
}

impl ToolhouseClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            metadata: RuntimeMetadata::default(),
            bundle: None,
            timeout_secs: None,
        }
    }

    pub fn with_metadata(mut self, metadata: RuntimeMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Selects a named, remotely-defined tool catalog.
    pub fn with_bundle(mut self, bundle: Option<String>) -> Self {
        self.bundle = bundle;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: Option<u64>) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    fn request<'a>(&'a self, content: Option<&'a Value>) -> ToolServiceRequest<'a> {
        ToolServiceRequest {
            provider: TOOL_PROVIDER,
            metadata: &self.metadata,
            bundle: self.bundle.as_deref(),
            content,
        }
    }

    async fn post(
        &self,
        endpoint: &str,
        payload: &ToolServiceRequest<'_>,
    ) -> Result<Value, ToolError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let response = post_json(
            &self.client,
            &url,
            &self.api_key,
            payload,
            self.timeout_secs,
        )
        .await?;
        let text = response.text().await.map_err(ToolError::Request)?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl ToolService for ToolhouseClient {
    async fn catalog(&self) -> Result<Vec<Value>, ToolError> {
        info!(bundle = ?self.bundle, "fetching tool catalog");
        let body = self.post("get_tools", &self.request(None)).await?;
        parse_catalog(body)
    }

    async fn run_tools(&self, response: &CompletionResponse) -> Result<Message, ToolError> {
        info!(bundle = ?self.bundle, "running tools");
        let body = self
            .post("run_tools", &self.request(Some(response.raw())))
            .await?;
        parse_tool_message(body)
    }
}

fn parse_catalog(body: Value) -> Result<Vec<Value>, ToolError> {
    match body {
        Value::Array(tools) => Ok(tools),
        Value::Object(mut map) => match map.remove("tools") {
            Some(Value::Array(tools)) => Ok(tools),
            _ => Err(ToolError::MissingField {
                field: "tools",
                context: "tool catalog response",
            }),
        },
        _ => Err(ToolError::MissingField {
            field: "tools",
            context: "tool catalog response",
        }),
    }
}

fn parse_tool_message(mut body: Value) -> Result<Message, ToolError> {
    let content = body
        .get_mut("content")
        .map(Value::take)
        .filter(|content| !content.is_null())
        .ok_or(ToolError::MissingField {
            field: "content",
            context: "tool run response",
        })?;
    if content.get("role").is_none() {
        return Err(ToolError::MissingField {
            field: "content.role",
            context: "tool run response",
        });
    }
    Ok(serde_json::from_value(content)?)
}
