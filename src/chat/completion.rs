use std::future::Future;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::chat::message::Message;
use crate::chat::transport::{RequestFailure, post_json};

/// Together AI chat-completions endpoint (OpenAI wire format).
pub const TOGETHER_CHAT_COMPLETIONS_URL: &str = "https://api.together.xyz/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "mistralai/Mixtral-8x7B-Instruct-v0.1";

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "is_empty_catalog")]
    tools: &'a [Value],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

fn is_empty_catalog(tools: &&[Value]) -> bool {
    tools.is_empty()
}

/// Sampling and transport knobs forwarded with every completion request.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion request needs at least one message")]
    EmptyConversation,
    #[error("completion request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("completion API error {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("completion response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<RequestFailure> for CompletionError {
    fn from(failure: RequestFailure) -> Self {
        match failure {
            RequestFailure::Request(source) => Self::Request(source),
            RequestFailure::Api { status, body } => Self::Api { status, body },
        }
    }
}

/// Function invocation descriptor, used both in `tool_calls[].function` and
/// in the legacy top-level `function_call` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub name: String,
    /// Raw JSON string on most providers, an object on a few.
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionCall>,
}

impl ToolCall {
    /// Name of the called function, empty when the descriptor is absent.
    pub fn function_name(&self) -> &str {
        self.function
            .as_ref()
            .map(|function| function.name.as_str())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AssistantMessage {
    /// Plain text, or the text parts of a multi-part content array.
    #[serde(default, deserialize_with = "text_content")]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default)]
    pub function_call: Option<FunctionCall>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub message: Option<AssistantMessage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ResponseBody {
    #[serde(default, deserialize_with = "null_as_empty")]
    choices: Vec<Choice>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

fn text_content<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        Value::Array(parts) => {
            let texts = parts
                .iter()
                .filter_map(|part| match part {
                    Value::String(text) => Some(text.as_str()),
                    other => other.get("text").and_then(Value::as_str),
                })
                .collect::<Vec<_>>();
            if texts.is_empty() {
                Some(Value::Array(parts).to_string())
            } else {
                Some(texts.join(""))
            }
        }
        other => Some(other.to_string()),
    })
}

/// What the model asked the tool service to do, if anything.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRequest {
    ToolCalls { choice: usize, calls: Vec<ToolCall> },
    FunctionCall { choice: usize, call: FunctionCall },
}

impl ToolRequest {
    pub fn choice(&self) -> usize {
        match self {
            Self::ToolCalls { choice, .. } | Self::FunctionCall { choice, .. } => *choice,
        }
    }

    /// Names of the requested functions, in request order.
    pub fn function_names(&self) -> Vec<&str> {
        match self {
            Self::ToolCalls { calls, .. } => calls
                .iter()
                .map(ToolCall::function_name)
                .collect(),
            Self::FunctionCall { call, .. } => vec![call.name.as_str()],
        }
    }
}

/// Completion response: the typed view used for decisions plus the raw
/// document used for display and for forwarding to the tool service.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    raw: Value,
    choices: Vec<Choice>,
}

impl CompletionResponse {
    pub fn from_value(raw: Value) -> Result<Self, serde_json::Error> {
        let body: ResponseBody = serde_json::from_value(raw.clone())?;
        Ok(Self {
            raw,
            choices: body.choices,
        })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn choices(&self) -> &[Choice] {
        &self.choices
    }

    /// Raw JSON of one choice, `Value::Null` when out of range.
    pub fn raw_choice(&self, index: usize) -> &Value {
        &self.raw["choices"][index]
    }

    /// Content of the first choice's message.
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.message.as_ref())
            .and_then(|message| message.content.as_deref())
    }

    /// Scans every choice and returns the first tool invocation descriptor.
    /// `tool_calls` wins over a legacy `function_call` in the same choice;
    /// empty arrays, calls without a `function` and unnamed functions do not
    /// count.
    pub fn tool_request(&self) -> Option<ToolRequest> {
        self.choices.iter().enumerate().find_map(|(index, choice)| {
            let message = choice.message.as_ref()?;
            if let Some(calls) = message
                .tool_calls
                .as_ref()
                .filter(|calls| calls.iter().any(|call| !call.function_name().is_empty()))
            {
                return Some(ToolRequest::ToolCalls {
                    choice: index,
                    calls: calls.clone(),
                });
            }
            message
                .function_call
                .as_ref()
                .filter(|call| !call.name.is_empty())
                .map(|call| ToolRequest::FunctionCall {
                    choice: index,
                    call: call.clone(),
                })
        })
    }
}

/// One request/response call to a chat-completion endpoint.
pub trait CompletionService {
    fn complete(
        &self,
        messages: &[Message],
        tools: &[Value],
    ) -> impl Future<Output = Result<CompletionResponse, CompletionError>> + Send;
}

impl<S: CompletionService> CompletionService for &S {
    fn complete(
        &self,
        messages: &[Message],
        tools: &[Value],
    ) -> impl Future<Output = Result<CompletionResponse, CompletionError>> + Send {
        (**self).complete(messages, tools)
    }
}

/// Bearer-authenticated chat-completions client.
#[derive(Debug, Clone)]
pub struct CompletionClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    options: CompletionOptions,
}

impl CompletionClient {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        options: CompletionOptions,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key: api_key.into(),
            model: model.into(),
            options,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl CompletionService for CompletionClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[Value],
    ) -> Result<CompletionResponse, CompletionError> {
        if messages.is_empty() {
            return Err(CompletionError::EmptyConversation);
        }

        let payload = CompletionRequest {
            model: &self.model,
            messages,
            tools,
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
        };
        info!(
            model = %self.model,
            messages = messages.len(),
            tools = tools.len(),
            "calling completion endpoint"
        );

        let response = post_json(
            &self.client,
            &self.url,
            &self.api_key,
            &payload,
            self.options.timeout_secs,
        )
        .await?;
        let text = response.text().await.map_err(CompletionError::Request)?;
        let raw: Value = serde_json::from_str(&text)?;
        Ok(CompletionResponse::from_value(raw)?)
    }
}
