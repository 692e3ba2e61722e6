//! Completion → tool run → completion, in one forward pass.
//!
//! Each stage takes explicit inputs and hands its output to the next one;
//! nothing survives past [`Pipeline::run`]. Every failure is shown on the
//! page and the pass carries on with whatever state it has, except a failed
//! first call, which ends the run.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::chat::completion::{CompletionResponse, CompletionService};
use crate::chat::message::Message;
use crate::chat::toolhouse::{ToolError, ToolService};
use crate::render::{PageEvent, Render};

pub const DEFAULT_PROMPT: &str =
    "Generate FizzBuzz code. Execute it to show me the results up to 10.";

/// How a first response without a tool invocation is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolDetection {
    /// Check for a descriptor first and skip the run when there is none.
    #[default]
    Strict,
    /// Always attempt the run; a missing descriptor is a missing-field
    /// failure, raised before the tool service is contacted.
    Eager,
}

impl ToolDetection {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "eager" => Some(Self::Eager),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Eager => "eager",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    FirstCallSent,
    FirstCallFailed,
    FirstCallOk,
    ToolCheck,
    ToolRun,
    ToolSkipped,
    SecondCallSent,
    SecondCallFailed,
    SecondCallOk,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    NotReached,
    Ran {
        choice: usize,
        functions: Vec<String>,
    },
    Skipped,
    Failed {
        missing_field: bool,
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub stage: Stage,
    pub tool: ToolOutcome,
    pub conversation: Vec<Message>,
    pub first_response: Option<Value>,
    pub final_response: Option<Value>,
    pub final_content: Option<String>,
    pub errors: Vec<String>,
    /// Everything the page showed, in order.
    pub events: Vec<PageEvent>,
}

impl PipelineReport {
    pub fn succeeded(&self) -> bool {
        self.stage == Stage::SecondCallOk
    }
}

/// Builds the one-shot conversation a run starts from.
pub fn initial_conversation(system: Option<&str>, prompt: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = system.filter(|system| !system.trim().is_empty()) {
        messages.push(Message::system(system));
    }
    messages.push(Message::user(prompt));
    messages
}

/// Forwards events to the renderer and keeps a copy of each for the report.
struct Page<'a, R: Render> {
    render: &'a mut R,
    errors: Vec<String>,
    events: Vec<PageEvent>,
}

impl<R: Render> Page<'_, R> {
    fn emit(&mut self, event: PageEvent) {
        self.events.push(event.clone());
        self.render.emit(event);
    }

    fn status(&mut self, message: impl Into<String>) {
        self.emit(PageEvent::Status(message.into()));
    }

    fn error(&mut self, message: String) {
        self.errors.push(message.clone());
        self.emit(PageEvent::Error(message));
    }

    fn subheader(&mut self, text: impl Into<String>) {
        self.emit(PageEvent::Subheader(text.into()));
    }

    fn json(&mut self, value: &Value) {
        self.emit(PageEvent::Json(value.clone()));
    }
}

pub struct Pipeline<C, T> {
    completion: C,
    tools: T,
    detection: ToolDetection,
}

impl<C: CompletionService, T: ToolService> Pipeline<C, T> {
    pub fn new(completion: C, tools: T, detection: ToolDetection) -> Self {
        Self {
            completion,
            tools,
            detection,
        }
    }

    pub async fn run<R: Render>(
        &self,
        conversation: Vec<Message>,
        render: &mut R,
    ) -> PipelineReport {
        let mut page = Page {
            render,
            errors: Vec::new(),
            events: Vec::new(),
        };
        let mut conversation = conversation;
        let mut report = PipelineReport {
            stage: Stage::Init,
            tool: ToolOutcome::NotReached,
            conversation: Vec::new(),
            first_response: None,
            final_response: None,
            final_content: None,
            errors: Vec::new(),
            events: Vec::new(),
        };

        let catalog = match self.tools.catalog().await {
            Ok(catalog) => {
                debug!(tools = catalog.len(), "tool catalog loaded");
                catalog
            }
            Err(err) => {
                warn!(error = %err, "tool catalog unavailable");
                page.error(format!("An error occurred while fetching tools: {err}"));
                Vec::new()
            }
        };

        report.stage = Stage::FirstCallSent;
        let first = self.complete_or_none(&conversation, &catalog, &mut page).await;

        match first {
            None => {
                report.stage = Stage::FirstCallFailed;
                page.error("Failed to get initial response from the API.".to_string());
            }
            Some(first) => {
                report.stage = Stage::FirstCallOk;
                page.status("Initial response received. Processing...");
                page.subheader("Raw API Response:");
                page.json(first.raw());

                report.stage = Stage::ToolCheck;
                report.tool = self.orchestrate(&first, &mut conversation, &mut page).await;
                report.stage = match report.tool {
                    ToolOutcome::Ran { .. } => Stage::ToolRun,
                    _ => Stage::ToolSkipped,
                };
                report.first_response = Some(first.raw().clone());
                debug!(stage = ?report.stage, "tool stage finished");

                report.stage = Stage::SecondCallSent;
                match self.complete_or_none(&conversation, &catalog, &mut page).await {
                    Some(last) => {
                        report.stage = Stage::SecondCallOk;
                        match last.first_content() {
                            Some(content) => {
                                page.status("Final Response:");
                                page.emit(PageEvent::Final(content.to_string()));
                                report.final_content = Some(content.to_string());
                            }
                            None => {
                                page.status("Final response contained no message content.");
                            }
                        }
                        report.final_response = Some(last.raw().clone());
                    }
                    None => report.stage = Stage::SecondCallFailed,
                }
            }
        }

        info!(stage = ?report.stage, messages = conversation.len(), "pipeline finished");
        page.emit(PageEvent::Conversation(conversation.clone()));
        report.conversation = conversation;
        report.errors = page.errors;
        report.events = page.events;
        report
    }

    /// Completion call that never fails past this point: errors become a
    /// banner and `None`.
    async fn complete_or_none<R: Render>(
        &self,
        messages: &[Message],
        catalog: &[Value],
        page: &mut Page<'_, R>,
    ) -> Option<CompletionResponse> {
        match self.completion.complete(messages, catalog).await {
            Ok(response) => Some(response),
            Err(err) => {
                warn!(error = %err, "completion call failed");
                page.error(format!("An error occurred during API call: {err}"));
                None
            }
        }
    }

    /// Runs the requested tools, if any, and appends their result. At most
    /// one message is appended, and only on success.
    async fn orchestrate<R: Render>(
        &self,
        response: &CompletionResponse,
        conversation: &mut Vec<Message>,
        page: &mut Page<'_, R>,
    ) -> ToolOutcome {
        let request = match (response.tool_request(), self.detection) {
            (Some(request), _) => request,
            (None, ToolDetection::Strict) => {
                if response.choices().is_empty() {
                    page.status("No choices found in the response. Skipping tool execution.");
                } else {
                    page.status("No tool invocation in the response. Skipping tool execution.");
                }
                return ToolOutcome::Skipped;
            }
            (None, ToolDetection::Eager) => {
                let err = ToolError::MissingField {
                    field: "tool_calls",
                    context: "completion response",
                };
                return report_tool_failure(err, response, page);
            }
        };

        let functions = request
            .function_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        info!(choice = request.choice(), functions = ?functions, "tool invocation requested");

        match self.tools.run_tools(response).await {
            Ok(message) => {
                conversation.push(message);
                page.status("Tool execution successful. Making final API call...");
                ToolOutcome::Ran {
                    choice: request.choice(),
                    functions,
                }
            }
            Err(err) => report_tool_failure(err, response, page),
        }
    }
}

fn report_tool_failure<R: Render>(
    err: ToolError,
    response: &CompletionResponse,
    page: &mut Page<'_, R>,
) -> ToolOutcome {
    warn!(error = %err, "tool execution failed");
    let missing_field = err.is_missing_field();

    if missing_field {
        page.error(format!("Missing field during tool execution: {err}"));
        page.status("The response does not carry the tool invocation the tool service expects.");
        dump_choices(response, page);
    } else {
        page.error(format!("An error occurred during tool execution: {err}"));
    }

    ToolOutcome::Failed {
        missing_field,
        error: err.to_string(),
    }
}

fn dump_choices<R: Render>(response: &CompletionResponse, page: &mut Page<'_, R>) {
    if response.choices().is_empty() {
        page.status("The response contains no choices.");
        return;
    }

    for (index, choice) in response.choices().iter().enumerate() {
        let raw = response.raw_choice(index);
        page.subheader(format!("Choice {index}:"));
        page.json(raw);

        let Some(message) = &choice.message else {
            page.status("No 'message' found in this choice.");
            continue;
        };
        if message.tool_calls.is_some() {
            page.status("Tool calls found in this choice:");
            page.json(&raw["message"]["tool_calls"]);
        } else if message.function_call.is_some() {
            page.status("Function call found in this choice:");
            page.json(&raw["message"]["function_call"]);
        } else {
            page.status("No tool invocation found in this choice's message.");
        }
    }
}
