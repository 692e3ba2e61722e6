//! End-to-end pipeline runs against mocked completion and tool services.

use serde_json::{Value, json};
use toolpipe::chat::completion::{
    CompletionClient, CompletionError, CompletionOptions, CompletionService, DEFAULT_MODEL,
};
use toolpipe::chat::message::{Message, Role};
use toolpipe::chat::toolhouse::{RuntimeMetadata, ToolService, ToolhouseClient};
use toolpipe::pipeline::{
    DEFAULT_PROMPT, Pipeline, Stage, ToolDetection, ToolOutcome, initial_conversation,
};
use toolpipe::render::{PageEvent, Recorder};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn completion_client(server: &MockServer) -> CompletionClient {
    CompletionClient::new(
        format!("{}/v1/chat/completions", server.uri()),
        "together-key",
        DEFAULT_MODEL,
        CompletionOptions::default(),
    )
}

fn tool_client(server: &MockServer) -> ToolhouseClient {
    ToolhouseClient::new(format!("{}/v1", server.uri()), "toolhouse-key")
        .with_bundle(Some("default".to_string()))
}

fn answer(content: &str) -> Value {
    json!({
        "id": "cmpl-answer",
        "object": "chat.completion",
        "model": DEFAULT_MODEL,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

fn tool_call() -> Value {
    json!({
        "id": "cmpl-tool",
        "object": "chat.completion",
        "model": DEFAULT_MODEL,
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {
                        "name": "code_interpreter",
                        "arguments": "{\"code\":\"for i in range(1, 11): print(i)\"}"
                    }
                }]
            },
            "finish_reason": "tool_calls"
        }]
    })
}

fn catalog() -> Value {
    json!([{
        "type": "function",
        "function": {
            "name": "code_interpreter",
            "description": "Runs Python code",
            "parameters": {"type": "object", "properties": {"code": {"type": "string"}}}
        }
    }])
}

async fn mount_catalog(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/get_tools"))
        .and(header("authorization", "Bearer toolhouse-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(catalog()))
        .mount(server)
        .await;
}

/// First completion call gets `first`, every later one gets `second`.
async fn mount_completions(server: &MockServer, first: ResponseTemplate, second: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer together-key"))
        .respond_with(first)
        .up_to_n_times(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(second)
        .mount(server)
        .await;
}

async fn requests_to(server: &MockServer, route: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .expect("request recording is enabled")
        .into_iter()
        .filter(|request| request.url.path() == route)
        .collect()
}

fn body(request: &Request) -> Value {
    request.body_json().expect("request body is JSON")
}

#[tokio::test]
async fn fizzbuzz_without_tool_call_never_touches_run_tools() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    mount_completions(
        &server,
        ResponseTemplate::new(200).set_body_json(answer("def fizzbuzz(n): ...")),
        ResponseTemplate::new(200).set_body_json(answer("1\n2\nFizz\n4\nBuzz")),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/v1/run_tools"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let pipeline = Pipeline::new(
        completion_client(&server),
        tool_client(&server),
        ToolDetection::Strict,
    );
    let mut recorder = Recorder::default();
    let report = pipeline
        .run(initial_conversation(None, DEFAULT_PROMPT), &mut recorder)
        .await;

    assert_eq!(report.stage, Stage::SecondCallOk);
    assert_eq!(report.tool, ToolOutcome::Skipped);
    assert_eq!(report.final_content.as_deref(), Some("1\n2\nFizz\n4\nBuzz"));

    let completions = requests_to(&server, "/v1/chat/completions").await;
    assert_eq!(completions.len(), 2);
    let first = body(&completions[0]);
    assert_eq!(first["model"], json!(DEFAULT_MODEL));
    assert_eq!(first["tools"], catalog());
    assert_eq!(
        first["messages"],
        json!([{"role": "user", "content": DEFAULT_PROMPT}])
    );
    assert_eq!(body(&completions[1])["messages"], first["messages"]);
    assert!(
        recorder
            .events
            .contains(&PageEvent::Final("1\n2\nFizz\n4\nBuzz".to_string()))
    );
}

#[tokio::test]
async fn tool_call_is_forwarded_and_result_appended_before_second_call() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    mount_completions(
        &server,
        ResponseTemplate::new(200).set_body_json(tool_call()),
        ResponseTemplate::new(200).set_body_json(answer("Here are the results up to 10.")),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/v1/run_tools"))
        .and(header("authorization", "Bearer toolhouse-key"))
        .and(body_partial_json(json!({
            "provider": "openai",
            "bundle": "default",
            "metadata": {"id": "10566", "timezone": -8}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": {
                "role": "tool",
                "tool_call_id": "call_1",
                "name": "code_interpreter",
                "content": "1\n2\nFizz\n4\nBuzz\nFizz\n7\n8\nFizz\nBuzz"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = Pipeline::new(
        completion_client(&server),
        tool_client(&server),
        ToolDetection::Strict,
    );
    let mut recorder = Recorder::default();
    let report = pipeline
        .run(initial_conversation(None, DEFAULT_PROMPT), &mut recorder)
        .await;

    assert_eq!(report.stage, Stage::SecondCallOk);
    assert!(matches!(report.tool, ToolOutcome::Ran { choice: 0, .. }));

    let runs = requests_to(&server, "/v1/run_tools").await;
    assert_eq!(body(&runs[0])["content"], tool_call());

    let completions = requests_to(&server, "/v1/chat/completions").await;
    let second = body(&completions[1]);
    let messages = second["messages"].as_array().expect("messages array");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1]["role"], json!("tool"));
    assert_eq!(messages[1]["tool_call_id"], json!("call_1"));

    assert_eq!(report.conversation.len(), 2);
    assert_eq!(report.conversation[1].role, Role::Tool);
    assert!(
        recorder
            .statuses()
            .any(|status| status == "Tool execution successful. Making final API call...")
    );
}

#[tokio::test]
async fn malformed_tool_reply_is_reported_and_run_continues() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    mount_completions(
        &server,
        ResponseTemplate::new(200).set_body_json(tool_call()),
        ResponseTemplate::new(200).set_body_json(answer("I could not run the code.")),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/v1/run_tools"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"detail": "no tool"})))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = Pipeline::new(
        completion_client(&server),
        tool_client(&server),
        ToolDetection::Strict,
    );
    let mut recorder = Recorder::default();
    let report = pipeline
        .run(initial_conversation(None, DEFAULT_PROMPT), &mut recorder)
        .await;

    assert_eq!(report.stage, Stage::SecondCallOk);
    assert!(matches!(
        report.tool,
        ToolOutcome::Failed {
            missing_field: true,
            ..
        }
    ));
    assert_eq!(report.conversation.len(), 1);
    let completions = requests_to(&server, "/v1/chat/completions").await;
    assert_eq!(
        body(&completions[1])["messages"].as_array().map(Vec::len),
        Some(1)
    );
    assert!(
        recorder
            .events
            .contains(&PageEvent::Subheader("Choice 0:".to_string()))
    );
}

#[tokio::test]
async fn first_call_server_error_shows_banner_and_stops() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("model overloaded"))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = Pipeline::new(
        completion_client(&server),
        tool_client(&server),
        ToolDetection::Strict,
    );
    let mut recorder = Recorder::default();
    let report = pipeline
        .run(initial_conversation(None, DEFAULT_PROMPT), &mut recorder)
        .await;

    assert_eq!(report.stage, Stage::FirstCallFailed);
    assert!(report.first_response.is_none());
    assert!(report.errors[0].contains("503"));
    assert!(report.errors[0].contains("model overloaded"));
    assert_eq!(
        report.errors.last().map(String::as_str),
        Some("Failed to get initial response from the API.")
    );
}

#[tokio::test]
async fn first_call_connection_failure_shows_banner_and_stops() {
    let tools = MockServer::start().await;
    mount_catalog(&tools).await;
    Mock::given(method("POST"))
        .and(path("/v1/run_tools"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&tools)
        .await;

    // Bind then drop so nothing listens on the port.
    let unbound = std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .expect("ephemeral port should be available");
    let completion = CompletionClient::new(
        format!("http://{unbound}/v1/chat/completions"),
        "together-key",
        DEFAULT_MODEL,
        CompletionOptions {
            timeout_secs: Some(5),
            ..CompletionOptions::default()
        },
    );

    let pipeline = Pipeline::new(completion, tool_client(&tools), ToolDetection::Strict);
    let mut recorder = Recorder::default();
    let report = pipeline
        .run(initial_conversation(None, DEFAULT_PROMPT), &mut recorder)
        .await;

    assert_eq!(report.stage, Stage::FirstCallFailed);
    assert!(report.first_response.is_none());
    assert!(report.final_response.is_none());
    assert_eq!(report.errors.len(), 2);
    assert!(
        report.errors[0]
            .starts_with("An error occurred during API call: completion request failed")
    );
    assert_eq!(report.errors[1], "Failed to get initial response from the API.");
    assert!(matches!(
        recorder.events.last(),
        Some(PageEvent::Conversation(messages)) if messages.len() == 1
    ));
}

#[tokio::test]
async fn completion_client_reports_undecodable_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{ not json"))
        .mount(&server)
        .await;

    let result = completion_client(&server)
        .complete(&[Message::user("hi")], &[])
        .await;

    assert!(matches!(result, Err(CompletionError::Decode(_))));
}

#[tokio::test]
async fn completion_client_rejects_empty_conversation_without_sending() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let result = completion_client(&server).complete(&[], &[]).await;

    assert!(matches!(result, Err(CompletionError::EmptyConversation)));
}

#[tokio::test]
async fn tool_client_sends_custom_metadata_to_catalog() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/get_tools"))
        .and(body_partial_json(json!({
            "provider": "openai",
            "metadata": {"id": "abc", "timezone": 3}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tools": catalog()})))
        .expect(1)
        .mount(&server)
        .await;

    let client = ToolhouseClient::new(format!("{}/v1", server.uri()), "toolhouse-key")
        .with_metadata(RuntimeMetadata {
            id: "abc".to_string(),
            timezone: 3,
        });
    let tools = client.catalog().await.expect("catalog loads");

    assert_eq!(Value::Array(tools), catalog());
}
