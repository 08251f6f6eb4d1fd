use std::time::Duration;

use httptest::matchers::{all_of, contains, request};
use httptest::responders::{json_encoded, status_code};
use httptest::{Expectation, Server};
use rdp_llm::{
    ChatCompletion, ChatMessage, ChatRequest, LlmError, OpenRouterClient, OpenRouterConfig,
    RetryConfig, RetryHandler,
};
use secrecy::SecretString;
use serde_json::json;

fn client_for(server: &Server) -> OpenRouterClient {
    let mut config = OpenRouterConfig::new(SecretString::from("test-key".to_string()));
    config.base_url = server.url_str("/api/v1");
    OpenRouterClient::new(config).unwrap()
}

fn request_for(model: &str) -> ChatRequest {
    ChatRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage::system("You write adoption profiles."),
            ChatMessage::user("Dog name: Max"),
        ],
        temperature: 0.7,
        max_tokens: 800,
        timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn parses_fenced_content_from_completion_envelope() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of!(
            request::method("POST"),
            request::path("/api/v1/chat/completions"),
            request::headers(contains(("authorization", "Bearer test-key")))
        ))
        .respond_with(json_encoded(json!({
            "id": "gen-1",
            "model": "google/gemini-2.5-flash",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "```json\n{\"energy_level\": \"very_energetic\", \"tagline\": \"Ready for adventure\"}\n```"
                }
            }],
            "usage": {"prompt_tokens": 120, "completion_tokens": 40, "total_tokens": 160}
        }))),
    );

    let client = client_for(&server);
    let outcome = client
        .complete(&request_for("google/gemini-2.5-flash"))
        .await
        .unwrap();

    assert_eq!(outcome.model, "google/gemini-2.5-flash");
    assert_eq!(outcome.content["energy_level"], "very_energetic");
    assert_eq!(outcome.content["tagline"], "Ready for adventure");
    assert_eq!(outcome.usage.unwrap().total_tokens, 160);
}

#[tokio::test]
async fn server_errors_surface_as_http_status() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("POST", "/api/v1/chat/completions"))
            .respond_with(status_code(503).body("upstream overloaded")),
    );

    let client = client_for(&server);
    let err = client.complete(&request_for("some/model")).await.unwrap_err();
    match err {
        LlmError::HttpStatus { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "upstream overloaded");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn prose_only_content_is_a_json_failure() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("POST", "/api/v1/chat/completions"))
            .respond_with(json_encoded(json!({
                "choices": [{"message": {"content": "I'm sorry, I can't produce that profile."}}]
            }))),
    );

    let client = client_for(&server);
    let err = client.complete(&request_for("some/model")).await.unwrap_err();
    assert!(matches!(err, LlmError::InvalidJson(_)));
}

#[tokio::test]
async fn retry_handler_recovers_through_real_client() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("POST", "/api/v1/chat/completions"))
            .times(2)
            .respond_with(httptest::cycle![
                status_code(500),
                json_encoded(json!({
                    "choices": [{"message": {"content": "{\"sociability\": \"social\"}"}}]
                })),
            ]),
    );

    let client = client_for(&server);
    let mut config = RetryConfig::default();
    config.backoff.initial_delay = Duration::from_millis(1);
    config.backoff.max_delay = Duration::from_millis(5);
    let handler = RetryHandler::new(config);

    let outcome = handler
        .execute_with_retry("some/model", Duration::from_secs(5), |ctx| {
            let mut request = request_for(&ctx.model);
            request.timeout = ctx.timeout;
            let client = &client;
            async move { client.complete(&request).await }
        })
        .await
        .unwrap();

    assert_eq!(outcome.content["sociability"], "social");
    assert_eq!(handler.stats().successful_retries, 1);
}

#[tokio::test]
async fn non_json_success_body_triggers_pure_json_retry() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("POST", "/api/v1/chat/completions"))
            .times(2)
            .respond_with(httptest::cycle![
                status_code(200).body("<html>gateway hiccup</html>"),
                json_encoded(json!({
                    "choices": [{"message": {"content": "{\"trainability\": \"easy\"}"}}]
                })),
            ]),
    );

    let client = client_for(&server);
    assert!(client.endpoint().ends_with("/api/v1/chat/completions"));
    assert_eq!(client.provider(), "openrouter");

    let mut config = RetryConfig::default();
    config.backoff.initial_delay = Duration::from_millis(1);
    config.backoff.max_delay = Duration::from_millis(5);
    let handler = RetryHandler::new(config);
    let reminders = std::sync::Mutex::new(Vec::new());

    let outcome = handler
        .execute_with_retry("some/model", Duration::from_secs(5), |ctx| {
            reminders.lock().unwrap().push(ctx.require_pure_json);
            let mut request = request_for(&ctx.model);
            if ctx.require_pure_json {
                request = request.with_pure_json_reminder();
            }
            let client = &client;
            async move { client.complete(&request).await }
        })
        .await
        .unwrap();

    assert_eq!(outcome.content["trainability"], "easy");
    assert_eq!(*reminders.lock().unwrap(), vec![false, true]);
}

#[tokio::test]
async fn non_json_success_body_is_invalid_json() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("POST", "/api/v1/chat/completions"))
            .respond_with(status_code(200).body("not a json envelope")),
    );

    let err = client_for(&server)
        .complete(&request_for("some/model"))
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::InvalidJson(_)), "{err:?}");
}
