use std::time::Duration;

use indoc::indoc;
use integration_tests::TestServer;
use reqwest::Method;
use serde_json::{Value, json};

async fn completion(server: &TestServer, consumer: &str, stream: bool) -> reqwest::Response {
    server
        .client
        .request(Method::POST, "/v1/chat/completions")
        .header("x-mse-consumer", consumer)
        .json(&json!({
            "model": "gpt-4o-mini",
            "stream": stream,
            "messages": [{ "role": "user", "content": "Hello" }],
        }))
        .send()
        .await
        .unwrap()
}

/// Reads the whole body, then gives the gateway time to charge the tokens.
async fn consume(response: reqwest::Response) -> (u16, String) {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    (status, body)
}

#[tokio::test]
async fn tokens_are_counted_after_completion() {
    let config = indoc! {r#"
        [token_rate_limit]
        rule_name = "tokens"
        global_threshold = { token_per_day = 100 }
    "#};

    let server = TestServer::start(config).await;

    // 60 tokens per completion
    let (status, body) = consume(completion(&server, "alice", false).await).await;
    assert_eq!(status, 200);

    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["usage"]["total_tokens"], 60);

    let (status, _) = consume(completion(&server, "alice", false).await).await;
    assert_eq!(status, 200);

    let response = completion(&server, "alice", false).await;
    assert_eq!(response.status(), 429);

    let reset: u64 = response.headers()["x-tokenratelimit-reset"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();

    assert!((1..=86400).contains(&reset), "reset was {reset}");
    assert!(response.headers().get("x-ratelimit-reset").is_none());

    assert_eq!(server.upstream.hits(), 2);
}

#[tokio::test]
async fn streamed_usage_is_counted() {
    let config = indoc! {r#"
        [token_rate_limit]
        rule_name = "tokens"
        global_threshold = { token_per_day = 60 }
    "#};

    let server = TestServer::start(config).await;

    let (status, body) = consume(completion(&server, "alice", true).await).await;

    assert_eq!(status, 200);
    assert!(body.ends_with("data: [DONE]\n\n"));

    let response = completion(&server, "alice", true).await;
    assert_eq!(response.status(), 429);
}

#[tokio::test]
async fn consumers_have_separate_budgets() {
    let config = indoc! {r#"
        [token_rate_limit]
        rule_name = "consumer-tokens"
        rejected_msg = "Token budget exhausted"

        [[token_rate_limit.rule_items]]
        limit_by_per_consumer = ""
        limit_keys = [{ key = "*", token_per_day = 50 }]
    "#};

    let server = TestServer::start(config).await;

    let (status, _) = consume(completion(&server, "alice", false).await).await;
    assert_eq!(status, 200);

    let rejected = completion(&server, "alice", false).await;
    assert_eq!(rejected.status(), 429);
    insta::assert_snapshot!(rejected.text().await.unwrap(), @"Token budget exhausted");

    let (status, _) = consume(completion(&server, "bob", false).await).await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn request_and_token_limits_together() {
    let config = indoc! {r#"
        [rate_limit]
        rule_name = "requests"
        show_limit_quota_header = true
        global_threshold = { query_per_day = 10 }

        [token_rate_limit]
        rule_name = "tokens"
        global_threshold = { token_per_day = 100 }
    "#};

    let server = TestServer::start(config).await;

    let response = completion(&server, "alice", false).await;
    assert_eq!(response.headers()["x-ratelimit-remaining"], "9");
    consume(response).await;

    let response = completion(&server, "alice", false).await;
    assert_eq!(response.headers()["x-ratelimit-remaining"], "8");
    consume(response).await;

    let response = completion(&server, "alice", false).await;
    assert_eq!(response.status(), 429);
    assert!(response.headers().get("x-tokenratelimit-reset").is_some());

    // the global token rule covers every path
    let response = server.client.get("/").await;
    assert_eq!(response.status(), 429);
    assert!(response.headers().get("x-tokenratelimit-reset").is_some());
}
