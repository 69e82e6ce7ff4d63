//! These tests need a Redis server on localhost:6379.

use std::time::{SystemTime, UNIX_EPOCH};

use indoc::formatdoc;
use integration_tests::TestServer;

fn unique_prefix(test: &str) -> String {
    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis();
    format!("test_{test}_{timestamp}:")
}

#[tokio::test]
async fn counters_are_shared_between_gateways() {
    let prefix = unique_prefix("shared");

    let config = formatdoc! {r#"
        [storage]
        type = "redis"
        url = "redis://localhost:6379/0"
        key_prefix = "{prefix}"

        [rate_limit]
        rule_name = "cluster"

        [[rate_limit.rule_items]]
        limit_by_per_header = "x-api-key"
        limit_keys = [{{ key = "*", query_per_day = 3 }}]
    "#};

    let first = TestServer::start(&config).await;
    let second = TestServer::start(&config).await;

    let mut statuses = Vec::new();

    for server in [&first, &second, &first, &second] {
        let response = server.client.get_with_header("/", "x-api-key", "shared-key").await;
        statuses.push(response.status().as_u16());
    }

    assert_eq!(statuses, vec![200, 200, 200, 429]);

    let response = second.client.get_with_header("/", "x-api-key", "other-key").await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn quota_headers_from_redis() {
    let prefix = unique_prefix("quota");

    let config = formatdoc! {r#"
        [storage]
        type = "redis"
        url = "redis://localhost:6379/0"
        key_prefix = "{prefix}"

        [rate_limit]
        rule_name = "quota"
        show_limit_quota_header = true
        global_threshold = {{ query_per_hour = 5 }}
    "#};

    let server = TestServer::start(&config).await;

    let mut remaining = Vec::new();

    for _ in 0..6 {
        let response = server.client.get("/").await;

        remaining.push(
            response
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
        );
    }

    insta::assert_debug_snapshot!(remaining, @r#"
    [
        Some(
            "4",
        ),
        Some(
            "3",
        ),
        Some(
            "2",
        ),
        Some(
            "1",
        ),
        Some(
            "0",
        ),
        Some(
            "0",
        ),
    ]
    "#);
}

#[tokio::test]
async fn tokens_are_counted_in_redis() {
    let prefix = unique_prefix("tokens");

    let config = formatdoc! {r#"
        [storage]
        type = "redis"
        url = "redis://localhost:6379/0"
        key_prefix = "{prefix}"

        [token_rate_limit]
        rule_name = "tokens"
        global_threshold = {{ token_per_day = 60 }}
    "#};

    let server = TestServer::start(&config).await;

    let response = server
        .client
        .request(reqwest::Method::POST, "/v1/chat/completions")
        .json(&serde_json::json!({ "stream": false }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    response.text().await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let response = server
        .client
        .request(reqwest::Method::POST, "/v1/chat/completions")
        .json(&serde_json::json!({ "stream": false }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 429);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_across_gateways_admit_exactly_n() {
    let prefix = unique_prefix("concurrent");

    let config = formatdoc! {r#"
        [storage]
        type = "redis"
        url = "redis://localhost:6379/0"
        key_prefix = "{prefix}"

        [rate_limit]
        rule_name = "concurrent"
        fail_open = false

        [[rate_limit.rule_items]]
        limit_by_per_header = "x-api-key"
        limit_keys = [{{ key = "*", query_per_day = 50 }}]
    "#};

    let first = TestServer::start(&config).await;
    let second = TestServer::start(&config).await;

    let client = reqwest::Client::new();
    let mut tasks = tokio::task::JoinSet::new();

    for i in 0..400 {
        let address = if i % 2 == 0 { first.address } else { second.address };
        let client = client.clone();

        tasks.spawn(async move {
            let response = client
                .get(format!("http://{address}/"))
                .header("x-api-key", "busy")
                .send()
                .await
                .unwrap();

            response.status().as_u16()
        });
    }

    let mut statuses = Vec::new();

    while let Some(status) = tasks.join_next().await {
        statuses.push(status.unwrap());
    }

    let admitted = statuses.iter().filter(|status| **status == 200).count();
    let rejected = statuses.iter().filter(|status| **status == 429).count();

    assert_eq!((admitted, rejected), (50, 350));
    assert_eq!(first.upstream.hits() + second.upstream.hits(), 50);
}
