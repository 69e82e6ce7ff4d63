use indoc::indoc;
use integration_tests::TestServer;
use reqwest::Method;
use serde_json::{Value, json};

#[tokio::test]
async fn request_is_forwarded() {
    let server = TestServer::start("").await;

    let response = server
        .client
        .request(Method::POST, "/api/items?page=2&size=10")
        .header("x-ca-key", "102234")
        .body("hello upstream")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();

    assert_eq!(
        body,
        json!({
            "body": "hello upstream",
            "method": "POST",
            "path": "/api/items",
            "query": "page=2&size=10",
            "x-ca-key": "102234",
            "x-forwarded-for": "127.0.0.1",
            "x-hop": null,
        })
    );
}

#[tokio::test]
async fn forwarded_for_is_appended() {
    let server = TestServer::start("").await;

    let response = server.client.get_with_header("/", "x-forwarded-for", "10.1.1.1").await;
    let body: Value = response.json().await.unwrap();

    assert_eq!(body["x-forwarded-for"], "10.1.1.1, 127.0.0.1");
}

#[tokio::test]
async fn connection_listed_headers_are_not_forwarded() {
    let server = TestServer::start("").await;

    let response = server
        .client
        .request(Method::GET, "/")
        .header("connection", "x-hop")
        .header("x-hop", "1")
        .send()
        .await
        .unwrap();

    let body: Value = response.json().await.unwrap();

    assert_eq!(body["x-hop"], Value::Null);
}

#[tokio::test]
async fn upstream_failure_is_bad_gateway() {
    // Nothing listens on the discard port.
    let server = TestServer::start_with_upstream_url("", "http://127.0.0.1:9").await;

    let response = server.client.get("/").await;

    assert_eq!(response.status(), 502);
}

#[tokio::test]
async fn without_rule_sets_nothing_is_limited() {
    let server = TestServer::start("").await;

    let mut statuses = Vec::new();

    for _ in 0..20 {
        statuses.push(server.client.get("/").await.status().as_u16());
    }

    assert!(statuses.iter().all(|status| *status == 200));
    assert_eq!(server.upstream.hits(), 20);
}

#[tokio::test]
async fn upstream_base_path_is_kept() {
    let server = TestServer::start("").await;
    let base = format!("http://{}/prefix", server.upstream.address);

    let gateway = TestServer::start_with_upstream_url(
        indoc! {r#"
            [server.health]
            enabled = false
        "#},
        &base,
    )
    .await;

    let response = gateway.client.get("/v1/models").await;
    let body: Value = response.json().await.unwrap();

    assert_eq!(body["path"], json!("/prefix/v1/models"));
}
