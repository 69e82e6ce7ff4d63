use indoc::indoc;
use integration_tests::{TestServer, summary};
use reqwest::Method;
use serde_json::json;

const QUOTA_HEADERS: &[&str] = &["x-ratelimit-limit", "x-ratelimit-remaining"];

#[tokio::test]
async fn limit_by_header() {
    let config = indoc! {r#"
        [rate_limit]
        rule_name = "routeA-request-header-limit-rule"

        [[rate_limit.rule_items]]
        limit_by_header = "x-ca-key"
        limit_keys = [
            { key = "102234", query_per_day = 2 },
            { key = "308239", query_per_hour = 10 },
        ]
    "#};

    let server = TestServer::start(config).await;

    let mut statuses = Vec::new();

    for _ in 0..3 {
        let response = server.client.get_with_header("/", "x-ca-key", "102234").await;
        statuses.push(response.status().as_u16());
    }

    assert_eq!(statuses, vec![200, 200, 429]);

    // other key, own counter
    let response = server.client.get_with_header("/", "x-ca-key", "308239").await;
    assert_eq!(response.status(), 200);

    // unknown values and missing headers are not limited
    for _ in 0..5 {
        assert_eq!(server.client.get_with_header("/", "x-ca-key", "unknown").await.status(), 200);
        assert_eq!(server.client.get("/").await.status(), 200);
    }
}

#[tokio::test]
async fn rejected_requests_do_not_reach_upstream() {
    let config = indoc! {r#"
        [rate_limit]
        rule_name = "global"
        global_threshold = { query_per_day = 3 }
    "#};

    let server = TestServer::start(config).await;

    for _ in 0..10 {
        server.client.get("/").await;
    }

    assert_eq!(server.upstream.hits(), 3);
}

#[tokio::test]
async fn limit_by_per_param() {
    let config = indoc! {r#"
        [rate_limit]
        rule_name = "per-param"

        [[rate_limit.rule_items]]
        limit_by_per_param = "apikey"
        limit_keys = [
            { key = "regexp:^a.*", query_per_day = 1 },
            { key = "*", query_per_day = 2 },
        ]
    "#};

    let server = TestServer::start(config).await;

    let mut results = Vec::new();

    for apikey in ["alpha", "alpha", "apple", "zeta", "zeta", "zeta", "other"] {
        let response = server.client.get(&format!("/items?apikey={apikey}")).await;
        results.push(json!({ "apikey": apikey, "status": response.status().as_u16() }));
    }

    insta::assert_json_snapshot!(results, @r#"
    [
      {
        "apikey": "alpha",
        "status": 200
      },
      {
        "apikey": "alpha",
        "status": 429
      },
      {
        "apikey": "apple",
        "status": 200
      },
      {
        "apikey": "zeta",
        "status": 200
      },
      {
        "apikey": "zeta",
        "status": 200
      },
      {
        "apikey": "zeta",
        "status": 429
      },
      {
        "apikey": "other",
        "status": 200
      }
    ]
    "#);
}

#[tokio::test]
async fn limit_by_cookie() {
    let config = indoc! {r#"
        [rate_limit]
        rule_name = "cookie"

        [[rate_limit.rule_items]]
        limit_by_cookie = "uid"
        limit_keys = [{ key = "1122", query_per_day = 1 }]
    "#};

    let server = TestServer::start(config).await;

    let first = server.client.get_with_header("/", "cookie", "lang=en; uid=1122").await;
    let second = server.client.get_with_header("/", "cookie", "uid=1122").await;
    let other = server.client.get_with_header("/", "cookie", "uid=3344").await;

    assert_eq!(first.status(), 200);
    assert_eq!(second.status(), 429);
    assert_eq!(other.status(), 200);
}

#[tokio::test]
async fn limit_by_per_consumer() {
    let config = indoc! {r#"
        [rate_limit]
        rule_name = "consumers"

        [[rate_limit.rule_items]]
        limit_by_per_consumer = ""
        limit_keys = [
            { key = "regexp:^vip-", query_per_day = 3 },
            { key = "*", query_per_day = 1 },
        ]
    "#};

    let server = TestServer::start(config).await;

    let mut vip = Vec::new();
    let mut regular = Vec::new();

    for _ in 0..4 {
        vip.push(
            server
                .client
                .get_with_header("/", "x-mse-consumer", "vip-alice")
                .await
                .status()
                .as_u16(),
        );

        regular.push(
            server
                .client
                .get_with_header("/", "x-mse-consumer", "bob")
                .await
                .status()
                .as_u16(),
        );
    }

    assert_eq!(vip, vec![200, 200, 200, 429]);
    assert_eq!(regular, vec![200, 429, 429, 429]);
}

#[tokio::test]
async fn limit_by_per_ip_from_header() {
    let config = indoc! {r#"
        [rate_limit]
        rule_name = "per-ip"

        [[rate_limit.rule_items]]
        limit_by_per_ip = "from-header-x-forwarded-for"
        limit_keys = [
            { key = "1.1.1.1", query_per_day = 1 },
            { key = "192.168.0.0/16", query_per_day = 2 },
        ]
    "#};

    let server = TestServer::start(config).await;

    let mut results = Vec::new();

    for ip in ["1.1.1.1", "1.1.1.1", "192.168.1.1", "192.168.1.1", "192.168.1.1", "192.168.1.2", "8.8.8.8"] {
        let response = server.client.get_with_header("/", "x-forwarded-for", ip).await;
        results.push(json!({ "ip": ip, "status": response.status().as_u16() }));
    }

    insta::assert_json_snapshot!(results, @r#"
    [
      {
        "ip": "1.1.1.1",
        "status": 200
      },
      {
        "ip": "1.1.1.1",
        "status": 429
      },
      {
        "ip": "192.168.1.1",
        "status": 200
      },
      {
        "ip": "192.168.1.1",
        "status": 200
      },
      {
        "ip": "192.168.1.1",
        "status": 429
      },
      {
        "ip": "192.168.1.2",
        "status": 200
      },
      {
        "ip": "8.8.8.8",
        "status": 200
      }
    ]
    "#);
}

#[tokio::test]
async fn limit_by_per_ip_from_peer_address() {
    let config = indoc! {r#"
        [rate_limit]
        rule_name = "per-ip"

        [[rate_limit.rule_items]]
        limit_by_per_ip = "from-remote-addr"
        limit_keys = [{ key = "127.0.0.0/8", query_per_day = 2 }]
    "#};

    let server = TestServer::start(config).await;

    let mut statuses = Vec::new();

    for _ in 0..3 {
        // the header is ignored for peer address rules
        let response = server.client.get_with_header("/", "x-forwarded-for", "8.8.8.8").await;
        statuses.push(response.status().as_u16());
    }

    assert_eq!(statuses, vec![200, 200, 429]);
}

#[tokio::test]
async fn global_threshold() {
    let config = indoc! {r#"
        [rate_limit]
        rule_name = "global"
        global_threshold = { query_per_day = 2 }
    "#};

    let server = TestServer::start(config).await;

    let first = server.client.get_with_header("/", "x-ca-key", "a").await;
    let second = server.client.get_with_header("/", "x-forwarded-for", "10.0.0.1").await;
    let third = server.client.get("/other").await;

    assert_eq!(first.status(), 200);
    assert_eq!(second.status(), 200);
    assert_eq!(third.status(), 429);
}

#[tokio::test]
async fn quota_headers() {
    let config = indoc! {r#"
        [rate_limit]
        rule_name = "quota"
        show_limit_quota_header = true
        global_threshold = { query_per_day = 2 }
    "#};

    let server = TestServer::start(config).await;

    let mut results = Vec::new();

    for _ in 0..3 {
        let response = server.client.get("/").await;
        results.push(summary(&response, QUOTA_HEADERS));
    }

    insta::assert_json_snapshot!(results, @r#"
    [
      {
        "status": 200,
        "x-ratelimit-limit": "2",
        "x-ratelimit-remaining": "1"
      },
      {
        "status": 200,
        "x-ratelimit-limit": "2",
        "x-ratelimit-remaining": "0"
      },
      {
        "status": 429,
        "x-ratelimit-limit": "2",
        "x-ratelimit-remaining": "0"
      }
    ]
    "#);
}

#[tokio::test]
async fn reset_header_on_rejection() {
    let config = indoc! {r#"
        [rate_limit]
        rule_name = "reset"
        global_threshold = { query_per_minute = 1 }
    "#};

    let server = TestServer::start(config).await;

    let allowed = server.client.get("/").await;
    assert_eq!(allowed.status(), 200);
    assert!(allowed.headers().get("x-ratelimit-reset").is_none());
    assert!(allowed.headers().get("x-ratelimit-limit").is_none());

    let rejected = server.client.get("/").await;

    // a new minute may have started in between
    if rejected.status() == 200 {
        return;
    }

    assert_eq!(rejected.status(), 429);
    assert!(rejected.headers().get("x-ratelimit-limit").is_none());

    let reset: u64 = rejected.headers()["x-ratelimit-reset"].to_str().unwrap().parse().unwrap();
    assert!((1..=60).contains(&reset), "reset was {reset}");
}

#[tokio::test]
async fn custom_rejection() {
    let config = indoc! {r#"
        [rate_limit]
        rule_name = "custom"
        rejected_code = 503
        rejected_msg = "Come back tomorrow"
        global_threshold = { query_per_day = 1 }
    "#};

    let server = TestServer::start(config).await;

    assert_eq!(server.client.get("/").await.status(), 200);

    let response = server.client.request(Method::POST, "/").send().await.unwrap();
    assert_eq!(response.status(), 503);

    let body = response.text().await.unwrap();
    insta::assert_snapshot!(body, @"Come back tomorrow");
}

#[tokio::test]
async fn default_rejection_message() {
    let config = indoc! {r#"
        [rate_limit]
        rule_name = "default"
        global_threshold = { query_per_day = 1 }
    "#};

    let server = TestServer::start(config).await;

    server.client.get("/").await;

    let response = server.client.get("/").await;
    assert_eq!(response.status(), 429);

    let body = response.text().await.unwrap();
    insta::assert_snapshot!(body, @"Too many requests");
}
