//! A mock upstream service.
//!
//! `POST /v1/chat/completions` answers like an OpenAI compatible LLM, reporting 40 prompt and
//! 20 completion tokens, as an event stream when the request body has `"stream": true`. Every
//! other request is echoed back as JSON.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, Method, Uri, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;

pub const PROMPT_TOKENS: u64 = 40;
pub const COMPLETION_TOKENS: u64 = 20;

pub struct TestUpstream {
    pub address: SocketAddr,
    hits: Arc<AtomicUsize>,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestUpstream {
    pub async fn start() -> Self {
        let hits = Arc::new(AtomicUsize::new(0));

        let app = Router::new()
            .route("/v1/chat/completions", post(chat_completions))
            .fallback(echo)
            .with_state(hits.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            address,
            hits,
            _handle: handle,
        }
    }

    /// Number of requests that reached the upstream.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn echo(State(hits): State<Arc<AtomicUsize>>, method: Method, uri: Uri, headers: HeaderMap, body: String) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);

    let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok()).map(str::to_string);

    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "x-forwarded-for": header("x-forwarded-for"),
        "x-ca-key": header("x-ca-key"),
        "x-hop": header("x-hop"),
        "body": body,
    }))
}

async fn chat_completions(State(hits): State<Arc<AtomicUsize>>, Json(request): Json<Value>) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);

    let usage = json!({
        "prompt_tokens": PROMPT_TOKENS,
        "completion_tokens": COMPLETION_TOKENS,
        "total_tokens": PROMPT_TOKENS + COMPLETION_TOKENS,
    });

    if request.get("stream").and_then(Value::as_bool) != Some(true) {
        return Json(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": "Hello!" } }],
            "usage": usage,
        }))
        .into_response();
    }

    let events = [
        json!({ "id": "chatcmpl-1", "choices": [{ "delta": { "content": "Hel" } }], "usage": null }),
        json!({ "id": "chatcmpl-1", "choices": [{ "delta": { "content": "lo!" } }], "usage": null }),
        json!({ "id": "chatcmpl-1", "choices": [], "usage": usage }),
    ];

    let mut body = String::new();

    for event in events {
        body.push_str(&format!("data: {event}\n\n"));
    }

    body.push_str("data: [DONE]\n\n");

    Response::builder()
        .header(CONTENT_TYPE, "text/event-stream")
        .body(Body::from(body))
        .unwrap()
}
