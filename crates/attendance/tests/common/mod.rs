//! 远端考勤 API 的 axum 模拟服务

#![allow(dead_code)]

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Default)]
pub struct MockState {
    /// event_id -> server_id
    pub records: HashMap<String, String>,
    /// 每次请求携带的 Idempotency-Key
    pub idempotency_keys: Vec<String>,
    /// 每次请求的 JSON body
    pub bodies: Vec<Value>,
}

pub struct MockServer {
    pub base_url: String,
    pub state: Arc<Mutex<MockState>>,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl MockServer {
    pub fn record_count(&self) -> usize {
        self.state.lock().unwrap().records.len()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().unwrap().idempotency_keys.len()
    }
}

/// 按 employee_id 决定响应：
/// - "conflict" → 409
/// - "broken" → 503
/// - "invalid" → 422
/// - 其它 → 201（重复的 event_id 返回 200 与同一个 server_id）
async fn submit_event(
    State(state): State<Arc<Mutex<MockState>>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let employee = body["employee_id"].as_str().unwrap_or_default().to_string();

    let mut state = state.lock().unwrap();
    state.idempotency_keys.push(key.clone());
    state.bodies.push(body);

    match employee.as_str() {
        "conflict" => (
            StatusCode::CONFLICT,
            Json(json!({ "reason": "employee already checked in today", "server_id": "srv-existing" })),
        ),
        "broken" => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "maintenance" })),
        ),
        "invalid" => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": "unknown employee" })),
        ),
        _ => {
            if let Some(server_id) = state.records.get(&key) {
                return (StatusCode::OK, Json(json!({ "server_id": server_id })));
            }
            let server_id = format!("srv-{}", state.records.len() + 1);
            state.records.insert(key, server_id.clone());
            (StatusCode::CREATED, Json(json!({ "server_id": server_id })))
        }
    }
}

pub async fn start_mock_server() -> MockServer {
    let state = Arc::new(Mutex::new(MockState::default()));
    let app = Router::new()
        .route("/api/attendance/events", post(submit_event))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to read bound addr");
    let base_url = format!("http://{addr}/api");

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("Mock server exited unexpectedly");
    });

    MockServer {
        base_url,
        state,
        handle,
    }
}

/// 一个当前没有进程监听的本地地址
pub async fn unreachable_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to read bound addr");
    drop(listener);
    format!("http://{addr}/api")
}
