//! In-process session service used by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use serde_json::{Value, json};
use tokio::net::TcpListener;

pub const TOKEN: &str = "tok-1";

#[derive(Debug, Clone)]
pub struct Call {
    pub method: &'static str,
    pub path: String,
    pub body: Value,
    /// `false` when the service refused the request.
    pub accepted: bool,
}

#[derive(Clone)]
struct MockState {
    config: Value,
    calls: Arc<Mutex<Vec<Call>>>,
    closed: Arc<AtomicBool>,
}

impl MockState {
    fn record(&self, method: &'static str, path: String, body: Value) {
        self.record_with(method, path, body, true);
    }

    fn record_with(&self, method: &'static str, path: String, body: Value, accepted: bool) {
        self.calls.lock().unwrap().push(Call {
            method,
            path,
            body,
            accepted,
        });
    }
}

pub struct MockService {
    pub base: String,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl MockService {
    /// URL the run is launched from.
    pub fn run_url(&self, query: &str) -> String {
        format!("{}/lab/stroop/index.html{query}", self.base)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: &str, prefix: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method && c.path.starts_with(prefix))
            .collect()
    }

    /// Poll until at least `count` matching calls were received.
    pub async fn wait_for(&self, method: &str, prefix: &str, count: usize) -> Vec<Call> {
        for _ in 0..200 {
            let calls = self.calls_to(method, prefix);
            if calls.len() >= count {
                return calls;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        self.calls_to(method, prefix)
    }
}

/// Configuration document pointing at the mock service.
pub fn server_config(base: &str, period: u64) -> Value {
    json!({
        "experiment": {
            "name": "stroop",
            "fullpath": "lab/stroop",
            "saveFormat": "csv",
            "resultsUpload": { "period": period }
        },
        "gitlab": { "projectId": 4242 },
        "psychoJsManager": { "URL": format!("{base}/api/") }
    })
}

/// Start a mock service; `config` receives the service base URL.
pub async fn start(config: impl FnOnce(&str) -> Value) -> MockService {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());

    let calls = Arc::new(Mutex::new(Vec::new()));
    let state = MockState {
        config: config(&base),
        calls: Arc::clone(&calls),
        closed: Arc::new(AtomicBool::new(false)),
    };

    let app = Router::new()
        .route("/lab/stroop/config.json", get(serve_config))
        .route("/lab/stroop/files/words.txt", get(|| async { "red\ngreen" }))
        .route("/api/sessions", post(open_session))
        .route("/api/sessions/{token}", delete(close_session))
        .route("/api/sessions/{token}/results", post(save_results))
        .route("/api/sessions/{token}/resources", get(manifest))
        .with_state(state);

    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    MockService { base, calls }
}

async fn serve_config(State(state): State<MockState>) -> Json<Value> {
    state.record("GET", "/lab/stroop/config.json".to_string(), Value::Null);
    Json(state.config.clone())
}

async fn open_session(State(state): State<MockState>, Json(body): Json<Value>) -> Json<Value> {
    state.record("POST", "/api/sessions".to_string(), body);
    Json(json!({ "token": TOKEN, "status": "OPEN" }))
}

async fn close_session(
    State(state): State<MockState>,
    Path(token): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    state.closed.store(true, Ordering::SeqCst);
    state.record("DELETE", format!("/api/sessions/{token}"), body);
    StatusCode::OK
}

async fn save_results(
    State(state): State<MockState>,
    Path(token): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    // results for a closed session are refused
    let accepted = !state.closed.load(Ordering::SeqCst);
    state.record_with("POST", format!("/api/sessions/{token}/results"), body, accepted);
    if accepted {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    }
}

async fn manifest(State(state): State<MockState>, Path(token): Path<String>) -> Json<Value> {
    state.record("GET", format!("/api/sessions/{token}/resources"), Value::Null);
    Json(json!([
        { "name": "words", "path": "files/words.txt" },
        { "name": "gone", "path": "files/gone.txt" }
    ]))
}
