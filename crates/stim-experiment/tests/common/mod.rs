//! Mock session service and recording host shared by the orchestrator tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use serde_json::{Value, json};
use stim_core::BoxError;
use stim_experiment::Host;
use tokio::net::TcpListener;

pub const TOKEN: &str = "tok-7";

#[derive(Debug, Clone)]
pub struct Call {
    pub method: &'static str,
    pub path: String,
    pub body: Value,
}

#[derive(Clone)]
struct MockState {
    config: Value,
    calls: Arc<Mutex<Vec<Call>>>,
}

pub struct MockService {
    pub base: String,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl MockService {
    pub fn run_url(&self, query: &str) -> String {
        format!("{}/lab/stroop/index.html{query}", self.base)
    }

    pub fn calls_to(&self, method: &str, path: &str) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .cloned()
            .collect()
    }

    pub async fn wait_for(&self, method: &str, path: &str, count: usize) -> Vec<Call> {
        for _ in 0..200 {
            let calls = self.calls_to(method, path);
            if calls.len() >= count {
                return calls;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.calls_to(method, path)
    }
}

pub fn server_config(base: &str) -> Value {
    json!({
        "experiment": { "name": "stroop", "fullPath": "lab/stroop", "saveFormat": "csv" },
        "gitlab": { "projectId": 99 },
        "psychoJsManager": { "URL": format!("{base}/api") }
    })
}

pub async fn start(config: impl FnOnce(&str) -> Value) -> MockService {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
    let calls = Arc::new(Mutex::new(Vec::new()));
    let state = MockState {
        config: config(&base),
        calls: Arc::clone(&calls),
    };

    let app = Router::new()
        .route(
            "/lab/stroop/config.json",
            get(|State(state): State<MockState>| async move { Json(state.config.clone()) }),
        )
        .route("/lab/stroop/words.txt", get(|| async { "red\ngreen\nblue" }))
        .route("/api/sessions", post(open_session))
        .route("/api/sessions/{token}", delete(close_session))
        .route("/api/sessions/{token}/results", post(save_results))
        .with_state(state);

    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    MockService { base, calls }
}

fn record(state: &MockState, method: &'static str, path: String, body: Value) {
    state.calls.lock().unwrap().push(Call { method, path, body });
}

async fn open_session(State(state): State<MockState>, Json(body): Json<Value>) -> Json<Value> {
    record(&state, "POST", "/api/sessions".into(), body);
    Json(json!({ "token": TOKEN }))
}

async fn close_session(
    State(state): State<MockState>,
    Path(token): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    record(&state, "DELETE", format!("/api/sessions/{token}"), body);
    StatusCode::OK
}

async fn save_results(
    State(state): State<MockState>,
    Path(token): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    record(&state, "POST", format!("/api/sessions/{token}/results"), body);
    StatusCode::OK
}

/// Host that remembers every call.
#[derive(Clone, Default)]
pub struct RecordingHost {
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingHost {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Host for RecordingHost {
    async fn open(&self) -> Result<(), BoxError> {
        self.push("open".into());
        Ok(())
    }

    async fn close(&self) -> Result<(), BoxError> {
        self.push("close".into());
        Ok(())
    }

    async fn present(&self, message: &str) {
        self.push(format!("present:{message}"));
    }

    async fn redirect(&self, url: &str) {
        self.push(format!("redirect:{url}"));
    }
}
