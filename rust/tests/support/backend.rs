#![allow(dead_code)]

//! In-process stand-in for the Terra backend: token refresh, models,
//! generate and history, with knobs for failures and latency.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

#[derive(Debug, Default)]
pub struct MockState {
    /// The only access token the protected endpoints accept.
    pub valid_access: String,
    /// refresh token -> (new access token, rotated refresh token)
    pub refresh_map: HashMap<String, (String, Option<String>)>,
    pub refresh_delay_ms: u64,
    pub refresh_calls: usize,
    pub refresh_bodies: Vec<Value>,

    pub models: Vec<Value>,
    pub models_calls: usize,

    /// Body returned by POST /generate.
    pub generate_response: Value,
    pub generate_bodies: Vec<Value>,

    pub history: Vec<Value>,
    pub history_wrapped: bool,
    pub history_delay_ms: u64,
    /// Answer this many history requests with a 500 before behaving again.
    pub history_fail_next: usize,
    pub history_calls: usize,
    pub seen_history_auth: Vec<String>,
    pub last_history_query: Option<HashMap<String, String>>,
}

type Shared = Arc<Mutex<MockState>>;

pub struct MockBackend {
    pub url: String,
    state: Shared,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
}

impl MockBackend {
    pub fn start(state: MockState) -> Self {
        let state: Shared = Arc::new(Mutex::new(state));
        let (url_tx, url_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        // Own runtime on its own thread so the server outlives whichever
        // runtime the test itself runs on.
        let app = router(state.clone());
        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("mock backend runtime");
            rt.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind mock backend");
                let addr = listener.local_addr().expect("local addr");
                url_tx.send(format!("http://{addr}")).expect("report url");
                let _ = axum::serve(listener, app)
                    .with_graceful_shutdown(async {
                        let _ = shutdown_rx.await;
                    })
                    .await;
            });
        });

        let url = url_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("mock backend did not start");
        Self {
            url,
            state,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

fn lock(state: &Shared) -> MutexGuard<'_, MockState> {
    match state.lock() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    }
}

fn router(state: Shared) -> Router {
    Router::new()
        .route("/auth/refresh", post(refresh))
        .route("/private/models", get(models))
        .route("/generate", post(generate))
        .route("/private/history", get(history))
        .with_state(state)
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthorized" }))).into_response()
}

async fn refresh(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let (delay, outcome) = {
        let mut s = lock(&state);
        s.refresh_calls += 1;
        s.refresh_bodies.push(body.clone());
        let token = body
            .get("refreshToken")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let outcome = s.refresh_map.get(&token).cloned();
        if let Some((access, _)) = &outcome {
            s.valid_access = access.clone();
        }
        (s.refresh_delay_ms, outcome)
    };
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    match outcome {
        Some((access, Some(refresh))) => {
            Json(json!({ "accessToken": access, "refreshToken": refresh })).into_response()
        }
        Some((access, None)) => Json(json!({ "accessToken": access })).into_response(),
        None => unauthorized(),
    }
}

async fn models(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let mut s = lock(&state);
    s.models_calls += 1;
    if bearer(&headers).as_deref() != Some(s.valid_access.as_str()) {
        return unauthorized();
    }
    Json(Value::Array(s.models.clone())).into_response()
}

async fn generate(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut s = lock(&state);
    if bearer(&headers).as_deref() != Some(s.valid_access.as_str()) {
        return unauthorized();
    }
    s.generate_bodies.push(body);
    Json(s.generate_response.clone()).into_response()
}

async fn history(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let delay = {
        let mut s = lock(&state);
        s.history_calls += 1;
        s.seen_history_auth
            .push(bearer(&headers).unwrap_or_default());
        s.last_history_query = Some(query);
        if s.history_fail_next > 0 {
            s.history_fail_next -= 1;
            return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
        }
        if bearer(&headers).as_deref() != Some(s.valid_access.as_str()) {
            return unauthorized();
        }
        s.history_delay_ms
    };
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    let s = lock(&state);
    let items = Value::Array(s.history.clone());
    if s.history_wrapped {
        Json(json!({ "images": items })).into_response()
    } else {
        Json(items).into_response()
    }
}

pub fn completed(id: &str, request_id: &str) -> Value {
    json!({
        "id": id,
        "requestId": request_id,
        "prompt": format!("prompt {id}"),
        "status": "completed",
        "createdAt": 1_740_823_200,
        "url": format!("https://cdn.example/{id}.png"),
    })
}

pub fn pending(id: &str, request_id: &str) -> Value {
    json!({
        "id": id,
        "requestId": request_id,
        "prompt": format!("prompt {id}"),
        "status": "pending",
        "createdAt": 1_740_823_200,
    })
}

pub fn model(id: &str) -> Value {
    json!({
        "id": id,
        "name": format!("Model {id}"),
        "description": "test model",
    })
}
