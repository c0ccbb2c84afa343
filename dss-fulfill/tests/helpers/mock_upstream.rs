//! In-process fulfillment API
//!
//! Serves the endpoints the engine calls and records every queue action.

use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, patch};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct UpstreamState {
    pub records: Vec<Value>,
    pub needs_review: Vec<Value>,
    pub user_id: Option<String>,
    pub fail_pending: bool,
    /// Answer `/users/permissions` with 503
    pub fail_permissions: bool,
    /// When set, `/fulfill/pending` waits for a notification before answering
    pub pending_gate: Option<Arc<Notify>>,
    /// "queue record a", "dequeue revTree r1", ...
    pub actions: Vec<String>,
    pub pending_fetches: usize,
}

#[derive(Clone, Default)]
pub struct MockUpstream {
    pub state: Arc<Mutex<UpstreamState>>,
    pub token: Arc<String>,
}

impl MockUpstream {
    /// Records a/b/c in the three tiers plus review item r1, actor u1
    pub fn scenario() -> Self {
        let upstream = MockUpstream {
            state: Arc::default(),
            token: Arc::new("t1".to_string()),
        };
        {
            let mut state = upstream.state.lock().unwrap();
            state.records = vec![
                json!({"_id": "a", "status": "inprocess", "productIdentifier": "P-1"}),
                json!({"_id": "b", "status": "inprocess", "fileHash": "h1"}),
                json!({"_id": "c", "status": "active", "fileHash": "h2"}),
            ];
            state.needs_review = vec![json!({"_id": "r1", "status": "inprocess"})];
            state.user_id = Some("u1".to_string());
        }
        upstream
    }

    /// Hold every `/fulfill/pending` response until the returned gate fires
    pub fn hold_pending(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().pending_gate = Some(gate.clone());
        gate
    }

    pub fn pending_fetches(&self) -> usize {
        self.state.lock().unwrap().pending_fetches
    }

    pub fn actions(&self) -> Vec<String> {
        self.state.lock().unwrap().actions.clone()
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == format!("Bearer {}", self.token))
    }

    /// Bind on an ephemeral port; returns the base URL
    pub async fn spawn(&self) -> String {
        let app = Router::new()
            .route("/fulfill/pending", get(pending))
            .route("/users/permissions", get(permissions))
            .route("/fulfill/record/:id", get(record_detail))
            .route("/fulfill/revision/:id", get(revision_detail))
            .route(
                "/fulfill/status/update/:action/:doc_type/:id",
                patch(queue_action),
            )
            .route(
                "/fulfill/manufacturers",
                get(|| async { Json(json!({"manufacturers": [{"name": "Acme"}]})) }),
            )
            .route("/fulfill/datasheets/search", get(echo_query))
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }
}

async fn pending(
    State(up): State<MockUpstream>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    if !up.authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let gate = {
        let mut state = up.state.lock().unwrap();
        state.pending_fetches += 1;
        state.pending_gate.clone()
    };
    if let Some(gate) = gate {
        gate.notified().await;
    }

    let state = up.state.lock().unwrap();
    if state.fail_pending {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    Ok(Json(json!({
        "records": state.records,
        "needsReview": state.needs_review,
    })))
}

async fn permissions(State(up): State<MockUpstream>, headers: HeaderMap) -> Result<Json<Value>, StatusCode> {
    if !up.authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let state = up.state.lock().unwrap();
    if state.fail_permissions {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json(json!({
        "userId": state.user_id,
        "email": "u1@example.com",
        "firstName": "Test",
        "lastName": "User",
        "permissions": ["fulfill"],
        "groups": [],
        "locations": []
    })))
}

fn find(list: &[Value], id: &str) -> Option<Value> {
    list.iter().find(|v| v["_id"] == id).cloned()
}

async fn record_detail(
    State(up): State<MockUpstream>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let state = up.state.lock().unwrap();
    find(&state.records, &id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn revision_detail(
    State(up): State<MockUpstream>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let state = up.state.lock().unwrap();
    find(&state.needs_review, &id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn queue_action(
    State(up): State<MockUpstream>,
    Path((action, doc_type, id)): Path<(String, String, String)>,
) -> Json<Value> {
    up.state
        .lock()
        .unwrap()
        .actions
        .push(format!("{} {} {}", action, doc_type, id));
    // Echoes a body the engine must ignore
    Json(json!({"_id": id, "fulfillment": {"status": "queued", "queuedBy": "someone-else"}}))
}

async fn echo_query(RawQuery(query): RawQuery) -> Json<Value> {
    Json(json!({"matches": [query]}))
}
