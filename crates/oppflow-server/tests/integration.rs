use axum::http::StatusCode;
use http_body_util::BodyExt;
use oppflow_core::config::Config;
use oppflow_core::template::{OpportunityType, RequiredDocument, StageTemplate, TemplateStore};
use oppflow_server::state::AppState;
use tempfile::TempDir;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Bootstrap a project with one "sale" type: Qualify (NDA required) -> Contract.
fn init_project(dir: &TempDir) -> AppState {
    Config::new("test-project").save(dir.path()).unwrap();

    let mut qualify = StageTemplate::new("qualify", "Qualify", 1, 5);
    qualify.required_documents.push(RequiredDocument::mandatory("NDA"));
    let contract = StageTemplate::new("contract", "Contract", 2, 10);
    let mut templates = TemplateStore::new();
    templates
        .create_type(OpportunityType::new("sale", "Sale").with_stages(vec![qualify, contract]))
        .unwrap();
    templates.save(dir.path()).unwrap();

    AppState::open(dir.path()).unwrap()
}

fn app(state: &AppState) -> axum::Router {
    oppflow_server::build_router(state.clone())
}

/// Send a GET request via `oneshot` and return (status, parsed JSON body).
async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let req = axum::http::Request::builder()
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

/// Send a POST request with a JSON body via `oneshot` and return (status, parsed JSON body).
async fn post_json(
    app: axum::Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let req = axum::http::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

/// Create an opportunity and return (opportunity id, [stage ids]).
async fn create_opportunity(state: &AppState) -> (String, Vec<String>) {
    let (status, body) = post_json(
        app(state),
        "/api/opportunities",
        serde_json::json!({ "name": "Acme", "type_id": "sale", "created_by": "alice" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let id = body["opportunity"]["id"].as_str().unwrap().to_string();
    let stages = body["stages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap().to_string())
        .collect();
    (id, stages)
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[tokio::test]
async fn types_are_listed() {
    let dir = TempDir::new().unwrap();
    let state = init_project(&dir);
    let (status, body) = get(app(&state), "/api/types").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["id"], "sale");
    assert_eq!(body[0]["stages"].as_array().unwrap().len(), 2);

    let (status, _) = get(app(&state), "/api/types/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Opportunities
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_and_fetch_pipeline() {
    let dir = TempDir::new().unwrap();
    let state = init_project(&dir);
    let (id, stages) = create_opportunity(&state).await;
    assert_eq!(stages.len(), 2);

    let (status, body) = get(app(&state), &format!("/api/opportunities/{id}/pipeline")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["status"], "IN_PROGRESS");
    assert_eq!(body[1]["status"], "PENDING");
    assert!(body[0]["risk_level"].is_string());

    let (status, body) = get(app(&state), &format!("/api/opportunities/{id}/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_stages"], 2);
    assert_eq!(body["in_progress"], 1);
}

#[tokio::test]
async fn unknown_opportunity_is_404() {
    let dir = TempDir::new().unwrap();
    let state = init_project(&dir);
    let missing = uuid::Uuid::new_v4();
    let (status, body) = get(app(&state), &format!("/api/opportunities/{missing}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn unknown_type_is_rejected() {
    let dir = TempDir::new().unwrap();
    let state = init_project(&dir);
    let (status, _) = post_json(
        app(&state),
        "/api/opportunities",
        serde_json::json!({ "name": "Acme", "type_id": "lease", "created_by": "alice" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn out_of_order_start_is_422_with_blockers() {
    let dir = TempDir::new().unwrap();
    let state = init_project(&dir);
    let (_, stages) = create_opportunity(&state).await;

    let (status, body) = post_json(
        app(&state),
        &format!("/api/stages/{}/transition", stages[1]),
        serde_json::json!({ "target": "IN_PROGRESS", "actor": "alice" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["blocking"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn completion_waits_for_documents() {
    let dir = TempDir::new().unwrap();
    let state = init_project(&dir);
    let (id, stages) = create_opportunity(&state).await;
    let transition = format!("/api/stages/{}/transition", stages[0]);

    let (status, body) = post_json(
        app(&state),
        &transition,
        serde_json::json!({ "target": "COMPLETED", "actor": "alice" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["missing"][0].as_str().unwrap().contains("NDA"));

    let (_, docs) = get(app(&state), &format!("/api/stages/{}/documents", stages[0])).await;
    let doc_id = docs[0]["id"].as_str().unwrap().to_string();
    let (status, doc) = post_json(
        app(&state),
        &format!("/api/documents/{doc_id}/provide"),
        serde_json::json!({ "actor": "alice" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["is_provided"], true);

    let (status, stage) = post_json(
        app(&state),
        &transition,
        serde_json::json!({ "target": "COMPLETED", "actor": "alice" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stage["status"], "COMPLETED");

    let (_, history) = get(app(&state), &format!("/api/opportunities/{id}/history")).await;
    let kinds: Vec<&str> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event"].as_str().unwrap())
        .collect();
    assert!(kinds.contains(&"document_provided"));
    assert!(kinds.contains(&"action"));
}

#[tokio::test]
async fn stale_version_is_409() {
    let dir = TempDir::new().unwrap();
    let state = init_project(&dir);
    let (_, stages) = create_opportunity(&state).await;

    let (status, _) = post_json(
        app(&state),
        &format!("/api/stages/{}/transition", stages[0]),
        serde_json::json!({ "target": "BLOCKED", "actor": "alice", "expected_version": 99 }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn transition_is_broadcast_to_subscribers() {
    let dir = TempDir::new().unwrap();
    let state = init_project(&dir);
    let (_, stages) = create_opportunity(&state).await;
    let mut rx = state.event_tx.subscribe();

    let (status, _) = post_json(
        app(&state),
        &format!("/api/stages/{}/transition", stages[0]),
        serde_json::json!({ "target": "BLOCKED", "actor": "alice", "notes": "legal hold" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let event = rx.recv().await.unwrap();
    assert_eq!(event.stage_instance_id.to_string(), stages[0]);
}

// ---------------------------------------------------------------------------
// Actions and sweep
// ---------------------------------------------------------------------------

#[tokio::test]
async fn system_action_types_cannot_be_logged() {
    let dir = TempDir::new().unwrap();
    let state = init_project(&dir);
    let (_, stages) = create_opportunity(&state).await;
    let uri = format!("/api/stages/{}/actions", stages[0]);

    let (status, _) = post_json(
        app(&state),
        &uri,
        serde_json::json!({ "action_type": "CALL", "title": "Intro", "performed_by": "alice" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = post_json(
        app(&state),
        &uri,
        serde_json::json!({ "action_type": "OVERDUE_ALERT", "title": "x", "performed_by": "alice" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sweep_returns_report() {
    let dir = TempDir::new().unwrap();
    let state = init_project(&dir);
    create_opportunity(&state).await;

    let (status, body) = post_json(app(&state), "/api/sweep", serde_json::json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["opportunities"], 1);
    assert_eq!(body["stages_evaluated"], 2);
}
