use axum::{Json, Router, extract::{Path, State}, http::{header, StatusCode}, response::{IntoResponse, Response}, routing::{get, post}};
use std::{collections::HashMap, sync::Arc};
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tower_http::cors::{CorsLayer, Any};
use uuid::Uuid;

use crate::{
    generator::{IdeaGenerator, ImageGenerator},
    models::{GenerateRequest, RefineRequest, SessionView},
    orchestrator::Orchestrator,
    pdf::render_concept_sheet,
};

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<RwLock<HashMap<Uuid, Arc<Orchestrator>>>>,
    pub ideas: Arc<dyn IdeaGenerator>,
    pub images: Arc<dyn ImageGenerator>,
}

impl AppState {
    pub fn new(ideas: Arc<dyn IdeaGenerator>, images: Arc<dyn ImageGenerator>) -> Self {
        Self { sessions: Arc::default(), ideas, images }
    }

    fn session(&self, id: Uuid) -> Result<Arc<Orchestrator>, StatusCode> {
        self.sessions.read().get(&id).cloned().ok_or(StatusCode::NOT_FOUND)
    }

    /// Drops sessions idle for at least `max_idle`. Sessions with a pipeline in flight are kept.
    pub fn evict_idle_sessions(&self, max_idle: Duration) -> usize {
        let cutoff = Utc::now() - max_idle;
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, session| session.idle_since().map_or(true, |since| since > cutoff));
        before - sessions.len()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(delete_session))
        .route("/api/sessions/:id/generate", post(generate))
        .route("/api/sessions/:id/refine", post(refine))
        .route("/api/sessions/:id/reset", post(reset))
        .route("/api/sessions/:id/sheet.pdf", get(export_sheet))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}

async fn health() -> &'static str { "ok" }

pub async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionView>) {
    let id = Uuid::new_v4();
    let orchestrator = Arc::new(Orchestrator::new(id, state.ideas.clone(), state.images.clone()));
    let view = orchestrator.snapshot();
    tracing::info!("🎯 Created session {}", orchestrator.id());
    state.sessions.write().insert(id, orchestrator);
    (StatusCode::CREATED, Json(view))
}

pub async fn get_session(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<SessionView>, StatusCode> {
    Ok(Json(state.session(id)?.snapshot()))
}

pub async fn delete_session(Path(id): Path<Uuid>, State(state): State<AppState>) -> StatusCode {
    match state.sessions.write().remove(&id) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

pub async fn generate(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<GenerateRequest>
) -> Result<Json<SessionView>, StatusCode> {
    let session = state.session(id)?;
    let keyword = body.keyword.trim().to_string();
    if keyword.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let constraints = body.constraints.unwrap_or_default().normalized();
    let pipeline = tokio::spawn({
        let session = session.clone();
        async move { session.generate_fresh(&keyword, constraints).await }
    });
    settle(id, pipeline).await?;
    Ok(Json(session.snapshot()))
}

pub async fn refine(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<RefineRequest>
) -> Result<Json<SessionView>, StatusCode> {
    let session = state.session(id)?;
    let instruction = body.instruction.trim().to_string();
    if instruction.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let pipeline = tokio::spawn({
        let session = session.clone();
        async move { session.refine(&instruction).await }
    });
    settle(id, pipeline).await?;
    Ok(Json(session.snapshot()))
}

// Pipelines run on their own task so a dropped request cannot leave the session mid-generation.
async fn settle(id: Uuid, pipeline: JoinHandle<()>) -> Result<(), StatusCode> {
    pipeline.await.map_err(|e| {
        tracing::error!("❌ Pipeline for session {} aborted: {}", id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

pub async fn reset(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<SessionView>, StatusCode> {
    let session = state.session(id)?;
    session.reset();
    Ok(Json(session.snapshot()))
}

pub async fn export_sheet(Path(id): Path<Uuid>, State(state): State<AppState>) -> Response {
    let Ok(session) = state.session(id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(concept) = session.session().concept else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let pdf_bytes = render_concept_sheet(&concept);
    let disposition = format!("attachment; filename=\"concept_{}.pdf\"", id);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/pdf".to_string()), (header::CONTENT_DISPOSITION, disposition)],
        pdf_bytes,
    ).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{GenerationError, IdeaRequest, ImageStyle};
    use crate::models::{fixtures::strawberry_concept, Concept, ImageRef};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tokio::sync::Notify;
    use tower::ServiceExt;

    #[derive(Default)]
    struct FakeGenerator {
        idea_requests: Mutex<Vec<IdeaRequest>>,
        fail_ideas: bool,
        gate: Option<Arc<Notify>>,
    }

    impl FakeGenerator {
        fn gated(gate: Arc<Notify>) -> Self {
            Self { gate: Some(gate), ..Self::default() }
        }
    }

    #[async_trait]
    impl IdeaGenerator for FakeGenerator {
        async fn generate_idea(&self, request: &IdeaRequest) -> Result<Concept, GenerationError> {
            self.idea_requests.lock().push(request.clone());
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail_ideas {
                return Err(GenerationError::MissingCredentials);
            }
            Ok(strawberry_concept())
        }
    }

    #[async_trait]
    impl ImageGenerator for FakeGenerator {
        async fn generate_image(&self, prompt: &str, _style: ImageStyle) -> Result<ImageRef, GenerationError> {
            Ok(ImageRef::from_base64("image/png", prompt))
        }
    }

    fn app(generator: Arc<FakeGenerator>) -> Router {
        router(AppState::new(generator.clone(), generator))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => request.body(Body::empty()),
        }.unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn call_json(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, bytes) = call(app, method, uri, body).await;
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn generate_request(id: &str, keyword: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/api/sessions/{id}/generate"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"keyword": keyword}).to_string()))
            .unwrap()
    }

    async fn wait_for_phase(app: &Router, id: &str, done: impl Fn(&str) -> bool) -> Value {
        for _ in 0..200 {
            let (_, view) = call_json(app, "GET", &format!("/api/sessions/{id}"), None).await;
            if view["phase"].as_str().is_some_and(&done) {
                return view;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("session {id} never reached the expected phase");
    }

    async fn new_session(app: &Router) -> String {
        let (status, view) = call_json(app, "POST", "/api/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(view["phase"], "IDLE");
        view["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn generate_then_reset() {
        let generator = Arc::new(FakeGenerator::default());
        let app = app(generator.clone());
        let id = new_session(&app).await;

        let body = json!({"keyword": "  strawberry ", "constraints": {"targetCost": "300", "targetPrice": ""}});
        let (status, view) = call_json(&app, "POST", &format!("/api/sessions/{id}/generate"), Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["phase"], "COMPLETED");
        assert_eq!(view["concept"]["recipe"].as_array().unwrap().len(), 3);
        assert!(view["mainImage"].as_str().unwrap().starts_with("data:image/png;base64,"));
        assert_eq!(view["costBreakdown"][0]["name"], "Strawberries");

        match &generator.idea_requests.lock()[0] {
            IdeaRequest::Fresh { keyword, constraints } => {
                assert_eq!(keyword, "strawberry");
                assert_eq!(constraints.target_cost.as_deref(), Some("300"));
                assert_eq!(constraints.target_price, None);
            }
            other => panic!("expected a fresh request, got {other:?}"),
        }

        let (status, view) = call_json(&app, "GET", &format!("/api/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["phase"], "COMPLETED");

        let (status, view) = call_json(&app, "POST", &format!("/api/sessions/{id}/reset"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["phase"], "IDLE");
        assert!(view.get("concept").is_none());
        assert!(view.get("mainImage").is_none());
    }

    #[tokio::test]
    async fn blank_input_is_rejected() {
        let app = app(Arc::new(FakeGenerator::default()));
        let id = new_session(&app).await;

        let (status, _) = call(&app, "POST", &format!("/api/sessions/{id}/generate"), Some(json!({"keyword": "   "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call(&app, "POST", &format!("/api/sessions/{id}/refine"), Some(json!({"instruction": ""}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn refine_without_concept_returns_unchanged_session() {
        let generator = Arc::new(FakeGenerator::default());
        let app = app(generator.clone());
        let id = new_session(&app).await;

        let (status, view) = call_json(&app, "POST", &format!("/api/sessions/{id}/refine"), Some(json!({"instruction": "smaller"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["phase"], "IDLE");
        assert!(generator.idea_requests.lock().is_empty());
    }

    #[tokio::test]
    async fn failed_generation_reports_error_message() {
        let app = app(Arc::new(FakeGenerator { fail_ideas: true, ..FakeGenerator::default() }));
        let id = new_session(&app).await;

        let (status, view) = call_json(&app, "POST", &format!("/api/sessions/{id}/generate"), Some(json!({"keyword": "strawberry"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["phase"], "FAILED");
        assert!(!view["errorMessage"].as_str().unwrap().is_empty());
        assert!(view.get("concept").is_none());
    }

    #[tokio::test]
    async fn unknown_and_deleted_sessions_are_not_found() {
        let app = app(Arc::new(FakeGenerator::default()));
        let missing = Uuid::new_v4();
        let (status, _) = call(&app, "GET", &format!("/api/sessions/{missing}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let id = new_session(&app).await;
        let (status, _) = call(&app, "DELETE", &format!("/api/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, "POST", &format!("/api/sessions/{id}/reset"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn concept_sheet_requires_a_concept() {
        let app = app(Arc::new(FakeGenerator::default()));
        let id = new_session(&app).await;

        let (status, _) = call(&app, "GET", &format!("/api/sessions/{id}/sheet.pdf"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        call(&app, "POST", &format!("/api/sessions/{id}/generate"), Some(json!({"keyword": "strawberry"}))).await;
        let (status, bytes) = call(&app, "GET", &format!("/api/sessions/{id}/sheet.pdf"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn health_check() {
        let app = app(Arc::new(FakeGenerator::default()));
        let (status, bytes) = call(&app, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, b"ok".to_vec());
    }

    #[tokio::test]
    async fn dropped_request_still_settles_session() {
        let gate = Arc::new(Notify::new());
        let app = app(Arc::new(FakeGenerator::gated(gate.clone())));
        let id = new_session(&app).await;

        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            app.clone().oneshot(generate_request(&id, "strawberry")),
        ).await;
        assert!(abandoned.is_err());

        let (_, view) = call_json(&app, "GET", &format!("/api/sessions/{id}"), None).await;
        assert_eq!(view["phase"], "GENERATING_TEXT");

        gate.notify_one();
        let view = wait_for_phase(&app, &id, |phase| !phase.starts_with("GENERATING")).await;
        assert_eq!(view["phase"], "COMPLETED");
        assert_eq!(view["concept"]["name"], "Strawberry Cloud Tart");
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted_and_busy_ones_kept() {
        let gate = Arc::new(Notify::new());
        let generator = Arc::new(FakeGenerator::gated(gate.clone()));
        let state = AppState::new(generator.clone(), generator);
        let app = router(state.clone());
        let idle = new_session(&app).await;
        let busy = new_session(&app).await;

        let pending = tokio::spawn(app.clone().oneshot(generate_request(&busy, "strawberry")));
        wait_for_phase(&app, &busy, |phase| phase == "GENERATING_TEXT").await;

        assert_eq!(state.evict_idle_sessions(Duration::hours(1)), 0);
        assert_eq!(state.evict_idle_sessions(Duration::zero()), 1);

        let (status, _) = call(&app, "GET", &format!("/api/sessions/{idle}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        gate.notify_one();
        let response = pending.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let (status, view) = call_json(&app, "GET", &format!("/api/sessions/{busy}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["phase"], "COMPLETED");
    }
}
