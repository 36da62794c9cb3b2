//! HTTP control surface: agent listing, fleet stats, the approval/HITL
//! workflow, telemetry ingestion, and agent registration (§6 External
//! Interfaces). Handlers live here, matching the teacher's convention of
//! keeping route implementations close to the router they're mounted on.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::api::responses::{success, ApiResponse};
use crate::api::validation::ApiValidator;
use crate::immune::diagnosis::DiagnosisFeedback;
use crate::immune::telemetry::AgentVitals;
use crate::infrastructure::middleware::{cors_middleware, logging_middleware, request_id_middleware, security_headers_middleware};
use crate::utils::error::ImmuneError;
use crate::AppState;

/// Assembles the full axum [`Router`] for the control plane (§6).
pub fn create_router(app_state: AppState) -> Router {
    let cors: CorsLayer = cors_middleware(&app_state.config);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/agents", get(list_agents))
        .route("/api/agents/register", post(register_agent))
        .route("/api/stats", get(stats))
        .route("/api/ingest", post(ingest_vitals))
        .route("/api/approvals/pending", get(pending_approvals))
        .route("/api/approvals/rejected", get(rejected_approvals))
        .route("/api/approve-healing", post(approve_healing))
        .route("/api/approve-all", post(approve_all))
        .route("/api/heal-explicitly", post(heal_explicitly))
        .route("/api/heal-all-rejected", post(heal_all_rejected))
        .route("/api/feedback", post(diagnosis_feedback))
        .route("/api/actions", get(action_log))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(middleware::from_fn(logging_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .with_state(app_state)
}

fn no_store<T: IntoResponse>(body: T) -> impl IntoResponse {
    (StatusCode::OK, [("cache-control", "no-store")], body)
}

fn client_id(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Bearer-token check against the configured `api_key` (§6 Approval/control
/// HTTP). A missing `server.api_key` disables the check entirely, which is
/// the default for local/demo runs.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, Json<ApiResponse<()>>)> {
    let Some(expected) = &state.config.server.api_key else {
        return Ok(());
    };
    let provided = headers.get("authorization").and_then(|v| v.to_str().ok()).and_then(|v| v.strip_prefix("Bearer "));
    if provided == Some(expected.as_str()) {
        Ok(())
    } else {
        state.security_auditor.log_authentication_attempt(client_id(headers), None, None, false, Some("missing or invalid bearer token".to_string()));
        Err(ImmuneError::AuthenticationError { reason: "missing or invalid bearer token".to_string() }.into())
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health.run_all_checks().await;
    let status = if report.overall_status == crate::utils::health_check::HealthStatus::Healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, [("cache-control", "no-store")], Json(report))
}

async fn metrics() -> impl IntoResponse {
    use prometheus::{Encoder, TextEncoder};
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        warn!(error = %e, "failed to encode prometheus metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, [("cache-control", "no-store")], String::new());
    }
    let body = String::from_utf8(buffer).unwrap_or_default();
    (StatusCode::OK, [("cache-control", "no-store")], body)
}

async fn list_agents(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, (StatusCode, Json<ApiResponse<()>>)> {
    authorize(&state, &headers)?;
    let agents = state.orchestrator.agents_summary().await;
    Ok(no_store(Json(ApiResponse::success(agents))))
}

#[derive(Debug, Deserialize)]
struct RegisterPayload {
    agent_id: String,
    #[serde(default)]
    agent_type: String,
    #[serde(default)]
    model: String,
}

async fn register_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiResponse<()>>)> {
    authorize(&state, &headers)?;
    state
        .rate_limiters
        .registration
        .check_rate_limit(&client_id(&headers))
        .await
        .map_err(|e| ImmuneError::RateLimitExceeded { client_id: client_id(&headers), limit: e.max_requests, window_secs: e.window_duration.as_secs() }.into())?;
    ApiValidator::validate_registration_payload(&payload).map_err(|reason| ImmuneError::ValidationError { field: "payload".to_string(), reason }.into())?;
    let request: RegisterPayload = serde_json::from_value(payload).map_err(|e| ImmuneError::InvalidJson { json_path: "$".to_string(), reason: e.to_string() }.into())?;
    state.orchestrator.register_agent(&request.agent_id, &request.agent_type, &request.model);
    success(json!({ "agent_id": request.agent_id, "registered": true }))
}

async fn stats(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, (StatusCode, Json<ApiResponse<()>>)> {
    authorize(&state, &headers)?;
    Ok(no_store(Json(ApiResponse::success(state.orchestrator.stats().await))))
}

async fn ingest_vitals(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiResponse<()>>)> {
    authorize(&state, &headers)?;
    state
        .rate_limiters
        .ingest
        .check_rate_limit(&client_id(&headers))
        .await
        .map_err(|e| ImmuneError::RateLimitExceeded { client_id: client_id(&headers), limit: e.max_requests, window_secs: e.window_duration.as_secs() }.into())?;
    ApiValidator::validate_ingest_payload(&payload).map_err(|reason| ImmuneError::ValidationError { field: "payload".to_string(), reason }.into())?;
    let vitals: AgentVitals = serde_json::from_value(payload).map_err(|e| ImmuneError::InvalidJson { json_path: "$".to_string(), reason: e.to_string() }.into())?;
    state.orchestrator.ingest_vitals(vitals).await?;
    success(json!({ "ingested": true }))
}

async fn pending_approvals(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, (StatusCode, Json<ApiResponse<()>>)> {
    authorize(&state, &headers)?;
    Ok(no_store(Json(ApiResponse::success(state.orchestrator.get_pending_approvals()))))
}

async fn rejected_approvals(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, (StatusCode, Json<ApiResponse<()>>)> {
    authorize(&state, &headers)?;
    Ok(no_store(Json(ApiResponse::success(state.orchestrator.get_rejected_approvals()))))
}

async fn approve_healing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiResponse<()>>)> {
    authorize(&state, &headers)?;
    state
        .rate_limiters
        .approval
        .check_rate_limit(&client_id(&headers))
        .await
        .map_err(|e| ImmuneError::RateLimitExceeded { client_id: client_id(&headers), limit: e.max_requests, window_secs: e.window_duration.as_secs() }.into())?;
    let (agent_id, approved) = ApiValidator::validate_approval_payload(&payload).map_err(|reason| ImmuneError::ValidationError { field: "payload".to_string(), reason }.into())?;
    state.orchestrator.approve_healing(&agent_id, approved).await?;
    success(json!({ "agent_id": agent_id, "approved": approved }))
}

#[derive(Debug, Deserialize)]
struct ApproveAllPayload {
    approved: bool,
}

async fn approve_all(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ApproveAllPayload>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiResponse<()>>)> {
    authorize(&state, &headers)?;
    let count = state.orchestrator.approve_all_pending(payload.approved).await;
    success(json!({ "approved": payload.approved, "affected": count }))
}

#[derive(Debug, Deserialize)]
struct AgentIdPayload {
    agent_id: String,
}

async fn heal_explicitly(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<AgentIdPayload>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiResponse<()>>)> {
    authorize(&state, &headers)?;
    state.orchestrator.start_healing_explicitly(&payload.agent_id).await?;
    success(json!({ "agent_id": payload.agent_id, "healing": true }))
}

async fn heal_all_rejected(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, (StatusCode, Json<ApiResponse<()>>)> {
    authorize(&state, &headers)?;
    let count = state.orchestrator.start_healing_all_rejected().await;
    success(json!({ "affected": count }))
}

#[derive(Debug, Deserialize)]
struct FeedbackPayload {
    agent_id: String,
    verdict: String,
}

async fn diagnosis_feedback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<FeedbackPayload>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiResponse<()>>)> {
    authorize(&state, &headers)?;
    let feedback = match payload.verdict.as_str() {
        "false_positive" => DiagnosisFeedback::FalsePositive,
        "wrong_diagnosis" => DiagnosisFeedback::WrongDiagnosis,
        other => {
            return Err(ImmuneError::ValidationError { field: "verdict".to_string(), reason: format!("unknown verdict '{other}'") }.into());
        }
    };
    state.orchestrator.record_feedback(&payload.agent_id, feedback).await?;
    success(json!({ "agent_id": payload.agent_id, "recorded": true }))
}

#[derive(Debug, Deserialize)]
struct ActionLogQuery {
    #[serde(default = "default_action_log_limit")]
    limit: usize,
}

fn default_action_log_limit() -> usize {
    50
}

async fn action_log(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ActionLogQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiResponse<()>>)> {
    authorize(&state, &headers)?;
    Ok(no_store(Json(ApiResponse::success(state.orchestrator.get_action_log(query.limit.min(500)).await))))
}
