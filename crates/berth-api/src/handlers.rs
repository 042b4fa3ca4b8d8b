//! REST API handlers.
//!
//! Each handler reads/writes via `StateStore` or one of the
//! subsystem collaborators and returns JSON responses. Deployment
//! pipelines run on spawned tasks, never on the handler itself.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::error;

use berth_core::{ChainNetwork, Deployment, Project};
use berth_domains::{verification_token, DomainError};
use berth_manifest::ManifestDocument;
use berth_state::DomainRole;

use crate::ApiState;

const FEED_LIMIT: usize = 100;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ── Projects ───────────────────────────────────────────────────

/// Project registration body.
#[derive(serde::Deserialize)]
pub struct CreateProjectRequest {
    pub id: String,
    pub name: String,
    pub network: ChainNetwork,
    #[serde(default)]
    pub funding_required: bool,
    #[serde(default)]
    pub funding_key: Option<String>,
}

/// POST /api/v1/projects
pub async fn create_project(
    State(state): State<ApiState>,
    Json(req): Json<CreateProjectRequest>,
) -> impl IntoResponse {
    match state.store.get_project(&req.id) {
        Ok(Some(_)) => {
            return error_response("project already exists", StatusCode::CONFLICT).into_response()
        }
        Ok(None) => {}
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response()
        }
    }

    let mut project = Project::new(req.id, req.name, req.network);
    project.funding_required = req.funding_required;
    project.funding_key = req.funding_key;
    project.created_at = epoch_secs();

    match state.store.put_project(&project) {
        Ok(()) => (StatusCode::CREATED, ApiResponse::ok(project)).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/projects
pub async fn list_projects(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_projects() {
        Ok(projects) => ApiResponse::ok(projects).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/projects/{id}
pub async fn get_project(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_project(&id) {
        Ok(Some(project)) => ApiResponse::ok(project).into_response(),
        Ok(None) => error_response("project not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// DELETE /api/v1/projects/{id}
pub async fn delete_project(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.manager.remove_project(&id).await {
        Ok(true) => ApiResponse::ok("deleted").into_response(),
        Ok(false) => error_response("project not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Deployments ────────────────────────────────────────────────

/// Deployment submission body. The artifact is referenced by the
/// storage path the upload landed at.
#[derive(serde::Deserialize)]
pub struct SubmitDeploymentRequest {
    pub manifest: ManifestDocument,
    pub artifact_path: String,
    pub creator: String,
    #[serde(default)]
    pub service: Option<String>,
}

/// POST /api/v1/projects/{id}/deployments
///
/// Registers the deployment and kicks the pipeline off in the
/// background; poll the deployment for progress.
pub async fn submit_deployment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<SubmitDeploymentRequest>,
) -> impl IntoResponse {
    match state.store.get_project(&id) {
        Ok(Some(_)) => {}
        Ok(None) => return error_response("project not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response()
        }
    }

    let deployment = Deployment::new(id, req.creator, req.artifact_path, req.service, epoch_secs());
    if let Err(e) = state.store.put_deployment(&deployment) {
        return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response();
    }

    let manager = state.manager.clone();
    let manifest = req.manifest;
    let spawned = deployment.clone();
    tokio::spawn(async move {
        if let Err(e) = manager.deploy(&spawned, &manifest).await {
            // Failure is already recorded on the deployment and in the
            // audit feeds.
            error!(deployment = %spawned.id, error = %e, "deployment pipeline failed");
        }
    });

    (StatusCode::ACCEPTED, ApiResponse::ok(deployment)).into_response()
}

/// GET /api/v1/projects/{id}/deployments
pub async fn list_deployments(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.list_deployments_for_project(&id) {
        Ok(deployments) => ApiResponse::ok(deployments).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/projects/{id}/deployments/{did}
pub async fn get_deployment(
    State(state): State<ApiState>,
    Path((id, did)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.store.get_deployment(&id, &did) {
        Ok(Some(deployment)) => ApiResponse::ok(deployment).into_response(),
        Ok(None) => error_response("deployment not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/projects/{id}/deployments/{did}/audit
pub async fn deployment_audit(
    State(state): State<ApiState>,
    Path((_id, did)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.store.list_audit(&did, FEED_LIMIT) {
        Ok(events) => ApiResponse::ok(events).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Billing ────────────────────────────────────────────────────

/// Payment credit body.
#[derive(serde::Deserialize)]
pub struct CreditRequest {
    pub amount_sats: u64,
    #[serde(default = "default_credit_reason")]
    pub reason: String,
}

fn default_credit_reason() -> String {
    "payment".to_string()
}

/// POST /api/v1/projects/{id}/credit
pub async fn credit_project(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<CreditRequest>,
) -> impl IntoResponse {
    match state.billing.credit(&id, req.amount_sats, &req.reason).await {
        Ok(change) => ApiResponse::ok(serde_json::json!({
            "balance_sats": change.entry.balance_after,
            "restored": change.crossed_out_of_arrears(),
        }))
        .into_response(),
        Err(berth_billing::BillingError::State(berth_state::StateError::NotFound(_))) => {
            error_response("project not found", StatusCode::NOT_FOUND).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/projects/{id}/ledger
pub async fn list_ledger(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.list_ledger(&id, FEED_LIMIT) {
        Ok(entries) => ApiResponse::ok(entries).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/projects/{id}/audit
pub async fn project_audit(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.list_audit(&id, FEED_LIMIT) {
        Ok(events) => ApiResponse::ok(events).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Domains ────────────────────────────────────────────────────

fn parse_role(role: &str) -> Option<DomainRole> {
    match role {
        "frontend" => Some(DomainRole::Frontend),
        "agent" => Some(DomainRole::Agent),
        _ => None,
    }
}

/// GET /api/v1/projects/{id}/domains
pub async fn list_domains(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.list_domains_for_project(&id) {
        Ok(records) => ApiResponse::ok(records).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/projects/{id}/domains/{role}/token
pub async fn domain_token(
    State(state): State<ApiState>,
    Path((id, role)): Path<(String, String)>,
) -> impl IntoResponse {
    let Some(role) = parse_role(&role) else {
        return error_response("role must be frontend or agent", StatusCode::BAD_REQUEST)
            .into_response();
    };
    match state.store.get_project(&id) {
        Ok(Some(_)) => ApiResponse::ok(serde_json::json!({
            "record": format!("{}.{{hostname}}", berth_domains::VERIFICATION_SUBDOMAIN),
            "token": verification_token(&id, role),
        }))
        .into_response(),
        Ok(None) => error_response("project not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// Domain verification body.
#[derive(serde::Deserialize)]
pub struct VerifyDomainRequest {
    pub hostname: String,
    pub role: String,
}

/// POST /api/v1/projects/{id}/domains/verify
pub async fn verify_domain(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<VerifyDomainRequest>,
) -> impl IntoResponse {
    let Some(role) = parse_role(&req.role) else {
        return error_response("role must be frontend or agent", StatusCode::BAD_REQUEST)
            .into_response();
    };
    match state.verifier.verify(&id, &req.hostname, role).await {
        Ok(record) => ApiResponse::ok(record).into_response(),
        Err(e @ DomainError::InvalidHostname(_)) => {
            error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response()
        }
        Err(e @ DomainError::Lookup { .. }) => {
            error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE).into_response()
        }
        Err(DomainError::State(berth_state::StateError::NotFound(_))) => {
            error_response("project not found", StatusCode::NOT_FOUND).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}
