//! berth-api — REST surface of a Berth hosting node.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/projects` | List tenant projects |
//! | POST | `/api/v1/projects` | Register a project |
//! | GET | `/api/v1/projects/{id}` | Get project details |
//! | DELETE | `/api/v1/projects/{id}` | Remove a project and its namespace |
//! | POST | `/api/v1/projects/{id}/deployments` | Submit a deployment |
//! | GET | `/api/v1/projects/{id}/deployments` | List deployments |
//! | GET | `/api/v1/projects/{id}/deployments/{did}` | Get a deployment |
//! | GET | `/api/v1/projects/{id}/deployments/{did}/audit` | Deployment audit feed |
//! | POST | `/api/v1/projects/{id}/credit` | Credit a payment |
//! | GET | `/api/v1/projects/{id}/ledger` | Ledger entries |
//! | GET | `/api/v1/projects/{id}/audit` | Project audit feed |
//! | GET | `/api/v1/projects/{id}/domains` | Domain verification records |
//! | GET | `/api/v1/projects/{id}/domains/{role}/token` | Challenge token |
//! | POST | `/api/v1/projects/{id}/domains/verify` | Run a TXT challenge |

pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use berth_billing::BillingGate;
use berth_domains::DomainVerifier;
use berth_release::ReleaseManager;
use berth_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub manager: Arc<ReleaseManager>,
    pub billing: Arc<BillingGate>,
    pub verifier: Arc<DomainVerifier>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/projects", get(handlers::list_projects).post(handlers::create_project))
        .route("/projects/{id}", get(handlers::get_project).delete(handlers::delete_project))
        .route(
            "/projects/{id}/deployments",
            get(handlers::list_deployments).post(handlers::submit_deployment),
        )
        .route("/projects/{id}/deployments/{did}", get(handlers::get_deployment))
        .route(
            "/projects/{id}/deployments/{did}/audit",
            get(handlers::deployment_audit),
        )
        .route("/projects/{id}/credit", post(handlers::credit_project))
        .route("/projects/{id}/ledger", get(handlers::list_ledger))
        .route("/projects/{id}/audit", get(handlers::project_audit))
        .route("/projects/{id}/domains", get(handlers::list_domains))
        .route("/projects/{id}/domains/{role}/token", get(handlers::domain_token))
        .route("/projects/{id}/domains/verify", post(handlers::verify_domain))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
