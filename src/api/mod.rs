pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;

use crate::service::{ActionService, ReconciliationService};

pub use handlers::{health_check, ApiResponse};

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub recon: Arc<ReconciliationService>,
    pub actions: Arc<ActionService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/companies/:company_id/imports",
            post(handlers::import_document).get(handlers::list_imports),
        )
        .route(
            "/api/companies/:company_id/periods/:period/import",
            get(handlers::get_import_for_period),
        )
        .route(
            "/api/companies/:company_id/periods/:period/summary",
            get(handlers::period_summary),
        )
        .route(
            "/api/companies/:company_id/periods/:period/suppliers",
            get(handlers::supplier_summary),
        )
        .route("/api/companies/:company_id/periods/:period/itc", get(handlers::itc_comparison))
        .route(
            "/api/companies/:company_id/periods/:period/unmatched",
            get(handlers::unmatched_records),
        )
        .route(
            "/api/companies/:company_id/rules",
            get(handlers::list_rules).post(handlers::create_rule),
        )
        .route(
            "/api/imports/:id",
            get(handlers::get_import).delete(handlers::delete_import),
        )
        .route("/api/imports/:id/reconcile", post(handlers::run_reconciliation))
        .route("/api/imports/:id/records", get(handlers::list_records))
        .route("/api/imports/:id/export.csv", get(handlers::export_records))
        .route("/api/records/:id/accept", post(handlers::accept_record))
        .route("/api/records/:id/reject", post(handlers::reject_record))
        .route("/api/records/:id/manual-match", post(handlers::manual_match))
        .route("/api/records/:id/reset", post(handlers::reset_record))
        .with_state(state)
        .layer(ServiceBuilder::new())
}
