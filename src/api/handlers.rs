use axum::{
    body::Bytes,
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::ReconError;
use crate::models::{
    DocumentType, ExternalRecord, ImportStatus, ImportSummary, ItcComparison, MatchStatus, MatchingRule,
    NewMatchingRule, Page, PageRequest, PeriodSummary, ReconciliationSummary, RecordFilter, SupplierSummary,
};

/// 统一响应体
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            data: Some(data),
        })
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ReconError>;

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

// ---------------------------------------------------------------------------
// 导入
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ImportParams {
    pub period: String,
    pub file_name: Option<String>,
    pub actor: Option<String>,
}

/// 导入报表 (请求体为原始报文)
pub async fn import_document(
    State(state): State<AppState>,
    Path(company_id): Path<i64>,
    Query(params): Query<ImportParams>,
    body: Bytes,
) -> ApiResult<ImportSummary> {
    let actor = params.actor.as_deref().unwrap_or("api");
    let summary = state
        .recon
        .import_document(company_id, &params.period, &body, params.file_name, actor)
        .await?;

    let response = if summary.status == ImportStatus::Failed {
        ApiResponse {
            success: false,
            message: format!(
                "Import {} failed: {}",
                summary.id,
                summary.error_message.as_deref().unwrap_or("unknown error")
            ),
            data: Some(summary),
        }
    } else {
        ApiResponse {
            success: true,
            message: format!("Imported {} records", summary.total_records),
            data: Some(summary),
        }
    };
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct ImportListParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub status: Option<ImportStatus>,
}

pub async fn list_imports(
    State(state): State<AppState>,
    Path(company_id): Path<i64>,
    Query(params): Query<ImportListParams>,
) -> ApiResult<Page<ImportSummary>> {
    let page = page_request(params.page, params.page_size);
    let imports = state.recon.list_imports(company_id, page, params.status).await?;
    Ok(ApiResponse::ok(format!("{} imports", imports.total), imports))
}

pub async fn get_import_for_period(
    State(state): State<AppState>,
    Path((company_id, period)): Path<(i64, String)>,
) -> ApiResult<ImportSummary> {
    let import = state.recon.get_import_for_period(company_id, &period).await?;
    Ok(ApiResponse::ok("OK", import))
}

pub async fn get_import(State(state): State<AppState>, Path(import_id): Path<i64>) -> ApiResult<ImportSummary> {
    let import = state.recon.get_import(import_id).await?;
    Ok(ApiResponse::ok("OK", import))
}

pub async fn delete_import(State(state): State<AppState>, Path(import_id): Path<i64>) -> ApiResult<i64> {
    state.recon.delete_import(import_id).await?;
    Ok(ApiResponse::ok(format!("Import {import_id} deleted"), import_id))
}

// ---------------------------------------------------------------------------
// 对账
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ReconcileParams {
    #[serde(default)]
    pub force: bool,
}

pub async fn run_reconciliation(
    State(state): State<AppState>,
    Path(import_id): Path<i64>,
    Query(params): Query<ReconcileParams>,
) -> ApiResult<ReconciliationSummary> {
    let summary = state.recon.run_reconciliation(import_id, params.force).await?;
    Ok(ApiResponse::ok(
        format!(
            "Reconciled {} records: {} matched, {} partial, {} unmatched",
            summary.evaluated, summary.matched, summary.partial, summary.unmatched
        ),
        summary,
    ))
}

#[derive(Debug, Deserialize)]
pub struct RecordListParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub match_status: Option<MatchStatus>,
    pub document_type: Option<DocumentType>,
    pub search: Option<String>,
}

pub async fn list_records(
    State(state): State<AppState>,
    Path(import_id): Path<i64>,
    Query(params): Query<RecordListParams>,
) -> ApiResult<Page<ExternalRecord>> {
    let page = page_request(params.page, params.page_size);
    let filter = RecordFilter {
        match_status: params.match_status,
        document_type: params.document_type,
        search: params.search,
    };
    let records = state.recon.list_records(import_id, &filter, page).await?;
    Ok(ApiResponse::ok(format!("{} records", records.total), records))
}

/// CSV 导出
pub async fn export_records(State(state): State<AppState>, Path(import_id): Path<i64>) -> Result<Response, ReconError> {
    let mut buf = Vec::new();
    state.recon.export_records_csv(import_id, &mut buf).await?;
    let disposition = format!("attachment; filename=\"itc-import-{import_id}.csv\"");
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        buf,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// 期间汇总
// ---------------------------------------------------------------------------

pub async fn period_summary(
    State(state): State<AppState>,
    Path((company_id, period)): Path<(i64, String)>,
) -> ApiResult<PeriodSummary> {
    let summary = state.recon.get_reconciliation_summary(company_id, &period).await?;
    Ok(ApiResponse::ok("OK", summary))
}

pub async fn supplier_summary(
    State(state): State<AppState>,
    Path((company_id, period)): Path<(i64, String)>,
) -> ApiResult<Vec<SupplierSummary>> {
    let suppliers = state.recon.get_supplier_summary(company_id, &period).await?;
    Ok(ApiResponse::ok(format!("{} suppliers", suppliers.len()), suppliers))
}

pub async fn itc_comparison(
    State(state): State<AppState>,
    Path((company_id, period)): Path<(i64, String)>,
) -> ApiResult<ItcComparison> {
    let comparison = state.recon.get_itc_comparison(company_id, &period).await?;
    Ok(ApiResponse::ok("OK", comparison))
}

pub async fn unmatched_records(
    State(state): State<AppState>,
    Path((company_id, period)): Path<(i64, String)>,
) -> ApiResult<Vec<ExternalRecord>> {
    let records = state.recon.get_unmatched_records(company_id, &period).await?;
    Ok(ApiResponse::ok(format!("{} unmatched records", records.len()), records))
}

// ---------------------------------------------------------------------------
// 人工处理
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AcceptRequest {
    pub actor: String,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub actor: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ManualMatchRequest {
    pub invoice_id: i64,
    pub actor: String,
    pub notes: Option<String>,
}

pub async fn accept_record(
    State(state): State<AppState>,
    Path(record_id): Path<i64>,
    Json(req): Json<AcceptRequest>,
) -> ApiResult<ExternalRecord> {
    let record = state.actions.accept_mismatch(record_id, &req.actor, req.notes).await?;
    Ok(ApiResponse::ok("Record accepted", record))
}

pub async fn reject_record(
    State(state): State<AppState>,
    Path(record_id): Path<i64>,
    Json(req): Json<RejectRequest>,
) -> ApiResult<ExternalRecord> {
    let record = state.actions.reject_invoice(record_id, &req.actor, &req.reason).await?;
    Ok(ApiResponse::ok("Record rejected", record))
}

pub async fn manual_match(
    State(state): State<AppState>,
    Path(record_id): Path<i64>,
    Json(req): Json<ManualMatchRequest>,
) -> ApiResult<ExternalRecord> {
    let record = state
        .actions
        .manual_match(record_id, req.invoice_id, &req.actor, req.notes)
        .await?;
    Ok(ApiResponse::ok(format!("Record matched to invoice {}", req.invoice_id), record))
}

pub async fn reset_record(State(state): State<AppState>, Path(record_id): Path<i64>) -> ApiResult<ExternalRecord> {
    let record = state.actions.reset_action(record_id).await?;
    Ok(ApiResponse::ok("Action cleared", record))
}

// ---------------------------------------------------------------------------
// 规则
// ---------------------------------------------------------------------------

pub async fn list_rules(State(state): State<AppState>, Path(company_id): Path<i64>) -> ApiResult<Vec<MatchingRule>> {
    let rules = state.recon.list_rules(company_id).await?;
    Ok(ApiResponse::ok(format!("{} rules", rules.len()), rules))
}

pub async fn create_rule(
    State(state): State<AppState>,
    Path(company_id): Path<i64>,
    Json(rule): Json<NewMatchingRule>,
) -> ApiResult<MatchingRule> {
    let rule = state.recon.create_rule(company_id, rule).await?;
    Ok(ApiResponse::ok(format!("Rule {} created", rule.id), rule))
}

fn page_request(page: Option<i64>, page_size: Option<i64>) -> PageRequest {
    let defaults = PageRequest::default();
    PageRequest::new(page.unwrap_or(defaults.page), page_size.unwrap_or(defaults.page_size))
}
