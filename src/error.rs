//! 对账引擎错误类型
//!
//! 预期内的失败 (校验、冲突、不存在) 以结构化结果返回, 只有意外故障才是 Internal/Database

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconError {
    /// 报文格式错误、缺少必填字段等
    #[error("Validation failed: {0}")]
    Validation(String),

    /// 重复导入、已定稿状态被再次修改
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ReconError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ReconError::Validation(_) => StatusCode::BAD_REQUEST,
            ReconError::Conflict(_) => StatusCode::CONFLICT,
            ReconError::NotFound(_) => StatusCode::NOT_FOUND,
            ReconError::Internal(_) | ReconError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// 单条记录评估失败; 只影响该记录, 不中断整批
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    #[error("candidate invoice {invoice_id} has no {field}")]
    MalformedCandidate { invoice_id: i64, field: &'static str },
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
}

impl IntoResponse for ReconError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            ReconError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal reconciliation error");
                "An internal error occurred".to_string()
            }
            ReconError::Database(err) => {
                tracing::error!(error = %err, "Database error");
                "A database error occurred".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorBody { success: false, message })).into_response()
    }
}
