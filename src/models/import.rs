use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use crate::error::ReconError;

/// 导入批次状态: pending -> processing -> completed | failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Processing => "processing",
            ImportStatus::Completed => "completed",
            ImportStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportStatus {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(ImportStatus::Pending),
            "processing" => Ok(ImportStatus::Processing),
            "completed" => Ok(ImportStatus::Completed),
            "failed" => Ok(ImportStatus::Failed),
            other => Err(ReconError::Validation(format!("unknown import status '{other}'"))),
        }
    }
}

/// 导入批次 (每个 公司/期间/文件 一条)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Import {
    pub id: i64,
    pub company_id: i64,
    pub period: String,
    pub gstin: Option<String>,
    pub file_name: Option<String>,
    pub content_hash: String,
    pub status: ImportStatus,
    pub total_records: i32,
    pub matched_count: i32,
    pub partial_count: i32,
    pub unmatched_count: i32,
    pub b2b_count: i32,
    pub cdn_count: i32,
    pub impg_count: i32,
    pub total_taxable_value: BigDecimal,
    pub total_igst: BigDecimal,
    pub total_cgst: BigDecimal,
    pub total_sgst: BigDecimal,
    pub total_cess: BigDecimal,
    pub itc_available: BigDecimal,
    pub error_message: Option<String>,
    pub imported_by: String,
    /// 原始报文副本 (审计/重放)
    pub raw_document: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub reconciled_at: Option<DateTime<Utc>>,
}

/// 新建导入批次 (去重闸门的输入)
#[derive(Debug, Clone)]
pub struct NewImport {
    pub company_id: i64,
    pub period: String,
    pub file_name: Option<String>,
    pub content_hash: String,
    pub imported_by: String,
    pub raw_document: serde_json::Value,
}

/// 解析完成后写入批次的汇总
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportTotals {
    pub gstin: Option<String>,
    pub total_records: i32,
    pub b2b_count: i32,
    pub cdn_count: i32,
    pub impg_count: i32,
    pub total_taxable_value: BigDecimal,
    pub total_igst: BigDecimal,
    pub total_cgst: BigDecimal,
    pub total_sgst: BigDecimal,
    pub total_cess: BigDecimal,
    pub itc_available: BigDecimal,
}

/// 按匹配状态计数 (从已落库状态重新统计)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCounts {
    pub total: i32,
    pub pending: i32,
    pub matched: i32,
    pub partial: i32,
    pub unmatched: i32,
}

/// 对外返回的批次视图 (不含原始报文)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSummary {
    pub id: i64,
    pub company_id: i64,
    pub period: String,
    pub gstin: Option<String>,
    pub file_name: Option<String>,
    pub content_hash: String,
    pub status: ImportStatus,
    pub total_records: i32,
    pub matched_count: i32,
    pub partial_count: i32,
    pub unmatched_count: i32,
    pub b2b_count: i32,
    pub cdn_count: i32,
    pub impg_count: i32,
    pub total_taxable_value: BigDecimal,
    pub total_igst: BigDecimal,
    pub total_cgst: BigDecimal,
    pub total_sgst: BigDecimal,
    pub total_cess: BigDecimal,
    pub itc_available: BigDecimal,
    pub error_message: Option<String>,
    pub imported_by: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub reconciled_at: Option<DateTime<Utc>>,
}

impl From<Import> for ImportSummary {
    fn from(import: Import) -> Self {
        Self {
            id: import.id,
            company_id: import.company_id,
            period: import.period,
            gstin: import.gstin,
            file_name: import.file_name,
            content_hash: import.content_hash,
            status: import.status,
            total_records: import.total_records,
            matched_count: import.matched_count,
            partial_count: import.partial_count,
            unmatched_count: import.unmatched_count,
            b2b_count: import.b2b_count,
            cdn_count: import.cdn_count,
            impg_count: import.impg_count,
            total_taxable_value: import.total_taxable_value,
            total_igst: import.total_igst,
            total_cgst: import.total_cgst,
            total_sgst: import.total_sgst,
            total_cess: import.total_cess,
            itc_available: import.itc_available,
            error_message: import.error_message,
            imported_by: import.imported_by,
            created_at: import.created_at,
            completed_at: import.completed_at,
            reconciled_at: import.reconciled_at,
        }
    }
}

impl Import {
    /// 以 Pending 状态构造 (内存存储使用, Postgres 由列默认值完成)
    pub fn pending(id: i64, new: NewImport) -> Self {
        Self {
            id,
            company_id: new.company_id,
            period: new.period,
            gstin: None,
            file_name: new.file_name,
            content_hash: new.content_hash,
            status: ImportStatus::Pending,
            total_records: 0,
            matched_count: 0,
            partial_count: 0,
            unmatched_count: 0,
            b2b_count: 0,
            cdn_count: 0,
            impg_count: 0,
            total_taxable_value: BigDecimal::zero(),
            total_igst: BigDecimal::zero(),
            total_cgst: BigDecimal::zero(),
            total_sgst: BigDecimal::zero(),
            total_cess: BigDecimal::zero(),
            itc_available: BigDecimal::zero(),
            error_message: None,
            imported_by: new.imported_by,
            raw_document: new.raw_document,
            created_at: Utc::now(),
            completed_at: None,
            reconciled_at: None,
        }
    }
}
