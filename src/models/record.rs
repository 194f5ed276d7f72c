use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use crate::error::ReconError;

/// 报表行的单据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Invoice,
    CreditNote,
    DebitNote,
    ImportEntry,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "invoice",
            DocumentType::CreditNote => "credit_note",
            DocumentType::DebitNote => "debit_note",
            DocumentType::ImportEntry => "import_entry",
        }
    }

    /// 贷项通知单冲减进项税额
    pub fn is_credit(&self) -> bool {
        matches!(self, DocumentType::CreditNote)
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "invoice" => Ok(DocumentType::Invoice),
            "credit_note" => Ok(DocumentType::CreditNote),
            "debit_note" => Ok(DocumentType::DebitNote),
            "import_entry" => Ok(DocumentType::ImportEntry),
            other => Err(ReconError::Validation(format!("unknown document type '{other}'"))),
        }
    }
}

/// 自动匹配状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    Matched,
    PartialMatch,
    Unmatched,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Pending => "pending",
            MatchStatus::Matched => "matched",
            MatchStatus::PartialMatch => "partial_match",
            MatchStatus::Unmatched => "unmatched",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStatus {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(MatchStatus::Pending),
            "matched" => Ok(MatchStatus::Matched),
            "partial_match" => Ok(MatchStatus::PartialMatch),
            "unmatched" => Ok(MatchStatus::Unmatched),
            other => Err(ReconError::Validation(format!("unknown match status '{other}'"))),
        }
    }
}

/// 人工处理状态, 与匹配状态相互独立
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Accepted,
    Rejected,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Accepted => "accepted",
            ActionStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 解析后、入库前的统一报表行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDraft {
    pub supplier_gstin: String,
    pub supplier_name: Option<String>,
    pub document_number: String,
    pub document_date: NaiveDate,
    pub document_type: DocumentType,
    pub taxable_value: BigDecimal,
    pub igst: BigDecimal,
    pub cgst: BigDecimal,
    pub sgst: BigDecimal,
    pub cess: BigDecimal,
    pub place_of_supply: Option<String>,
    pub reverse_charge: bool,
    pub itc_eligible: bool,
    pub itc_igst: BigDecimal,
    pub itc_cgst: BigDecimal,
    pub itc_sgst: BigDecimal,
    pub itc_cess: BigDecimal,
}

impl RecordDraft {
    /// 三项辖区税额合计 (IGST + CGST + SGST)
    pub fn tax_total(&self) -> BigDecimal {
        &self.igst + &self.cgst + &self.sgst
    }

    pub fn itc_total(&self) -> BigDecimal {
        &self.itc_igst + &self.itc_cgst + &self.itc_sgst + &self.itc_cess
    }
}

/// 已落库的外部报表行
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExternalRecord {
    pub id: i64,
    pub import_id: i64,
    pub supplier_gstin: String,
    pub supplier_name: Option<String>,
    pub document_number: String,
    pub document_date: NaiveDate,
    pub document_type: DocumentType,
    pub taxable_value: BigDecimal,
    pub igst: BigDecimal,
    pub cgst: BigDecimal,
    pub sgst: BigDecimal,
    pub cess: BigDecimal,
    pub place_of_supply: Option<String>,
    pub reverse_charge: bool,
    pub itc_eligible: bool,
    pub itc_igst: BigDecimal,
    pub itc_cgst: BigDecimal,
    pub itc_sgst: BigDecimal,
    pub itc_cess: BigDecimal,
    pub match_status: MatchStatus,
    pub matched_invoice_id: Option<i64>,
    pub matched_rule_id: Option<i64>,
    pub confidence: i32,
    pub discrepancies: Vec<String>,
    pub matched_at: Option<DateTime<Utc>>,
    pub action_status: Option<ActionStatus>,
    pub action_by: Option<String>,
    pub action_notes: Option<String>,
    pub action_at: Option<DateTime<Utc>>,
}

impl ExternalRecord {
    pub fn from_draft(id: i64, import_id: i64, draft: RecordDraft) -> Self {
        Self {
            id,
            import_id,
            supplier_gstin: draft.supplier_gstin,
            supplier_name: draft.supplier_name,
            document_number: draft.document_number,
            document_date: draft.document_date,
            document_type: draft.document_type,
            taxable_value: draft.taxable_value,
            igst: draft.igst,
            cgst: draft.cgst,
            sgst: draft.sgst,
            cess: draft.cess,
            place_of_supply: draft.place_of_supply,
            reverse_charge: draft.reverse_charge,
            itc_eligible: draft.itc_eligible,
            itc_igst: draft.itc_igst,
            itc_cgst: draft.itc_cgst,
            itc_sgst: draft.itc_sgst,
            itc_cess: draft.itc_cess,
            match_status: MatchStatus::Pending,
            matched_invoice_id: None,
            matched_rule_id: None,
            confidence: 0,
            discrepancies: Vec::new(),
            matched_at: None,
            action_status: None,
            action_by: None,
            action_notes: None,
            action_at: None,
        }
    }

    pub fn tax_total(&self) -> BigDecimal {
        &self.igst + &self.cgst + &self.sgst
    }

    pub fn itc_total(&self) -> BigDecimal {
        &self.itc_igst + &self.itc_cgst + &self.itc_sgst + &self.itc_cess
    }

    pub fn apply_outcome(&mut self, outcome: &MatchOutcome) {
        self.match_status = outcome.status;
        self.matched_invoice_id = outcome.matched_invoice_id;
        self.matched_rule_id = outcome.matched_rule_id;
        self.confidence = outcome.confidence;
        self.discrepancies = outcome.discrepancies.clone();
        self.matched_at = outcome.matched_at;
    }

    pub fn apply_action(&mut self, action: &RecordAction) {
        self.action_status = action.status;
        self.action_by = action.actor.clone();
        self.action_notes = action.notes.clone();
        self.action_at = action.at;
    }
}

/// 写回记录的匹配结果
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub status: MatchStatus,
    pub matched_invoice_id: Option<i64>,
    pub matched_rule_id: Option<i64>,
    pub confidence: i32,
    pub discrepancies: Vec<String>,
    pub matched_at: Option<DateTime<Utc>>,
}

/// 写回记录的人工处理; 全部为 None 表示清空
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordAction {
    pub status: Option<ActionStatus>,
    pub actor: Option<String>,
    pub notes: Option<String>,
    pub at: Option<DateTime<Utc>>,
}

impl RecordAction {
    pub fn set(status: ActionStatus, actor: &str, notes: Option<String>) -> Self {
        Self {
            status: Some(status),
            actor: Some(actor.to_string()),
            notes,
            at: Some(Utc::now()),
        }
    }

    pub fn cleared() -> Self {
        Self::default()
    }
}

/// 记录分页查询过滤条件
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordFilter {
    pub match_status: Option<MatchStatus>,
    pub document_type: Option<DocumentType>,
    pub search: Option<String>,
}

impl RecordFilter {
    /// 内存实现与 SQL 实现共用的匹配逻辑
    pub fn accepts(&self, record: &ExternalRecord) -> bool {
        if let Some(status) = self.match_status {
            if record.match_status != status {
                return false;
            }
        }
        if let Some(doc_type) = self.document_type {
            if record.document_type != doc_type {
                return false;
            }
        }
        match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => {
                let term = term.to_lowercase();
                record.supplier_gstin.to_lowercase().contains(&term)
                    || record.document_number.to_lowercase().contains(&term)
                    || record
                        .supplier_name
                        .as_deref()
                        .is_some_and(|name| name.to_lowercase().contains(&term))
            }
            _ => true,
        }
    }
}
