use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

/// 一次对账运行的统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub import_id: i64,
    pub evaluated: usize,
    pub skipped: usize,
    /// 评估出错 (候选数据异常) 并被标记为未匹配的记录数
    pub errored: usize,
    pub matched: i32,
    pub partial: i32,
    pub unmatched: i32,
    pub pending: i32,
    pub candidate_invoices: usize,
    pub duration_ms: u128,
}

/// 期间对账汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub import_id: i64,
    pub company_id: i64,
    pub period: String,
    pub total_records: i32,
    pub matched: i32,
    pub partial: i32,
    pub unmatched: i32,
    pub pending: i32,
    pub accepted: i32,
    pub rejected: i32,
    /// (完全匹配 + 部分匹配) / 总数 * 100
    pub match_rate: f64,
    pub total_taxable_value: BigDecimal,
    pub total_tax: BigDecimal,
    pub itc_available: BigDecimal,
    pub itc_matched: BigDecimal,
    pub itc_at_risk: BigDecimal,
}

/// 按供应商汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierSummary {
    pub supplier_gstin: String,
    pub supplier_name: Option<String>,
    pub state: Option<String>,
    pub record_count: i32,
    pub matched: i32,
    pub partial: i32,
    pub unmatched: i32,
    pub pending: i32,
    pub taxable_value: BigDecimal,
    pub tax_total: BigDecimal,
    pub itc_available: BigDecimal,
}

/// 单个税种的报表/账簿对比
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItcComponentComparison {
    pub component: String,
    pub as_per_statement: BigDecimal,
    pub as_per_books: BigDecimal,
    pub difference: BigDecimal,
}

/// 进项税额对比 (报表可抵扣额 vs 账簿税额)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItcComparison {
    pub company_id: i64,
    pub period: String,
    pub components: Vec<ItcComponentComparison>,
    pub total_statement: BigDecimal,
    pub total_books: BigDecimal,
    pub total_difference: BigDecimal,
    pub statement_records: usize,
    pub book_invoices: usize,
}
