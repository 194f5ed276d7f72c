//! 存储接口
//!
//! 导入批次/报表行/规则由 [`ReconStore`] 持久化; 发票库与公司主数据是外部协作方,
//! 只通过 [`InvoiceStore`] 与 [`CompanyStore`] 读取。

use async_trait::async_trait;

use crate::error::ReconError;
use crate::models::{
    ExternalRecord, Import, ImportStatus, ImportTotals, Invoice, InvoiceFilter, MatchCounts, MatchOutcome,
    MatchStatus, MatchingRule, NewImport, NewMatchingRule, RecordAction, RecordDraft, RecordFilter,
};

#[async_trait]
pub trait ReconStore: Send + Sync {
    /// 去重闸门: 同一 (公司, 期间, 哈希) 下不存在未失败的批次时才插入, 否则返回 None
    async fn insert_import_if_absent(&self, new: NewImport) -> Result<Option<Import>, ReconError>;

    async fn get_import(&self, id: i64) -> Result<Option<Import>, ReconError>;

    /// 指定期间最新的批次; `status` 为 None 时不限状态
    async fn latest_import_for_period(
        &self,
        company_id: i64,
        period: &str,
        status: Option<ImportStatus>,
    ) -> Result<Option<Import>, ReconError>;

    async fn find_import_by_hash(
        &self,
        company_id: i64,
        period: &str,
        content_hash: &str,
    ) -> Result<Option<Import>, ReconError>;

    async fn list_imports(
        &self,
        company_id: i64,
        status: Option<ImportStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Import>, i64), ReconError>;

    /// pending -> processing; 状态不符时返回 None
    async fn mark_import_processing(&self, id: i64) -> Result<Option<Import>, ReconError>;

    async fn complete_import(&self, id: i64, totals: &ImportTotals) -> Result<Option<Import>, ReconError>;

    /// 标记失败并清除已写入的报表行, 失败批次不保留部分数据
    async fn fail_import(&self, id: i64, message: &str) -> Result<Option<Import>, ReconError>;

    /// 刷新汇总字段 (已完成批次唯一允许修改的部分)
    async fn update_import_counts(&self, id: i64, counts: &MatchCounts) -> Result<Option<Import>, ReconError>;

    /// 删除批次及其全部报表行
    async fn delete_import(&self, id: i64) -> Result<bool, ReconError>;

    async fn insert_records(&self, import_id: i64, drafts: &[RecordDraft]) -> Result<u64, ReconError>;

    async fn get_record(&self, id: i64) -> Result<Option<ExternalRecord>, ReconError>;

    async fn list_records(
        &self,
        import_id: i64,
        filter: &RecordFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ExternalRecord>, i64), ReconError>;

    /// 批次下全部报表行, 按 id 升序
    async fn records_for_import(&self, import_id: i64) -> Result<Vec<ExternalRecord>, ReconError>;

    /// 写回匹配结果; `expected` 为 Some 时仅当当前状态一致才写入, 否则返回 false
    async fn update_match(
        &self,
        record_id: i64,
        outcome: &MatchOutcome,
        expected: Option<MatchStatus>,
    ) -> Result<bool, ReconError>;

    async fn update_action(&self, record_id: i64, action: &RecordAction) -> Result<bool, ReconError>;

    async fn count_match_statuses(&self, import_id: i64) -> Result<MatchCounts, ReconError>;

    /// 启用的规则, 按 priority 升序
    async fn list_active_rules(&self, company_id: i64) -> Result<Vec<MatchingRule>, ReconError>;

    async fn list_rules(&self, company_id: i64) -> Result<Vec<MatchingRule>, ReconError>;

    async fn insert_rule(&self, company_id: i64, rule: NewMatchingRule) -> Result<MatchingRule, ReconError>;
}

/// 外部发票库
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn query_invoices(&self, company_id: i64, filter: &InvoiceFilter) -> Result<Vec<Invoice>, ReconError>;

    async fn get_invoice(&self, company_id: i64, invoice_id: i64) -> Result<Option<Invoice>, ReconError>;
}

/// 外部公司主数据: 解析公司自身的税号用于报文抬头校验
#[async_trait]
pub trait CompanyStore: Send + Sync {
    /// 公司不存在时返回 None
    async fn company_gstin(&self, company_id: i64) -> Result<Option<String>, ReconError>;
}
