#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tax_itc_recon::config::ReconSettings;
use tax_itc_recon::db::{MemoryStore, ReconStore};
use tax_itc_recon::models::{
    ExternalRecord, Import, ImportStatus, ImportSummary, ImportTotals, Invoice, MatchCounts, MatchOutcome,
    MatchStatus, MatchingRule, NewImport, NewMatchingRule, RecordAction, RecordDraft, RecordFilter,
};
use tax_itc_recon::service::GstStateTable;
use tax_itc_recon::{ActionService, ReconError, ReconciliationService};

pub const COMPANY: i64 = 1;
pub const COMPANY_GSTIN: &str = "29AABCU9603R1ZJ";
pub const PERIOD: &str = "052024";
pub const SUPPLIER_MH: &str = "27AAACR5055K1Z7";
pub const SUPPLIER_KA: &str = "29AAAAA0000A1Z5";

pub struct Harness {
    pub store: Arc<MemoryStore>,
    /// 服务实际使用的 ReconStore, 可注入故障
    pub faults: Arc<FaultyStore>,
    pub recon: ReconciliationService,
    pub actions: ActionService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(ReconSettings {
            match_workers: 2,
            insert_batch_size: 2,
            ..ReconSettings::default()
        })
    }

    pub fn with_settings(settings: ReconSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        store.add_company(COMPANY, COMPANY_GSTIN);
        let faults = Arc::new(FaultyStore::new(store.clone()));
        let recon = ReconciliationService::new(
            faults.clone(),
            store.clone(),
            store.clone(),
            Arc::new(GstStateTable::new()),
            settings,
        )
        .unwrap();
        let actions = ActionService::new(faults.clone(), store.clone());
        Self {
            store,
            faults,
            recon,
            actions,
        }
    }

    pub async fn import(&self, payload: &[u8]) -> ImportSummary {
        self.recon
            .import_document(COMPANY, PERIOD, payload, Some("gstr2b.json".into()), "tester")
            .await
            .unwrap()
    }
}

pub fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// 账簿发票, 仅 IGST
pub fn invoice(id: i64, supplier: &str, number: &str, taxable: &str, igst: &str, on: &str) -> Invoice {
    Invoice {
        id,
        company_id: COMPANY,
        supplier_gstin: Some(supplier.to_string()),
        supplier_name: None,
        invoice_number: Some(number.to_string()),
        invoice_date: Some(date(on)),
        taxable_value: dec(taxable),
        igst: dec(igst),
        cgst: BigDecimal::zero(),
        sgst: BigDecimal::zero(),
        cess: BigDecimal::zero(),
    }
}

/// 报表发票行: (单据号, DD-MM-YYYY, 应税额, IGST)
pub fn inv(number: &str, on: &str, taxable: &str, igst: &str) -> Value {
    json!({ "inum": number, "dt": on, "txval": taxable, "igst": igst })
}

pub fn supplier(gstin: &str, name: &str, invoices: Vec<Value>) -> Value {
    json!({ "ctin": gstin, "trdnm": name, "inv": invoices })
}

pub fn document(b2b: Vec<Value>, cdnr: Vec<Value>) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "data": {
            "gstin": COMPANY_GSTIN,
            "rtnprd": PERIOD,
            "docdata": { "b2b": b2b, "cdnr": cdnr }
        }
    }))
    .unwrap()
}

pub fn rule(name: &str, priority: i32, threshold: i32, abs: Option<&str>, days: i32, confidence: i32) -> NewMatchingRule {
    NewMatchingRule {
        name: name.to_string(),
        priority,
        match_document_number: true,
        match_amount: true,
        match_date: true,
        fuzzy_threshold: threshold,
        amount_tolerance_pct: None,
        amount_tolerance_abs: abs.map(dec),
        date_tolerance_days: days,
        confidence_score: confidence,
        is_active: true,
    }
}

fn outage() -> ReconError {
    ReconError::Database(sqlx::Error::PoolTimedOut)
}

/// 包装 MemoryStore, 按开关注入存储故障或并发修改
pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    pub fail_mark_processing: AtomicBool,
    pub fail_mark_failed: AtomicBool,
    /// 第 N 次 (从 1 计) 批量写入返回错误, 0 表示不出错
    pub fail_insert_on_call: AtomicUsize,
    insert_calls: AtomicUsize,
    /// 加载规则时 (记录已读取之后) 对该记录执行的人工匹配
    pub manual_match_on_rule_load: Mutex<Option<(i64, MatchOutcome, RecordAction)>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_mark_processing: AtomicBool::new(false),
            fail_mark_failed: AtomicBool::new(false),
            fail_insert_on_call: AtomicUsize::new(0),
            insert_calls: AtomicUsize::new(0),
            manual_match_on_rule_load: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ReconStore for FaultyStore {
    async fn insert_import_if_absent(&self, new: NewImport) -> Result<Option<Import>, ReconError> {
        self.inner.insert_import_if_absent(new).await
    }

    async fn get_import(&self, id: i64) -> Result<Option<Import>, ReconError> {
        self.inner.get_import(id).await
    }

    async fn latest_import_for_period(
        &self,
        company_id: i64,
        period: &str,
        status: Option<ImportStatus>,
    ) -> Result<Option<Import>, ReconError> {
        self.inner.latest_import_for_period(company_id, period, status).await
    }

    async fn find_import_by_hash(
        &self,
        company_id: i64,
        period: &str,
        content_hash: &str,
    ) -> Result<Option<Import>, ReconError> {
        self.inner.find_import_by_hash(company_id, period, content_hash).await
    }

    async fn list_imports(
        &self,
        company_id: i64,
        status: Option<ImportStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Import>, i64), ReconError> {
        self.inner.list_imports(company_id, status, limit, offset).await
    }

    async fn mark_import_processing(&self, id: i64) -> Result<Option<Import>, ReconError> {
        if self.fail_mark_processing.load(Ordering::SeqCst) {
            return Err(outage());
        }
        self.inner.mark_import_processing(id).await
    }

    async fn complete_import(&self, id: i64, totals: &ImportTotals) -> Result<Option<Import>, ReconError> {
        self.inner.complete_import(id, totals).await
    }

    async fn fail_import(&self, id: i64, message: &str) -> Result<Option<Import>, ReconError> {
        if self.fail_mark_failed.load(Ordering::SeqCst) {
            return Err(outage());
        }
        self.inner.fail_import(id, message).await
    }

    async fn update_import_counts(&self, id: i64, counts: &MatchCounts) -> Result<Option<Import>, ReconError> {
        self.inner.update_import_counts(id, counts).await
    }

    async fn delete_import(&self, id: i64) -> Result<bool, ReconError> {
        self.inner.delete_import(id).await
    }

    async fn insert_records(&self, import_id: i64, drafts: &[RecordDraft]) -> Result<u64, ReconError> {
        let call = self.insert_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_insert_on_call.load(Ordering::SeqCst) {
            return Err(outage());
        }
        self.inner.insert_records(import_id, drafts).await
    }

    async fn get_record(&self, id: i64) -> Result<Option<ExternalRecord>, ReconError> {
        self.inner.get_record(id).await
    }

    async fn list_records(
        &self,
        import_id: i64,
        filter: &RecordFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ExternalRecord>, i64), ReconError> {
        self.inner.list_records(import_id, filter, limit, offset).await
    }

    async fn records_for_import(&self, import_id: i64) -> Result<Vec<ExternalRecord>, ReconError> {
        self.inner.records_for_import(import_id).await
    }

    async fn update_match(
        &self,
        record_id: i64,
        outcome: &MatchOutcome,
        expected: Option<MatchStatus>,
    ) -> Result<bool, ReconError> {
        self.inner.update_match(record_id, outcome, expected).await
    }

    async fn update_action(&self, record_id: i64, action: &RecordAction) -> Result<bool, ReconError> {
        self.inner.update_action(record_id, action).await
    }

    async fn count_match_statuses(&self, import_id: i64) -> Result<MatchCounts, ReconError> {
        self.inner.count_match_statuses(import_id).await
    }

    async fn list_active_rules(&self, company_id: i64) -> Result<Vec<MatchingRule>, ReconError> {
        let pending = self.manual_match_on_rule_load.lock().unwrap().take();
        if let Some((record_id, outcome, action)) = pending {
            self.inner.update_match(record_id, &outcome, None).await?;
            self.inner.update_action(record_id, &action).await?;
        }
        self.inner.list_active_rules(company_id).await
    }

    async fn list_rules(&self, company_id: i64) -> Result<Vec<MatchingRule>, ReconError> {
        self.inner.list_rules(company_id).await
    }

    async fn insert_rule(&self, company_id: i64, rule: NewMatchingRule) -> Result<MatchingRule, ReconError> {
        self.inner.insert_rule(company_id, rule).await
    }
}
