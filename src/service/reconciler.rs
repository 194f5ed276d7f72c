//! 对账编排: 导入 -> 解析入库 -> 批量匹配 -> 汇总查询

use bigdecimal::{BigDecimal, Zero};
use chrono::Days;
use indexmap::IndexMap;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use super::dedup;
use super::lookup::StateCodeLookup;
use super::matcher::{CandidatePool, Matcher};
use super::parser;
use crate::config::ReconSettings;
use crate::db::{CompanyStore, InvoiceStore, ReconStore};
use crate::error::{MatchError, ReconError};
use crate::models::{
    default_rules, ActionStatus, ExternalRecord, Import, ImportStatus, ImportSummary, ImportTotals, InvoiceFilter,
    ItcComparison, ItcComponentComparison, MatchCounts, MatchOutcome, MatchResult, MatchStatus, MatchingRule,
    NewMatchingRule, Page, PageRequest, PeriodSummary, ReconciliationSummary, RecordFilter, ReturnPeriod,
    SupplierSummary,
};

pub struct ReconciliationService {
    store: Arc<dyn ReconStore>,
    invoices: Arc<dyn InvoiceStore>,
    companies: Arc<dyn CompanyStore>,
    states: Arc<dyn StateCodeLookup>,
    settings: ReconSettings,
    match_pool: Arc<rayon::ThreadPool>,
}

impl ReconciliationService {
    pub fn new(
        store: Arc<dyn ReconStore>,
        invoices: Arc<dyn InvoiceStore>,
        companies: Arc<dyn CompanyStore>,
        states: Arc<dyn StateCodeLookup>,
        settings: ReconSettings,
    ) -> Result<Self, ReconError> {
        let match_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.match_workers.max(1))
            .thread_name(|i| format!("recon-match-{i}"))
            .build()
            .map_err(|e| ReconError::Internal(format!("failed to build matching pool: {e}")))?;

        Ok(Self {
            store,
            invoices,
            companies,
            states,
            settings,
            match_pool: Arc::new(match_pool),
        })
    }

    pub fn settings(&self) -> &ReconSettings {
        &self.settings
    }

    // ---------------------------------------------------------------------
    // 导入
    // ---------------------------------------------------------------------

    /// 导入一份报表
    ///
    /// 批次落库之后的任何失败都记为 Failed 批次并正常返回, 调用方从 status 判断结果
    pub async fn import_document(
        &self,
        company_id: i64,
        period: &str,
        payload: &[u8],
        file_name: Option<String>,
        actor: &str,
    ) -> Result<ImportSummary, ReconError> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Err(ReconError::Validation("payload is empty".into()));
        }
        let period: ReturnPeriod = period.parse()?;
        let period_key = period.to_string();

        let company_gstin = self
            .companies
            .company_gstin(company_id)
            .await?
            .ok_or_else(|| ReconError::NotFound(format!("company {company_id}")))?;

        let new = dedup::new_import(company_id, &period_key, payload, file_name, actor);
        let content_hash = new.content_hash.clone();
        let Some(import) = self.store.insert_import_if_absent(new).await? else {
            let existing = self
                .store
                .find_import_by_hash(company_id, &period_key, &content_hash)
                .await?
                .map(|i| format!(" (import {})", i.id))
                .unwrap_or_default();
            tracing::warn!(company_id, period = %period_key, "重复导入被拒绝{}", existing);
            return Err(ReconError::Conflict(format!(
                "document already imported for company {company_id} period {period_key}{existing}"
            )));
        };

        tracing::info!(import_id = import.id, company_id, period = %period_key, "Import created");

        match self.process_import(&import, &company_gstin, period, payload).await {
            Ok(done) => {
                tracing::info!(
                    import_id = done.id,
                    records = done.total_records,
                    b2b = done.b2b_count,
                    cdn = done.cdn_count,
                    impg = done.impg_count,
                    "导入完成"
                );
                Ok(done.into())
            }
            Err(err) => {
                let message = err.to_string();
                tracing::warn!(import_id = import.id, error = %message, "导入失败");
                self.fail_import(import.id, &message).await.map(ImportSummary::from)
            }
        }
    }

    /// pending -> processing -> 解析入库 -> completed
    async fn process_import(
        &self,
        import: &Import,
        company_gstin: &str,
        period: ReturnPeriod,
        payload: &[u8],
    ) -> Result<Import, ReconError> {
        let import = self
            .store
            .mark_import_processing(import.id)
            .await?
            .ok_or_else(|| ReconError::Internal(format!("import {} is no longer pending", import.id)))?;

        let totals = self.ingest(&import, company_gstin, period, payload).await?;

        self.store
            .complete_import(import.id, &totals)
            .await?
            .ok_or_else(|| ReconError::Internal(format!("import {} left processing state", import.id)))
    }

    /// 批次记为 Failed; 连失败状态都写不进去时删除批次, 不让它继续占用去重闸门
    async fn fail_import(&self, id: i64, message: &str) -> Result<Import, ReconError> {
        let err = match self.store.fail_import(id, message).await {
            Ok(Some(failed)) => return Ok(failed),
            Ok(None) => ReconError::Internal(format!("import {id} disappeared before it could be marked failed")),
            Err(err) => err,
        };
        tracing::error!(import_id = id, error = %err, "无法标记批次失败, 尝试删除批次");
        if let Err(delete_err) = self.store.delete_import(id).await {
            tracing::error!(import_id = id, error = %delete_err, "删除批次失败, 批次仍占用去重闸门");
        }
        Err(ReconError::Internal(format!("import {id} failed ({message}) and could not be recorded: {err}")))
    }

    async fn ingest(
        &self,
        import: &Import,
        company_gstin: &str,
        period: ReturnPeriod,
        payload: &[u8],
    ) -> Result<ImportTotals, ReconError> {
        let parsed = parser::parse_document(payload)?;

        if let Some(gstin) = parsed.gstin.as_deref() {
            if !gstin.trim().eq_ignore_ascii_case(company_gstin.trim()) {
                return Err(ReconError::Validation(format!(
                    "document GSTIN {gstin} does not belong to company {} ({company_gstin})",
                    import.company_id
                )));
            }
        }
        if let Some(raw) = parsed.period.as_deref() {
            let declared: ReturnPeriod = raw.parse()?;
            if declared != period {
                return Err(ReconError::Validation(format!(
                    "document period {declared} does not match requested period {period}"
                )));
            }
        }

        let chunk_size = self.settings.insert_chunk_size();
        let mut inserted = 0u64;
        for (i, chunk) in parsed.records.chunks(chunk_size).enumerate() {
            inserted += self.store.insert_records(import.id, chunk).await?;
            tracing::debug!(import_id = import.id, chunk = i, rows = chunk.len(), "报表行分块写入");
        }
        tracing::info!("Import {} inserted {} records", import.id, inserted);

        Ok(parsed.totals())
    }

    pub async fn get_import(&self, id: i64) -> Result<ImportSummary, ReconError> {
        Ok(self.load_import(id).await?.into())
    }

    /// 期间最新一次导入 (不限状态)
    pub async fn get_import_for_period(&self, company_id: i64, period: &str) -> Result<ImportSummary, ReconError> {
        let period: ReturnPeriod = period.parse()?;
        self.store
            .latest_import_for_period(company_id, &period.to_string(), None)
            .await?
            .map(ImportSummary::from)
            .ok_or_else(|| ReconError::NotFound(format!("no import for company {company_id} period {period}")))
    }

    pub async fn list_imports(
        &self,
        company_id: i64,
        page: PageRequest,
        status: Option<ImportStatus>,
    ) -> Result<Page<ImportSummary>, ReconError> {
        let page = page.normalized();
        let (imports, total) = self
            .store
            .list_imports(company_id, status, page.limit(), page.offset())
            .await?;
        Ok(Page::new(imports.into_iter().map(ImportSummary::from).collect(), total, page))
    }

    /// 删除批次及其报表行; 处理中的批次不可删除
    pub async fn delete_import(&self, id: i64) -> Result<(), ReconError> {
        let import = self.load_import(id).await?;
        if import.status == ImportStatus::Processing {
            return Err(ReconError::Conflict(format!("import {id} is still processing")));
        }
        if !self.store.delete_import(id).await? {
            return Err(ReconError::NotFound(format!("import {id}")));
        }
        tracing::info!(import_id = id, "Import deleted");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // 匹配
    // ---------------------------------------------------------------------

    /// 对一个已完成批次执行匹配; `force` 时重新评估已有结果的记录
    pub async fn run_reconciliation(&self, import_id: i64, force: bool) -> Result<ReconciliationSummary, ReconError> {
        let started = Instant::now();
        let import = self.load_import(import_id).await?;
        if import.status != ImportStatus::Completed {
            return Err(ReconError::Conflict(format!(
                "import {import_id} is {}, only completed imports can be reconciled",
                import.status
            )));
        }

        let records = self.store.records_for_import(import_id).await?;
        if records.is_empty() {
            return Err(ReconError::Validation(format!("import {import_id} has no records")));
        }

        let (to_evaluate, skipped): (Vec<ExternalRecord>, Vec<ExternalRecord>) = records
            .into_iter()
            .partition(|r| force || r.match_status == MatchStatus::Pending);

        tracing::info!(
            "开始对账: import {} 待评估 {} 条, 跳过 {} 条 (force={})",
            import_id,
            to_evaluate.len(),
            skipped.len(),
            force
        );

        let period: ReturnPeriod = import.period.parse()?;
        let filter = self.candidate_filter(period, &to_evaluate);
        let (rules, invoices) = futures::try_join!(
            self.store.list_active_rules(import.company_id),
            self.invoices.query_invoices(import.company_id, &filter),
        )?;

        let rules = if rules.is_empty() {
            tracing::info!(company_id = import.company_id, "未配置匹配规则, 使用内置规则");
            default_rules(import.company_id)
        } else {
            rules
        };

        let matcher = Arc::new(Matcher::new(rules, self.settings.strategy));
        let candidates = Arc::new(CandidatePool::new(invoices));
        let candidate_count = candidates.len();
        tracing::info!(
            import_id,
            rules = matcher.rules().len(),
            candidates = candidate_count,
            "规则与候选发票加载完成"
        );

        let evaluated = to_evaluate.len();
        let results = self.evaluate_all(matcher, candidates, to_evaluate).await?;

        // 结果写回按顺序串行执行; 非 force 时只覆盖仍为 Pending 的记录,
        // 运行期间被人工匹配的记录保持不变
        let expected = (!force).then_some(MatchStatus::Pending);
        let mut errored = 0usize;
        let mut superseded = 0usize;
        for (record_id, result) in results {
            let (outcome, failed) = match result {
                Ok(result) => (result.into_outcome(), false),
                Err(err) => {
                    tracing::warn!(import_id, record_id, error = %err, "记录评估失败, 标记为未匹配");
                    (flagged_outcome(&err), true)
                }
            };
            if self.store.update_match(record_id, &outcome, expected).await? {
                errored += usize::from(failed);
            } else {
                superseded += 1;
                tracing::info!(import_id, record_id, "记录在对账期间已被修改, 跳过写回");
            }
        }

        let counts = self.refresh_counts(import_id).await?;
        let summary = ReconciliationSummary {
            import_id,
            evaluated: evaluated - superseded,
            skipped: skipped.len() + superseded,
            errored,
            matched: counts.matched,
            partial: counts.partial,
            unmatched: counts.unmatched,
            pending: counts.pending,
            candidate_invoices: candidate_count,
            duration_ms: started.elapsed().as_millis(),
        };

        tracing::info!(
            "对账完成: import {} matched={} partial={} unmatched={} errored={} 耗时 {}ms",
            import_id,
            summary.matched,
            summary.partial,
            summary.unmatched,
            summary.errored,
            summary.duration_ms
        );
        Ok(summary)
    }

    /// 候选窗口: 期间首日前推 lookback 天至末日后推 lookahead 天, 仅限出现过的销方税号
    fn candidate_filter(&self, period: ReturnPeriod, records: &[ExternalRecord]) -> InvoiceFilter {
        let lookback = Days::new(self.settings.candidate_lookback_days.max(0) as u64);
        let lookahead = Days::new(self.settings.candidate_lookahead_days.max(0) as u64);
        let gstins: BTreeSet<String> = records
            .iter()
            .map(|r| r.supplier_gstin.trim().to_uppercase())
            .filter(|g| g != parser::IMPORT_SUPPLIER)
            .collect();

        InvoiceFilter {
            date_from: period.first_day().checked_sub_days(lookback),
            date_to: period.last_day().checked_add_days(lookahead),
            supplier_gstins: Some(gstins.into_iter().collect()),
        }
    }

    /// 在专用 rayon 线程池上并行评估, 结果保持输入顺序
    async fn evaluate_all(
        &self,
        matcher: Arc<Matcher>,
        candidates: Arc<CandidatePool>,
        records: Vec<ExternalRecord>,
    ) -> Result<Vec<(i64, Result<MatchResult, MatchError>)>, ReconError> {
        let pool = Arc::clone(&self.match_pool);
        tokio::task::spawn_blocking(move || {
            pool.install(|| {
                records
                    .par_iter()
                    .map(|record| {
                        let supplier = candidates.for_supplier(&record.supplier_gstin);
                        (record.id, matcher.evaluate(record, supplier))
                    })
                    .collect()
            })
        })
        .await
        .map_err(|e| ReconError::Internal(format!("matching task failed: {e}")))
    }

    /// 从已落库状态重新统计并写回批次
    async fn refresh_counts(&self, import_id: i64) -> Result<MatchCounts, ReconError> {
        let counts = self.store.count_match_statuses(import_id).await?;
        self.store.update_import_counts(import_id, &counts).await?;
        Ok(counts)
    }

    // ---------------------------------------------------------------------
    // 查询
    // ---------------------------------------------------------------------

    pub async fn get_reconciliation_summary(&self, company_id: i64, period: &str) -> Result<PeriodSummary, ReconError> {
        let import = self.latest_completed(company_id, period).await?;
        let records = self.store.records_for_import(import.id).await?;

        let mut summary = PeriodSummary {
            import_id: import.id,
            company_id,
            period: import.period.clone(),
            total_records: records.len() as i32,
            matched: 0,
            partial: 0,
            unmatched: 0,
            pending: 0,
            accepted: 0,
            rejected: 0,
            match_rate: 0.0,
            total_taxable_value: BigDecimal::zero(),
            total_tax: BigDecimal::zero(),
            itc_available: BigDecimal::zero(),
            itc_matched: BigDecimal::zero(),
            itc_at_risk: BigDecimal::zero(),
        };

        for record in &records {
            let itc = signed(record, record.itc_total());
            match record.match_status {
                MatchStatus::Matched => {
                    summary.matched += 1;
                    summary.itc_matched += &itc;
                }
                MatchStatus::PartialMatch => {
                    summary.partial += 1;
                    summary.itc_matched += &itc;
                }
                MatchStatus::Unmatched => {
                    summary.unmatched += 1;
                    summary.itc_at_risk += &itc;
                }
                MatchStatus::Pending => summary.pending += 1,
            }
            match record.action_status {
                Some(ActionStatus::Accepted) => summary.accepted += 1,
                Some(ActionStatus::Rejected) => summary.rejected += 1,
                None => {}
            }
            summary.total_taxable_value += signed(record, record.taxable_value.clone());
            summary.total_tax += signed(record, record.tax_total());
            summary.itc_available += itc;
        }

        if summary.total_records > 0 {
            summary.match_rate =
                f64::from(summary.matched + summary.partial) / f64::from(summary.total_records) * 100.0;
        }
        Ok(summary)
    }

    /// 按销方税号汇总, 顺序为首次出现的顺序
    pub async fn get_supplier_summary(&self, company_id: i64, period: &str) -> Result<Vec<SupplierSummary>, ReconError> {
        let import = self.latest_completed(company_id, period).await?;
        let records = self.store.records_for_import(import.id).await?;

        let mut suppliers: IndexMap<String, SupplierSummary> = IndexMap::new();
        for record in &records {
            let key = record.supplier_gstin.trim().to_uppercase();
            let entry = suppliers.entry(key.clone()).or_insert_with(|| SupplierSummary {
                supplier_gstin: key.clone(),
                supplier_name: record.supplier_name.clone(),
                state: self.states.state_for_gstin(&key),
                record_count: 0,
                matched: 0,
                partial: 0,
                unmatched: 0,
                pending: 0,
                taxable_value: BigDecimal::zero(),
                tax_total: BigDecimal::zero(),
                itc_available: BigDecimal::zero(),
            });
            if entry.supplier_name.is_none() {
                entry.supplier_name = record.supplier_name.clone();
            }
            entry.record_count += 1;
            match record.match_status {
                MatchStatus::Matched => entry.matched += 1,
                MatchStatus::PartialMatch => entry.partial += 1,
                MatchStatus::Unmatched => entry.unmatched += 1,
                MatchStatus::Pending => entry.pending += 1,
            }
            entry.taxable_value += signed(record, record.taxable_value.clone());
            entry.tax_total += signed(record, record.tax_total());
            entry.itc_available += signed(record, record.itc_total());
        }

        Ok(suppliers.into_values().collect())
    }

    /// 报表可抵扣税额 vs 账簿期间内发票税额, 按税种对比
    pub async fn get_itc_comparison(&self, company_id: i64, period: &str) -> Result<ItcComparison, ReconError> {
        let import = self.latest_completed(company_id, period).await?;
        let period: ReturnPeriod = import.period.parse()?;

        let filter = InvoiceFilter {
            date_from: Some(period.first_day()),
            date_to: Some(period.last_day()),
            supplier_gstins: None,
        };
        let (records, invoices) = futures::try_join!(
            self.store.records_for_import(import.id),
            self.invoices.query_invoices(company_id, &filter),
        )?;
        let invoices: Vec<_> = invoices
            .into_iter()
            .filter(|inv| inv.invoice_date.is_some_and(|d| period.contains(d)))
            .collect();

        let mut statement = [BigDecimal::zero(), BigDecimal::zero(), BigDecimal::zero(), BigDecimal::zero()];
        for record in &records {
            statement[0] += signed(record, record.itc_igst.clone());
            statement[1] += signed(record, record.itc_cgst.clone());
            statement[2] += signed(record, record.itc_sgst.clone());
            statement[3] += signed(record, record.itc_cess.clone());
        }
        let mut books = [BigDecimal::zero(), BigDecimal::zero(), BigDecimal::zero(), BigDecimal::zero()];
        for invoice in &invoices {
            books[0] += &invoice.igst;
            books[1] += &invoice.cgst;
            books[2] += &invoice.sgst;
            books[3] += &invoice.cess;
        }

        let components: Vec<ItcComponentComparison> = ["IGST", "CGST", "SGST", "CESS"]
            .iter()
            .zip(statement.iter().zip(books.iter()))
            .map(|(name, (stmt, book))| ItcComponentComparison {
                component: name.to_string(),
                as_per_statement: stmt.clone(),
                as_per_books: book.clone(),
                difference: stmt - book,
            })
            .collect();

        let total_statement: BigDecimal = statement.iter().fold(BigDecimal::zero(), |acc, v| acc + v);
        let total_books: BigDecimal = books.iter().fold(BigDecimal::zero(), |acc, v| acc + v);

        Ok(ItcComparison {
            company_id,
            period: import.period,
            components,
            total_difference: &total_statement - &total_books,
            total_statement,
            total_books,
            statement_records: records.len(),
            book_invoices: invoices.len(),
        })
    }

    pub async fn list_records(
        &self,
        import_id: i64,
        filter: &RecordFilter,
        page: PageRequest,
    ) -> Result<Page<ExternalRecord>, ReconError> {
        self.load_import(import_id).await?;
        let page = page.normalized();
        let (records, total) = self
            .store
            .list_records(import_id, filter, page.limit(), page.offset())
            .await?;
        Ok(Page::new(records, total, page))
    }

    pub async fn get_unmatched_records(&self, company_id: i64, period: &str) -> Result<Vec<ExternalRecord>, ReconError> {
        let import = self.latest_completed(company_id, period).await?;
        Ok(self
            .store
            .records_for_import(import.id)
            .await?
            .into_iter()
            .filter(|r| r.match_status == MatchStatus::Unmatched)
            .collect())
    }

    /// 导出批次全部报表行 (含匹配与处理状态) 为 CSV, 返回写出的行数
    pub async fn export_records_csv<W: Write>(&self, import_id: i64, writer: W) -> Result<usize, ReconError> {
        self.load_import(import_id).await?;
        let records = self.store.records_for_import(import_id).await?;

        let mut writer = csv::Writer::from_writer(writer);
        let csv_err = |e: csv::Error| ReconError::Internal(format!("CSV export failed: {e}"));

        writer
            .write_record([
                "record_id",
                "supplier_gstin",
                "supplier_name",
                "document_number",
                "document_date",
                "document_type",
                "taxable_value",
                "igst",
                "cgst",
                "sgst",
                "cess",
                "itc_eligible",
                "match_status",
                "matched_invoice_id",
                "confidence",
                "discrepancies",
                "action_status",
                "action_by",
                "action_notes",
            ])
            .map_err(csv_err)?;

        for record in &records {
            writer
                .write_record(&[
                    record.id.to_string(),
                    record.supplier_gstin.clone(),
                    record.supplier_name.clone().unwrap_or_default(),
                    record.document_number.clone(),
                    record.document_date.format("%Y-%m-%d").to_string(),
                    record.document_type.to_string(),
                    record.taxable_value.to_string(),
                    record.igst.to_string(),
                    record.cgst.to_string(),
                    record.sgst.to_string(),
                    record.cess.to_string(),
                    record.itc_eligible.to_string(),
                    record.match_status.to_string(),
                    record.matched_invoice_id.map(|id| id.to_string()).unwrap_or_default(),
                    record.confidence.to_string(),
                    record.discrepancies.join("; "),
                    record.action_status.map(|s| s.to_string()).unwrap_or_default(),
                    record.action_by.clone().unwrap_or_default(),
                    record.action_notes.clone().unwrap_or_default(),
                ])
                .map_err(csv_err)?;
        }

        writer
            .flush()
            .map_err(|e| ReconError::Internal(format!("CSV export failed: {e}")))?;
        Ok(records.len())
    }

    // ---------------------------------------------------------------------
    // 规则
    // ---------------------------------------------------------------------

    pub async fn list_rules(&self, company_id: i64) -> Result<Vec<MatchingRule>, ReconError> {
        self.store.list_rules(company_id).await
    }

    pub async fn create_rule(&self, company_id: i64, rule: NewMatchingRule) -> Result<MatchingRule, ReconError> {
        rule.validate()?;
        let created = self.store.insert_rule(company_id, rule).await?;
        tracing::info!(company_id, rule_id = created.id, priority = created.priority, "Matching rule created");
        Ok(created)
    }

    async fn load_import(&self, id: i64) -> Result<Import, ReconError> {
        self.store
            .get_import(id)
            .await?
            .ok_or_else(|| ReconError::NotFound(format!("import {id}")))
    }

    async fn latest_completed(&self, company_id: i64, period: &str) -> Result<Import, ReconError> {
        let period: ReturnPeriod = period.parse()?;
        self.store
            .latest_import_for_period(company_id, &period.to_string(), Some(ImportStatus::Completed))
            .await?
            .ok_or_else(|| {
                ReconError::NotFound(format!("no completed import for company {company_id} period {period}"))
            })
    }
}

/// 贷项通知单按负数计入汇总
fn signed(record: &ExternalRecord, value: BigDecimal) -> BigDecimal {
    if record.document_type.is_credit() {
        -value
    } else {
        value
    }
}

fn flagged_outcome(err: &MatchError) -> MatchOutcome {
    MatchOutcome {
        status: MatchStatus::Unmatched,
        matched_invoice_id: None,
        matched_rule_id: None,
        confidence: 0,
        discrepancies: vec![format!("Evaluation skipped: {err}")],
        matched_at: None,
    }
}
