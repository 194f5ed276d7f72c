//! 进程内存储 (DashMap), 用于开发环境与测试

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use super::store::{CompanyStore, InvoiceStore, ReconStore};
use crate::error::ReconError;
use crate::models::{
    ExternalRecord, Import, ImportStatus, ImportTotals, Invoice, InvoiceFilter, MatchCounts, MatchOutcome,
    MatchStatus, MatchingRule, NewImport, NewMatchingRule, RecordAction, RecordDraft, RecordFilter,
};

type HashKey = (i64, String, String);

#[derive(Default)]
pub struct MemoryStore {
    next_id: AtomicI64,
    imports: DashMap<i64, Import>,
    /// (公司, 期间, 哈希) -> 批次 id
    hash_index: DashMap<HashKey, i64>,
    records: DashMap<i64, ExternalRecord>,
    import_records: DashMap<i64, Vec<i64>>,
    rules: DashMap<i64, Vec<MatchingRule>>,
    invoices: DashMap<i64, Vec<Invoice>>,
    companies: DashMap<i64, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn add_company(&self, company_id: i64, gstin: &str) {
        self.companies.insert(company_id, gstin.to_string());
    }

    pub fn add_invoice(&self, invoice: Invoice) {
        self.invoices.entry(invoice.company_id).or_default().push(invoice);
    }

    fn update_import<F>(&self, id: i64, f: F) -> Option<Import>
    where
        F: FnOnce(&mut Import) -> bool,
    {
        let mut import = self.imports.get_mut(&id)?;
        if f(&mut *import) {
            Some(import.clone())
        } else {
            None
        }
    }
}

#[async_trait]
impl ReconStore for MemoryStore {
    async fn insert_import_if_absent(&self, new: NewImport) -> Result<Option<Import>, ReconError> {
        let key = (new.company_id, new.period.clone(), new.content_hash.clone());
        // 持有分片锁完成 检查+插入
        match self.hash_index.entry(key) {
            Entry::Occupied(mut occupied) => {
                let existing_failed = self
                    .imports
                    .get(occupied.get())
                    .map_or(true, |existing| existing.status == ImportStatus::Failed);
                if !existing_failed {
                    return Ok(None);
                }
                let import = Import::pending(self.next_id(), new);
                occupied.insert(import.id);
                self.imports.insert(import.id, import.clone());
                Ok(Some(import))
            }
            Entry::Vacant(vacant) => {
                // 先写批次再发布索引, 其他调用方看到索引时批次一定存在
                let import = Import::pending(self.next_id(), new);
                self.imports.insert(import.id, import.clone());
                vacant.insert(import.id);
                Ok(Some(import))
            }
        }
    }

    async fn get_import(&self, id: i64) -> Result<Option<Import>, ReconError> {
        Ok(self.imports.get(&id).map(|i| i.clone()))
    }

    async fn latest_import_for_period(
        &self,
        company_id: i64,
        period: &str,
        status: Option<ImportStatus>,
    ) -> Result<Option<Import>, ReconError> {
        Ok(self
            .imports
            .iter()
            .filter(|i| i.company_id == company_id && i.period == period)
            .filter(|i| status.map_or(true, |s| i.status == s))
            .max_by_key(|i| i.id)
            .map(|i| i.clone()))
    }

    async fn find_import_by_hash(
        &self,
        company_id: i64,
        period: &str,
        content_hash: &str,
    ) -> Result<Option<Import>, ReconError> {
        let key = (company_id, period.to_string(), content_hash.to_string());
        let id = self.hash_index.get(&key).map(|id| *id);
        Ok(id.and_then(|id| self.imports.get(&id).map(|i| i.clone())))
    }

    async fn list_imports(
        &self,
        company_id: i64,
        status: Option<ImportStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Import>, i64), ReconError> {
        let mut all: Vec<Import> = self
            .imports
            .iter()
            .filter(|i| i.company_id == company_id)
            .filter(|i| status.map_or(true, |s| i.status == s))
            .map(|i| i.clone())
            .collect();
        all.sort_by(|a, b| b.id.cmp(&a.id));
        let total = all.len() as i64;
        let page = all
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn mark_import_processing(&self, id: i64) -> Result<Option<Import>, ReconError> {
        Ok(self.update_import(id, |import| {
            if import.status != ImportStatus::Pending {
                return false;
            }
            import.status = ImportStatus::Processing;
            true
        }))
    }

    async fn complete_import(&self, id: i64, totals: &ImportTotals) -> Result<Option<Import>, ReconError> {
        Ok(self.update_import(id, |import| {
            import.status = ImportStatus::Completed;
            import.gstin = totals.gstin.clone();
            import.total_records = totals.total_records;
            import.b2b_count = totals.b2b_count;
            import.cdn_count = totals.cdn_count;
            import.impg_count = totals.impg_count;
            import.total_taxable_value = totals.total_taxable_value.clone();
            import.total_igst = totals.total_igst.clone();
            import.total_cgst = totals.total_cgst.clone();
            import.total_sgst = totals.total_sgst.clone();
            import.total_cess = totals.total_cess.clone();
            import.itc_available = totals.itc_available.clone();
            import.completed_at = Some(Utc::now());
            true
        }))
    }

    async fn fail_import(&self, id: i64, message: &str) -> Result<Option<Import>, ReconError> {
        let failed = self.update_import(id, |import| {
            import.status = ImportStatus::Failed;
            import.error_message = Some(message.to_string());
            import.completed_at = Some(Utc::now());
            true
        });
        if failed.is_some() {
            if let Some((_, ids)) = self.import_records.remove(&id) {
                for record_id in ids {
                    self.records.remove(&record_id);
                }
            }
        }
        Ok(failed)
    }

    async fn update_import_counts(&self, id: i64, counts: &MatchCounts) -> Result<Option<Import>, ReconError> {
        Ok(self.update_import(id, |import| {
            import.total_records = counts.total;
            import.matched_count = counts.matched;
            import.partial_count = counts.partial;
            import.unmatched_count = counts.unmatched;
            import.reconciled_at = Some(Utc::now());
            true
        }))
    }

    async fn delete_import(&self, id: i64) -> Result<bool, ReconError> {
        let Some((_, import)) = self.imports.remove(&id) else {
            return Ok(false);
        };
        self.hash_index
            .remove_if(&(import.company_id, import.period, import.content_hash), |_, v| *v == id);
        if let Some((_, ids)) = self.import_records.remove(&id) {
            for record_id in ids {
                self.records.remove(&record_id);
            }
        }
        Ok(true)
    }

    async fn insert_records(&self, import_id: i64, drafts: &[RecordDraft]) -> Result<u64, ReconError> {
        if !self.imports.contains_key(&import_id) {
            return Err(ReconError::NotFound(format!("import {import_id}")));
        }
        let mut ids = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let record = ExternalRecord::from_draft(self.next_id(), import_id, draft.clone());
            ids.push(record.id);
            self.records.insert(record.id, record);
        }
        self.import_records.entry(import_id).or_default().extend(ids);
        Ok(drafts.len() as u64)
    }

    async fn get_record(&self, id: i64) -> Result<Option<ExternalRecord>, ReconError> {
        Ok(self.records.get(&id).map(|r| r.clone()))
    }

    async fn list_records(
        &self,
        import_id: i64,
        filter: &RecordFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ExternalRecord>, i64), ReconError> {
        let matching: Vec<ExternalRecord> = self
            .records_for_import(import_id)
            .await?
            .into_iter()
            .filter(|r| filter.accepts(r))
            .collect();
        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn records_for_import(&self, import_id: i64) -> Result<Vec<ExternalRecord>, ReconError> {
        let ids = self
            .import_records
            .get(&import_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        let mut records: Vec<ExternalRecord> = ids
            .iter()
            .filter_map(|id| self.records.get(id).map(|r| r.clone()))
            .collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn update_match(
        &self,
        record_id: i64,
        outcome: &MatchOutcome,
        expected: Option<MatchStatus>,
    ) -> Result<bool, ReconError> {
        // 在分片写锁内完成 比较+写入
        let Some(mut record) = self.records.get_mut(&record_id) else {
            return Ok(false);
        };
        if expected.is_some_and(|status| record.match_status != status) {
            return Ok(false);
        }
        record.apply_outcome(outcome);
        Ok(true)
    }

    async fn update_action(&self, record_id: i64, action: &RecordAction) -> Result<bool, ReconError> {
        Ok(self
            .records
            .get_mut(&record_id)
            .map(|mut r| r.apply_action(action))
            .is_some())
    }

    async fn count_match_statuses(&self, import_id: i64) -> Result<MatchCounts, ReconError> {
        let mut counts = MatchCounts::default();
        for record in self.records_for_import(import_id).await? {
            counts.total += 1;
            match record.match_status {
                MatchStatus::Pending => counts.pending += 1,
                MatchStatus::Matched => counts.matched += 1,
                MatchStatus::PartialMatch => counts.partial += 1,
                MatchStatus::Unmatched => counts.unmatched += 1,
            }
        }
        Ok(counts)
    }

    async fn list_active_rules(&self, company_id: i64) -> Result<Vec<MatchingRule>, ReconError> {
        let mut rules: Vec<MatchingRule> = self
            .list_rules(company_id)
            .await?
            .into_iter()
            .filter(|r| r.is_active)
            .collect();
        rules.sort_by_key(|r| (r.priority, r.id));
        Ok(rules)
    }

    async fn list_rules(&self, company_id: i64) -> Result<Vec<MatchingRule>, ReconError> {
        let mut rules = self
            .rules
            .get(&company_id)
            .map(|r| r.clone())
            .unwrap_or_default();
        rules.sort_by_key(|r| (r.priority, r.id));
        Ok(rules)
    }

    async fn insert_rule(&self, company_id: i64, rule: NewMatchingRule) -> Result<MatchingRule, ReconError> {
        let rule = rule.into_rule(self.next_id(), company_id);
        self.rules.entry(company_id).or_default().push(rule.clone());
        Ok(rule)
    }
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn query_invoices(&self, company_id: i64, filter: &InvoiceFilter) -> Result<Vec<Invoice>, ReconError> {
        Ok(self
            .invoices
            .get(&company_id)
            .map(|all| all.iter().filter(|i| filter.accepts(i)).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_invoice(&self, company_id: i64, invoice_id: i64) -> Result<Option<Invoice>, ReconError> {
        Ok(self
            .invoices
            .get(&company_id)
            .and_then(|all| all.iter().find(|i| i.id == invoice_id).cloned()))
    }
}

#[async_trait]
impl CompanyStore for MemoryStore {
    async fn company_gstin(&self, company_id: i64) -> Result<Option<String>, ReconError> {
        Ok(self.companies.get(&company_id).map(|g| g.clone()))
    }
}
