//! 人工处理: 接受差异、拒绝、手工匹配、撤销
//!
//! 处理状态与自动匹配状态相互独立, 只有手工匹配会同时改写匹配结果。

use chrono::Utc;
use std::sync::Arc;

use super::matcher::tax_discrepancies;
use crate::db::{InvoiceStore, ReconStore};
use crate::error::ReconError;
use crate::models::{ActionStatus, ExternalRecord, MatchOutcome, MatchStatus, RecordAction};

pub struct ActionService {
    store: Arc<dyn ReconStore>,
    invoices: Arc<dyn InvoiceStore>,
}

impl ActionService {
    pub fn new(store: Arc<dyn ReconStore>, invoices: Arc<dyn InvoiceStore>) -> Self {
        Self { store, invoices }
    }

    /// 接受差异, 不限匹配状态
    pub async fn accept_mismatch(
        &self,
        record_id: i64,
        actor: &str,
        notes: Option<String>,
    ) -> Result<ExternalRecord, ReconError> {
        require_actor(actor)?;
        self.load_record(record_id).await?;
        let action = RecordAction::set(ActionStatus::Accepted, actor, notes);
        self.write_action(record_id, &action).await?;
        tracing::info!(record_id, actor, "记录已接受");
        self.load_record(record_id).await
    }

    /// 拒绝, 必须给出原因
    pub async fn reject_invoice(&self, record_id: i64, actor: &str, reason: &str) -> Result<ExternalRecord, ReconError> {
        require_actor(actor)?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ReconError::Validation("a reason is required to reject a record".into()));
        }
        self.load_record(record_id).await?;
        let action = RecordAction::set(ActionStatus::Rejected, actor, Some(reason.to_string()));
        self.write_action(record_id, &action).await?;
        tracing::info!(record_id, actor, reason, "记录已拒绝");
        self.load_record(record_id).await
    }

    /// 手工绑定账簿发票: 置信度 100, 同时记为已接受
    pub async fn manual_match(
        &self,
        record_id: i64,
        invoice_id: i64,
        actor: &str,
        notes: Option<String>,
    ) -> Result<ExternalRecord, ReconError> {
        require_actor(actor)?;
        let record = self.load_record(record_id).await?;
        let import = self
            .store
            .get_import(record.import_id)
            .await?
            .ok_or_else(|| ReconError::NotFound(format!("import {}", record.import_id)))?;
        let invoice = self
            .invoices
            .get_invoice(import.company_id, invoice_id)
            .await?
            .ok_or_else(|| ReconError::NotFound(format!("invoice {invoice_id}")))?;

        let mut discrepancies = tax_discrepancies(&record, &invoice);
        let same_supplier = invoice
            .supplier_gstin
            .as_deref()
            .is_some_and(|g| g.trim().eq_ignore_ascii_case(record.supplier_gstin.trim()));
        if !same_supplier {
            discrepancies.push(format!(
                "Supplier GSTIN differs: statement {}, books {}",
                record.supplier_gstin,
                invoice.supplier_gstin.as_deref().unwrap_or("-")
            ));
        }

        let outcome = MatchOutcome {
            status: if discrepancies.is_empty() {
                MatchStatus::Matched
            } else {
                MatchStatus::PartialMatch
            },
            matched_invoice_id: Some(invoice.id),
            matched_rule_id: None,
            confidence: 100,
            discrepancies,
            matched_at: Some(Utc::now()),
        };
        if !self.store.update_match(record_id, &outcome, None).await? {
            return Err(ReconError::NotFound(format!("record {record_id}")));
        }
        self.write_action(record_id, &RecordAction::set(ActionStatus::Accepted, actor, notes))
            .await?;

        let counts = self.store.count_match_statuses(record.import_id).await?;
        self.store.update_import_counts(record.import_id, &counts).await?;

        tracing::info!(
            "手工匹配: record {} -> invoice {} ({}) by {}",
            record_id,
            invoice_id,
            outcome.status,
            actor
        );
        self.load_record(record_id).await
    }

    /// 清空处理状态, 匹配结果保持不变
    pub async fn reset_action(&self, record_id: i64) -> Result<ExternalRecord, ReconError> {
        self.load_record(record_id).await?;
        self.write_action(record_id, &RecordAction::cleared()).await?;
        tracing::info!(record_id, "处理状态已重置");
        self.load_record(record_id).await
    }

    async fn load_record(&self, id: i64) -> Result<ExternalRecord, ReconError> {
        self.store
            .get_record(id)
            .await?
            .ok_or_else(|| ReconError::NotFound(format!("record {id}")))
    }

    async fn write_action(&self, record_id: i64, action: &RecordAction) -> Result<(), ReconError> {
        if self.store.update_action(record_id, action).await? {
            Ok(())
        } else {
            Err(ReconError::NotFound(format!("record {record_id}")))
        }
    }
}

fn require_actor(actor: &str) -> Result<(), ReconError> {
    if actor.trim().is_empty() {
        return Err(ReconError::Validation("actor is required".into()));
    }
    Ok(())
}
