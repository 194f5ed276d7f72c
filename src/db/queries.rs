use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use std::time::{Duration, Instant};

use super::store::{CompanyStore, InvoiceStore, ReconStore};
use crate::error::ReconError;
use crate::models::{
    ExternalRecord, Import, ImportStatus, ImportTotals, Invoice, InvoiceFilter, MatchCounts, MatchOutcome,
    MatchStatus, MatchingRule, NewImport, NewMatchingRule, RecordAction, RecordDraft, RecordFilter,
};

/// 单次批量写入的超时
const INSERT_TIMEOUT: Duration = Duration::from_secs(30);

/// Postgres 实现: 导入批次、报表行、匹配规则
#[derive(Clone)]
pub struct PgReconStore {
    pool: PgPool,
}

impl PgReconStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct StatusCountRow {
    total: i64,
    pending: i64,
    matched: i64,
    partial: i64,
    unmatched: i64,
}

fn search_pattern(filter: &RecordFilter) -> Option<String> {
    filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s.replace('%', "\\%").replace('_', "\\_")))
}

#[async_trait]
impl ReconStore for PgReconStore {
    async fn insert_import_if_absent(&self, new: NewImport) -> Result<Option<Import>, ReconError> {
        // 条件插入, 依赖部分唯一索引 itc_imports_dedup_idx
        let import = sqlx::query_as::<_, Import>(
            r#"
            INSERT INTO itc_imports (company_id, period, file_name, content_hash, imported_by, raw_document)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (company_id, period, content_hash) WHERE status <> 'failed'
            DO NOTHING
            RETURNING *
            "#,
        )
        .bind(new.company_id)
        .bind(&new.period)
        .bind(&new.file_name)
        .bind(&new.content_hash)
        .bind(&new.imported_by)
        .bind(&new.raw_document)
        .fetch_optional(&self.pool)
        .await?;
        Ok(import)
    }

    async fn get_import(&self, id: i64) -> Result<Option<Import>, ReconError> {
        let import = sqlx::query_as::<_, Import>("SELECT * FROM itc_imports WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(import)
    }

    async fn latest_import_for_period(
        &self,
        company_id: i64,
        period: &str,
        status: Option<ImportStatus>,
    ) -> Result<Option<Import>, ReconError> {
        let import = sqlx::query_as::<_, Import>(
            r#"
            SELECT * FROM itc_imports
            WHERE company_id = $1
              AND period = $2
              AND ($3::varchar IS NULL OR status = $3)
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(company_id)
        .bind(period)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;
        Ok(import)
    }

    async fn find_import_by_hash(
        &self,
        company_id: i64,
        period: &str,
        content_hash: &str,
    ) -> Result<Option<Import>, ReconError> {
        let import = sqlx::query_as::<_, Import>(
            r#"
            SELECT * FROM itc_imports
            WHERE company_id = $1 AND period = $2 AND content_hash = $3
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(company_id)
        .bind(period)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(import)
    }

    async fn list_imports(
        &self,
        company_id: i64,
        status: Option<ImportStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Import>, i64), ReconError> {
        let imports = sqlx::query_as::<_, Import>(
            r#"
            SELECT * FROM itc_imports
            WHERE company_id = $1 AND ($2::varchar IS NULL OR status = $2)
            ORDER BY id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(company_id)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM itc_imports
            WHERE company_id = $1 AND ($2::varchar IS NULL OR status = $2)
            "#,
        )
        .bind(company_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        Ok((imports, total))
    }

    async fn mark_import_processing(&self, id: i64) -> Result<Option<Import>, ReconError> {
        let import = sqlx::query_as::<_, Import>(
            r#"
            UPDATE itc_imports SET status = 'processing'
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(import)
    }

    async fn complete_import(&self, id: i64, totals: &ImportTotals) -> Result<Option<Import>, ReconError> {
        let import = sqlx::query_as::<_, Import>(
            r#"
            UPDATE itc_imports
            SET status = 'completed',
                gstin = $2,
                total_records = $3,
                b2b_count = $4,
                cdn_count = $5,
                impg_count = $6,
                total_taxable_value = $7,
                total_igst = $8,
                total_cgst = $9,
                total_sgst = $10,
                total_cess = $11,
                itc_available = $12,
                completed_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&totals.gstin)
        .bind(totals.total_records)
        .bind(totals.b2b_count)
        .bind(totals.cdn_count)
        .bind(totals.impg_count)
        .bind(totals.total_taxable_value.clone())
        .bind(totals.total_igst.clone())
        .bind(totals.total_cgst.clone())
        .bind(totals.total_sgst.clone())
        .bind(totals.total_cess.clone())
        .bind(totals.itc_available.clone())
        .fetch_optional(&self.pool)
        .await?;
        Ok(import)
    }

    async fn fail_import(&self, id: i64, message: &str) -> Result<Option<Import>, ReconError> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM itc_records WHERE import_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let import = sqlx::query_as::<_, Import>(
            r#"
            UPDATE itc_imports
            SET status = 'failed', error_message = $2, completed_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(message)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;
        if removed.rows_affected() > 0 {
            tracing::debug!(import_id = id, rows = removed.rows_affected(), "失败批次的报表行已清除");
        }
        Ok(import)
    }

    async fn update_import_counts(&self, id: i64, counts: &MatchCounts) -> Result<Option<Import>, ReconError> {
        let import = sqlx::query_as::<_, Import>(
            r#"
            UPDATE itc_imports
            SET total_records = $2,
                matched_count = $3,
                partial_count = $4,
                unmatched_count = $5,
                reconciled_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(counts.total)
        .bind(counts.matched)
        .bind(counts.partial)
        .bind(counts.unmatched)
        .fetch_optional(&self.pool)
        .await?;
        Ok(import)
    }

    async fn delete_import(&self, id: i64) -> Result<bool, ReconError> {
        // itc_records 外键 ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM itc_imports WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_records(&self, import_id: i64, drafts: &[RecordDraft]) -> Result<u64, ReconError> {
        if drafts.is_empty() {
            return Ok(0);
        }

        tracing::debug!("开始构建批量插入语句, {} 条记录", drafts.len());
        let start_time = Instant::now();

        let mut query_builder = sqlx::QueryBuilder::new(
            "INSERT INTO itc_records (
                import_id, supplier_gstin, supplier_name, document_number, document_date, document_type,
                taxable_value, igst, cgst, sgst, cess,
                place_of_supply, reverse_charge, itc_eligible,
                itc_igst, itc_cgst, itc_sgst, itc_cess
            ) ",
        );

        query_builder.push_values(drafts, |mut b, draft| {
            b.push_bind(import_id)
                .push_bind(&draft.supplier_gstin)
                .push_bind(&draft.supplier_name)
                .push_bind(&draft.document_number)
                .push_bind(draft.document_date)
                .push_bind(draft.document_type)
                .push_bind(draft.taxable_value.clone())
                .push_bind(draft.igst.clone())
                .push_bind(draft.cgst.clone())
                .push_bind(draft.sgst.clone())
                .push_bind(draft.cess.clone())
                .push_bind(&draft.place_of_supply)
                .push_bind(draft.reverse_charge)
                .push_bind(draft.itc_eligible)
                .push_bind(draft.itc_igst.clone())
                .push_bind(draft.itc_cgst.clone())
                .push_bind(draft.itc_sgst.clone())
                .push_bind(draft.itc_cess.clone());
        });

        match tokio::time::timeout(INSERT_TIMEOUT, query_builder.build().execute(&self.pool)).await {
            Ok(Ok(result)) => {
                tracing::debug!(
                    "✓ INSERT执行成功, 影响 {} 行, 耗时: {:?}",
                    result.rows_affected(),
                    start_time.elapsed()
                );
                Ok(result.rows_affected())
            }
            Ok(Err(e)) => {
                tracing::error!("✗ INSERT执行失败, 耗时: {:?}, 错误: {:?}", start_time.elapsed(), e);
                Err(e.into())
            }
            Err(_) => {
                tracing::error!("✗ INSERT操作超时 (>{}秒)!", INSERT_TIMEOUT.as_secs());
                Err(ReconError::Database(sqlx::Error::PoolTimedOut))
            }
        }
    }

    async fn get_record(&self, id: i64) -> Result<Option<ExternalRecord>, ReconError> {
        let record = sqlx::query_as::<_, ExternalRecord>("SELECT * FROM itc_records WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn list_records(
        &self,
        import_id: i64,
        filter: &RecordFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ExternalRecord>, i64), ReconError> {
        let pattern = search_pattern(filter);

        let records = sqlx::query_as::<_, ExternalRecord>(
            r#"
            SELECT * FROM itc_records
            WHERE import_id = $1
              AND ($2::varchar IS NULL OR match_status = $2)
              AND ($3::varchar IS NULL OR document_type = $3)
              AND ($4::text IS NULL
                   OR supplier_gstin ILIKE $4
                   OR document_number ILIKE $4
                   OR supplier_name ILIKE $4)
            ORDER BY id
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(import_id)
        .bind(filter.match_status)
        .bind(filter.document_type)
        .bind(&pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM itc_records
            WHERE import_id = $1
              AND ($2::varchar IS NULL OR match_status = $2)
              AND ($3::varchar IS NULL OR document_type = $3)
              AND ($4::text IS NULL
                   OR supplier_gstin ILIKE $4
                   OR document_number ILIKE $4
                   OR supplier_name ILIKE $4)
            "#,
        )
        .bind(import_id)
        .bind(filter.match_status)
        .bind(filter.document_type)
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await?;

        Ok((records, total))
    }

    async fn records_for_import(&self, import_id: i64) -> Result<Vec<ExternalRecord>, ReconError> {
        let records = sqlx::query_as::<_, ExternalRecord>(
            "SELECT * FROM itc_records WHERE import_id = $1 ORDER BY id",
        )
        .bind(import_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn update_match(
        &self,
        record_id: i64,
        outcome: &MatchOutcome,
        expected: Option<MatchStatus>,
    ) -> Result<bool, ReconError> {
        let result = sqlx::query(
            r#"
            UPDATE itc_records
            SET match_status = $2,
                matched_invoice_id = $3,
                matched_rule_id = $4,
                confidence = $5,
                discrepancies = $6,
                matched_at = $7
            WHERE id = $1
              AND ($8::varchar IS NULL OR match_status = $8)
            "#,
        )
        .bind(record_id)
        .bind(outcome.status)
        .bind(outcome.matched_invoice_id)
        .bind(outcome.matched_rule_id)
        .bind(outcome.confidence)
        .bind(&outcome.discrepancies)
        .bind(outcome.matched_at)
        .bind(expected)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_action(&self, record_id: i64, action: &RecordAction) -> Result<bool, ReconError> {
        let result = sqlx::query(
            r#"
            UPDATE itc_records
            SET action_status = $2, action_by = $3, action_notes = $4, action_at = $5
            WHERE id = $1
            "#,
        )
        .bind(record_id)
        .bind(action.status)
        .bind(&action.actor)
        .bind(&action.notes)
        .bind(action.at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_match_statuses(&self, import_id: i64) -> Result<MatchCounts, ReconError> {
        let row = sqlx::query_as::<_, StatusCountRow>(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE match_status = 'pending') AS pending,
                   COUNT(*) FILTER (WHERE match_status = 'matched') AS matched,
                   COUNT(*) FILTER (WHERE match_status = 'partial_match') AS partial,
                   COUNT(*) FILTER (WHERE match_status = 'unmatched') AS unmatched
            FROM itc_records
            WHERE import_id = $1
            "#,
        )
        .bind(import_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(MatchCounts {
            total: row.total as i32,
            pending: row.pending as i32,
            matched: row.matched as i32,
            partial: row.partial as i32,
            unmatched: row.unmatched as i32,
        })
    }

    async fn list_active_rules(&self, company_id: i64) -> Result<Vec<MatchingRule>, ReconError> {
        let rules = sqlx::query_as::<_, MatchingRule>(
            r#"
            SELECT * FROM itc_matching_rules
            WHERE company_id = $1 AND is_active
            ORDER BY priority, id
            "#,
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rules)
    }

    async fn list_rules(&self, company_id: i64) -> Result<Vec<MatchingRule>, ReconError> {
        let rules = sqlx::query_as::<_, MatchingRule>(
            "SELECT * FROM itc_matching_rules WHERE company_id = $1 ORDER BY priority, id",
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rules)
    }

    async fn insert_rule(&self, company_id: i64, rule: NewMatchingRule) -> Result<MatchingRule, ReconError> {
        let rule = sqlx::query_as::<_, MatchingRule>(
            r#"
            INSERT INTO itc_matching_rules (
                company_id, name, priority, match_document_number, match_amount, match_date,
                fuzzy_threshold, amount_tolerance_pct, amount_tolerance_abs, date_tolerance_days,
                confidence_score, is_active
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(company_id)
        .bind(&rule.name)
        .bind(rule.priority)
        .bind(rule.match_document_number)
        .bind(rule.match_amount)
        .bind(rule.match_date)
        .bind(rule.fuzzy_threshold)
        .bind(rule.amount_tolerance_pct.clone())
        .bind(rule.amount_tolerance_abs.clone())
        .bind(rule.date_tolerance_days)
        .bind(rule.confidence_score)
        .bind(rule.is_active)
        .fetch_one(&self.pool)
        .await?;
        Ok(rule)
    }
}

/// 发票库的 Postgres 适配 (purchase_invoices 表由采购模块维护)
#[derive(Clone)]
pub struct PgInvoiceStore {
    pool: PgPool,
}

impl PgInvoiceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InvoiceStore for PgInvoiceStore {
    async fn query_invoices(&self, company_id: i64, filter: &InvoiceFilter) -> Result<Vec<Invoice>, ReconError> {
        let gstins: Option<Vec<String>> = filter
            .supplier_gstins
            .as_ref()
            .map(|list| list.iter().map(|g| g.to_uppercase()).collect());

        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT id, company_id, supplier_gstin, supplier_name, invoice_number, invoice_date,
                   taxable_value, igst, cgst, sgst, cess
            FROM purchase_invoices
            WHERE company_id = $1
              AND (invoice_date IS NULL OR $2::date IS NULL OR invoice_date >= $2)
              AND (invoice_date IS NULL OR $3::date IS NULL OR invoice_date <= $3)
              AND ($4::varchar[] IS NULL OR upper(supplier_gstin) = ANY($4))
            ORDER BY id
            "#,
        )
        .bind(company_id)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .bind(gstins)
        .fetch_all(&self.pool)
        .await?;
        Ok(invoices)
    }

    async fn get_invoice(&self, company_id: i64, invoice_id: i64) -> Result<Option<Invoice>, ReconError> {
        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT id, company_id, supplier_gstin, supplier_name, invoice_number, invoice_date,
                   taxable_value, igst, cgst, sgst, cess
            FROM purchase_invoices
            WHERE company_id = $1 AND id = $2
            "#,
        )
        .bind(company_id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(invoice)
    }
}

/// 公司主数据的 Postgres 适配
#[derive(Clone)]
pub struct PgCompanyStore {
    pool: PgPool,
}

impl PgCompanyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CompanyStore for PgCompanyStore {
    async fn company_gstin(&self, company_id: i64) -> Result<Option<String>, ReconError> {
        let gstin: Option<Option<String>> = sqlx::query_scalar("SELECT gstin FROM companies WHERE id = $1")
            .bind(company_id)
            .fetch_optional(&self.pool)
            .await?;
        // 公司存在但未登记税号时按空串处理, 由抬头校验报错
        Ok(gstin.map(|g| g.unwrap_or_default()))
    }
}
