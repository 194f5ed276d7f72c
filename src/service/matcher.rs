//! 规则驱动的报表行 <-> 账簿发票匹配
//!
//! 候选先按销方税号过滤, 再按规则 priority 升序逐条尝试; 规则内按候选顺序逐张比较
//! 单据号 (规范化 + 编辑距离)、金额 (百分比/绝对值容差)、日期 (天数窗口)。
//! 相同的规则列表与候选顺序总是得到相同结果。

use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::MatchError;
use crate::models::{ExternalRecord, Invoice, MatchResult, MatchingRule};

/// 规则选择策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// 首个全部通过的 (规则, 候选) 胜出
    #[default]
    FirstMatch,
    /// 评估全部 (规则, 候选), 取置信度最高者
    BestScore,
}

/// 单据号规范化: 大写, 去掉空白、`-`、`/`、`_`
pub fn normalize_document_number(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '/' | '_'))
        .flat_map(char::to_uppercase)
        .collect()
}

/// 单据号比较, 通过时返回编辑距离
pub fn document_number_distance(statement: &str, books: &str, threshold: i32) -> Option<usize> {
    let a = normalize_document_number(statement);
    let b = normalize_document_number(books);
    if a == b {
        return Some(0);
    }
    if threshold <= 0 {
        return None;
    }
    let distance = strsim::levenshtein(&a, &b);
    (distance <= threshold as usize).then_some(distance)
}

/// 金额容差: 差额为零, 或在百分比容差内, 或在绝对值容差内
pub fn amount_within_tolerance(
    statement: &BigDecimal,
    books: &BigDecimal,
    tolerance_pct: Option<&BigDecimal>,
    tolerance_abs: Option<&BigDecimal>,
) -> bool {
    let diff = (statement - books).abs();
    if diff.is_zero() {
        return true;
    }
    if let Some(pct) = tolerance_pct {
        let base = std::cmp::max(statement.abs(), books.abs());
        // diff / base * 100 <= pct
        if &diff * BigDecimal::from(100) <= pct * &base {
            return true;
        }
    }
    if let Some(abs) = tolerance_abs {
        if diff <= *abs {
            return true;
        }
    }
    false
}

pub fn dates_within(statement: NaiveDate, books: NaiveDate, tolerance_days: i32) -> bool {
    (statement - books).num_days().abs() <= i64::from(tolerance_days)
}

/// 匹配后的税额比对: IGST+CGST+SGST 合计不同则记为差异 (不影响匹配成立)
pub fn tax_discrepancies(record: &ExternalRecord, invoice: &Invoice) -> Vec<String> {
    let statement = record.tax_total();
    let books = invoice.tax_total();
    if statement == books {
        return Vec::new();
    }
    vec![format!(
        "Tax amount differs: statement {statement}, books {books} (difference {})",
        &statement - &books
    )]
}

/// 按销方税号 (大写) 预先分组的候选发票, 对账期间只读
#[derive(Debug, Default)]
pub struct CandidatePool {
    by_supplier: HashMap<String, Vec<Invoice>>,
    total: usize,
}

impl CandidatePool {
    /// 保持原有顺序; 无销方税号的发票无法参与匹配, 直接丢弃
    pub fn new(invoices: Vec<Invoice>) -> Self {
        let total = invoices.len();
        let mut by_supplier: HashMap<String, Vec<Invoice>> = HashMap::new();
        for invoice in invoices {
            if let Some(gstin) = invoice.supplier_gstin.as_deref().map(|g| g.trim().to_uppercase()) {
                by_supplier.entry(gstin).or_default().push(invoice);
            }
        }
        Self { by_supplier, total }
    }

    pub fn for_supplier(&self, gstin: &str) -> &[Invoice] {
        self.by_supplier
            .get(&gstin.trim().to_uppercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

/// 单个 (规则, 候选) 通过时的距离度量, 用于 BestScore 排序
#[derive(Debug, Clone)]
struct CandidateFit {
    amount_diff: BigDecimal,
    day_diff: i64,
}

pub struct Matcher {
    rules: Vec<MatchingRule>,
    strategy: MatchStrategy,
}

impl Matcher {
    /// 只保留启用规则, 按 (priority, id) 升序
    pub fn new(mut rules: Vec<MatchingRule>, strategy: MatchStrategy) -> Self {
        rules.retain(|r| r.is_active);
        rules.sort_by_key(|r| (r.priority, r.id));
        Self { rules, strategy }
    }

    pub fn rules(&self) -> &[MatchingRule] {
        &self.rules
    }

    pub fn strategy(&self) -> MatchStrategy {
        self.strategy
    }

    /// 评估一条报表行
    pub fn evaluate(&self, record: &ExternalRecord, candidates: &[Invoice]) -> Result<MatchResult, MatchError> {
        let candidates: Vec<&Invoice> = candidates
            .iter()
            .filter(|inv| {
                inv.supplier_gstin
                    .as_deref()
                    .is_some_and(|g| g.trim().eq_ignore_ascii_case(record.supplier_gstin.trim()))
            })
            .collect();
        if candidates.is_empty() {
            return Ok(MatchResult::no_match());
        }

        let winner = match self.strategy {
            MatchStrategy::FirstMatch => self.first_match(record, &candidates)?,
            MatchStrategy::BestScore => self.best_score(record, &candidates)?,
        };

        Ok(match winner {
            Some((rule, invoice)) => MatchResult {
                is_match: true,
                confidence: rule.confidence_score,
                matched_invoice_id: Some(invoice.id),
                discrepancies: tax_discrepancies(record, invoice),
                rule_id: Some(rule.id),
            },
            None => MatchResult::no_match(),
        })
    }

    /// 数据不完整的候选跳过, 仅在没有任何候选匹配时才返回其错误
    fn first_match<'a>(
        &'a self,
        record: &ExternalRecord,
        candidates: &[&'a Invoice],
    ) -> Result<Option<(&'a MatchingRule, &'a Invoice)>, MatchError> {
        let mut malformed = None;
        for rule in &self.rules {
            for &invoice in candidates {
                match check_rule(rule, record, invoice) {
                    Ok(Some(_)) => return Ok(Some((rule, invoice))),
                    Ok(None) => {}
                    Err(err) => {
                        malformed.get_or_insert(err);
                    }
                }
            }
        }
        malformed.map_or(Ok(None), Err)
    }

    fn best_score<'a>(
        &'a self,
        record: &ExternalRecord,
        candidates: &[&'a Invoice],
    ) -> Result<Option<(&'a MatchingRule, &'a Invoice)>, MatchError> {
        let mut best: Option<(&MatchingRule, usize, CandidateFit)> = None;
        let mut malformed = None;

        for rule in &self.rules {
            for (idx, invoice) in candidates.iter().enumerate() {
                let fit = match check_rule(rule, record, invoice) {
                    Ok(Some(fit)) => fit,
                    Ok(None) => continue,
                    Err(err) => {
                        malformed.get_or_insert(err);
                        continue;
                    }
                };
                let better = match &best {
                    None => true,
                    Some((best_rule, best_idx, best_fit)) => {
                        compare_fit(rule, idx, &fit, best_rule, *best_idx, best_fit) == Ordering::Less
                    }
                };
                if better {
                    best = Some((rule, idx, fit));
                }
            }
        }

        match (best, malformed) {
            (Some((rule, idx, _)), _) => Ok(Some((rule, candidates[idx]))),
            (None, Some(err)) => Err(err),
            (None, None) => Ok(None),
        }
    }
}

/// Less 表示 a 更优: 置信度高 -> priority 小 -> 金额差小 -> 天数差小 -> 候选靠前
fn compare_fit(
    a_rule: &MatchingRule,
    a_idx: usize,
    a_fit: &CandidateFit,
    b_rule: &MatchingRule,
    b_idx: usize,
    b_fit: &CandidateFit,
) -> Ordering {
    b_rule
        .confidence_score
        .cmp(&a_rule.confidence_score)
        .then_with(|| (a_rule.priority, a_rule.id).cmp(&(b_rule.priority, b_rule.id)))
        .then_with(|| a_fit.amount_diff.cmp(&b_fit.amount_diff))
        .then_with(|| a_fit.day_diff.cmp(&b_fit.day_diff))
        .then_with(|| a_idx.cmp(&b_idx))
}

/// 规则要求的比较全部通过时返回 Some
fn check_rule(
    rule: &MatchingRule,
    record: &ExternalRecord,
    invoice: &Invoice,
) -> Result<Option<CandidateFit>, MatchError> {
    if rule.match_document_number {
        let number = invoice.invoice_number.as_deref().ok_or(MatchError::MalformedCandidate {
            invoice_id: invoice.id,
            field: "invoice number",
        })?;
        if document_number_distance(&record.document_number, number, rule.fuzzy_threshold).is_none() {
            return Ok(None);
        }
    }

    if rule.match_amount
        && !amount_within_tolerance(
            &record.taxable_value,
            &invoice.taxable_value,
            rule.amount_tolerance_pct.as_ref(),
            rule.amount_tolerance_abs.as_ref(),
        )
    {
        return Ok(None);
    }

    let day_diff = match (rule.match_date, invoice.invoice_date) {
        (true, None) => {
            return Err(MatchError::MalformedCandidate {
                invoice_id: invoice.id,
                field: "invoice date",
            })
        }
        (true, Some(date)) => {
            if !dates_within(record.document_date, date, rule.date_tolerance_days) {
                return Ok(None);
            }
            (record.document_date - date).num_days().abs()
        }
        (false, date) => date.map_or(0, |d| (record.document_date - d).num_days().abs()),
    };

    Ok(Some(CandidateFit {
        amount_diff: (&record.taxable_value - &invoice.taxable_value).abs(),
        day_diff,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentType, MatchStatus, RecordDraft};
    use chrono::Utc;
    use std::str::FromStr;

    const SUPPLIER: &str = "27AAACR5055K1Z7";

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn record(number: &str, taxable: &str, on: &str) -> ExternalRecord {
        ExternalRecord::from_draft(
            1,
            1,
            RecordDraft {
                supplier_gstin: SUPPLIER.into(),
                supplier_name: None,
                document_number: number.into(),
                document_date: date(on),
                document_type: DocumentType::Invoice,
                taxable_value: dec(taxable),
                igst: dec("1800"),
                cgst: BigDecimal::zero(),
                sgst: BigDecimal::zero(),
                cess: BigDecimal::zero(),
                place_of_supply: None,
                reverse_charge: false,
                itc_eligible: true,
                itc_igst: dec("1800"),
                itc_cgst: BigDecimal::zero(),
                itc_sgst: BigDecimal::zero(),
                itc_cess: BigDecimal::zero(),
            },
        )
    }

    fn invoice(id: i64, number: &str, taxable: &str, on: &str) -> Invoice {
        Invoice {
            id,
            company_id: 1,
            supplier_gstin: Some(SUPPLIER.to_lowercase()),
            supplier_name: None,
            invoice_number: Some(number.into()),
            invoice_date: Some(date(on)),
            taxable_value: dec(taxable),
            igst: dec("1800"),
            cgst: BigDecimal::zero(),
            sgst: BigDecimal::zero(),
            cess: BigDecimal::zero(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn rule(
        id: i64,
        priority: i32,
        threshold: i32,
        pct: Option<&str>,
        abs: Option<&str>,
        days: i32,
        confidence: i32,
    ) -> MatchingRule {
        MatchingRule {
            id,
            company_id: 1,
            name: format!("rule-{id}"),
            priority,
            match_document_number: true,
            match_amount: true,
            match_date: true,
            fuzzy_threshold: threshold,
            amount_tolerance_pct: pct.map(dec),
            amount_tolerance_abs: abs.map(dec),
            date_tolerance_days: days,
            confidence_score: confidence,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn normalizes_document_numbers() {
        assert_eq!(normalize_document_number("inv/001-a"), "INV001A");
        assert_eq!(normalize_document_number(" INV_001 A "), "INV001A");
        assert_eq!(document_number_distance("INV/001-A", "INV001A", 0), Some(0));
        assert_eq!(document_number_distance("INV001", "INV002", 0), None);
        assert_eq!(document_number_distance("INV001", "INV002", 1), Some(1));
        assert_eq!(document_number_distance("INV001", "IN0099", 2), None);
    }

    #[test]
    fn absolute_tolerance_boundary() {
        let abs = dec("5.00");
        assert!(amount_within_tolerance(&dec("1005.00"), &dec("1000.00"), None, Some(&abs)));
        assert!(!amount_within_tolerance(&dec("1005.01"), &dec("1000.00"), None, Some(&abs)));
        assert!(!amount_within_tolerance(&dec("1006"), &dec("1000"), None, Some(&abs)));
        assert!(amount_within_tolerance(&dec("1000"), &dec("1000"), None, None));
        assert!(!amount_within_tolerance(&dec("1000.01"), &dec("1000"), None, None));
    }

    #[test]
    fn percentage_tolerance_uses_larger_amount() {
        let pct = dec("1");
        // 10 / 1000 * 100 = 1%
        assert!(amount_within_tolerance(&dec("990"), &dec("1000"), Some(&pct), None));
        assert!(!amount_within_tolerance(&dec("989"), &dec("1000"), Some(&pct), None));
    }

    #[test]
    fn worked_example_matches_cleanly() {
        let matcher = Matcher::new(vec![rule(1, 1, 2, None, None, 3, 95)], MatchStrategy::FirstMatch);
        let rec = record("INV/001-A", "10000.00", "2024-05-10");
        let result = matcher
            .evaluate(&rec, &[invoice(42, "INV001A", "10000.00", "2024-05-12")])
            .unwrap();

        assert!(result.is_match);
        assert_eq!(result.matched_invoice_id, Some(42));
        assert_eq!(result.confidence, 95);
        assert!(result.discrepancies.is_empty());
        assert_eq!(result.status(), MatchStatus::Matched);
    }

    #[test]
    fn date_outside_window_fails() {
        let matcher = Matcher::new(vec![rule(1, 1, 2, None, None, 1, 95)], MatchStrategy::FirstMatch);
        let rec = record("INV/001-A", "10000.00", "2024-05-10");
        let result = matcher
            .evaluate(&rec, &[invoice(42, "INV001A", "10000.00", "2024-05-12")])
            .unwrap();
        assert_eq!(result.status(), MatchStatus::Unmatched);
        assert_eq!(result.confidence, 0);
    }

    #[test]
    fn tax_difference_yields_partial_match() {
        let matcher = Matcher::new(vec![rule(1, 1, 0, None, None, 0, 100)], MatchStrategy::FirstMatch);
        let rec = record("INV-7", "5000", "2024-05-01");
        let mut inv = invoice(7, "INV-7", "5000", "2024-05-01");
        inv.igst = dec("1790");
        let result = matcher.evaluate(&rec, &[inv]).unwrap();
        assert_eq!(result.status(), MatchStatus::PartialMatch);
        assert_eq!(result.discrepancies.len(), 1);
        assert!(result.discrepancies[0].contains("Tax amount differs"));
    }

    #[test]
    fn strict_rule_wins_over_loose_rule() {
        let strict = rule(10, 1, 0, None, None, 0, 100);
        let loose = rule(20, 2, 5, Some("10"), Some("1000"), 60, 50);
        // 以逆序传入, 构造时按 priority 排序
        let matcher = Matcher::new(vec![loose, strict], MatchStrategy::FirstMatch);
        let rec = record("INV-1", "1000", "2024-05-01");
        let result = matcher.evaluate(&rec, &[invoice(1, "INV-1", "1000", "2024-05-01")]).unwrap();
        assert_eq!(result.confidence, 100);
        assert_eq!(result.rule_id, Some(10));
    }

    #[test]
    fn first_match_takes_first_candidate_under_winning_rule() {
        let matcher = Matcher::new(vec![rule(1, 1, 3, None, Some("50"), 10, 80)], MatchStrategy::FirstMatch);
        let rec = record("INV-100", "1000", "2024-05-10");
        let candidates = [
            invoice(1, "INV-101", "1040", "2024-05-15"),
            invoice(2, "INV-100", "1000", "2024-05-10"),
        ];
        let result = matcher.evaluate(&rec, &candidates).unwrap();
        assert_eq!(result.matched_invoice_id, Some(1));
    }

    #[test]
    fn best_score_prefers_closest_candidate() {
        let matcher = Matcher::new(vec![rule(1, 1, 3, None, Some("50"), 10, 80)], MatchStrategy::BestScore);
        let rec = record("INV-100", "1000", "2024-05-10");
        let candidates = [
            invoice(1, "INV-101", "1040", "2024-05-15"),
            invoice(2, "INV-100", "1000", "2024-05-10"),
        ];
        let result = matcher.evaluate(&rec, &candidates).unwrap();
        assert_eq!(result.matched_invoice_id, Some(2));
    }

    #[test]
    fn best_score_prefers_higher_confidence_rule() {
        let low_priority_high_conf = rule(2, 5, 0, None, None, 0, 99);
        let first = rule(1, 1, 3, None, Some("50"), 10, 60);
        let matcher = Matcher::new(vec![first, low_priority_high_conf], MatchStrategy::BestScore);
        let rec = record("INV-100", "1000", "2024-05-10");
        let result = matcher
            .evaluate(&rec, &[invoice(2, "INV-100", "1000", "2024-05-10")])
            .unwrap();
        assert_eq!(result.confidence, 99);
    }

    #[test]
    fn no_candidates_for_supplier_is_unmatched() {
        let matcher = Matcher::new(vec![rule(1, 1, 5, Some("50"), None, 365, 10)], MatchStrategy::FirstMatch);
        let rec = record("INV-1", "1000", "2024-05-01");
        let mut other = invoice(1, "INV-1", "1000", "2024-05-01");
        other.supplier_gstin = Some("29AAAAA0000A1Z5".into());
        let result = matcher.evaluate(&rec, &[other]).unwrap();
        assert_eq!(result, MatchResult::no_match());
    }

    #[test]
    fn inactive_rules_are_ignored() {
        let mut only = rule(1, 1, 0, None, None, 0, 100);
        only.is_active = false;
        let matcher = Matcher::new(vec![only], MatchStrategy::FirstMatch);
        assert!(matcher.rules().is_empty());
        let rec = record("INV-1", "1000", "2024-05-01");
        let result = matcher.evaluate(&rec, &[invoice(1, "INV-1", "1000", "2024-05-01")]).unwrap();
        assert!(!result.is_match);
    }

    #[test]
    fn malformed_candidate_is_reported() {
        let matcher = Matcher::new(vec![rule(1, 1, 0, None, None, 0, 100)], MatchStrategy::FirstMatch);
        let rec = record("INV-1", "1000", "2024-05-01");
        let mut broken = invoice(9, "INV-1", "1000", "2024-05-01");
        broken.invoice_date = None;
        let err = matcher.evaluate(&rec, &[broken]).unwrap_err();
        assert_eq!(
            err,
            MatchError::MalformedCandidate {
                invoice_id: 9,
                field: "invoice date"
            }
        );
    }

    #[test]
    fn malformed_candidate_does_not_block_valid_one() {
        let rec = record("INV-1", "1000", "2024-05-01");
        let mut unnumbered = invoice(8, "INV-1", "1000", "2024-05-01");
        unnumbered.invoice_number = None;
        let mut undated = invoice(9, "INV-1", "1000", "2024-05-01");
        undated.invoice_date = None;
        let candidates = [unnumbered, undated, invoice(10, "INV-1", "1000", "2024-05-01")];

        for strategy in [MatchStrategy::FirstMatch, MatchStrategy::BestScore] {
            let matcher = Matcher::new(vec![rule(1, 1, 0, None, None, 0, 100)], strategy);
            let result = matcher.evaluate(&rec, &candidates).unwrap();
            assert_eq!(result.status(), MatchStatus::Matched);
            assert_eq!(result.matched_invoice_id, Some(10));
        }
    }

    #[test]
    fn malformed_candidate_reported_when_nothing_matches() {
        let rec = record("INV-1", "1000", "2024-05-01");
        let mut unnumbered = invoice(8, "INV-1", "1000", "2024-05-01");
        unnumbered.invoice_number = None;
        let candidates = [unnumbered, invoice(10, "INV-2", "1000", "2024-05-01")];

        let matcher = Matcher::new(vec![rule(1, 1, 0, None, None, 0, 100)], MatchStrategy::BestScore);
        let err = matcher.evaluate(&rec, &candidates).unwrap_err();
        assert_eq!(
            err,
            MatchError::MalformedCandidate {
                invoice_id: 8,
                field: "invoice number"
            }
        );
    }

    #[test]
    fn evaluation_is_deterministic() {
        let matcher = Matcher::new(
            vec![rule(1, 1, 0, None, None, 0, 100), rule(2, 2, 2, Some("2"), None, 5, 75)],
            MatchStrategy::FirstMatch,
        );
        let rec = record("INV-55", "2000", "2024-05-03");
        let candidates = [
            invoice(3, "INV-56", "2010", "2024-05-04"),
            invoice(4, "INV-55", "2020", "2024-05-06"),
        ];
        let first = matcher.evaluate(&rec, &candidates).unwrap();
        for _ in 0..10 {
            assert_eq!(matcher.evaluate(&rec, &candidates).unwrap(), first);
        }
    }

    #[test]
    fn candidate_pool_groups_by_supplier() {
        let mut anonymous = invoice(3, "X", "1", "2024-05-01");
        anonymous.supplier_gstin = None;
        let pool = CandidatePool::new(vec![
            invoice(1, "A", "1", "2024-05-01"),
            invoice(2, "B", "1", "2024-05-01"),
            anonymous,
        ]);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.for_supplier(&SUPPLIER.to_lowercase()).len(), 2);
        assert!(pool.for_supplier("NOPE").is_empty());
    }
}
