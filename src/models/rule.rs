use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;

use crate::error::ReconError;

/// 匹配规则 (按 priority 升序执行, 首个全部通过的规则胜出)
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct MatchingRule {
    pub id: i64,
    pub company_id: i64,
    pub name: String,
    pub priority: i32,
    pub match_document_number: bool,
    pub match_amount: bool,
    pub match_date: bool,
    /// 单据号允许的最大编辑距离, 0 表示必须规范化后完全相等
    pub fuzzy_threshold: i32,
    /// 金额百分比容差 (如 1.5 表示 1.5%)
    pub amount_tolerance_pct: Option<BigDecimal>,
    /// 金额绝对值容差
    pub amount_tolerance_abs: Option<BigDecimal>,
    pub date_tolerance_days: i32,
    pub confidence_score: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// 新建规则请求
#[derive(Debug, Clone, Deserialize)]
pub struct NewMatchingRule {
    pub name: String,
    pub priority: i32,
    #[serde(default)]
    pub match_document_number: bool,
    #[serde(default)]
    pub match_amount: bool,
    #[serde(default)]
    pub match_date: bool,
    #[serde(default)]
    pub fuzzy_threshold: i32,
    pub amount_tolerance_pct: Option<BigDecimal>,
    pub amount_tolerance_abs: Option<BigDecimal>,
    #[serde(default)]
    pub date_tolerance_days: i32,
    pub confidence_score: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl NewMatchingRule {
    pub fn validate(&self) -> Result<(), ReconError> {
        if self.name.trim().is_empty() {
            return Err(ReconError::Validation("rule name is required".into()));
        }
        if !(self.match_document_number || self.match_amount || self.match_date) {
            return Err(ReconError::Validation(
                "rule must compare at least one of document number, amount, date".into(),
            ));
        }
        if !(0..=100).contains(&self.confidence_score) {
            return Err(ReconError::Validation(format!(
                "confidence score {} outside 0-100",
                self.confidence_score
            )));
        }
        if self.fuzzy_threshold < 0 || self.date_tolerance_days < 0 {
            return Err(ReconError::Validation("thresholds must not be negative".into()));
        }
        let negative = |v: &Option<BigDecimal>| v.as_ref().is_some_and(|t| *t < BigDecimal::zero());
        if negative(&self.amount_tolerance_pct) || negative(&self.amount_tolerance_abs) {
            return Err(ReconError::Validation("amount tolerances must not be negative".into()));
        }
        Ok(())
    }

    pub fn into_rule(self, id: i64, company_id: i64) -> MatchingRule {
        MatchingRule {
            id,
            company_id,
            name: self.name,
            priority: self.priority,
            match_document_number: self.match_document_number,
            match_amount: self.match_amount,
            match_date: self.match_date,
            fuzzy_threshold: self.fuzzy_threshold,
            amount_tolerance_pct: self.amount_tolerance_pct,
            amount_tolerance_abs: self.amount_tolerance_abs,
            date_tolerance_days: self.date_tolerance_days,
            confidence_score: self.confidence_score,
            is_active: self.is_active,
            created_at: Utc::now(),
        }
    }
}

/// 公司未配置规则时使用的内置阶梯: 严格 -> 模糊 -> 宽松
///
/// 内置规则的 id 为负数, 以免与持久化规则冲突
pub fn default_rules(company_id: i64) -> Vec<MatchingRule> {
    let dec = |s: &str| BigDecimal::from_str(s).ok();
    let now = Utc::now();
    vec![
        MatchingRule {
            id: -1,
            company_id,
            name: "exact".into(),
            priority: 1,
            match_document_number: true,
            match_amount: true,
            match_date: true,
            fuzzy_threshold: 0,
            amount_tolerance_pct: None,
            amount_tolerance_abs: None,
            date_tolerance_days: 0,
            confidence_score: 100,
            is_active: true,
            created_at: now,
        },
        MatchingRule {
            id: -2,
            company_id,
            name: "fuzzy".into(),
            priority: 2,
            match_document_number: true,
            match_amount: true,
            match_date: true,
            fuzzy_threshold: 2,
            amount_tolerance_pct: None,
            amount_tolerance_abs: dec("1.00"),
            date_tolerance_days: 3,
            confidence_score: 90,
            is_active: true,
            created_at: now,
        },
        MatchingRule {
            id: -3,
            company_id,
            name: "loose".into(),
            priority: 3,
            match_document_number: true,
            match_amount: true,
            match_date: true,
            fuzzy_threshold: 3,
            amount_tolerance_pct: dec("1"),
            amount_tolerance_abs: None,
            date_tolerance_days: 30,
            confidence_score: 70,
            is_active: true,
            created_at: now,
        },
    ]
}
