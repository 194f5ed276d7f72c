use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::record::{MatchOutcome, MatchStatus};

/// 单条报表行的一次匹配评估结果 (不单独持久化)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub is_match: bool,
    pub confidence: i32,
    pub matched_invoice_id: Option<i64>,
    pub discrepancies: Vec<String>,
    pub rule_id: Option<i64>,
}

impl MatchResult {
    pub fn no_match() -> Self {
        Self {
            is_match: false,
            confidence: 0,
            matched_invoice_id: None,
            discrepancies: Vec::new(),
            rule_id: None,
        }
    }

    /// 派生匹配状态: 有差异即为部分匹配
    pub fn status(&self) -> MatchStatus {
        match (self.is_match, self.discrepancies.is_empty()) {
            (false, _) => MatchStatus::Unmatched,
            (true, true) => MatchStatus::Matched,
            (true, false) => MatchStatus::PartialMatch,
        }
    }

    pub fn into_outcome(self) -> MatchOutcome {
        let status = self.status();
        MatchOutcome {
            status,
            matched_invoice_id: self.matched_invoice_id,
            matched_rule_id: self.rule_id,
            confidence: self.confidence,
            discrepancies: self.discrepancies,
            matched_at: self.is_match.then(Utc::now),
        }
    }
}
