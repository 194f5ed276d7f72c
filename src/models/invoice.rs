use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 账簿中的进项发票 (候选)
///
/// 号码、日期、销方税号来自外部发票库, 可能缺失
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Invoice {
    pub id: i64,
    pub company_id: i64,
    pub supplier_gstin: Option<String>,
    pub supplier_name: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub taxable_value: BigDecimal,
    pub igst: BigDecimal,
    pub cgst: BigDecimal,
    pub sgst: BigDecimal,
    pub cess: BigDecimal,
}

impl Invoice {
    /// 三项辖区税额合计 (IGST + CGST + SGST)
    pub fn tax_total(&self) -> BigDecimal {
        &self.igst + &self.cgst + &self.sgst
    }
}

/// 候选发票查询条件
#[derive(Debug, Clone, Default)]
pub struct InvoiceFilter {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    /// 仅返回这些销方税号 (大小写不敏感); None 表示不限
    pub supplier_gstins: Option<Vec<String>>,
}

impl InvoiceFilter {
    pub fn accepts(&self, invoice: &Invoice) -> bool {
        if let Some(date) = invoice.invoice_date {
            if self.date_from.is_some_and(|from| date < from) || self.date_to.is_some_and(|to| date > to) {
                return false;
            }
        }
        match (&self.supplier_gstins, &invoice.supplier_gstin) {
            (Some(wanted), Some(gstin)) => wanted.iter().any(|w| w.eq_ignore_ascii_case(gstin)),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}
