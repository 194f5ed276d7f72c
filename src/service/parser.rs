//! 外部进项税报表解析
//!
//! 报文为 JSON, 可带 `data` 外壳。`docdata` 下支持:
//! - `b2b`: 供应商发票
//! - `cdnr`: 贷项/借项通知单 (`typ` 区分)
//! - `impg` / `impgsez`: 进口货物报关单 (无供应商税号时记为 `IMPORT`)
//!
//! 明细行税额按税种汇总到统一的 [`RecordDraft`]。

use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use std::str::FromStr;

use crate::error::ReconError;
use crate::models::{DocumentType, ImportTotals, RecordDraft};

/// 进口报关单的占位供应商税号
pub const IMPORT_SUPPLIER: &str = "IMPORT";

/// 支持的日期格式, 依次尝试
const DATE_FORMATS: [&str; 4] = ["%d-%m-%Y", "%d/%m/%Y", "%Y-%m-%d", "%d-%b-%Y"];

/// 解析结果: 抬头 + 统一记录
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub gstin: Option<String>,
    pub period: Option<String>,
    pub records: Vec<RecordDraft>,
}

impl ParsedDocument {
    /// 批次汇总; 贷项通知单按负数计入
    pub fn totals(&self) -> ImportTotals {
        let mut totals = ImportTotals {
            gstin: self.gstin.clone(),
            total_records: self.records.len() as i32,
            ..ImportTotals::default()
        };

        for record in &self.records {
            match record.document_type {
                DocumentType::Invoice => totals.b2b_count += 1,
                DocumentType::CreditNote | DocumentType::DebitNote => totals.cdn_count += 1,
                DocumentType::ImportEntry => totals.impg_count += 1,
            }

            let sign = if record.document_type.is_credit() {
                BigDecimal::from(-1)
            } else {
                BigDecimal::from(1)
            };
            totals.total_taxable_value += &record.taxable_value * &sign;
            totals.total_igst += &record.igst * &sign;
            totals.total_cgst += &record.cgst * &sign;
            totals.total_sgst += &record.sgst * &sign;
            totals.total_cess += &record.cess * &sign;
            totals.itc_available += record.itc_total() * &sign;
        }

        totals
    }
}

/// 金额: 接受 JSON 数字或数字字符串 (允许千分位逗号)
#[derive(Debug, Clone, Default)]
struct Amount(BigDecimal);

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let text = match &value {
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::String(s) if s.trim().is_empty() => return Ok(Amount::default()),
            serde_json::Value::String(s) => s.trim().replace(',', ""),
            other => return Err(serde::de::Error::custom(format!("invalid amount {other}"))),
        };
        BigDecimal::from_str(&text)
            .map(Amount)
            .map_err(|e| serde::de::Error::custom(format!("invalid amount '{text}': {e}")))
    }
}

fn amount(value: &Option<Amount>) -> BigDecimal {
    value.as_ref().map(|a| a.0.clone()).unwrap_or_else(BigDecimal::zero)
}

#[derive(Debug, Deserialize)]
struct StatementData {
    gstin: Option<String>,
    rtnprd: Option<String>,
    #[serde(default)]
    docdata: DocData,
}

#[derive(Debug, Default, Deserialize)]
struct DocData {
    #[serde(default)]
    b2b: Vec<SupplierInvoices>,
    #[serde(default)]
    cdnr: Vec<SupplierNotes>,
    #[serde(default)]
    impg: Vec<BillOfEntry>,
    #[serde(default)]
    impgsez: Vec<BillOfEntry>,
}

/// 明细行 / 单据级税额 (两处字段相同)
#[derive(Debug, Default, Deserialize)]
struct TaxLine {
    txval: Option<Amount>,
    igst: Option<Amount>,
    cgst: Option<Amount>,
    sgst: Option<Amount>,
    cess: Option<Amount>,
}

#[derive(Debug, Default)]
struct TaxSums {
    taxable_value: BigDecimal,
    igst: BigDecimal,
    cgst: BigDecimal,
    sgst: BigDecimal,
    cess: BigDecimal,
}

impl TaxSums {
    /// 有明细行时按行汇总, 否则取单据级字段
    fn collect(items: &[TaxLine], header: &TaxLine) -> Self {
        let lines: Vec<&TaxLine> = if items.is_empty() { vec![header] } else { items.iter().collect() };
        let mut sums = TaxSums::default();
        for line in lines {
            sums.taxable_value += amount(&line.txval);
            sums.igst += amount(&line.igst);
            sums.cgst += amount(&line.cgst);
            sums.sgst += amount(&line.sgst);
            sums.cess += amount(&line.cess);
        }
        sums
    }
}

#[derive(Debug, Deserialize)]
struct SupplierInvoices {
    ctin: String,
    trdnm: Option<String>,
    #[serde(default)]
    inv: Vec<InvoiceEntry>,
}

#[derive(Debug, Deserialize)]
struct InvoiceEntry {
    inum: String,
    dt: String,
    pos: Option<String>,
    rev: Option<String>,
    itcavl: Option<String>,
    #[serde(default)]
    items: Vec<TaxLine>,
    #[serde(flatten)]
    header: TaxLine,
}

#[derive(Debug, Deserialize)]
struct SupplierNotes {
    ctin: String,
    trdnm: Option<String>,
    #[serde(default)]
    nt: Vec<NoteEntry>,
}

#[derive(Debug, Deserialize)]
struct NoteEntry {
    ntnum: String,
    #[serde(alias = "ntdt")]
    dt: String,
    typ: String,
    pos: Option<String>,
    rev: Option<String>,
    itcavl: Option<String>,
    #[serde(default)]
    items: Vec<TaxLine>,
    #[serde(flatten)]
    header: TaxLine,
}

#[derive(Debug, Deserialize)]
struct BillOfEntry {
    boenum: String,
    boedt: String,
    portcode: Option<String>,
    /// 经济特区供应商 (impgsez)
    sgstin: Option<String>,
    trdnm: Option<String>,
    txval: Option<Amount>,
    igst: Option<Amount>,
    cess: Option<Amount>,
}

/// 解析报文日期; 无法解析时返回 None, 由调用方报错
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

fn required_date(raw: &str, document: &str, supplier: &str) -> Result<NaiveDate, ReconError> {
    parse_date(raw).ok_or_else(|| {
        ReconError::Validation(format!(
            "document '{document}' from {supplier}: unparseable date '{raw}'"
        ))
    })
}

fn required_number(raw: &str, supplier: &str) -> Result<String, ReconError> {
    let number = raw.trim();
    if number.is_empty() {
        return Err(ReconError::Validation(format!("document from {supplier} has an empty number")));
    }
    Ok(number.to_string())
}

fn note_type(raw: &str, document: &str) -> Result<DocumentType, ReconError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "c" | "cr" | "credit" | "credit note" | "credit_note" => Ok(DocumentType::CreditNote),
        "d" | "dr" | "debit" | "debit note" | "debit_note" => Ok(DocumentType::DebitNote),
        other => Err(ReconError::Validation(format!(
            "note '{document}': unknown note type '{other}'"
        ))),
    }
}

fn is_eligible(itcavl: &Option<String>) -> bool {
    !itcavl.as_deref().is_some_and(|v| v.trim().eq_ignore_ascii_case("N"))
}

fn is_yes(flag: &Option<String>) -> bool {
    flag.as_deref().is_some_and(|v| v.trim().eq_ignore_ascii_case("Y"))
}

#[allow(clippy::too_many_arguments)]
fn draft(
    supplier_gstin: String,
    supplier_name: Option<String>,
    document_number: String,
    document_date: NaiveDate,
    document_type: DocumentType,
    sums: TaxSums,
    place_of_supply: Option<String>,
    reverse_charge: bool,
    itc_eligible: bool,
) -> RecordDraft {
    let claimable = |v: &BigDecimal| if itc_eligible { v.clone() } else { BigDecimal::zero() };
    RecordDraft {
        itc_igst: claimable(&sums.igst),
        itc_cgst: claimable(&sums.cgst),
        itc_sgst: claimable(&sums.sgst),
        itc_cess: claimable(&sums.cess),
        supplier_gstin,
        supplier_name,
        document_number,
        document_date,
        document_type,
        taxable_value: sums.taxable_value,
        igst: sums.igst,
        cgst: sums.cgst,
        sgst: sums.sgst,
        cess: sums.cess,
        place_of_supply,
        reverse_charge,
        itc_eligible,
    }
}

fn normalize_gstin(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// 解析外部报表为统一记录
pub fn parse_document(payload: &[u8]) -> Result<ParsedDocument, ReconError> {
    let root: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|e| ReconError::Validation(format!("document is not valid JSON: {e}")))?;

    let body = match root.get("data") {
        Some(data) if data.is_object() => data.clone(),
        _ => root,
    };
    let data: StatementData = serde_json::from_value(body)
        .map_err(|e| ReconError::Validation(format!("unexpected document layout: {e}")))?;

    let mut records = Vec::new();

    for supplier in &data.docdata.b2b {
        let gstin = normalize_gstin(&supplier.ctin);
        for inv in &supplier.inv {
            let number = required_number(&inv.inum, &gstin)?;
            let date = required_date(&inv.dt, &number, &gstin)?;
            records.push(draft(
                gstin.clone(),
                supplier.trdnm.clone(),
                number,
                date,
                DocumentType::Invoice,
                TaxSums::collect(&inv.items, &inv.header),
                inv.pos.clone(),
                is_yes(&inv.rev),
                is_eligible(&inv.itcavl),
            ));
        }
    }

    for supplier in &data.docdata.cdnr {
        let gstin = normalize_gstin(&supplier.ctin);
        for note in &supplier.nt {
            let number = required_number(&note.ntnum, &gstin)?;
            let doc_type = note_type(&note.typ, &number)?;
            let date = required_date(&note.dt, &number, &gstin)?;
            records.push(draft(
                gstin.clone(),
                supplier.trdnm.clone(),
                number,
                date,
                doc_type,
                TaxSums::collect(&note.items, &note.header),
                note.pos.clone(),
                is_yes(&note.rev),
                is_eligible(&note.itcavl),
            ));
        }
    }

    for entry in data.docdata.impg.iter().chain(&data.docdata.impgsez) {
        let gstin = entry
            .sgstin
            .as_deref()
            .map(normalize_gstin)
            .filter(|g| !g.is_empty())
            .unwrap_or_else(|| IMPORT_SUPPLIER.to_string());
        let name = entry.trdnm.clone().or_else(|| {
            Some(match entry.portcode.as_deref() {
                Some(port) => format!("Import of goods ({port})"),
                None => "Import of goods".to_string(),
            })
        });
        let number = required_number(&entry.boenum, &gstin)?;
        let date = required_date(&entry.boedt, &number, &gstin)?;
        let sums = TaxSums {
            taxable_value: amount(&entry.txval),
            igst: amount(&entry.igst),
            cess: amount(&entry.cess),
            ..TaxSums::default()
        };
        records.push(draft(gstin, name, number, date, DocumentType::ImportEntry, sums, None, false, true));
    }

    if records.is_empty() {
        return Err(ReconError::Validation("document contains no records".into()));
    }

    Ok(ParsedDocument {
        gstin: data.gstin.as_deref().map(normalize_gstin),
        period: data.rtnprd.map(|p| p.trim().to_string()),
        records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    const SAMPLE: &str = r#"{
        "data": {
            "gstin": "29aabcu9603r1zj",
            "rtnprd": "052024",
            "docdata": {
                "b2b": [{
                    "ctin": "27AAACR5055K1Z7",
                    "trdnm": "Reliance Supplies",
                    "inv": [{
                        "inum": "INV/001-A", "dt": "10-05-2024", "val": 11800, "pos": "29",
                        "rev": "N", "itcavl": "Y",
                        "items": [
                            {"num": 1, "rt": 18, "txval": 6000, "igst": 1080, "cess": 0},
                            {"num": 2, "rt": 18, "txval": "4000.00", "igst": "720.00"}
                        ]
                    }, {
                        "inum": "INV-002", "dt": "2024-05-20", "itcavl": "N",
                        "txval": 500, "cgst": 45, "sgst": 45
                    }]
                }],
                "cdnr": [{
                    "ctin": "27AAACR5055K1Z7",
                    "nt": [{"ntnum": "CN-9", "dt": "15/05/2024", "typ": "C",
                            "items": [{"txval": 1000, "igst": 180}]}]
                }],
                "impg": [{"boenum": "7654321", "boedt": "03-05-2024", "portcode": "INNSA1",
                          "txval": 20000, "igst": 3600, "cess": 100}]
            }
        }
    }"#;

    #[test]
    fn parses_all_sections() {
        let doc = parse_document(SAMPLE.as_bytes()).unwrap();
        assert_eq!(doc.gstin.as_deref(), Some("29AABCU9603R1ZJ"));
        assert_eq!(doc.period.as_deref(), Some("052024"));
        assert_eq!(doc.records.len(), 4);

        let inv = &doc.records[0];
        assert_eq!(inv.document_type, DocumentType::Invoice);
        assert_eq!(inv.document_number, "INV/001-A");
        assert_eq!(inv.document_date, NaiveDate::from_ymd_opt(2024, 5, 10).unwrap());
        assert_eq!(inv.taxable_value, dec("10000"));
        assert_eq!(inv.igst, dec("1800"));
        assert_eq!(inv.itc_igst, dec("1800"));
        assert_eq!(inv.place_of_supply.as_deref(), Some("29"));

        let header_only = &doc.records[1];
        assert_eq!(header_only.taxable_value, dec("500"));
        assert_eq!(header_only.tax_total(), dec("90"));
        assert!(!header_only.itc_eligible);
        assert_eq!(header_only.itc_total(), BigDecimal::zero());

        let note = &doc.records[2];
        assert_eq!(note.document_type, DocumentType::CreditNote);
        assert_eq!(note.document_date, NaiveDate::from_ymd_opt(2024, 5, 15).unwrap());

        let boe = &doc.records[3];
        assert_eq!(boe.document_type, DocumentType::ImportEntry);
        assert_eq!(boe.supplier_gstin, IMPORT_SUPPLIER);
        assert_eq!(boe.supplier_name.as_deref(), Some("Import of goods (INNSA1)"));
        assert_eq!(boe.itc_cess, dec("100"));
    }

    #[test]
    fn totals_net_off_credit_notes() {
        let doc = parse_document(SAMPLE.as_bytes()).unwrap();
        let totals = doc.totals();
        assert_eq!(totals.total_records, 4);
        assert_eq!(totals.b2b_count, 2);
        assert_eq!(totals.cdn_count, 1);
        assert_eq!(totals.impg_count, 1);
        // 10000 + 500 - 1000 + 20000
        assert_eq!(totals.total_taxable_value, dec("29500"));
        // 1800 (eligible) + 0 (ineligible) - 180 + 3600 + 100
        assert_eq!(totals.itc_available, dec("5320"));
    }

    #[test]
    fn accepts_bare_data_object() {
        let bare = r#"{"gstin": "X", "docdata": {"b2b": [{"ctin": "A", "inv": [
            {"inum": "1", "dt": "01-05-2024", "txval": 1}]}]}}"#;
        let doc = parse_document(bare.as_bytes()).unwrap();
        assert_eq!(doc.records.len(), 1);
    }

    #[test]
    fn unparseable_date_fails_loudly() {
        let bad = r#"{"docdata": {"b2b": [{"ctin": "A", "inv": [
            {"inum": "1", "dt": "31st May", "txval": 1}]}]}}"#;
        let err = parse_document(bad.as_bytes()).unwrap_err();
        assert!(matches!(err, ReconError::Validation(ref msg) if msg.contains("31st May")));
    }

    #[test]
    fn unknown_note_type_is_rejected() {
        let bad = r#"{"docdata": {"cdnr": [{"ctin": "A", "nt": [
            {"ntnum": "1", "dt": "01-05-2024", "typ": "X"}]}]}}"#;
        assert!(matches!(parse_document(bad.as_bytes()), Err(ReconError::Validation(_))));
    }

    #[test]
    fn rejects_malformed_and_empty_documents() {
        assert!(matches!(parse_document(b"<xml/>"), Err(ReconError::Validation(_))));
        assert!(matches!(parse_document(br#"{"docdata": {}}"#), Err(ReconError::Validation(_))));
        assert!(matches!(
            parse_document(br#"{"docdata": {"b2b": "oops"}}"#),
            Err(ReconError::Validation(_))
        ));
    }

    #[test]
    fn date_layouts() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 10);
        assert_eq!(parse_date("10-05-2024"), expected);
        assert_eq!(parse_date("10/05/2024"), expected);
        assert_eq!(parse_date("2024-05-10"), expected);
        assert_eq!(parse_date("10-May-2024"), expected);
        assert_eq!(parse_date("May 10"), None);
    }
}
