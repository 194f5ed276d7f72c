pub mod import;
pub mod invoice;
pub mod page;
pub mod period;
pub mod record;
pub mod result;
pub mod rule;
pub mod summary;

pub use import::{Import, ImportStatus, ImportSummary, ImportTotals, MatchCounts, NewImport};
pub use invoice::{Invoice, InvoiceFilter};
pub use page::{Page, PageRequest};
pub use period::ReturnPeriod;
pub use record::{
    ActionStatus, DocumentType, ExternalRecord, MatchOutcome, MatchStatus, RecordAction, RecordDraft,
    RecordFilter,
};
pub use result::MatchResult;
pub use rule::{default_rules, MatchingRule, NewMatchingRule};
pub use summary::{
    ItcComparison, ItcComponentComparison, PeriodSummary, ReconciliationSummary, SupplierSummary,
};
