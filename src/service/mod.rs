pub mod actions;
pub mod dedup;
pub mod lookup;
pub mod matcher;
pub mod parser;
pub mod reconciler;

pub use actions::ActionService;
pub use lookup::{GstStateTable, StateCodeLookup};
pub use matcher::{MatchStrategy, Matcher};
pub use reconciler::ReconciliationService;
