//! Cost accounting and budget enforcement

mod budget;
mod ledger;

pub use budget::{
    AlertAction, AlertThreshold, Budget, BudgetAlert, BudgetExceeded, BudgetPeriod,
};
pub use ledger::{
    CostLedger, CostRecord, CostSummary, DailyCost, SpendBreakdown, SummaryPeriod,
    DEFAULT_RETENTION_DAYS,
};
