//! Append-only cost records with budget evaluation

use super::budget::{midnight, Budget, BudgetAlert, BudgetExceeded, BudgetPeriod};
use crate::protocol::{ModelResponse, RequestKind, TokenUsage};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// Default retention window for records
pub const DEFAULT_RETENTION_DAYS: i64 = 90;

/// One served request's spend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cost: f64,
    pub kind: RequestKind,
    pub timestamp: DateTime<Utc>,
}

impl CostRecord {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        usage: TokenUsage,
        cost: f64,
        kind: RequestKind,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            cost,
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn from_response(response: &ModelResponse, kind: RequestKind) -> Self {
        Self::new(
            response.provider(),
            response.model.clone(),
            response.usage,
            response.cost,
            kind,
        )
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    fn tokens(&self) -> u64 {
        u64::from(self.prompt_tokens) + u64::from(self.completion_tokens)
    }
}

/// Period selector for [`CostLedger::summary`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryPeriod {
    Day,
    Week,
    Month,
    Year,
    /// Everything inside the retention window
    All,
}

impl SummaryPeriod {
    fn window(&self) -> Option<BudgetPeriod> {
        match self {
            SummaryPeriod::Day => Some(BudgetPeriod::Daily),
            SummaryPeriod::Week => Some(BudgetPeriod::Weekly),
            SummaryPeriod::Month => Some(BudgetPeriod::Monthly),
            SummaryPeriod::Year => Some(BudgetPeriod::Annual),
            SummaryPeriod::All => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpendBreakdown {
    pub cost: f64,
    pub requests: u64,
    pub tokens: u64,
}

impl SpendBreakdown {
    fn add(&mut self, record: &CostRecord) {
        self.cost += record.cost;
        self.requests += 1;
        self.tokens += record.tokens();
    }
}

/// Aggregated spend for one period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub period: SummaryPeriod,
    /// Start of the aggregated window; `None` for [`SummaryPeriod::All`]
    pub since: Option<DateTime<Utc>>,
    pub total: SpendBreakdown,
    pub by_provider: BTreeMap<String, SpendBreakdown>,
    pub by_model: BTreeMap<String, SpendBreakdown>,
    pub by_kind: BTreeMap<RequestKind, SpendBreakdown>,
}

/// Spend for one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCost {
    pub date: NaiveDate,
    pub cost: f64,
    pub requests: u64,
}

#[derive(Debug)]
struct LedgerState {
    records: Vec<CostRecord>,
    budget: Budget,
    active_alerts: Vec<BudgetAlert>,
}

impl LedgerState {
    fn purge(&mut self, cutoff: DateTime<Utc>) {
        let before = self.records.len();
        self.records.retain(|r| r.timestamp >= cutoff);
        let purged = before - self.records.len();
        if purged > 0 {
            debug!("Purged {} cost records older than {}", purged, cutoff);
        }
    }

    fn spent_since(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        self.records
            .iter()
            .filter(|r| r.timestamp >= start && r.timestamp <= now)
            .map(|r| r.cost)
            .sum()
    }

    /// Every threshold exceeded in the window containing `now`
    fn evaluate(&self, now: DateTime<Utc>) -> Vec<BudgetAlert> {
        let mut alerts = Vec::new();
        for period in BudgetPeriod::ALL {
            let Some(limit) = self.budget.limit(period) else {
                continue;
            };
            let window_start = period.window_start(now);
            let spent = self.spent_since(window_start, now);
            for threshold in &self.budget.alerts {
                if spent > limit * threshold.percentage / 100.0 {
                    alerts.push(BudgetAlert {
                        period,
                        action: threshold.action,
                        percentage: threshold.percentage,
                        spent,
                        limit,
                        window_start,
                    });
                }
            }
        }
        alerts
    }

    /// Replace the active set, logging thresholds crossed for the first time
    fn refresh_alerts(&mut self, now: DateTime<Utc>) -> Vec<BudgetAlert> {
        let alerts = self.evaluate(now);
        for alert in &alerts {
            let is_new = !self.active_alerts.iter().any(|a| a.same_trigger(alert));
            if is_new {
                warn!(
                    period = %alert.period,
                    action = ?alert.action,
                    spent = alert.spent,
                    limit = alert.limit,
                    "Spend crossed {}% of the {} budget",
                    alert.percentage,
                    alert.period
                );
            }
        }
        self.active_alerts = alerts.clone();
        alerts
    }
}

/// In-memory cost ledger
///
/// Windows are calendar periods in UTC. Methods suffixed `_at` take the
/// current time explicitly; the plain forms use the wall clock.
#[derive(Debug)]
pub struct CostLedger {
    state: Mutex<LedgerState>,
    retention: Duration,
}

impl Default for CostLedger {
    fn default() -> Self {
        Self::new(Budget::default())
    }
}

impl CostLedger {
    pub fn new(budget: Budget) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                records: Vec::new(),
                budget,
                active_alerts: Vec::new(),
            }),
            retention: Duration::days(DEFAULT_RETENTION_DAYS),
        }
    }

    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention = Duration::days(days);
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a record and return every threshold now exceeded
    pub fn record(&self, record: CostRecord) -> Vec<BudgetAlert> {
        self.record_at(record, Utc::now())
    }

    pub fn record_at(&self, record: CostRecord, now: DateTime<Utc>) -> Vec<BudgetAlert> {
        let mut state = self.state();
        state.purge(now - self.retention);
        debug!(
            provider = %record.provider,
            model = %record.model,
            cost = record.cost,
            "Recording cost"
        );
        state.records.push(record);
        state.refresh_alerts(now)
    }

    /// Refuse dispatch while a `stop` threshold is exceeded in a current window
    pub fn check_dispatch(&self, now: DateTime<Utc>) -> Result<(), BudgetExceeded> {
        let state = self.state();
        match state.evaluate(now).into_iter().find(BudgetAlert::is_stop) {
            Some(alert) => Err(BudgetExceeded {
                period: alert.period,
                spent: alert.spent,
                limit: alert.limit,
            }),
            None => Ok(()),
        }
    }

    /// Alerts retained from the last evaluation
    pub fn active_alerts(&self) -> Vec<BudgetAlert> {
        self.state().active_alerts.clone()
    }

    pub fn budget(&self) -> Budget {
        self.state().budget.clone()
    }

    /// Replace the ceilings and re-evaluate the active alerts
    pub fn update_budget(&self, budget: Budget) -> Vec<BudgetAlert> {
        let mut state = self.state();
        state.budget = budget;
        state.refresh_alerts(Utc::now())
    }

    pub fn summary(&self, period: SummaryPeriod) -> CostSummary {
        self.summary_at(period, Utc::now())
    }

    pub fn summary_at(&self, period: SummaryPeriod, now: DateTime<Utc>) -> CostSummary {
        let mut state = self.state();
        state.purge(now - self.retention);

        let since = period.window().map(|w| w.window_start(now));
        let mut summary = CostSummary {
            period,
            since,
            total: SpendBreakdown::default(),
            by_provider: BTreeMap::new(),
            by_model: BTreeMap::new(),
            by_kind: BTreeMap::new(),
        };

        let in_window = state
            .records
            .iter()
            .filter(|r| since.is_none_or(|start| r.timestamp >= start) && r.timestamp <= now);
        for record in in_window {
            summary.total.add(record);
            summary
                .by_provider
                .entry(record.provider.clone())
                .or_default()
                .add(record);
            summary
                .by_model
                .entry(record.model.clone())
                .or_default()
                .add(record);
            summary.by_kind.entry(record.kind).or_default().add(record);
        }
        summary
    }

    /// Spend per calendar day for the trailing `days`, oldest first
    pub fn cost_trends(&self, days: u32) -> Vec<DailyCost> {
        self.cost_trends_at(days, Utc::now())
    }

    pub fn cost_trends_at(&self, days: u32, now: DateTime<Utc>) -> Vec<DailyCost> {
        if days == 0 {
            return Vec::new();
        }

        let mut state = self.state();
        state.purge(now - self.retention);

        let today = now.date_naive();
        let first = today - Duration::days(i64::from(days) - 1);
        let mut trend: Vec<DailyCost> = (0..i64::from(days))
            .map(|offset| DailyCost {
                date: first + Duration::days(offset),
                cost: 0.0,
                requests: 0,
            })
            .collect();

        let start = midnight(first);
        for record in state
            .records
            .iter()
            .filter(|r| r.timestamp >= start && r.timestamp <= now)
        {
            let index = (record.timestamp.date_naive() - first).num_days();
            if let Some(day) = usize::try_from(index).ok().and_then(|i| trend.get_mut(i)) {
                day.cost += record.cost;
                day.requests += 1;
            }
        }
        trend
    }

    pub fn len(&self) -> usize {
        self.state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
