//! Budget ceilings, alert thresholds, and calendar windows

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Accounting window a ceiling applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPeriod {
    Daily,
    Weekly,
    Monthly,
    Annual,
}

impl BudgetPeriod {
    pub const ALL: [BudgetPeriod; 4] = [
        BudgetPeriod::Daily,
        BudgetPeriod::Weekly,
        BudgetPeriod::Monthly,
        BudgetPeriod::Annual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetPeriod::Daily => "daily",
            BudgetPeriod::Weekly => "weekly",
            BudgetPeriod::Monthly => "monthly",
            BudgetPeriod::Annual => "annual",
        }
    }

    /// Start of the calendar window containing `now`, in UTC
    ///
    /// Weeks start on Monday.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let date = now.date_naive();
        let start = match self {
            BudgetPeriod::Daily => date,
            BudgetPeriod::Weekly => {
                date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
            }
            BudgetPeriod::Monthly => date.with_day(1).unwrap_or(date),
            BudgetPeriod::Annual => NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date),
        };
        midnight(start)
    }
}

impl fmt::Display for BudgetPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// What happens when a threshold is crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertAction {
    /// Log and surface only
    Warn,
    /// Refuse further dispatch until the window rolls over
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlertThreshold {
    /// Percentage of the ceiling, in (0, 100]
    pub percentage: f64,
    pub action: AlertAction,
}

/// Spend ceilings in USD with their alert thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Budget {
    #[serde(default)]
    pub daily: Option<f64>,
    #[serde(default)]
    pub weekly: Option<f64>,
    #[serde(default)]
    pub monthly: Option<f64>,
    #[serde(default)]
    pub annual: Option<f64>,
    #[serde(default = "default_alerts")]
    pub alerts: Vec<AlertThreshold>,
}

fn default_alerts() -> Vec<AlertThreshold> {
    vec![
        AlertThreshold {
            percentage: 80.0,
            action: AlertAction::Warn,
        },
        AlertThreshold {
            percentage: 95.0,
            action: AlertAction::Stop,
        },
    ]
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            daily: None,
            weekly: None,
            monthly: None,
            annual: None,
            alerts: default_alerts(),
        }
    }
}

impl Budget {
    /// Ceiling for one window, if configured
    pub fn limit(&self, period: BudgetPeriod) -> Option<f64> {
        match period {
            BudgetPeriod::Daily => self.daily,
            BudgetPeriod::Weekly => self.weekly,
            BudgetPeriod::Monthly => self.monthly,
            BudgetPeriod::Annual => self.annual,
        }
    }

    pub fn with_limit(mut self, period: BudgetPeriod, limit: f64) -> Self {
        let slot = match period {
            BudgetPeriod::Daily => &mut self.daily,
            BudgetPeriod::Weekly => &mut self.weekly,
            BudgetPeriod::Monthly => &mut self.monthly,
            BudgetPeriod::Annual => &mut self.annual,
        };
        *slot = Some(limit);
        self
    }

    pub fn with_alerts(mut self, alerts: Vec<AlertThreshold>) -> Self {
        self.alerts = alerts;
        self
    }
}

/// A threshold currently exceeded in its window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetAlert {
    pub period: BudgetPeriod,
    pub action: AlertAction,
    pub percentage: f64,
    pub spent: f64,
    pub limit: f64,
    pub window_start: DateTime<Utc>,
}

impl BudgetAlert {
    pub fn is_stop(&self) -> bool {
        self.action == AlertAction::Stop
    }

    /// Same threshold in the same window
    pub(crate) fn same_trigger(&self, other: &BudgetAlert) -> bool {
        self.period == other.period
            && self.action == other.action
            && self.percentage == other.percentage
            && self.window_start == other.window_start
    }
}

/// Dispatch refused by a tripped `stop` threshold
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{period} budget exceeded: spent ${spent:.4} of ${limit:.4}")]
pub struct BudgetExceeded {
    pub period: BudgetPeriod,
    pub spent: f64,
    pub limit: f64,
}
