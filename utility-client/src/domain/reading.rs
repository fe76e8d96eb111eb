use serde::Serialize;
use time::{Date, OffsetDateTime};

/// A monetary amount that is either confirmed by the provider or not yet
/// known. `Unconfirmed` is semantically distinct from `Known(0.0)`: the
/// former means "no price attached yet", the latter "confirmed free".
///
/// Serializes untagged, so `Unconfirmed` becomes JSON `null` at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cost {
    Known(f64),
    Unconfirmed,
}

impl Default for Cost {
    fn default() -> Self {
        Cost::Unconfirmed
    }
}

impl Cost {
    pub fn is_known(&self) -> bool {
        matches!(self, Cost::Known(_))
    }

    /// Whether this total still needs bill-based estimation: either no cost
    /// was ever reported, or the reported total is exactly zero.
    pub fn needs_estimation(&self) -> bool {
        match self {
            Cost::Unconfirmed => true,
            Cost::Known(v) => *v == 0.0,
        }
    }
}

/// One reading normalized onto an hour boundary. `start` is the UTC hour
/// start; sub-hourly readings within the same hour keep separate records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end: Option<OffsetDateTime>,
    pub usage: f64,
    pub cost: Cost,
    pub unit: Option<String>,
}

/// Flat view of one designated target day: its records plus running totals.
/// `total_cost` only accumulates over records whose cost was present.
#[derive(Debug, Clone, Default)]
pub struct DayTally {
    pub records: Vec<HourlyRecord>,
    pub total_usage: f64,
    pub total_cost: Cost,
}

/// Per-day rollup handed to the caller. `usage: None` means "no data for the
/// day", which is not the same as a measured zero.
#[derive(Debug, Clone, Serialize)]
pub struct DailySummary {
    pub date: Date,
    pub usage: Option<f64>,
    pub cost: Cost,
    pub estimated: bool,
    pub unit: Option<String>,
    pub currency: String,
    pub hours: Vec<HourlyRecord>,
}

/// The per-meter result of one refresh cycle: the raw provider summary plus
/// the reconciled target-day rollup (absent when the interval fetch failed).
#[derive(Debug, Clone, Serialize)]
pub struct MeterSnapshot {
    pub summary: serde_json::Value,
    pub daily: Option<DailySummary>,
}

impl MeterSnapshot {
    /// The target day's hourly records; empty when the day had no data.
    pub fn yesterday_hours(&self) -> &[HourlyRecord] {
        self.daily
            .as_ref()
            .map(|d| d.hours.as_slice())
            .unwrap_or(&[])
    }
}
