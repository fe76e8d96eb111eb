use std::sync::Arc;

use utility_client::domain::{
    cost_series_id, usage_series_id, Cost, HourlyRecord, SeriesMetadata, StatPoint,
};

use crate::store::StatisticsStore;

/// Cumulative output of one batch: usage points for every hour, cost points
/// only for hours whose cost was known.
#[derive(Debug, Default, PartialEq)]
pub struct AccumulatedSeries {
    pub usage: Vec<StatPoint>,
    pub cost: Vec<StatPoint>,
}

/// Fold an unordered batch of hourly records into cumulative sums continuing
/// from the given last-stored values.
///
/// The fold is deterministic: records sort ascending by hour start (stable,
/// so same-hour records keep source order) and sums accumulate in that
/// order, which is what makes rewrites bit-identical. Hours with unknown
/// cost advance nothing and emit nothing on the cost series, so a gap never
/// shows up as an artificial plateau. Same-start points collapse to the last
/// cumulative value, leaving one row per hour key.
pub fn accumulate(last_usage: f64, last_cost: f64, hours: &[HourlyRecord]) -> AccumulatedSeries {
    let mut ordered: Vec<&HourlyRecord> = hours.iter().collect();
    ordered.sort_by_key(|h| h.start);

    let mut out = AccumulatedSeries::default();
    let mut running_usage = last_usage;
    let mut running_cost = last_cost;

    for hour in ordered {
        running_usage += hour.usage;
        push_point(&mut out.usage, hour.start, running_usage);

        if let Cost::Known(c) = hour.cost {
            running_cost += c;
            push_point(&mut out.cost, hour.start, running_cost);
        }
    }

    out
}

fn push_point(points: &mut Vec<StatPoint>, start: time::OffsetDateTime, sum: f64) {
    match points.last_mut() {
        Some(last) if last.start == start => last.sum = sum,
        _ => points.push(StatPoint { start, sum }),
    }
}

/// Writes hourly batches to the statistics store as ever-increasing sums.
/// With no store configured every write is a silent no-op; store failures
/// degrade to a warning and never fail the refresh.
#[derive(Clone)]
pub struct StatisticsWriter {
    store: Option<Arc<dyn StatisticsStore>>,
}

impl StatisticsWriter {
    pub fn new(store: Option<Arc<dyn StatisticsStore>>) -> Self {
        Self { store }
    }

    pub async fn write_hourly(
        &self,
        meter_id: &str,
        unit: Option<&str>,
        currency: Option<&str>,
        hours: &[HourlyRecord],
    ) {
        let Some(store) = &self.store else {
            tracing::debug!(meter_id, "no statistics store configured, skipping write");
            return;
        };
        let Some(earliest) = hours.iter().map(|h| h.start).min() else {
            return;
        };

        let usage_id = usage_series_id(meter_id);
        let cost_id = cost_series_id(meter_id);

        let last_usage = match store.last_cumulative(&usage_id, earliest).await {
            Ok(sum) => sum.unwrap_or(0.0),
            Err(err) => {
                tracing::warn!(error = %err, meter_id, "statistics store unavailable, skipping write");
                metrics::counter!("statistics_write_failures_total").increment(1);
                return;
            }
        };
        let last_cost = match store.last_cumulative(&cost_id, earliest).await {
            Ok(sum) => sum.unwrap_or(0.0),
            Err(err) => {
                tracing::warn!(error = %err, meter_id, "statistics store unavailable, skipping write");
                metrics::counter!("statistics_write_failures_total").increment(1);
                return;
            }
        };

        let series = accumulate(last_usage, last_cost, hours);

        if !series.usage.is_empty() {
            let meta = SeriesMetadata::usage(meter_id, unit);
            if let Err(err) = store.append_points(&meta, &series.usage).await {
                tracing::warn!(error = %err, meter_id, "failed to write usage statistics");
                metrics::counter!("statistics_write_failures_total").increment(1);
            }
        }
        if !series.cost.is_empty() {
            let meta = SeriesMetadata::cost(meter_id, currency);
            if let Err(err) = store.append_points(&meta, &series.cost).await {
                tracing::warn!(error = %err, meter_id, "failed to write cost statistics");
                metrics::counter!("statistics_write_failures_total").increment(1);
            }
        }
    }
}
