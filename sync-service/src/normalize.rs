use std::collections::BTreeMap;

use serde_json::Value;
use time::Date;
use utility_client::domain::{Cost, DayTally, HourlyRecord};

use crate::coerce;

/// The known shapes of an interval response. Anything that does not validate
/// becomes `Empty` with a debug diagnostic; malformed payloads never error.
#[derive(Debug)]
pub enum IntervalsPayload {
    Readings(Vec<Value>),
    Empty,
}

impl IntervalsPayload {
    pub fn decode(raw: &Value) -> Self {
        let Some(intervals) = raw.get("intervals").and_then(Value::as_array) else {
            if !raw.is_null() {
                tracing::debug!("interval payload has no 'intervals' list, treating as empty");
                metrics::counter!("interval_payloads_empty_total").increment(1);
            }
            return Self::Empty;
        };

        let readings: Vec<Value> = intervals
            .iter()
            .filter_map(|block| block.get("readings").and_then(Value::as_array))
            .flatten()
            .cloned()
            .collect();

        if readings.is_empty() {
            Self::Empty
        } else {
            Self::Readings(readings)
        }
    }
}

/// Per-day working set for one refresh window, keyed by the UTC calendar day
/// of each record's normalized hour start.
#[derive(Debug)]
pub struct NormalizedDays {
    pub buckets: BTreeMap<Date, Vec<HourlyRecord>>,
    pub target_day: Date,
}

impl NormalizedDays {
    /// Flat view of the target day: its records plus running totals. The
    /// cost total only accumulates over records whose cost was present, so
    /// a day with none stays `Unconfirmed`.
    pub fn target_tally(&self) -> DayTally {
        let records = self
            .buckets
            .get(&self.target_day)
            .cloned()
            .unwrap_or_default();

        let mut total_usage = 0.0;
        let mut total_cost = Cost::Unconfirmed;
        for record in &records {
            total_usage += record.usage;
            if let Cost::Known(c) = record.cost {
                total_cost = match total_cost {
                    Cost::Known(sum) => Cost::Known(sum + c),
                    Cost::Unconfirmed => Cost::Known(c),
                };
            }
        }

        DayTally {
            records,
            total_usage,
            total_cost,
        }
    }

    /// All records across the window, in day order, for the statistics write.
    pub fn all_hours(&self) -> Vec<HourlyRecord> {
        self.buckets.values().flatten().cloned().collect()
    }

    /// First unit-of-measure reported anywhere in the window.
    pub fn first_unit(&self) -> Option<String> {
        self.buckets
            .values()
            .flatten()
            .find_map(|r| r.unit.clone())
    }
}

/// Flatten a raw interval payload into per-day hourly records: one record
/// per reading, normalized onto its UTC hour start.
pub fn normalize_intervals(raw: &Value, target_day: Date) -> NormalizedDays {
    let mut buckets: BTreeMap<Date, Vec<HourlyRecord>> = BTreeMap::new();

    if let IntervalsPayload::Readings(readings) = IntervalsPayload::decode(raw) {
        for reading in &readings {
            if let Some(record) = reading_to_record(reading) {
                buckets.entry(record.start.date()).or_default().push(record);
            }
        }
    }

    NormalizedDays {
        buckets,
        target_day,
    }
}

/// One hourly record per reading: usage summed over datapoints (missing or
/// junk values contribute zero), unit from the first non-null datapoint,
/// cost `Known` only if a cost field was present on a datapoint or the
/// reading itself.
fn reading_to_record(reading: &Value) -> Option<HourlyRecord> {
    let start_raw = reading.get("start").and_then(Value::as_str)?;
    let start = coerce::hour_start(start_raw)?;
    let end = reading
        .get("end")
        .and_then(Value::as_str)
        .and_then(coerce::hour_start);

    let mut usage = 0.0;
    let mut unit: Option<String> = None;
    let mut cost_sum = 0.0;
    let mut cost_present = false;

    for datapoint in reading
        .get("datapoints")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        usage += datapoint
            .get("value")
            .and_then(coerce::coerce_f64)
            .unwrap_or(0.0);
        if unit.is_none() {
            unit = datapoint
                .get("unit")
                .and_then(Value::as_str)
                .map(str::to_owned);
        }
        if let Some(c) = datapoint.get("cost").and_then(coerce::coerce_f64) {
            cost_sum += c;
            cost_present = true;
        }
    }

    if let Some(c) = reading.get("cost").and_then(coerce::coerce_f64) {
        cost_sum += c;
        cost_present = true;
    }

    Some(HourlyRecord {
        start,
        end,
        usage,
        cost: if cost_present {
            Cost::Known(cost_sum)
        } else {
            Cost::Unconfirmed
        },
        unit,
    })
}
