use serde_json::Value;
use time::Date;
use utility_client::domain::{Bill, Cost, HourlyRecord};

use crate::coerce;

/// Decode a bill listing tolerantly. The provider wraps bills in either a
/// `bills` or a `data` envelope; period bounds arrive as dates or date-times
/// under aliased keys. Entries missing a bound or a total are dropped.
pub fn decode_bills(raw: &Value) -> Vec<Bill> {
    let Some(list) = raw
        .get("bills")
        .or_else(|| raw.get("data"))
        .and_then(Value::as_array)
    else {
        if !raw.is_null() {
            tracing::debug!("bill payload has no 'bills' or 'data' list, treating as empty");
        }
        return Vec::new();
    };

    list.iter().filter_map(bill_from_value).collect()
}

fn bill_from_value(raw: &Value) -> Option<Bill> {
    let bound = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| raw.get(*k).and_then(Value::as_str))
            .and_then(coerce::hour_start)
    };

    let start = bound(&["start", "bill_start_date"])?;
    let end = bound(&["end", "bill_end_date"])?;
    let total = ["total", "cost", "total_cost"]
        .iter()
        .find_map(|k| raw.get(*k).and_then(coerce::coerce_f64))?;

    Some(Bill { start, end, total })
}

/// First bill in source order whose period `[start, end)` contains the day.
/// Overlapping periods are resolved by source order alone.
pub fn select_bill<'a>(bills: &'a [Bill], day: Date) -> Option<&'a Bill> {
    let day_start = day.midnight().assume_utc();
    bills.iter().find(|b| b.covers(day_start))
}

/// Flat pro-rated per-day estimate: the bill total averaged over the period
/// length in whole days, not weighted by per-day usage.
pub fn daily_estimate(bill: &Bill) -> f64 {
    let days = (bill.end - bill.start).whole_days().max(1);
    bill.total / days as f64
}

/// Distribute a day's estimated cost across its hourly records: proportional
/// to measured usage when the day has any, otherwise split evenly.
pub fn apportion_day(records: &mut [HourlyRecord], daily_cost: f64) {
    let day_usage: f64 = records.iter().map(|r| r.usage).sum();

    if day_usage > 0.0 {
        for record in records.iter_mut() {
            record.cost = Cost::Known(daily_cost * (record.usage / day_usage));
        }
    } else {
        let share = daily_cost / records.len().max(1) as f64;
        for record in records.iter_mut() {
            record.cost = Cost::Known(share);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::{date, datetime};

    fn hour(start: time::OffsetDateTime, usage: f64) -> HourlyRecord {
        HourlyRecord {
            start,
            end: None,
            usage,
            cost: Cost::Unconfirmed,
            unit: Some("kWh".to_string()),
        }
    }

    #[test]
    fn decodes_bills_from_either_envelope() {
        let bills = decode_bills(&json!({
            "bills": [{"start": "2024-01-01", "end": "2024-02-01", "total": 310.0}]
        }));
        assert_eq!(bills.len(), 1);

        let bills = decode_bills(&json!({
            "data": [{"bill_start_date": "2024-01-01T00:00:00Z", "bill_end_date": "2024-02-01", "total_cost": "99.5"}]
        }));
        assert_eq!(bills.len(), 1);
        assert_eq!(bills[0].total, 99.5);
    }

    #[test]
    fn incomplete_or_malformed_bills_are_dropped() {
        let bills = decode_bills(&json!({
            "bills": [
                {"start": "2024-01-01", "total": 310.0},
                {"start": "junk", "end": "2024-02-01", "total": 310.0},
                {"start": "2024-01-01", "end": "2024-02-01"}
            ]
        }));
        assert!(bills.is_empty());
        assert!(decode_bills(&json!({"bills": 12})).is_empty());
        assert!(decode_bills(&json!(null)).is_empty());
    }

    #[test]
    fn selects_first_covering_bill_in_source_order() {
        let bills = vec![
            Bill {
                start: datetime!(2023-12-01 00:00:00 UTC),
                end: datetime!(2024-01-01 00:00:00 UTC),
                total: 100.0,
            },
            Bill {
                start: datetime!(2024-01-01 00:00:00 UTC),
                end: datetime!(2024-02-01 00:00:00 UTC),
                total: 310.0,
            },
            // Overlaps the second; source order wins.
            Bill {
                start: datetime!(2024-01-10 00:00:00 UTC),
                end: datetime!(2024-02-10 00:00:00 UTC),
                total: 999.0,
            },
        ];
        let selected = select_bill(&bills, date!(2024 - 01 - 15)).unwrap();
        assert_eq!(selected.total, 310.0);

        // End bound is exclusive.
        assert!(select_bill(&bills[..2], date!(2024 - 02 - 01)).is_none());
    }

    #[test]
    fn flat_daily_estimate_over_period_days() {
        let bill = Bill {
            start: datetime!(2024-01-01 00:00:00 UTC),
            end: datetime!(2024-02-01 00:00:00 UTC),
            total: 310.0,
        };
        assert_eq!(daily_estimate(&bill), 10.0);

        // Degenerate zero-length period still divides by at least one day.
        let zero = Bill {
            start: datetime!(2024-01-01 00:00:00 UTC),
            end: datetime!(2024-01-01 00:00:00 UTC),
            total: 42.0,
        };
        assert_eq!(daily_estimate(&zero), 42.0);
    }

    #[test]
    fn apportionment_is_usage_weighted() {
        let mut records = vec![
            hour(datetime!(2024-01-15 10:00:00 UTC), 10.0),
            hour(datetime!(2024-01-15 11:00:00 UTC), 21.0),
        ];
        apportion_day(&mut records, 10.0);
        assert_eq!(records[0].cost, Cost::Known(10.0 * (10.0 / 31.0)));
        assert_eq!(records[1].cost, Cost::Known(10.0 * (21.0 / 31.0)));
    }

    #[test]
    fn zero_usage_day_splits_evenly() {
        let mut records = vec![
            hour(datetime!(2024-01-15 10:00:00 UTC), 0.0),
            hour(datetime!(2024-01-15 11:00:00 UTC), 0.0),
            hour(datetime!(2024-01-15 12:00:00 UTC), 0.0),
            hour(datetime!(2024-01-15 13:00:00 UTC), 0.0),
        ];
        apportion_day(&mut records, 10.0);
        for record in &records {
            assert_eq!(record.cost, Cost::Known(2.5));
        }
    }
}
