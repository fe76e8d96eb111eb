use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use time::{Date, OffsetDateTime};
use tokio::sync::{Mutex, RwLock};
use utility_client::domain::{DailySummary, MeterSnapshot};
use utility_client::MeterApi;

use crate::apportion;
use crate::normalize::normalize_intervals;
use crate::statistics::StatisticsWriter;

/// The single cycle-level failure signal surfaced to the caller.
#[derive(thiserror::Error, Debug)]
#[error("update failed: {0}")]
pub struct UpdateFailed(pub String);

/// Drives refresh cycles across the tracked meters, one meter at a time.
///
/// Cycles are serialized by `cycle_gate`: the scheduler tick, a manual
/// refresh and a post-discovery refresh can never interleave. The tracked
/// id list is replaced wholesale by discovery and only ever read as a
/// snapshot at cycle start.
pub struct Coordinator {
    api: Arc<dyn MeterApi>,
    writer: StatisticsWriter,
    meter_ids: RwLock<Vec<String>>,
    snapshots: RwLock<HashMap<String, MeterSnapshot>>,
    cycle_gate: Mutex<()>,
    lookback_days: i64,
    currency: String,
}

impl Coordinator {
    pub fn new(
        api: Arc<dyn MeterApi>,
        writer: StatisticsWriter,
        meter_ids: Vec<String>,
        lookback_days: i64,
        currency: String,
    ) -> Self {
        Self {
            api,
            writer,
            meter_ids: RwLock::new(meter_ids),
            snapshots: RwLock::new(HashMap::new()),
            cycle_gate: Mutex::new(()),
            lookback_days,
            currency,
        }
    }

    pub async fn meter_ids(&self) -> Vec<String> {
        self.meter_ids.read().await.clone()
    }

    /// Result of the most recent successful cycle.
    pub async fn snapshots(&self) -> HashMap<String, MeterSnapshot> {
        self.snapshots.read().await.clone()
    }

    /// Run one refresh cycle over the tracked meters.
    ///
    /// A summary fetch failure fails the whole cycle; statistics already
    /// persisted for earlier meters stay (persistence is per meter, not
    /// transactional across the cycle). All deeper failures are contained.
    pub async fn refresh(&self) -> Result<HashMap<String, MeterSnapshot>, UpdateFailed> {
        let _cycle = self.cycle_gate.lock().await;

        let ids = self.meter_ids.read().await.clone();
        let today = OffsetDateTime::now_utc().date();
        let target_day = today.previous_day().unwrap_or(today);
        let window_start = today - time::Duration::days(self.lookback_days);

        let mut results = HashMap::with_capacity(ids.len());
        for meter_id in &ids {
            let snapshot = self
                .refresh_meter(meter_id, window_start, today, target_day)
                .await?;
            results.insert(meter_id.clone(), snapshot);
        }

        *self.snapshots.write().await = results.clone();
        metrics::counter!("refresh_cycles_total").increment(1);
        Ok(results)
    }

    async fn refresh_meter(
        &self,
        meter_id: &str,
        window_start: Date,
        window_end: Date,
        target_day: Date,
    ) -> Result<MeterSnapshot, UpdateFailed> {
        let summary = self
            .api
            .refresh_meter_summary(meter_id)
            .await
            .map_err(|err| {
                metrics::counter!("refresh_failures_total").increment(1);
                UpdateFailed(err.to_string())
            })?;
        let summary = flatten_summary(summary);

        let daily = match self.api.get_intervals(meter_id, window_start, window_end).await {
            Ok(payload) => {
                Some(
                    self.reconcile(meter_id, &payload, window_start, window_end, target_day)
                        .await,
                )
            }
            Err(err) => {
                // Non-fatal: this meter's daily figures stay unknown.
                tracing::warn!(error = %err, meter_id, "interval fetch failed, daily usage unknown");
                metrics::counter!("interval_fetch_failures_total").increment(1);
                None
            }
        };

        Ok(MeterSnapshot { summary, daily })
    }

    /// NORMALIZE → (ESTIMATE_COST if needed) → PERSIST_STATS → summary.
    async fn reconcile(
        &self,
        meter_id: &str,
        payload: &Value,
        window_start: Date,
        window_end: Date,
        target_day: Date,
    ) -> DailySummary {
        let mut days = normalize_intervals(payload, target_day);
        let tally = days.target_tally();
        let mut estimated = false;

        // Only fill gaps: a genuine positive reported cost is never touched.
        if tally.total_cost.needs_estimation() && !tally.records.is_empty() {
            match self.api.get_bills(meter_id, window_start, window_end).await {
                Ok(raw) => {
                    let bills = apportion::decode_bills(&raw);
                    if let Some(bill) = apportion::select_bill(&bills, target_day) {
                        let daily_cost = apportion::daily_estimate(bill);
                        if let Some(records) = days.buckets.get_mut(&target_day) {
                            apportion::apportion_day(records, daily_cost);
                            estimated = true;
                            metrics::counter!("cost_estimations_total").increment(1);
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, meter_id, "bill fetch failed, skipping cost estimation");
                }
            }
        }

        let unit = days.first_unit();
        self.writer
            .write_hourly(
                meter_id,
                unit.as_deref(),
                Some(&self.currency),
                &days.all_hours(),
            )
            .await;

        let tally = days.target_tally();
        DailySummary {
            date: target_day,
            usage: if tally.records.is_empty() {
                None
            } else {
                Some(tally.total_usage)
            },
            cost: tally.total_cost,
            estimated,
            unit,
            currency: self.currency.clone(),
            hours: tally.records,
        }
    }

    /// Discover current non-archived meters, wholesale-replace the tracked
    /// set, then run an immediate refresh cycle.
    pub async fn refresh_meters(&self) -> Result<Vec<String>, UpdateFailed> {
        let meters = self
            .api
            .list_meters(Some(false))
            .await
            .map_err(|err| UpdateFailed(err.to_string()))?;
        let ids: Vec<String> = meters
            .iter()
            .filter(|m| !m.archived)
            .map(|m| m.id.clone())
            .collect();

        *self.meter_ids.write().await = ids.clone();
        tracing::info!(count = ids.len(), "tracked meter set replaced");

        if let Err(err) = self.refresh().await {
            tracing::warn!(error = %err, "refresh after meter discovery failed");
        }
        Ok(ids)
    }

    /// Scheduler loop: one refresh per tick, first tick immediately.
    pub async fn run(self: Arc<Self>, every: std::time::Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.refresh().await {
                Ok(snapshots) => {
                    tracing::info!(meters = snapshots.len(), "refresh cycle complete");
                }
                Err(err) => {
                    tracing::error!(error = %err, "refresh cycle failed");
                }
            }
        }
    }
}

/// Some summary endpoints nest the meter fields under a 'meter' key.
fn flatten_summary(raw: Value) -> Value {
    match raw.get("meter") {
        Some(nested @ Value::Object(_)) => nested.clone(),
        _ => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStatisticsStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use utility_client::domain::{usage_series_id, Cost, Meter};
    use utility_client::ApiError;

    fn api_error() -> ApiError {
        ApiError::Status {
            url: "http://test/".to_string(),
            status: 500,
            body: "boom".to_string(),
        }
    }

    fn target_day() -> Date {
        OffsetDateTime::now_utc()
            .date()
            .previous_day()
            .expect("yesterday exists")
    }

    fn day_str(day: Date) -> String {
        format!(
            "{:04}-{:02}-{:02}",
            day.year(),
            u8::from(day.month()),
            day.day()
        )
    }

    /// Scripted provider: one shared interval/bill payload for all meters,
    /// optional per-stage failures, summary calls recorded.
    #[derive(Default)]
    struct FakeApi {
        meters: Vec<Meter>,
        intervals: Option<Value>,
        bills: Option<Value>,
        fail_summaries: Vec<String>,
        fail_intervals_for: Vec<String>,
        summary_calls: StdMutex<Vec<String>>,
    }

    impl FakeApi {
        fn meter(id: &str) -> Meter {
            Meter {
                id: id.to_string(),
                archived: false,
                label: None,
                updated: None,
                raw: json!({"id": id}),
            }
        }

        fn summary_calls(&self) -> Vec<String> {
            self.summary_calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MeterApi for FakeApi {
        async fn list_meters(&self, _archived: Option<bool>) -> Result<Vec<Meter>, ApiError> {
            Ok(self.meters.clone())
        }

        async fn get_intervals(
            &self,
            meter_id: &str,
            _start: Date,
            _end: Date,
        ) -> Result<Value, ApiError> {
            if self.fail_intervals_for.iter().any(|m| m == meter_id) {
                return Err(api_error());
            }
            Ok(self.intervals.clone().unwrap_or(Value::Null))
        }

        async fn get_bills(&self, _meter_id: &str, _start: Date, _end: Date) -> Result<Value, ApiError> {
            self.bills.clone().ok_or_else(api_error)
        }

        async fn refresh_meter_summary(&self, meter_id: &str) -> Result<Value, ApiError> {
            self.summary_calls.lock().unwrap().push(meter_id.to_string());
            if self.fail_summaries.iter().any(|m| m == meter_id) {
                return Err(api_error());
            }
            Ok(json!({"id": meter_id, "updated": "2024-05-01T00:00:00Z"}))
        }
    }

    fn intervals_for(day: Date, with_cost: bool) -> Value {
        let day = day_str(day);
        let mut readings = Vec::new();
        for (hour, usage) in [(10, 10.0), (11, 21.0)] {
            let mut datapoint = json!({"value": usage, "unit": "kWh"});
            if with_cost {
                datapoint["cost"] = json!(usage * 0.5);
            }
            readings.push(json!({
                "start": format!("{day}T{hour:02}:00:00Z"),
                "end": format!("{day}T{hour:02}:59:59Z"),
                "datapoints": [datapoint]
            }));
        }
        json!({"intervals": [{"readings": readings}]})
    }

    fn coordinator_with(
        api: Arc<FakeApi>,
        store: Option<Arc<MemoryStatisticsStore>>,
        ids: Vec<&str>,
    ) -> Coordinator {
        let store = store.map(|s| s as Arc<dyn crate::store::StatisticsStore>);
        Coordinator::new(
            api,
            StatisticsWriter::new(store),
            ids.into_iter().map(str::to_owned).collect(),
            30,
            "USD".to_string(),
        )
    }

    #[tokio::test]
    async fn discovery_replaces_tracked_set_wholesale() {
        let api = Arc::new(FakeApi {
            meters: vec![FakeApi::meter("A"), FakeApi::meter("C")],
            intervals: Some(intervals_for(target_day(), true)),
            ..Default::default()
        });
        let coordinator = coordinator_with(api.clone(), None, vec!["A", "B"]);

        let ids = coordinator.refresh_meters().await.unwrap();
        assert_eq!(ids, vec!["A".to_string(), "C".to_string()]);
        assert_eq!(coordinator.meter_ids().await, ids);

        // The follow-up cycle touched exactly A and C, never B.
        let calls = api.summary_calls();
        assert!(calls.contains(&"A".to_string()));
        assert!(calls.contains(&"C".to_string()));
        assert!(!calls.contains(&"B".to_string()));
    }

    #[tokio::test]
    async fn summary_failure_fails_the_cycle() {
        let api = Arc::new(FakeApi {
            fail_summaries: vec!["A".to_string()],
            ..Default::default()
        });
        let coordinator = coordinator_with(api, None, vec!["A"]);

        let err = coordinator.refresh().await.unwrap_err();
        assert!(err.to_string().contains("update failed"));
        assert!(coordinator.snapshots().await.is_empty());
    }

    #[tokio::test]
    async fn interval_failure_is_contained_per_meter() {
        let api = Arc::new(FakeApi {
            intervals: Some(intervals_for(target_day(), true)),
            fail_intervals_for: vec!["A".to_string()],
            ..Default::default()
        });
        let coordinator = coordinator_with(api, None, vec!["A", "B"]);

        let snapshots = coordinator.refresh().await.unwrap();
        assert!(snapshots["A"].daily.is_none());
        assert!(snapshots["A"].yesterday_hours().is_empty());
        let daily = snapshots["B"].daily.as_ref().unwrap();
        assert_eq!(daily.usage, Some(31.0));
        assert_eq!(daily.cost, Cost::Known(15.5));
        assert!(!daily.estimated);
    }

    #[tokio::test]
    async fn reported_cost_suppresses_estimation() {
        // Bills are unavailable; with genuine reported cost that must not matter.
        let api = Arc::new(FakeApi {
            intervals: Some(intervals_for(target_day(), true)),
            bills: None,
            ..Default::default()
        });
        let coordinator = coordinator_with(api, None, vec!["A"]);

        let snapshots = coordinator.refresh().await.unwrap();
        let daily = snapshots["A"].daily.as_ref().unwrap();
        assert_eq!(daily.cost, Cost::Known(15.5));
        assert!(!daily.estimated);
    }

    #[tokio::test]
    async fn missing_cost_is_estimated_from_bills() {
        let day = target_day();
        // A 31-day period whose total averages to 10 per day.
        let period_start = day - time::Duration::days(14);
        let period_end = period_start + time::Duration::days(31);
        let api = Arc::new(FakeApi {
            intervals: Some(intervals_for(day, false)),
            bills: Some(json!({
                "bills": [{
                    "start": day_str(period_start),
                    "end": day_str(period_end),
                    "total": 310.0
                }]
            })),
            ..Default::default()
        });
        let store = Arc::new(MemoryStatisticsStore::new());
        let coordinator = coordinator_with(api, Some(store.clone()), vec!["A"]);

        let snapshots = coordinator.refresh().await.unwrap();
        let daily = snapshots["A"].daily.as_ref().unwrap();
        assert!(daily.estimated);
        let Cost::Known(total) = daily.cost else {
            panic!("estimated day must have a known cost");
        };
        assert!((total - 10.0).abs() < 1e-9);
        // Usage-weighted split of the daily estimate.
        assert_eq!(daily.hours[0].cost, Cost::Known(10.0 * (10.0 / 31.0)));
        assert_eq!(daily.hours[1].cost, Cost::Known(10.0 * (21.0 / 31.0)));

        // The apportioned costs reached the statistics store too.
        let cost_points = store.points(&utility_client::domain::cost_series_id("A"));
        assert_eq!(cost_points.len(), 2);
        let usage_points = store.points(&usage_series_id("A"));
        assert_eq!(usage_points.last().unwrap().sum, 31.0);
    }

    #[tokio::test]
    async fn bill_failure_skips_estimation_quietly() {
        let api = Arc::new(FakeApi {
            intervals: Some(intervals_for(target_day(), false)),
            bills: None,
            ..Default::default()
        });
        let coordinator = coordinator_with(api, None, vec!["A"]);

        let snapshots = coordinator.refresh().await.unwrap();
        let daily = snapshots["A"].daily.as_ref().unwrap();
        assert_eq!(daily.usage, Some(31.0));
        assert_eq!(daily.cost, Cost::Unconfirmed);
        assert!(!daily.estimated);
    }

    #[tokio::test]
    async fn empty_interval_payload_yields_no_data_day() {
        let api = Arc::new(FakeApi {
            intervals: Some(json!({"intervals": "garbage"})),
            ..Default::default()
        });
        let coordinator = coordinator_with(api, None, vec!["A"]);

        let snapshots = coordinator.refresh().await.unwrap();
        let daily = snapshots["A"].daily.as_ref().unwrap();
        assert_eq!(daily.usage, None);
        assert_eq!(daily.cost, Cost::Unconfirmed);
        assert!(daily.hours.is_empty());
    }

    #[test]
    fn nested_summaries_are_flattened() {
        let flat = flatten_summary(json!({"meter": {"id": "A", "utility": "gas"}}));
        assert_eq!(flat["utility"], "gas");
        let untouched = flatten_summary(json!({"id": "A"}));
        assert_eq!(untouched["id"], "A");
    }
}
