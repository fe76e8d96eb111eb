use std::sync::Arc;

use time::Date;
use utility_client::MeterApi;

use crate::coordinator::UpdateFailed;
use crate::normalize::normalize_intervals;
use crate::statistics::StatisticsWriter;

/// Manual range import: walks `[start, end)` one calendar day at a time,
/// normalizing and persisting each day's hours. Bill apportionment is
/// deliberately skipped — imported cost stays unconfirmed unless the raw
/// intervals carry one.
pub struct BulkImporter {
    api: Arc<dyn MeterApi>,
    writer: StatisticsWriter,
    currency: String,
}

impl BulkImporter {
    pub fn new(api: Arc<dyn MeterApi>, writer: StatisticsWriter, currency: String) -> Self {
        Self {
            api,
            writer,
            currency,
        }
    }

    /// Returns the number of days walked. Unlike the scheduled refresh this
    /// is a foreground operation, so API failures abort it.
    pub async fn import_range(
        &self,
        meter_id: &str,
        start: Date,
        end: Date,
    ) -> Result<usize, UpdateFailed> {
        let mut day = start;
        let mut days_walked = 0usize;

        while day < end {
            let next = day
                .next_day()
                .ok_or_else(|| UpdateFailed("date range overflows the calendar".to_string()))?;

            let payload = self
                .api
                .get_intervals(meter_id, day, next)
                .await
                .map_err(|err| UpdateFailed(err.to_string()))?;

            let days = normalize_intervals(&payload, day);
            let hours = days.all_hours();
            let unit = days.first_unit();
            self.writer
                .write_hourly(meter_id, unit.as_deref(), Some(&self.currency), &hours)
                .await;

            tracing::debug!(meter_id, day = %day, records = hours.len(), "imported day");
            day = next;
            days_walked += 1;
        }

        metrics::counter!("bulk_import_days_total").increment(days_walked as u64);
        Ok(days_walked)
    }
}
