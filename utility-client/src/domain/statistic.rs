use serde::Serialize;
use time::OffsetDateTime;

/// Statistic ids are namespaced per meter and metric, matching the series
/// naming the provider integration has always used.
pub fn usage_series_id(meter_id: &str) -> String {
    format!("utilityapi:{meter_id}_usage")
}

pub fn cost_series_id(meter_id: &str) -> String {
    format!("utilityapi:{meter_id}_cost")
}

/// Descriptor for one cumulative series, upserted alongside its points.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesMetadata {
    pub id: String,
    pub name: String,
    pub unit: String,
    pub has_sum: bool,
}

impl SeriesMetadata {
    pub fn usage(meter_id: &str, unit: Option<&str>) -> Self {
        Self {
            id: usage_series_id(meter_id),
            name: format!("UtilityAPI {meter_id} Usage"),
            unit: unit.unwrap_or("").to_string(),
            has_sum: true,
        }
    }

    pub fn cost(meter_id: &str, currency: Option<&str>) -> Self {
        Self {
            id: cost_series_id(meter_id),
            name: format!("UtilityAPI {meter_id} Cost"),
            unit: currency.unwrap_or("USD").to_string(),
            has_sum: true,
        }
    }
}

/// One point of a cumulative series: the running sum up to and including
/// the hour starting at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatPoint {
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    pub sum: f64,
}
