mod bill;
mod meter;
mod reading;
mod statistic;

pub use bill::Bill;
pub use meter::Meter;
pub use reading::{Cost, DailySummary, DayTally, HourlyRecord, MeterSnapshot};
pub use statistic::{cost_series_id, usage_series_id, SeriesMetadata, StatPoint};
