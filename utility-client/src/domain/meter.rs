use serde::Serialize;

/// A provider-tracked service point (electricity/gas/water).
///
/// Discovered wholesale via the meter listing; `raw` keeps the full provider
/// payload for the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct Meter {
    pub id: String,
    pub archived: bool,
    pub label: Option<String>,
    pub updated: Option<String>,
    pub raw: serde_json::Value,
}
