use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use time::{format_description::FormatItem, macros::format_description, Date};
use tokio::sync::Semaphore;

use super::{ApiError, MeterApi};
use crate::domain::Meter;

pub const DEFAULT_BASE_URL: &str = "https://utilityapi.com/api/v2";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
// Cap on concurrent in-flight requests when many meters refresh at once.
const MAX_IN_FLIGHT: usize = 5;
const LIST_LIMIT: &str = "500";

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

fn format_date(day: Date) -> String {
    day.format(&DATE_FORMAT)
        .expect("ISO date formatting is infallible")
}

/// Pick the first string value present under any of the aliased keys the
/// provider is known to use for the same field.
fn first_str<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| value.get(*k).and_then(Value::as_str))
}

fn stringy(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub struct UtilityApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    permits: Semaphore,
}

impl UtilityApiClient {
    pub fn new(api_key: &str, base_url: &str) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("utility-sync/0.1.0")
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            permits: Semaphore::new(MAX_IN_FLIGHT),
        })
    }

    async fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<Value, ApiError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let _permit = self
            .permits
            .acquire()
            .await
            .expect("request semaphore never closes");

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(params)
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ApiError::Auth("rejected UtilityAPI api key".to_string()));
        }
        if status.is_client_error() || status.is_server_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }

        Ok(resp.json().await?)
    }

    /// Minimal request to validate the api key before anything else runs.
    pub async fn validate(&self) -> Result<(), ApiError> {
        self.get("meters", &[("limit", "1")]).await.map(|_| ())
    }

    fn meter_from_value(raw: &Value) -> Meter {
        let id = raw
            .get("id")
            .or_else(|| raw.get("meter_id"))
            .or_else(|| raw.get("uid"))
            .and_then(stringy)
            .unwrap_or_default();
        Meter {
            id,
            archived: raw.get("archived").and_then(Value::as_bool).unwrap_or(false),
            label: first_str(raw, &["label", "name", "service_address"]).map(str::to_owned),
            updated: first_str(raw, &["updated", "modified", "updated_at"]).map(str::to_owned),
            raw: raw.clone(),
        }
    }
}

#[async_trait]
impl MeterApi for UtilityApiClient {
    async fn list_meters(&self, archived: Option<bool>) -> Result<Vec<Meter>, ApiError> {
        let archived_param;
        let mut params = vec![("limit", LIST_LIMIT)];
        if let Some(flag) = archived {
            archived_param = flag.to_string();
            params.push(("archived", archived_param.as_str()));
        }

        let data = self.get("meters", &params).await?;
        // The provider commonly wraps the list in a 'meters' object but has
        // been seen returning a bare array.
        let raw_meters: Vec<Value> = if let Some(list) = data.get("meters").and_then(Value::as_array)
        {
            list.clone()
        } else if let Some(list) = data.as_array() {
            list.clone()
        } else {
            tracing::debug!("unexpected meter listing shape, treating as empty");
            Vec::new()
        };

        Ok(raw_meters
            .iter()
            .map(Self::meter_from_value)
            .filter(|m| !m.id.is_empty())
            .collect())
    }

    async fn get_intervals(
        &self,
        meter_id: &str,
        start: Date,
        end: Date,
    ) -> Result<Value, ApiError> {
        let start = format_date(start);
        let end = format_date(end);
        self.get(
            "intervals",
            &[
                ("meters", meter_id),
                ("start", start.as_str()),
                ("end", end.as_str()),
            ],
        )
        .await
    }

    async fn get_bills(&self, meter_id: &str, start: Date, end: Date) -> Result<Value, ApiError> {
        let start = format_date(start);
        let end = format_date(end);
        self.get(
            "bills",
            &[
                ("meters", meter_id),
                ("start", start.as_str()),
                ("end", end.as_str()),
            ],
        )
        .await
    }

    async fn refresh_meter_summary(&self, meter_id: &str) -> Result<Value, ApiError> {
        // The by-id endpoint changes its 'updated' field when new bills or
        // intervals arrive. Fall back to list-and-filter if it misbehaves.
        match self.get(&format!("meters/{meter_id}"), &[]).await {
            Ok(data @ Value::Object(_)) => return Ok(data),
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(error = %err, meter_id, "meter summary endpoint failed, falling back to listing");
            }
        }

        let meters = self.list_meters(None).await?;
        if let Some(meter) = meters.into_iter().find(|m| m.id == meter_id) {
            return Ok(meter.raw);
        }
        Ok(serde_json::json!({ "id": meter_id }))
    }
}
