mod client;

pub use client::{UtilityApiClient, DEFAULT_BASE_URL};

use async_trait::async_trait;
use serde_json::Value;
use time::Date;

use crate::domain::Meter;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("invalid credentials: {0}")]
    Auth(String),
    #[error("GET {url} failed: {status} {body}")]
    Status { url: String, status: u16, body: String },
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl ApiError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Auth(_))
    }
}

/// The provider boundary the engine drives. Interval and bill payloads come
/// back as raw JSON; their shapes vary and are decoded tolerantly downstream.
/// Date parameters are calendar days, end exclusive.
#[async_trait]
pub trait MeterApi: Send + Sync {
    async fn list_meters(&self, archived: Option<bool>) -> Result<Vec<Meter>, ApiError>;

    async fn get_intervals(
        &self,
        meter_id: &str,
        start: Date,
        end: Date,
    ) -> Result<Value, ApiError>;

    async fn get_bills(&self, meter_id: &str, start: Date, end: Date) -> Result<Value, ApiError>;

    async fn refresh_meter_summary(&self, meter_id: &str) -> Result<Value, ApiError>;
}
