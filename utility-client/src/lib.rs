pub mod api;
pub mod db;
pub mod domain;

pub use api::{ApiError, MeterApi, UtilityApiClient};
