use anyhow::{bail, Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::{env, sync::Arc};
use sync_service::{
    config::AppConfig,
    import::BulkImporter,
    observability,
    statistics::StatisticsWriter,
    store::{PgStatisticsStore, StatisticsStore},
};
use time::{format_description::FormatItem, macros::format_description, Date};
use utility_client::{MeterApi, UtilityApiClient};

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        bail!("usage: backfill_intervals <meter_id> <start_date> <end_date>");
    }
    let meter_id = args[1].as_str();
    let start = Date::parse(&args[2], &DATE_FORMAT)
        .with_context(|| format!("invalid start date '{}'", args[2]))?;
    let end = Date::parse(&args[3], &DATE_FORMAT)
        .with_context(|| format!("invalid end date '{}'", args[3]))?;
    if end <= start {
        bail!("end date must be after start date (end is exclusive)");
    }

    // Load configuration (can point SYNC_CONFIG to a backfill-specific file).
    let cfg = AppConfig::load()?;

    let store: Option<Arc<dyn StatisticsStore>> = match &cfg.database {
        Some(db_cfg) => {
            let pool = PgPoolOptions::new()
                .max_connections(db_cfg.max_connections)
                .connect(&db_cfg.uri)
                .await?;
            Some(Arc::new(PgStatisticsStore::new(pool).await?))
        }
        None => {
            tracing::warn!("no database configured, imported statistics will not be persisted");
            None
        }
    };

    let client = UtilityApiClient::new(&cfg.api.api_key, &cfg.api.base_url)?;
    let api: Arc<dyn MeterApi> = Arc::new(client);

    let importer = BulkImporter::new(
        api,
        StatisticsWriter::new(store),
        cfg.api.currency.clone(),
    );

    let days = importer.import_range(meter_id, start, end).await?;
    tracing::info!(meter_id, days, "bulk import complete");

    Ok(())
}
