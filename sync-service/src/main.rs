use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use sync_service::{
    config::AppConfig,
    metrics_server, observability,
    statistics::StatisticsWriter,
    store::{PgStatisticsStore, StatisticsStore},
    Coordinator,
};
use utility_client::{MeterApi, UtilityApiClient};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr);
    }

    let client = UtilityApiClient::new(&cfg.api.api_key, &cfg.api.base_url)?;
    client
        .validate()
        .await
        .context("UtilityAPI credential check failed")?;

    // Persistence is best-effort: a missing section or an unreachable
    // database degrades to a storeless run instead of aborting.
    let store: Option<Arc<dyn StatisticsStore>> = match &cfg.database {
        Some(db_cfg) => {
            let pool = PgPoolOptions::new()
                .max_connections(db_cfg.max_connections)
                .connect(&db_cfg.uri)
                .await;
            match pool {
                Ok(pool) => Some(Arc::new(PgStatisticsStore::new(pool).await?)),
                Err(err) => {
                    tracing::warn!(error = %err, "statistics database unreachable, running without persistence");
                    None
                }
            }
        }
        None => None,
    };

    let api: Arc<dyn MeterApi> = Arc::new(client);

    // Initial discovery: track every non-archived meter.
    let meters = api.list_meters(Some(false)).await?;
    let meter_ids: Vec<String> = meters
        .into_iter()
        .filter(|m| !m.archived)
        .map(|m| m.id)
        .collect();
    tracing::info!(count = meter_ids.len(), "discovered meters");

    let coordinator = Arc::new(Coordinator::new(
        api,
        StatisticsWriter::new(store),
        meter_ids,
        cfg.api.lookback_days,
        cfg.api.currency.clone(),
    ));

    tracing::info!(
        interval_secs = cfg.refresh.interval_secs,
        "starting refresh scheduler"
    );
    coordinator
        .run(Duration::from_secs(cfg.refresh.interval_secs))
        .await;

    Ok(())
}
