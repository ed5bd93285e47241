use anyhow::{Context, Result};
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use crate::config::EtlConfig;
use crate::pipeline::EtlPipeline;
use crate::storage::PostgresStorage;

mod config;
mod fetcher;
mod logging;
mod models;
mod pipeline;
mod processor;
mod storage;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables before anything reads ETL_* or RUST_LOG
    dotenv::dotenv().ok();

    logging::init_logging();

    let config = EtlConfig::load().context("Failed to load ETL configuration")?;

    let run_id = Uuid::new_v4();
    run(config).instrument(info_span!("etl_run", %run_id)).await
}

async fn run(config: EtlConfig) -> Result<()> {
    info!("🚀 Starting trip ETL");
    info!(
        "Input: {} | duplicates: {} | report: {}",
        config.input_path.display(),
        config.duplicates_path.display(),
        config.report_path.display()
    );

    let storage = PostgresStorage::from_config(&config)
        .context("Failed to initialize PostgreSQL storage")?;
    info!(
        "Target database '{}', civil time zone {}",
        storage.database_name(),
        config.civil_time_zone
    );
    let pipeline = EtlPipeline::from_config(&config)?;

    let stats = pipeline.run(&storage).await?;
    stats.log_summary();

    info!("🎉 Trip ETL completed");
    Ok(())
}
