use anyhow::Result;
use std::env;
use std::path::Path;

#[allow(dead_code)]
#[path = "../config/mod.rs"]
mod config;

#[allow(dead_code)]
#[path = "../fetcher/mod.rs"]
mod fetcher;

#[allow(dead_code)]
#[path = "../logging.rs"]
mod logging;

#[allow(dead_code)]
#[path = "../models/mod.rs"]
mod models;

#[allow(dead_code)]
#[path = "../pipeline.rs"]
mod pipeline;

#[allow(dead_code)]
#[path = "../processor/mod.rs"]
mod processor;

#[allow(dead_code)]
#[path = "../storage/mod.rs"]
mod storage;

use crate::config::EtlConfig;
use crate::pipeline::EtlPipeline;

/// Runs read → dedupe → validate → normalize without a database and without
/// writing side files. An optional argument names a TOML config file.
fn main() -> Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let config = match env::args().nth(1) {
        Some(path) => EtlConfig::from_file(Path::new(&path))?,
        None => EtlConfig::load()?,
    };
    config.validate()?;

    println!("=== TRIP ETL PREVIEW ===\n");
    println!("Input: {}", config.input_path.display());
    println!("Civil time zone: {}", config.civil_time_zone);

    let pipeline = EtlPipeline::from_config(&config)?;
    let staged = pipeline.stage()?;
    let stats = &staged.stats;

    println!("\n=== STAGE COUNTS ===");
    println!("Parsed rows:          {}", stats.read);
    println!("Malformed (skipped):  {}", stats.malformed);
    println!("Unique by key:        {}", stats.unique);
    println!("Duplicates archived:  {}", stats.duplicates);
    println!("Exact copies dropped: {}", stats.exact_copies);
    println!("Negative amounts:     {}", stats.invalid);
    println!("Ready to load:        {}", staged.records.len());

    if !staged.records.is_empty() {
        println!("\nSample normalized rows (first 3):");
        for record in staged.records.iter().take(3) {
            println!(
                "  {} → {} | {} pax | {} mi | flag {} | {} → {} | fare {} tip {}",
                record.pickup_datetime.format(models::TIMESTAMP_FORMAT),
                record.dropoff_datetime.format(models::TIMESTAMP_FORMAT),
                record.passenger_count,
                record.trip_distance,
                record.store_and_fwd_flag,
                record.pu_location_id,
                record.do_location_id,
                record.fare_amount,
                record.tip_amount
            );
        }
    }

    if !staged.duplicates.is_empty() {
        println!(
            "\n{} duplicates would be written to {}",
            staged.duplicates.len(),
            config.duplicates_path.display()
        );
    }

    Ok(())
}
