use anyhow::{Context, Result};
use csv::WriterBuilder;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::models::{TRIP_COLUMNS, TripRecord};

/// Writes trips in the input CSV shape. The header is written even when there
/// are no records, and an existing file is replaced.
pub fn write_trip_csv(path: &Path, records: &[TripRecord]) -> Result<()> {
    ensure_parent_dir(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;

    writer.write_record(TRIP_COLUMNS)?;
    for record in records {
        writer
            .serialize(record)
            .with_context(|| format!("Failed to write record to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to flush CSV file: {}", path.display()))?;

    info!("Wrote {} records to {}", records.len(), path.display());
    Ok(())
}

pub fn row_count_line(row_count: i64) -> String {
    format!("Number of rows: {}", row_count)
}

pub fn write_row_count_report(path: &Path, row_count: i64) -> Result<()> {
    ensure_parent_dir(path)?;
    fs::write(path, row_count_line(row_count))
        .with_context(|| format!("Failed to write row count report: {}", path.display()))
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }
    Ok(())
}
