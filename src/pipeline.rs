use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::info;

use crate::config::EtlConfig;
use crate::fetcher::CsvFetcher;
use crate::models::TripRecord;
use crate::processor::{Deduplicator, RuleNormalizer, Validator};
use crate::storage::TripStore;
use crate::storage::file_sink;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineStats {
    pub read: usize,
    pub malformed: usize,
    pub unique: usize,
    pub duplicates: usize,
    pub exact_copies: usize,
    pub invalid: usize,
    pub loaded: u64,
    pub row_count: i64,
}

impl PipelineStats {
    pub fn log_summary(&self) {
        info!("=== ETL Summary ===");
        info!("📥 Rows parsed: {} ({} malformed skipped)", self.read, self.malformed);
        info!(
            "🧹 Unique: {}, duplicates archived: {}, exact copies dropped: {}",
            self.unique, self.duplicates, self.exact_copies
        );
        info!("🚫 Rejected for negative amounts: {}", self.invalid);
        info!("📊 Loaded: {}, table row count: {}", self.loaded, self.row_count);
    }
}

/// Output of the file-only stages, before anything is written anywhere.
#[derive(Debug, Default)]
pub struct StagedTrips {
    pub records: Vec<TripRecord>,
    pub duplicates: Vec<TripRecord>,
    pub rejected: Vec<TripRecord>,
    pub stats: PipelineStats,
}

/// read → dedupe → validate → normalize → load → count, strictly in sequence.
pub struct EtlPipeline {
    fetcher: CsvFetcher,
    deduplicator: Deduplicator,
    validator: Validator,
    normalizer: RuleNormalizer,
    duplicates_path: PathBuf,
    rejected_path: Option<PathBuf>,
    report_path: PathBuf,
}

impl EtlPipeline {
    pub fn from_config(config: &EtlConfig) -> Result<Self> {
        Ok(EtlPipeline {
            fetcher: CsvFetcher::new(&config.input_path),
            deduplicator: Deduplicator,
            validator: Validator,
            normalizer: RuleNormalizer::new(config.time_zone()?),
            duplicates_path: config.duplicates_path.clone(),
            rejected_path: config.rejected_path.clone(),
            report_path: config.report_path.clone(),
        })
    }

    pub fn stage(&self) -> Result<StagedTrips> {
        let fetched = self.fetcher.fetch_all()?;
        let mut stats = PipelineStats {
            read: fetched.records.len(),
            malformed: fetched.malformed,
            ..Default::default()
        };

        let deduped = self.deduplicator.split(fetched.records);
        stats.unique = deduped.unique.len();
        stats.duplicates = deduped.duplicates.len();
        stats.exact_copies = deduped.exact_copies;

        let validated = self.validator.retain_valid(deduped.unique);
        stats.invalid = validated.rejected.len();

        let mut records = validated.valid;
        self.normalizer
            .normalize_records(&mut records)
            .context("Failed to normalize trip records")?;
        info!(
            "Normalized {} records (pickup times {} → UTC)",
            records.len(),
            self.normalizer.zone().name()
        );

        Ok(StagedTrips {
            records,
            duplicates: deduped.duplicates,
            rejected: validated.rejected,
            stats,
        })
    }

    /// Runs the file-only stages and archives duplicates (and rejects, when a
    /// rejected-rows file is configured).
    pub fn prepare(&self) -> Result<StagedTrips> {
        let staged = self.stage()?;

        file_sink::write_trip_csv(&self.duplicates_path, &staged.duplicates)
            .context("Failed to write duplicates file")?;

        if let Some(rejected_path) = &self.rejected_path {
            file_sink::write_trip_csv(rejected_path, &staged.rejected)
                .context("Failed to write rejected rows file")?;
        }

        Ok(staged)
    }

    pub async fn run<S>(&self, store: &S) -> Result<PipelineStats>
    where
        S: TripStore + ?Sized,
    {
        store
            .provision()
            .await
            .context("Failed to provision trip table")?;

        let staged = self.prepare()?;
        let mut stats = staged.stats;

        stats.loaded = store
            .bulk_insert(&staged.records)
            .await
            .context("Bulk load failed; transaction rolled back")?;

        stats.row_count = store
            .row_count()
            .await
            .context("Failed to count loaded rows")?;

        self.report(stats.row_count)?;
        Ok(stats)
    }

    fn report(&self, row_count: i64) -> Result<()> {
        println!("ETL Process Completed. {}", file_sink::row_count_line(row_count));
        file_sink::write_row_count_report(&self.report_path, row_count)
    }
}
