use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::TripRecord;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Why a single row could not become a [`TripRecord`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TripParseError {
    #[error("missing column {0}")]
    MissingColumn(&'static str),

    #[error("invalid value {value:?} in column {field}")]
    InvalidField { field: &'static str, value: String },

    #[error("unreadable row: {0}")]
    Unreadable(String),
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub records: Vec<TripRecord>,
    /// Rows skipped because a required field was missing or unparsable.
    pub malformed: usize,
}

/// Maps the nine required columns to their positions in the header row.
/// Lookup is by exact header name; order and extra columns don't matter.
#[derive(Debug, Default)]
struct ColumnIndex {
    positions: HashMap<String, usize>,
}

impl ColumnIndex {
    fn from_headers(headers: &StringRecord) -> Self {
        let mut positions = HashMap::new();
        for (i, name) in headers.iter().enumerate() {
            positions.entry(name.to_string()).or_insert(i);
        }
        ColumnIndex { positions }
    }

    fn field<'r>(
        &self,
        record: &'r StringRecord,
        column: &'static str,
    ) -> Result<&'r str, TripParseError> {
        self.positions
            .get(column)
            .and_then(|&i| record.get(i))
            .ok_or(TripParseError::MissingColumn(column))
    }
}

pub struct CsvFetcher {
    path: PathBuf,
}

impl CsvFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvFetcher { path: path.into() }
    }

    pub fn fetch_all(&self) -> Result<FetchOutcome> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open trip CSV: {}", self.path.display()))?;

        let outcome = Self::fetch_from_reader(file)
            .with_context(|| format!("Failed to read trip CSV: {}", self.path.display()))?;

        info!(
            "Read {} trip records from {} ({} malformed rows skipped)",
            outcome.records.len(),
            self.path.display(),
            outcome.malformed
        );

        Ok(outcome)
    }

    /// Parses every data row. Rows that fail to parse are dropped and only
    /// counted; I/O failures on the underlying reader are returned.
    pub fn fetch_from_reader<R: Read>(reader: R) -> Result<FetchOutcome> {
        let mut csv_reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let columns = ColumnIndex::from_headers(&headers);

        let mut outcome = FetchOutcome::default();
        let mut record = StringRecord::new();
        let mut row = 0u64;

        loop {
            row += 1;
            let parsed = match csv_reader.read_record(&mut record) {
                Ok(false) => break,
                Ok(true) => parse_record(&columns, &record),
                Err(e) if e.is_io_error() => return Err(e.into()),
                Err(e) => Err(TripParseError::Unreadable(e.to_string())),
            };

            match parsed {
                Ok(trip) => outcome.records.push(trip),
                Err(e) => {
                    debug!("Skipping data row {}: {}", row, e);
                    outcome.malformed += 1;
                }
            }
        }

        Ok(outcome)
    }
}

fn parse_record(columns: &ColumnIndex, record: &StringRecord) -> Result<TripRecord, TripParseError> {
    Ok(TripRecord {
        pickup_datetime: parse_datetime(columns, record, "tpep_pickup_datetime")?,
        dropoff_datetime: parse_datetime(columns, record, "tpep_dropoff_datetime")?,
        passenger_count: parse_int(columns, record, "passenger_count")?,
        trip_distance: parse_decimal(columns, record, "trip_distance")?,
        store_and_fwd_flag: columns.field(record, "store_and_fwd_flag")?.trim().to_string(),
        pu_location_id: parse_int(columns, record, "PULocationID")?,
        do_location_id: parse_int(columns, record, "DOLocationID")?,
        fare_amount: parse_decimal(columns, record, "fare_amount")?,
        tip_amount: parse_decimal(columns, record, "tip_amount")?,
    })
}

fn invalid(field: &'static str, value: &str) -> TripParseError {
    TripParseError::InvalidField {
        field,
        value: value.to_string(),
    }
}

fn parse_int(
    columns: &ColumnIndex,
    record: &StringRecord,
    field: &'static str,
) -> Result<i32, TripParseError> {
    let raw = columns.field(record, field)?;
    raw.trim().parse::<i32>().map_err(|_| invalid(field, raw))
}

fn parse_decimal(
    columns: &ColumnIndex,
    record: &StringRecord,
    field: &'static str,
) -> Result<Decimal, TripParseError> {
    let raw = columns.field(record, field)?;
    Decimal::from_str(raw.trim()).map_err(|_| invalid(field, raw))
}

fn parse_datetime(
    columns: &ColumnIndex,
    record: &StringRecord,
    field: &'static str,
) -> Result<NaiveDateTime, TripParseError> {
    let raw = columns.field(record, field)?;
    parse_timestamp(raw.trim()).ok_or_else(|| invalid(field, raw))
}

pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::trip_record::fixtures::timestamp;
    use std::io::Write;

    const HEADER: &str = "VendorID,tpep_pickup_datetime,tpep_dropoff_datetime,passenger_count,trip_distance,RatecodeID,store_and_fwd_flag,PULocationID,DOLocationID,payment_type,fare_amount,extra,mta_tax,tip_amount";

    fn fetch(content: &str) -> FetchOutcome {
        CsvFetcher::fetch_from_reader(content.as_bytes()).unwrap()
    }

    #[test]
    fn test_parses_taxi_export_with_extra_columns() {
        let content = format!(
            "{}\n1,2020-01-01 00:28:15,2020-01-01 00:33:03,1,1.20,1, N ,238,239,1,6.00,3.0,0.5,1.47\n",
            HEADER
        );
        let outcome = fetch(&content);

        assert_eq!(outcome.malformed, 0);
        assert_eq!(outcome.records.len(), 1);

        let trip = &outcome.records[0];
        assert_eq!(trip.pickup_datetime, timestamp("2020-01-01 00:28:15"));
        assert_eq!(trip.dropoff_datetime, timestamp("2020-01-01 00:33:03"));
        assert_eq!(trip.passenger_count, 1);
        assert_eq!(trip.trip_distance, Decimal::new(120, 2));
        assert_eq!(trip.store_and_fwd_flag, "N");
        assert_eq!(trip.pu_location_id, 238);
        assert_eq!(trip.do_location_id, 239);
        assert_eq!(trip.fare_amount, Decimal::new(600, 2));
        assert_eq!(trip.tip_amount, Decimal::new(147, 2));
    }

    #[test]
    fn test_header_order_does_not_matter() {
        let content = "tip_amount,fare_amount,DOLocationID,PULocationID,store_and_fwd_flag,trip_distance,passenger_count,tpep_dropoff_datetime,tpep_pickup_datetime\n\
                       1.47,6.00,239,238,Y,1.20,2,2020-01-01 00:33:03,2020-01-01 00:28:15\n";
        let outcome = fetch(content);

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].passenger_count, 2);
        assert_eq!(outcome.records[0].store_and_fwd_flag, "Y");
        assert_eq!(outcome.records[0].pickup_datetime, timestamp("2020-01-01 00:28:15"));
    }

    #[test]
    fn test_malformed_rows_are_skipped_silently() {
        let content = format!(
            "{h}\n\
             1,not-a-date,2020-01-01 00:33:03,1,1.20,1,N,238,239,1,6.00,3.0,0.5,1.47\n\
             1,2020-01-01 00:28:15,2020-01-01 00:33:03,,1.20,1,N,238,239,1,6.00,3.0,0.5,1.47\n\
             1,2020-01-01 00:28:15,2020-01-01 00:33:03,1.5,1.20,1,N,238,239,1,6.00,3.0,0.5,1.47\n\
             1,2020-01-01 00:28:15,2020-01-01 00:33:03,1,1.20,1,N,238,239,1,abc,3.0,0.5,1.47\n\
             1,2020-01-01 00:28:15,2020-01-01 00:33:03,1,1.20,1,N,238\n\
             1,2020-01-01 01:00:00,2020-01-01 01:10:00,1,2.00,1,N,238,239,1,9.00,3.0,0.5,0\n",
            h = HEADER
        );
        let outcome = fetch(&content);

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.malformed, 5);
        assert_eq!(outcome.records[0].pickup_datetime, timestamp("2020-01-01 01:00:00"));
    }

    #[test]
    fn test_missing_required_column_skips_every_row() {
        let content = "tpep_pickup_datetime,tpep_dropoff_datetime,passenger_count\n\
                       2020-01-01 00:28:15,2020-01-01 00:33:03,1\n\
                       2020-01-01 00:29:15,2020-01-01 00:35:03,2\n";
        let outcome = fetch(content);

        assert!(outcome.records.is_empty());
        assert_eq!(outcome.malformed, 2);
    }

    #[test]
    fn test_empty_flag_is_accepted() {
        let content = format!(
            "{}\n1,2020-01-01 00:28:15,2020-01-01 00:33:03,1,1.20,1,,238,239,1,6.00,3.0,0.5,1.47\n",
            HEADER
        );
        let outcome = fetch(&content);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].store_and_fwd_flag, "");
    }

    #[test]
    fn test_timestamp_formats() {
        let expected = timestamp("2020-01-01 13:05:09");
        assert_eq!(parse_timestamp("2020-01-01 13:05:09"), Some(expected));
        assert_eq!(parse_timestamp("2020-01-01T13:05:09"), Some(expected));
        assert_eq!(parse_timestamp("01/01/2020 13:05:09"), Some(expected));
        assert_eq!(parse_timestamp("01/01/2020 01:05:09 PM"), Some(expected));
        assert_eq!(
            parse_timestamp("2020-01-01"),
            Some(timestamp("2020-01-01 00:00:00"))
        );
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_fetch_all_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", HEADER).unwrap();
        writeln!(
            file,
            "2,2020-01-01 00:28:15,2020-01-01 00:33:03,1,1.20,1,N,238,239,1,6.00,3.0,0.5,1.47"
        )
        .unwrap();

        let fetcher = CsvFetcher::new(file.path());
        let outcome = fetcher.fetch_all().unwrap();
        assert_eq!(outcome.records.len(), 1);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let fetcher = CsvFetcher::new("does/not/exist.csv");
        assert!(fetcher.fetch_all().is_err());
    }
}
