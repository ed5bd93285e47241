use anyhow::{Result, anyhow};
use chrono::{LocalResult, NaiveDateTime, TimeZone};
use chrono_tz::Tz;

use crate::models::TripRecord;

/// Rewrites categorical flags and moves pickup times from the configured
/// civil zone to UTC. Dropoff times are left exactly as read.
pub struct RuleNormalizer {
    zone: Tz,
}

impl RuleNormalizer {
    pub fn new(zone: Tz) -> Self {
        RuleNormalizer { zone }
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    pub fn normalize_records(&self, records: &mut [TripRecord]) -> Result<()> {
        for record in records.iter_mut() {
            self.normalize_record(record)?;
        }
        Ok(())
    }

    pub fn normalize_record(&self, record: &mut TripRecord) -> Result<()> {
        record.store_and_fwd_flag = Self::normalize_flag(&record.store_and_fwd_flag);
        record.pickup_datetime = self.civil_to_utc(record.pickup_datetime)?;
        Ok(())
    }

    pub fn normalize_flag(flag: &str) -> String {
        match flag.trim() {
            "N" => "No".to_string(),
            "Y" => "Yes".to_string(),
            other => other.to_string(),
        }
    }

    /// Reads `local` as a wall-clock time in the civil zone and returns the
    /// same instant as a UTC wall-clock time. In the fall-back overlap the
    /// standard-time reading (the later instant) wins; a time that falls in
    /// the spring-forward gap does not exist and is an error.
    pub fn civil_to_utc(&self, local: NaiveDateTime) -> Result<NaiveDateTime> {
        match self.zone.from_local_datetime(&local) {
            LocalResult::Single(instant) => Ok(instant.naive_utc()),
            LocalResult::Ambiguous(first, second) => {
                Ok(first.naive_utc().max(second.naive_utc()))
            }
            LocalResult::None => Err(anyhow!(
                "Pickup time {} does not exist in time zone {}",
                local,
                self.zone.name()
            )),
        }
    }
}
