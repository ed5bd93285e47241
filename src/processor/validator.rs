use tracing::info;

use crate::models::TripRecord;

#[derive(Debug, Default)]
pub struct ValidationOutcome {
    pub valid: Vec<TripRecord>,
    pub rejected: Vec<TripRecord>,
}

/// Drops trips with a negative fare or tip. Rejects are handed back so the
/// caller can count them; they are not archived unless a rejected-rows file
/// has been configured.
pub struct Validator;

impl Validator {
    pub fn retain_valid(&self, records: Vec<TripRecord>) -> ValidationOutcome {
        let (valid, rejected): (Vec<_>, Vec<_>) =
            records.into_iter().partition(TripRecord::has_valid_amounts);

        info!(
            "Validated {} records: {} rejected for negative amounts",
            valid.len() + rejected.len(),
            rejected.len()
        );

        ValidationOutcome { valid, rejected }
    }
}
