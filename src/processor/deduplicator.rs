use std::collections::HashSet;
use tracing::{debug, info};

use crate::models::TripRecord;

#[derive(Debug, Default)]
pub struct DedupOutcome {
    /// First record of every natural-key group, in first-occurrence order.
    pub unique: Vec<TripRecord>,
    /// Distinct later records that are not value-equal to any kept record.
    pub duplicates: Vec<TripRecord>,
    /// Later records that vanished because a value-equal record was already
    /// kept or already archived as a duplicate.
    pub exact_copies: usize,
}

/// Splits trips into kept and duplicate sets in two tiers:
///
/// 1. Group by [`NaturalKey`](crate::models::NaturalKey) and keep the first
///    record of each group.
/// 2. The duplicate set is the set difference `all - kept` under full-record
///    equality, with repeated values collapsed.
///
/// A later record with the same key but different fare, flag, etc. is not
/// equal to the kept one, so it is archived as a duplicate. A later record
/// that is a byte-for-byte copy of the kept one is removed by the difference
/// and appears in neither output; it is only counted in `exact_copies`.
pub struct Deduplicator;

impl Deduplicator {
    pub fn split(&self, records: Vec<TripRecord>) -> DedupOutcome {
        let total = records.len();

        let mut seen_keys = HashSet::with_capacity(total);
        let (unique, later): (Vec<_>, Vec<_>) = records
            .into_iter()
            .partition(|record| seen_keys.insert(record.natural_key()));

        let later_count = later.len();
        let duplicates = {
            let kept: HashSet<&TripRecord> = unique.iter().collect();
            let mut archived: HashSet<TripRecord> = HashSet::new();

            later
                .into_iter()
                .filter(|record| !kept.contains(record))
                .filter(|record| archived.insert(record.clone()))
                .collect::<Vec<_>>()
        };

        let exact_copies = later_count - duplicates.len();
        if exact_copies > 0 {
            debug!("{} exact copies removed without archiving", exact_copies);
        }

        info!(
            "Deduplicated {} records: {} unique, {} duplicates",
            total,
            unique.len(),
            duplicates.len()
        );

        DedupOutcome {
            unique,
            duplicates,
            exact_copies,
        }
    }
}
