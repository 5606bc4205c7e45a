use rustc_hash::FxHashMap;

use super::field::Field;

/// Memoizes location-independent aggregate field values.
///
/// Entries are tagged with the region change stamp they were computed under
/// and ignored once any field changes, so a cache can be kept across
/// evaluations and only pays for recomputation when the region moved on.
#[derive(Debug, Default)]
pub struct FieldCache {
    aggregates: FxHashMap<Field, (u64, Vec<f64>)>,
}

impl FieldCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops all memoized values.
    pub fn invalidate(&mut self) {
        self.aggregates.clear();
    }

    pub(crate) fn lookup(&self, field: Field, stamp: u64) -> Option<&[f64]> {
        self.aggregates
            .get(&field)
            .filter(|(cached_stamp, _)| *cached_stamp == stamp)
            .map(|(_, values)| values.as_slice())
    }

    pub(crate) fn store(&mut self, field: Field, stamp: u64, values: Vec<f64>) {
        self.aggregates.insert(field, (stamp, values));
    }
}
