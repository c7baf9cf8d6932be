//! Insertion-ordered, id-deduplicated record accumulator.
//!
//! Overlapping tiles (and restarts at a finer tiling level) return the
//! same record more than once; [`RecordSet`] keeps the first copy and
//! drops the rest.

use std::collections::BTreeSet;

/// Accumulates JSON records, keeping the first occurrence of each id.
///
/// Records whose id field is missing cannot be deduplicated; they are kept
/// rather than silently dropped and counted in
/// [`RecordSet::without_id`].
#[derive(Debug, Clone)]
pub struct RecordSet {
    id_field: String,
    seen: BTreeSet<String>,
    records: Vec<serde_json::Value>,
    without_id: u64,
}

impl RecordSet {
    /// Creates an empty set keyed by the top-level field `id_field`.
    #[must_use]
    pub fn new(id_field: &str) -> Self {
        Self {
            id_field: id_field.to_string(),
            seen: BTreeSet::new(),
            records: Vec::new(),
            without_id: 0,
        }
    }

    /// Adds `record` unless its id was already seen. Returns `true` if the
    /// record was added.
    pub fn insert(&mut self, record: serde_json::Value) -> bool {
        match record_id(&record, &self.id_field) {
            Some(id) => {
                if !self.seen.insert(id) {
                    return false;
                }
            }
            None => self.without_id += 1,
        }
        self.records.push(record);
        true
    }

    /// Adds every record, returning how many were new.
    pub fn extend<I>(&mut self, records: I) -> usize
    where
        I: IntoIterator<Item = serde_json::Value>,
    {
        records
            .into_iter()
            .map(|r| self.insert(r))
            .filter(|added| *added)
            .count()
    }

    /// Whether a record with this id has been added.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Number of records held.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records added without an id.
    #[must_use]
    pub const fn without_id(&self) -> u64 {
        self.without_id
    }

    /// The records in insertion order.
    #[must_use]
    pub fn records(&self) -> &[serde_json::Value] {
        &self.records
    }

    /// Ids of the held records in insertion order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.records
            .iter()
            .filter_map(|r| record_id(r, &self.id_field))
            .collect()
    }

    /// Consumes the set, returning the records in insertion order.
    #[must_use]
    pub fn into_records(self) -> Vec<serde_json::Value> {
        self.records
    }
}

/// Reads `field` from `record` as an id string. Numeric ids are rendered
/// in decimal so `42` and `"42"` are the same record.
#[must_use]
pub fn record_id(record: &serde_json::Value, field: &str) -> Option<String> {
    match record.get(field)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn keeps_first_occurrence_in_order() {
        let mut set = RecordSet::new("id");
        assert!(set.insert(json!({"id": "a", "v": 1})));
        assert!(set.insert(json!({"id": "b"})));
        assert!(!set.insert(json!({"id": "a", "v": 2})));

        assert_eq!(set.len(), 2);
        assert_eq!(set.ids(), ["a", "b"]);
        assert_eq!(set.records()[0]["v"], 1);
    }

    #[test]
    fn numeric_and_string_ids_collide() {
        let mut set = RecordSet::new("id");
        assert_eq!(set.extend([json!({"id": 42}), json!({"id": "42"})]), 1);
        assert!(set.contains("42"));
    }

    #[test]
    fn records_without_id_are_kept_and_counted() {
        let mut set = RecordSet::new("id");
        set.extend([json!({"name": "x"}), json!({"id": null}), json!({"id": ""})]);
        assert_eq!(set.len(), 3);
        assert_eq!(set.without_id(), 3);
        assert!(set.ids().is_empty());
    }
}
