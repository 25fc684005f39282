// Incremental Filter
//
// Splits a fact collection against its stream's watermark:
//   date >  watermark  -> new, loaded this run
//   date == watermark  -> boundary, handled by BoundaryPolicy
//   date <  watermark  -> already loaded
// An empty watermark makes every row new.

use crate::model::Dated;
use crate::watermark::Watermark;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;

/// What to do with rows dated exactly on the watermark.
///
/// The watermark only has day granularity, so a second run on the same day
/// cannot tell loaded boundary rows from fresh ones by date alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryPolicy {
    /// Skip them; the day is assumed fully loaded.
    #[default]
    Strict,
    /// Load only the boundary rows not already present for that day.
    Reconcile,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Partition<R> {
    pub new: Vec<R>,
    pub boundary: Vec<R>,
    pub already_loaded: usize,
}

pub fn partition<R: Dated>(rows: Vec<R>, watermark: Watermark) -> Partition<R> {
    let mut out = Partition {
        new: Vec::new(),
        boundary: Vec::new(),
        already_loaded: 0,
    };

    for row in rows {
        let date = row.business_date();
        if watermark.admits(date) {
            out.new.push(row);
        } else if watermark.date() == Some(date) {
            out.boundary.push(row);
        } else {
            out.already_loaded += 1;
        }
    }

    out
}

/// Rows strictly after the watermark (all rows when it is empty).
pub fn select_new<R: Dated>(rows: Vec<R>, watermark: Watermark) -> Vec<R> {
    partition(rows, watermark).new
}

/// Multiset difference: drops one boundary row for every matching key the
/// warehouse already holds, keeping source order for the rest.
pub fn subtract_loaded<R, K, F>(boundary: Vec<R>, loaded: Vec<K>, key: F) -> Vec<R>
where
    K: Eq + Hash,
    F: Fn(&R) -> K,
{
    let mut remaining: HashMap<K, usize> = HashMap::new();
    for k in loaded {
        *remaining.entry(k).or_insert(0) += 1;
    }

    boundary
        .into_iter()
        .filter(|row| match remaining.get_mut(&key(row)) {
            Some(count) if *count > 0 => {
                *count -= 1;
                false
            }
            _ => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[derive(Debug, Clone, PartialEq)]
    struct Row(NaiveDate, &'static str);

    impl Dated for Row {
        fn business_date(&self) -> NaiveDate {
            self.0
        }
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_selects_only_rows_after_watermark() {
        let rows = vec![
            Row(ymd(2024, 1, 9), "a"),
            Row(ymd(2024, 1, 10), "b"),
            Row(ymd(2024, 1, 11), "c"),
        ];

        let selected = select_new(rows, Watermark::At(ymd(2024, 1, 10)));

        assert_eq!(selected, vec![Row(ymd(2024, 1, 11), "c")]);
    }

    #[test]
    fn test_empty_watermark_selects_everything() {
        let rows = vec![Row(ymd(2024, 1, 9), "a"), Row(ymd(2024, 1, 10), "b")];

        let selected = select_new(rows.clone(), Watermark::Empty);

        assert_eq!(selected, rows);
    }

    #[test]
    fn test_partition_separates_boundary() {
        let rows = vec![
            Row(ymd(2024, 1, 1), "old"),
            Row(ymd(2024, 1, 10), "edge-1"),
            Row(ymd(2024, 1, 10), "edge-2"),
            Row(ymd(2024, 1, 12), "new"),
        ];

        let parts = partition(rows, Watermark::At(ymd(2024, 1, 10)));

        assert_eq!(parts.new.len(), 1);
        assert_eq!(parts.boundary.len(), 2);
        assert_eq!(parts.already_loaded, 1);
    }

    #[test]
    fn test_subtract_loaded_is_a_multiset_difference() {
        let boundary = vec![
            Row(ymd(2024, 1, 10), "x"),
            Row(ymd(2024, 1, 10), "x"),
            Row(ymd(2024, 1, 10), "y"),
            Row(ymd(2024, 1, 10), "z"),
        ];
        // Warehouse holds one "x" and one "y" for the day
        let loaded = vec!["x", "y"];

        let remaining = subtract_loaded(boundary, loaded, |r| r.1);

        assert_eq!(
            remaining,
            vec![Row(ymd(2024, 1, 10), "x"), Row(ymd(2024, 1, 10), "z")]
        );
    }

    #[test]
    fn test_boundary_policy_defaults_to_strict() {
        assert_eq!(BoundaryPolicy::default(), BoundaryPolicy::Strict);
        let parsed: BoundaryPolicy = serde_json::from_str("\"reconcile\"").unwrap();
        assert_eq!(parsed, BoundaryPolicy::Reconcile);
    }
}
