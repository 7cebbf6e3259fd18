//! The history-compaction sweep.
//!
//! When every field modification wrote its own audit row, the history
//! table filled with near-duplicate rows milliseconds apart. The sweep
//! classifies a row as redundant when a later row for the same grouping
//! key exists within a fixed gap of it.
//!
//! The scan runs newest to oldest and always compares a row against its
//! immediately newer neighbor in the *original* sequence, not against the
//! nearest surviving row. A chain of close rows therefore collapses down
//! to its newest member. The two comparison rules are not equivalent in
//! general; callers and tests rely on the literal one.
//!
//! Classification is pure: fetching, deleting, and reporting live in
//! [`cleaner`](super::cleaner).

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use super::{HistoryRow, RowId};

/// Rows closer together than this are considered redundant.
pub const DELETE_GAP_MS: i64 = 500;

/// The default gap as a [`Duration`].
#[must_use]
pub fn default_delete_gap() -> Duration {
    Duration::milliseconds(DELETE_GAP_MS)
}

/// Caller precondition violation: the fetched rows were not sorted
/// ascending by `created`.
///
/// The sweep refuses to guess at an ordering; a silent mis-compaction
/// would delete the wrong rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("history rows out of order at index {index}: {earlier} is followed by {later}")]
pub struct OrderingError {
    /// Index of the row that broke the ordering.
    pub index: usize,
    /// Timestamp of the preceding row.
    pub earlier: DateTime<Utc>,
    /// Timestamp of the out-of-order row.
    pub later: DateTime<Utc>,
}

/// Compute which rows are redundant.
///
/// `rows` must be sorted ascending by `created` (ties allowed; their
/// input order is preserved and the newer-positioned row wins). Returns
/// the doomed row ids in newest-to-oldest visit order. The newest row is
/// never doomed, and empty input yields an empty result.
///
/// # Errors
///
/// [`OrderingError`] if `rows` is not sorted ascending by `created`.
pub fn redundant_rows(rows: &[HistoryRow], gap: Duration) -> Result<Vec<RowId>, OrderingError> {
    for (index, pair) in rows.windows(2).enumerate() {
        if pair[1].created < pair[0].created {
            return Err(OrderingError {
                index: index + 1,
                earlier: pair[0].created,
                later: pair[1].created,
            });
        }
    }

    let mut doomed = Vec::new();
    let mut next_created: Option<DateTime<Utc>> = None;
    for row in rows.iter().rev() {
        if let Some(next) = next_created {
            // Compare this timestamp with the next one. If this row is
            // followed closely by another, it can be discarded.
            if next - row.created < gap {
                doomed.push(row.id);
            }
        }
        // Always track the immediate neighbor, kept or not.
        next_created = Some(row.created);
    }

    Ok(doomed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use proptest::prelude::*;

    fn ts(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.3f")
            .expect("test timestamp")
            .and_utc()
    }

    fn rows(spec: &[(RowId, &str)]) -> Vec<HistoryRow> {
        spec.iter()
            .map(|&(id, created)| HistoryRow::new(id, ts(created)))
            .collect()
    }

    #[test]
    fn empty_input_dooms_nothing() {
        let doomed = redundant_rows(&[], default_delete_gap()).expect("sweep");
        assert!(doomed.is_empty());
    }

    #[test]
    fn single_row_is_kept() {
        let input = rows(&[(1, "2013-07-13 12:11:10.987")]);
        let doomed = redundant_rows(&input, default_delete_gap()).expect("sweep");
        assert!(doomed.is_empty());
    }

    #[test]
    fn two_rows_within_gap_doom_the_older() {
        let input = rows(&[
            (7, "2013-07-13 12:34:56.789"),
            (9, "2013-07-13 12:34:56.987"),
        ]);
        let doomed = redundant_rows(&input, default_delete_gap()).expect("sweep");
        assert_eq!(doomed, vec![7]);
    }

    #[test]
    fn two_rows_beyond_gap_both_survive() {
        let input = rows(&[
            (7, "2013-07-13 12:34:56.789"),
            (9, "2013-07-13 12:34:57.890"),
        ]);
        let doomed = redundant_rows(&input, default_delete_gap()).expect("sweep");
        assert!(doomed.is_empty());
    }

    #[test]
    fn a_bunch_of_rows() {
        let input = rows(&[
            (4, "2013-07-13 16:30:00.000"),  // keep
            (8, "2013-07-13 16:30:01.100"),
            (15, "2013-07-13 16:30:01.200"),
            (16, "2013-07-13 16:30:01.300"), // keep
            (23, "2013-07-13 16:30:02.400"),
            (42, "2013-07-13 16:30:02.500"),
            (98, "2013-07-13 16:30:02.600"), // keep
            (99, "2013-07-13 16:30:59.000"), // keep
        ]);
        let doomed = redundant_rows(&input, default_delete_gap()).expect("sweep");
        // Newest-to-oldest visit order.
        assert_eq!(doomed, vec![42, 23, 15, 8]);
    }

    #[test]
    fn equal_timestamps_keep_the_later_positioned_row() {
        let input = rows(&[
            (1, "2013-07-13 16:30:00.000"),
            (2, "2013-07-13 16:30:00.000"),
            (3, "2013-07-13 16:30:00.000"),
        ]);
        let doomed = redundant_rows(&input, default_delete_gap()).expect("sweep");
        assert_eq!(doomed, vec![2, 1]);
    }

    #[test]
    fn comparison_uses_the_original_neighbor_not_the_survivor() {
        // 0.0, 0.4, 0.8: each adjacent pair is within the gap, so both
        // older rows go — even though 0.8 - 0.0 exceeds the gap. Under a
        // compare-to-survivor rule the middle row's deletion would make
        // the first row survive.
        let input = rows(&[
            (1, "2013-07-13 16:30:00.000"),
            (2, "2013-07-13 16:30:00.400"),
            (3, "2013-07-13 16:30:00.800"),
        ]);
        let doomed = redundant_rows(&input, default_delete_gap()).expect("sweep");
        assert_eq!(doomed, vec![2, 1]);
    }

    #[test]
    fn out_of_order_input_is_rejected() {
        let input = rows(&[
            (1, "2013-07-13 16:30:01.000"),
            (2, "2013-07-13 16:30:00.000"),
        ]);
        let err = redundant_rows(&input, default_delete_gap()).expect_err("must reject");
        assert_eq!(err.index, 1);
        assert_eq!(err.earlier, ts("2013-07-13 16:30:01.000"));
        assert_eq!(err.later, ts("2013-07-13 16:30:00.000"));
    }

    #[test]
    fn gap_is_exclusive_at_the_boundary() {
        // Exactly 500ms apart is *not* within the gap.
        let input = rows(&[
            (1, "2013-07-13 16:30:00.000"),
            (2, "2013-07-13 16:30:00.500"),
        ]);
        let doomed = redundant_rows(&input, default_delete_gap()).expect("sweep");
        assert!(doomed.is_empty());
    }

    fn sorted_rows_strategy() -> impl Strategy<Value = Vec<HistoryRow>> {
        prop::collection::vec(0i64..120_000, 0..48).prop_map(|mut offsets| {
            offsets.sort_unstable();
            offsets
                .into_iter()
                .enumerate()
                .map(|(i, ms)| {
                    let base = ts("2013-07-13 16:30:00.000");
                    HistoryRow::new(i as RowId, base + Duration::milliseconds(ms))
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn newest_row_always_survives(input in sorted_rows_strategy()) {
            let doomed = redundant_rows(&input, default_delete_gap()).expect("sorted input");
            if let Some(newest) = input.last() {
                prop_assert!(!doomed.contains(&newest.id));
            }
        }

        #[test]
        fn at_least_one_row_survives(input in sorted_rows_strategy()) {
            let doomed = redundant_rows(&input, default_delete_gap()).expect("sorted input");
            if input.is_empty() {
                prop_assert!(doomed.is_empty());
            } else {
                prop_assert!(doomed.len() < input.len());
            }
        }

        #[test]
        fn sweep_is_deterministic(input in sorted_rows_strategy()) {
            let first = redundant_rows(&input, default_delete_gap()).expect("sorted input");
            let second = redundant_rows(&input, default_delete_gap()).expect("sorted input");
            prop_assert_eq!(first, second);
        }
    }
}
