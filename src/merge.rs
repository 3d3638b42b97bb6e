//! Merges a freshly parsed capture batch into an account history.
//!
//! The history screen lists pulls newest first and only ever grows at the top,
//! so a new capture overlaps the stored timeline starting at the stored head.
//! Everything the capture shows above that overlap point is new.
//!
//! Each pool is merged independently. Matching is exact on the duplicate key;
//! OCR fuzziness has to be resolved by the parser before records get here.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::fmt;

use tracing::debug;

use crate::record::{AccountHistory, CaptureBatch, PullRecord};

/// Non-fatal findings of a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeWarning {
    /// No incoming record matched the stored head of the pool. The whole
    /// batch was accepted, but pulls between the two may be missing.
    PossibleHistoryGap {
        pool_name: String,
        incoming: usize,
        stored: usize,
    },
    /// The batch contained the same pull twice above the overlap point.
    DuplicateInBatch(PullRecord),
    /// The pull is already stored further down the timeline.
    AlreadyRecorded(PullRecord),
    /// The pull is older than the stored head but was not found in storage.
    OutOfOrder(PullRecord),
    /// With no overlap found, the pull matches a stored pull of the same
    /// minute except for its sequence hint. Skipped, since it cannot be told
    /// apart from a renumbered copy.
    AmbiguousRepeat(PullRecord),
    /// Below the overlap point, incoming and stored records stopped agreeing.
    OverlapMismatch {
        pool_name: String,
        incoming_index: usize,
        stored_index: usize,
    },
}

impl MergeWarning {
    pub fn is_gap(&self) -> bool {
        matches!(self, MergeWarning::PossibleHistoryGap { .. })
    }
}

impl fmt::Display for MergeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeWarning::PossibleHistoryGap {
                pool_name,
                incoming,
                stored,
            } => write!(
                f,
                "possible history gap in pool {:?}: none of {} captured pulls \
                 overlap the {} stored ones",
                pool_name, incoming, stored
            ),
            MergeWarning::DuplicateInBatch(record) => {
                write!(f, "pull captured twice, kept once: {}", record)
            }
            MergeWarning::AlreadyRecorded(record) => {
                write!(f, "pull already recorded below the overlap point: {}", record)
            }
            MergeWarning::OutOfOrder(record) => {
                write!(f, "pull older than the stored history, skipped: {}", record)
            }
            MergeWarning::AmbiguousRepeat(record) => write!(
                f,
                "pull may repeat a stored one in the same minute, skipped: {}",
                record
            ),
            MergeWarning::OverlapMismatch {
                pool_name,
                incoming_index,
                stored_index,
            } => write!(
                f,
                "capture disagrees with stored pool {:?} at captured row {} / stored row {}",
                pool_name, incoming_index, stored_index
            ),
        }
    }
}

/// Result of merging one batch into one account.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub history: AccountHistory,
    /// Newly added pulls, newest first.
    pub newly_added: Vec<PullRecord>,
    pub warnings: Vec<MergeWarning>,
}

/// New records for one pool timeline, plus what was noticed on the way.
#[derive(Debug, Default)]
struct TimelineMerge {
    fresh: Vec<PullRecord>,
    warnings: Vec<MergeWarning>,
}

/// Merges `incoming` into `existing`.
///
/// Never fails: anything that cannot be placed safely is left out of
/// `newly_added` and reported in `warnings`.
pub fn merge(mut existing: AccountHistory, incoming: &CaptureBatch) -> MergeOutcome {
    let mut newly_added = Vec::new();
    let mut warnings = Vec::new();

    for (pool_name, records) in group_by_pool(incoming.records()) {
        let stored = existing.timeline(pool_name);
        let merged = merge_timeline(pool_name, stored, &records);
        debug!(
            "Pool {:?}: {} captured, {} stored, {} new",
            pool_name,
            records.len(),
            stored.len(),
            merged.fresh.len()
        );
        warnings.extend(merged.warnings);
        newly_added.extend(merged.fresh.iter().cloned());
        existing.prepend(pool_name, merged.fresh);
    }

    newly_added.sort_by_key(|r| Reverse(r.timestamp));

    MergeOutcome {
        history: existing,
        newly_added,
        warnings,
    }
}

/// Splits the batch per pool, keeping capture order within each pool and
/// pools in order of first appearance.
fn group_by_pool(records: &[PullRecord]) -> Vec<(&str, Vec<&PullRecord>)> {
    let mut groups: Vec<(&str, Vec<&PullRecord>)> = Vec::new();
    for record in records {
        match groups
            .iter_mut()
            .find(|(name, _)| *name == record.pool_name)
        {
            Some((_, members)) => members.push(record),
            None => groups.push((record.pool_name.as_str(), vec![record])),
        }
    }
    groups
}

fn merge_timeline(
    pool_name: &str,
    stored: &[PullRecord],
    incoming: &[&PullRecord],
) -> TimelineMerge {
    let mut result = TimelineMerge::default();
    if incoming.is_empty() {
        return result;
    }

    let head = stored.first();
    let overlap = head.and_then(|head| incoming.iter().position(|r| r.same_pull(head)));

    match overlap {
        Some(at) => {
            if let Some(warning) = check_overlap(pool_name, &incoming[at..], stored, at) {
                result.warnings.push(warning);
            }
        }
        None if !stored.is_empty() => {
            result.warnings.push(MergeWarning::PossibleHistoryGap {
                pool_name: pool_name.to_string(),
                incoming: incoming.len(),
                stored: stored.len(),
            });
        }
        None => {}
    }

    let prefix = &incoming[..overlap.unwrap_or(incoming.len())];
    let mut seen = HashSet::new();
    for &record in prefix {
        if !seen.insert(record.key()) {
            result
                .warnings
                .push(MergeWarning::DuplicateInBatch(record.clone()));
            continue;
        }
        if contains_pull(stored, record) {
            result
                .warnings
                .push(MergeWarning::AlreadyRecorded(record.clone()));
            continue;
        }
        if head.is_some_and(|head| is_older(record, head)) {
            result.warnings.push(MergeWarning::OutOfOrder(record.clone()));
            continue;
        }
        if overlap.is_none() && contains_same_item(stored, record) {
            result
                .warnings
                .push(MergeWarning::AmbiguousRepeat(record.clone()));
            continue;
        }
        result.fresh.push(record.clone());
    }

    order_newest_first(&mut result.fresh);
    result
}

/// Walks the overlapping part in lockstep and reports the first disagreement.
fn check_overlap(
    pool_name: &str,
    overlapping: &[&PullRecord],
    stored: &[PullRecord],
    offset: usize,
) -> Option<MergeWarning> {
    overlapping
        .iter()
        .zip(stored)
        .position(|(incoming, stored)| !incoming.same_pull(stored))
        .map(|i| MergeWarning::OverlapMismatch {
            pool_name: pool_name.to_string(),
            incoming_index: offset + i,
            stored_index: i,
        })
}

/// Looks `record` up in a newest-first timeline.
fn contains_pull(stored: &[PullRecord], record: &PullRecord) -> bool {
    let start = stored.partition_point(|s| s.timestamp > record.timestamp);
    stored[start..]
        .iter()
        .take_while(|s| s.timestamp == record.timestamp)
        .any(|s| s.same_pull(record))
}

/// Same pool, minute and item as a stored pull, whatever the hint.
fn contains_same_item(stored: &[PullRecord], record: &PullRecord) -> bool {
    let start = stored.partition_point(|s| s.timestamp > record.timestamp);
    stored[start..]
        .iter()
        .take_while(|s| s.timestamp == record.timestamp)
        .any(|s| s.pool_name == record.pool_name && s.item_name == record.item_name)
}

/// True if `record` sorts below the stored head. Within one minute only
/// repeats of the same item are ordered, by their sequence hints.
fn is_older(record: &PullRecord, head: &PullRecord) -> bool {
    if record.timestamp != head.timestamp {
        return record.timestamp < head.timestamp;
    }
    record.item_name == head.item_name
        && matches!(
            (record.sequence_hint, head.sequence_hint),
            (Some(a), Some(b)) if a < b
        )
}

/// Sorts newest first. The sort is stable, so pulls sharing a timestamp keep
/// their capture order.
fn order_newest_first(records: &mut [PullRecord]) {
    records.sort_by_key(|r| Reverse(r.timestamp));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::test_support::{account, pull, pull_in};

    fn history_of(records: Vec<PullRecord>) -> AccountHistory {
        let mut history = AccountHistory::new(account("1001"));
        history.prepend("Standard", records);
        history
    }

    fn r(n: u32) -> PullRecord {
        pull(n, &format!("item{}", n))
    }

    fn names(records: &[PullRecord]) -> Vec<String> {
        records.iter().map(|r| r.item_name.clone()).collect()
    }

    #[test]
    fn test_overlap_prepends_only_new_records() {
        let existing = history_of(vec![r(5), r(4), r(3), r(2), r(1)]);
        let incoming = CaptureBatch::new(vec![r(7), r(6), r(5), r(4), r(3)]);

        let outcome = merge(existing, &incoming);

        assert_eq!(names(&outcome.newly_added), vec!["item7", "item6"]);
        assert_eq!(
            names(outcome.history.timeline("Standard")),
            vec!["item7", "item6", "item5", "item4", "item3", "item2", "item1"]
        );
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let existing = history_of(vec![r(2), r(1)]);
        let incoming = CaptureBatch::new(vec![r(4), r(3), r(2)]);

        let first = merge(existing, &incoming);
        assert_eq!(first.newly_added.len(), 2);

        let second = merge(first.history.clone(), &incoming);
        assert!(second.newly_added.is_empty());
        assert!(second.warnings.is_empty());
        assert_eq!(second.history, first.history);
    }

    #[test]
    fn test_empty_history_bootstrap_has_no_gap_warning() {
        let existing = AccountHistory::new(account("1001"));
        let incoming = CaptureBatch::new(vec![r(3), r(2), r(1)]);

        let outcome = merge(existing, &incoming);

        assert_eq!(names(&outcome.newly_added), vec!["item3", "item2", "item1"]);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_gap_accepts_whole_batch_with_warning() {
        let existing = history_of(vec![r(3), r(2), r(1)]);
        let incoming = CaptureBatch::new(vec![r(9), r(8)]);

        let outcome = merge(existing, &incoming);

        assert_eq!(names(&outcome.newly_added), vec!["item9", "item8"]);
        assert_eq!(
            names(outcome.history.timeline("Standard")),
            vec!["item9", "item8", "item3", "item2", "item1"]
        );
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].is_gap());
    }

    #[test]
    fn test_records_differing_only_in_item_are_distinct() {
        let existing = history_of(vec![pull(5, "Sword")]);
        let incoming = CaptureBatch::new(vec![pull(5, "Shield"), pull(5, "Sword")]);

        let outcome = merge(existing, &incoming);

        assert_eq!(names(&outcome.newly_added), vec!["Shield"]);
        assert_eq!(outcome.history.timeline("Standard").len(), 2);
    }

    #[test]
    fn test_same_minute_pulls_keep_capture_order() {
        let existing = history_of(vec![r(1)]);
        let incoming = CaptureBatch::new(vec![pull(7, "C"), pull(7, "B"), pull(7, "A"), r(1)]);

        let outcome = merge(existing, &incoming);

        assert_eq!(names(&outcome.newly_added), vec!["C", "B", "A"]);
        assert_eq!(
            names(outcome.history.timeline("Standard")),
            vec!["C", "B", "A", "item1"]
        );
    }

    #[test]
    fn test_newer_repeat_of_head_item_is_added() {
        let mut older = pull(7, "A");
        older.sequence_hint = Some(0);
        let mut newer = pull(7, "A");
        newer.sequence_hint = Some(1);

        let existing = history_of(vec![older.clone()]);
        let incoming = CaptureBatch::new(vec![newer.clone(), older]);

        let outcome = merge(existing, &incoming);

        assert_eq!(outcome.newly_added, vec![newer]);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_renumbered_copy_of_stored_pull_is_not_added() {
        // Stored head carries a hint the new capture no longer produces
        let mut stored_head = pull(7, "A");
        stored_head.sequence_hint = Some(1);
        let existing = history_of(vec![stored_head, r(6)]);

        let mut renumbered = pull(7, "A");
        renumbered.sequence_hint = Some(2);
        let incoming = CaptureBatch::new(vec![r(8), renumbered.clone(), r(6)]);

        let outcome = merge(existing, &incoming);

        assert_eq!(names(&outcome.newly_added), vec!["item8"]);
        assert!(outcome.warnings.iter().any(|w| w.is_gap()));
        assert!(outcome
            .warnings
            .contains(&MergeWarning::AmbiguousRepeat(renumbered)));
    }

    #[test]
    fn test_duplicate_in_batch_kept_once() {
        let outcome = merge(
            AccountHistory::new(account("1001")),
            &CaptureBatch::new(vec![r(3), r(3), r(2)]),
        );

        assert_eq!(names(&outcome.newly_added), vec!["item3", "item2"]);
        assert_eq!(outcome.warnings, vec![MergeWarning::DuplicateInBatch(r(3))]);
    }

    #[test]
    fn test_already_recorded_pull_is_not_reinserted() {
        // Stored head r(5) was misread this time, so no overlap is found,
        // but r(4) is still recognized as stored.
        let existing = history_of(vec![r(5), r(4), r(3)]);
        let incoming = CaptureBatch::new(vec![r(6), pull(5, "misread"), r(4)]);

        let outcome = merge(existing, &incoming);

        assert!(outcome.warnings.iter().any(|w| w.is_gap()));
        assert!(outcome
            .warnings
            .contains(&MergeWarning::AlreadyRecorded(r(4))));
        assert!(!outcome
            .warnings
            .contains(&MergeWarning::OutOfOrder(pull(5, "misread"))));
        assert_eq!(names(&outcome.newly_added), vec!["item6", "misread"]);
    }

    #[test]
    fn test_older_unknown_pull_reported_out_of_order() {
        let existing = history_of(vec![r(5), r(4)]);
        let incoming = CaptureBatch::new(vec![r(6), r(2)]);

        let outcome = merge(existing, &incoming);

        assert_eq!(names(&outcome.newly_added), vec!["item6"]);
        assert!(outcome.warnings.contains(&MergeWarning::OutOfOrder(r(2))));
        let timeline = outcome.history.timeline("Standard");
        assert!(timeline.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
    }

    #[test]
    fn test_overlap_mismatch_is_reported_not_rewritten() {
        let existing = history_of(vec![r(5), r(4), r(3)]);
        let incoming = CaptureBatch::new(vec![r(6), r(5), pull(4, "other"), r(3)]);

        let outcome = merge(existing, &incoming);

        assert_eq!(names(&outcome.newly_added), vec!["item6"]);
        assert_eq!(
            outcome.warnings,
            vec![MergeWarning::OverlapMismatch {
                pool_name: "Standard".to_string(),
                incoming_index: 2,
                stored_index: 1,
            }]
        );
        assert_eq!(
            names(outcome.history.timeline("Standard")),
            vec!["item6", "item5", "item4", "item3"]
        );
    }

    #[test]
    fn test_pools_merge_independently() {
        let existing = history_of(vec![r(2), r(1)]);
        let incoming = CaptureBatch::new(vec![
            pull_in("Limited", 9, "L2"),
            r(3),
            pull_in("Limited", 8, "L1"),
            r(2),
        ]);

        let outcome = merge(existing, &incoming);

        assert_eq!(names(&outcome.newly_added), vec!["L2", "L1", "item3"]);
        assert_eq!(names(outcome.history.timeline("Limited")), vec!["L2", "L1"]);
        assert_eq!(
            names(outcome.history.timeline("Standard")),
            vec!["item3", "item2", "item1"]
        );
        // First capture of the Limited pool is not a gap.
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_empty_batch_changes_nothing() {
        let existing = history_of(vec![r(1)]);
        let outcome = merge(existing.clone(), &CaptureBatch::default());
        assert!(outcome.newly_added.is_empty());
        assert_eq!(outcome.history, existing);
    }
}
