//! Contiguity grouping and reference-track coverage checks.

use crate::catalog::record::GranuleRecord;
use chrono::{DateTime, Duration, Utc};

/// An ordered, non-empty run of granules whose time gaps stay within the
/// contiguity tolerance. Rebuilt fresh on every pass.
#[derive(Debug, Clone)]
pub struct ContiguousGroup {
    records: Vec<GranuleRecord>,
}

impl ContiguousGroup {
    fn new(first: GranuleRecord) -> Self {
        Self {
            records: vec![first],
        }
    }

    /// The granules of this group, in start-time order.
    pub fn records(&self) -> &[GranuleRecord] {
        &self.records
    }

    /// Number of granules in the group.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Groups are never empty.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The time span covered by the group, from the first granule's start
    /// to the last granule's end.
    pub fn span(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let first = self.records.first().expect("group is non-empty");
        let last = self.records.last().expect("group is non-empty");
        (first.start_time, last.end_time)
    }

    /// Whether the group's span fully contains the given interval.
    pub fn contains_interval(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        let (span_start, span_end) = self.span();
        span_start <= start && end <= span_end
    }
}

/// Partition granules into maximal contiguous groups.
///
/// Records are sorted by start time (ties broken by granule id for
/// determinism) and walked once; a new group starts whenever the gap from
/// the previous record's end exceeds `max_gap`. Groups are never merged or
/// reordered afterwards.
pub fn contiguous_groups(
    mut records: Vec<GranuleRecord>,
    max_gap: Duration,
) -> Vec<ContiguousGroup> {
    records.sort_by(|a, b| {
        a.start_time
            .cmp(&b.start_time)
            .then_with(|| a.granule_id.cmp(&b.granule_id))
    });

    let mut groups: Vec<ContiguousGroup> = Vec::new();

    for record in records {
        match groups.last_mut() {
            Some(group) => {
                let prev_end = group.records.last().expect("group is non-empty").end_time;
                let gap = record.start_time - prev_end;
                if gap <= max_gap {
                    group.records.push(record);
                } else {
                    tracing::debug!(
                        "Gap of {}s before granule {} starts a new group",
                        gap.num_seconds(),
                        record.granule_id
                    );
                    groups.push(ContiguousGroup::new(record));
                }
            }
            None => groups.push(ContiguousGroup::new(record)),
        }
    }

    groups
}

/// Check whether any group fully covers the granule's validity interval.
///
/// Used to flag processing opportunities that lack reference-track
/// coverage. Advisory only: the caller logs the condition and processes the
/// granule anyway.
pub fn groups_contain(groups: &[ContiguousGroup], granule: &GranuleRecord) -> bool {
    groups
        .iter()
        .any(|g| g.contains_interval(granule.start_time, granule.end_time))
}
