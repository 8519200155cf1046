//! Deterministic ordering and grouping of records for tabular output.
//!
//! Records sort by holder, then patent-type priority (invention first), then
//! application date with the most recent first. The key is rebuilt on every
//! comparison rather than cached on the record, so a change to the
//! normalization rules can never leave a stale key behind.
//!
//! After sorting, a new visual group starts wherever the holder changes.
//! A type change inside the same holder is reported separately as a weaker
//! signal; renderers must not draw a group border for it.

use crate::normalize::ParsedDate;
use crate::record::PatentRecord;
use serde::Serialize;
use std::cmp::{Ordering, Reverse};

/// Derived sort key; field order is the comparison order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RankingKey<'a> {
    pub holder: &'a str,
    pub type_priority: u8,
    pub date: Reverse<ParsedDate>,
}

impl<'a> RankingKey<'a> {
    pub fn of(record: &'a PatentRecord) -> Self {
        Self {
            holder: record.holder_key(),
            type_priority: record.type_priority(),
            date: Reverse(record.parsed_date()),
        }
    }
}

/// Total order over records.
pub fn compare(a: &PatentRecord, b: &PatentRecord) -> Ordering {
    RankingKey::of(a).cmp(&RankingKey::of(b))
}

/// Stable in-place sort; full ties keep their input order.
pub fn sort_records(records: &mut [PatentRecord]) {
    records.sort_by(compare);
}

/// `true` at index 0 and wherever the holder differs from the previous row.
pub fn group_flags(sorted: &[PatentRecord]) -> Vec<bool> {
    sorted
        .iter()
        .enumerate()
        .map(|(i, r)| i == 0 || sorted[i - 1].holder_key() != r.holder_key())
        .collect()
}

/// One row of the rendered table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupedRow {
    pub record: PatentRecord,
    /// A new holder group starts at this row (draw a border above it).
    pub new_group: bool,
    /// Same holder as the previous row but a different normalized type.
    pub type_changed: bool,
}

/// Records in ranking order with their group-boundary flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrderedGroupedResultSet {
    rows: Vec<GroupedRow>,
}

impl OrderedGroupedResultSet {
    /// Sort `records` and compute the per-row flags.
    pub fn from_records(mut records: Vec<PatentRecord>) -> Self {
        sort_records(&mut records);
        let flags = group_flags(&records);
        let mut rows: Vec<GroupedRow> = Vec::with_capacity(records.len());
        for (record, new_group) in records.into_iter().zip(flags) {
            let type_changed = !new_group
                && rows
                    .last()
                    .is_some_and(|prev| prev.record.normalized_type() != record.normalized_type());
            rows.push(GroupedRow {
                record,
                new_group,
                type_changed,
            });
        }
        Self { rows }
    }

    pub fn rows(&self) -> &[GroupedRow] {
        &self.rows
    }

    pub fn records(&self) -> impl Iterator<Item = &PatentRecord> {
        self.rows.iter().map(|r| &r.record)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of distinct holder groups.
    pub fn group_count(&self) -> usize {
        self.rows.iter().filter(|r| r.new_group).count()
    }
}
