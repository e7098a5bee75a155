//! Idle-gap collapse across task groups.
//!
//! The latest-ending group is the anchor and keeps its real timestamps. Every
//! earlier group is shifted so that it ends exactly where the next group
//! starts, so the groups read as one continuous pipeline.
//!
//! A group whose runs never started has only an end. It is moved so that end
//! meets the next group, but the group before it is laid against the next
//! group that actually started.

use crate::{Millis, TaskGroup, TimeRange, task_group_time_range};

/// A group with its (possibly shifted) time range and the shift applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StitchedGroup {
    pub group: TaskGroup,
    pub range: TimeRange,
    pub offset: Millis,
}

/// Pairs each group with its time range, unshifted, in input order.
pub fn unstitched(groups: Vec<TaskGroup>) -> Vec<StitchedGroup> {
    groups
        .into_iter()
        .map(|group| StitchedGroup {
            range: task_group_time_range(&group),
            group,
            offset: 0,
        })
        .collect()
}

/// Lays groups out back to back. Output is sorted by `end`, falling back to
/// `start`, ascending.
pub fn stitch(groups: Vec<TaskGroup>) -> Vec<StitchedGroup> {
    let mut entries = unstitched(groups);
    entries.sort_by_key(|e| e.range.end.or(e.range.start).unwrap_or(0));

    // Start of the nearest later group that has one, after its shift.
    let mut next_start: Option<Millis> = None;
    let mut anchored = false;

    for entry in entries.iter_mut().rev() {
        let original = entry.range;
        if !anchored {
            anchored = original.start.is_some();
            next_start = original.start;
            continue;
        }
        let (Some(next), Some(edge)) = (next_start, original.end.or(original.start)) else {
            tracing::debug!(group = %entry.group.task_group_id, "no timing, left in place");
            continue;
        };

        let offset = next - edge;
        shift_group(entry, offset);
        if entry.range.start.is_some() {
            next_start = entry.range.start;
        }
        tracing::debug!(group = %entry.group.task_group_id, offset, "stitched group");
    }
    entries
}

fn shift_group(entry: &mut StitchedGroup, offset: Millis) {
    entry.offset = offset;
    if offset == 0 {
        return;
    }
    entry.range = entry.range.shifted(offset);
    for run in entry.group.tasks.iter_mut().flat_map(|t| t.status.runs.iter_mut()) {
        run.started = run.started.map(|t| t + offset);
        run.resolved = run.resolved.map(|t| t + offset);
    }
}
