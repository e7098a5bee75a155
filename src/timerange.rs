//! Interval algebra over run timings: summed duration, overlap merging and
//! wall-clock time, plus the per-state time reports built on top of them.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

use crate::{Millis, RunState, TaskGroup, TaskRecord};

/// A possibly half-known span of time. Either bound may be unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<Millis>,
    pub end: Option<Millis>,
}

impl TimeRange {
    pub fn new(start: Option<Millis>, end: Option<Millis>) -> Self {
        Self { start, end }
    }

    pub fn closed(start: Millis, end: Millis) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Both bounds, when both are known.
    pub fn bounds(&self) -> Option<(Millis, Millis)> {
        self.start.zip(self.end)
    }

    pub fn is_unknown(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn shifted(&self, offset: Millis) -> Self {
        Self {
            start: self.start.map(|t| t + offset),
            end: self.end.map(|t| t + offset),
        }
    }
}

/// Sum of `end - start` over fully known ranges.
pub fn duration(ranges: &[TimeRange]) -> Millis {
    ranges
        .iter()
        .filter_map(TimeRange::bounds)
        .map(|(start, end)| end - start)
        .sum()
}

/// Minimal ascending cover of the fully known ranges. Touching ranges merge.
pub fn merge_overlapping(ranges: &[TimeRange]) -> Vec<TimeRange> {
    let mut sorted: Vec<(Millis, Millis)> = ranges.iter().filter_map(TimeRange::bounds).collect();
    sorted.sort_by_key(|&(start, _)| start);

    let mut merged: Vec<(Millis, Millis)> = Vec::with_capacity(sorted.len());
    for (start, end) in sorted {
        match merged.last_mut() {
            Some(prev) if end <= prev.1 => {}
            Some(prev) if start <= prev.1 => prev.1 = end,
            _ => merged.push((start, end)),
        }
    }
    merged
        .into_iter()
        .map(|(start, end)| TimeRange::closed(start, end))
        .collect()
}

/// Time covered by at least one range.
pub fn wall_time(ranges: &[TimeRange]) -> Millis {
    duration(&merge_overlapping(ranges))
}

/// Earliest run start and latest run resolution across a whole group.
/// Runs that never started do not pull the start back, so a group of only
/// cancelled runs has an end but no start.
pub fn task_group_time_range(group: &TaskGroup) -> TimeRange {
    let mut range = TimeRange::default();
    for run in group.tasks.iter().flat_map(|t| t.runs()) {
        if let Some(started) = run.started {
            range.start = Some(range.start.map_or(started, |s| s.min(started)));
        }
        if let Some(resolved) = run.resolved {
            range.end = Some(range.end.map_or(resolved, |e| e.max(resolved)));
        }
    }
    range
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTimeRange {
    pub range: TimeRange,
    pub state: RunState,
}

/// One range per run of every task accepted by `filter`.
pub fn task_time_ranges<'a, I, F>(tasks: I, filter: F) -> Vec<StateTimeRange>
where
    I: IntoIterator<Item = &'a TaskRecord>,
    F: Fn(&TaskRecord) -> bool,
{
    tasks
        .into_iter()
        .filter(|task| filter(*task))
        .flat_map(|task| task.runs())
        .map(|run| StateTimeRange {
            range: TimeRange::new(run.effective_start(), run.resolved),
            state: run.state,
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateBreakdown {
    pub total: Millis,
    #[serde(rename = "byState")]
    pub by_state: BTreeMap<String, Millis>,
}

pub fn state_breakdown(ranges: &[StateTimeRange]) -> StateBreakdown {
    let mut out = StateBreakdown::default();
    for StateTimeRange { range, state } in ranges {
        let Some((start, end)) = range.bounds() else {
            continue;
        };
        out.total += end - start;
        *out.by_state.entry(state.as_str().to_string()).or_insert(0) += end - start;
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeReport {
    #[serde(rename = "taskCount")]
    pub task_count: usize,
    #[serde(rename = "runCount")]
    pub run_count: usize,
    #[serde(rename = "summedMs")]
    pub summed_ms: Millis,
    #[serde(rename = "wallMs")]
    pub wall_ms: Millis,
    #[serde(rename = "summed")]
    pub summed_human: String,
    #[serde(rename = "wall")]
    pub wall_human: String,
    pub breakdown: StateBreakdown,
}

pub fn time_report(tasks: &[TaskRecord]) -> TimeReport {
    let state_ranges = task_time_ranges(tasks, |_| true);
    let ranges: Vec<TimeRange> = state_ranges.iter().map(|r| r.range).collect();
    let summed_ms = duration(&ranges);
    let wall_ms = wall_time(&ranges);
    TimeReport {
        task_count: tasks.len(),
        run_count: state_ranges.len(),
        summed_ms,
        wall_ms,
        summed_human: humanize_duration(summed_ms),
        wall_human: humanize_duration(wall_ms),
        breakdown: state_breakdown(&state_ranges),
    }
}

/// Coarse human rendering: "2 days, 3 hrs", "1 hr, 5 mins", "42 secs".
pub fn humanize_duration(ms: Millis) -> String {
    let ms = ms.abs();
    if ms == 0 {
        return String::new();
    }

    let seconds = ms / 1000;
    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    let plural = |n: i64| if n > 1 { "s" } else { "" };
    let mut parts = Vec::new();

    if days > 0 {
        parts.push(format!("{days} day{}", plural(days)));
    }
    if hours % 24 > 0 || days > 0 {
        parts.push(format!("{} hr{}", hours % 24, plural(hours % 24)));
    }
    if days > 0 {
        return parts.join(", ");
    }
    if minutes % 60 > 0 {
        parts.push(format!("{} min{}", minutes % 60, plural(minutes % 60)));
    }
    if !parts.is_empty() {
        return parts.join(", ");
    }
    format!("{} sec{}", seconds % 60, plural(seconds % 60))
}
