//! Task groups to a marker timeline: one thread per group, one marker per run.

use serde::{Deserialize, Serialize};

use super::{MarkerSchema, Profile, SchemaField, Thread, category_index};
use crate::{
    Millis, Run, RunState, StitchedGroup, TaskGroup, TaskRecord, format_timestamp, stitch,
    unstitched,
};

pub const DEFAULT_SERVER: &str = "https://firefox-ci-tc.services.mozilla.com";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileOptions {
    /// Base URL used for the task links in marker payloads.
    pub server: String,
    pub stitch: bool,
    /// Stand-in end time for runs that are still running.
    pub now_ms: Millis,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            stitch: true,
            now_ms: 0,
        }
    }
}

pub fn task_marker_schema() -> MarkerSchema {
    MarkerSchema {
        name: "Task",
        tooltip_label: "{marker.data.name}",
        table_label: "{marker.data.name}",
        chart_label: "{marker.data.name}",
        display: vec!["marker-chart", "marker-table"],
        data: vec![
            SchemaField::new("startTime", "Start time", "string"),
            SchemaField::new("name", "Task Name", "string").searchable(),
            SchemaField::new("state", "State", "string"),
            SchemaField::new("retries", "Run", "string"),
            SchemaField::new("reason", "Reason", "string"),
            SchemaField::new("owner", "Owner", "string"),
            SchemaField::new("description", "Description", "url"),
            SchemaField::new("url", "Task URL", "url"),
            SchemaField::new("source", "Source URL", "url"),
            SchemaField::new("taskGroup", "Task Group URL", "url"),
        ],
    }
}

/// Builds the timeline for `groups`, stitching them first when asked to.
pub fn build_profile(groups: Vec<TaskGroup>, options: &ProfileOptions) -> Profile {
    let ids: Vec<String> = groups.iter().map(|g| g.task_group_id.clone()).collect();
    let entries = if options.stitch {
        stitch(groups)
    } else {
        unstitched(groups)
    };

    let start_time = entries.iter().filter_map(|e| e.range.start).min().unwrap_or(0);
    let date = format_timestamp(start_time)
        .and_then(|ts| ts.get(..10).map(str::to_string))
        .unwrap_or_default();
    let product = format!("Task Group {} - {date}", ids.join(", "));

    let mut profile = Profile::new(product, start_time, vec![task_marker_schema()]);
    profile.threads = entries
        .iter()
        .enumerate()
        .map(|(index, entry)| group_thread(entry, index, start_time, options))
        .collect();
    profile.threads.sort_by_key(|t| t.register_time);

    tracing::debug!(
        threads = profile.threads.len(),
        start_time,
        stitched = options.stitch,
        "built task group profile"
    );
    profile
}

fn group_thread(entry: &StitchedGroup, index: usize, profile_start: Millis, options: &ProfileOptions) -> Thread {
    let group = &entry.group;
    let mut thread = Thread::new(group.task_group_id.clone());
    thread.is_main_thread = true;
    thread.pid = index as i64;
    thread.tid = index as i64;

    let Some(start) = entry.range.start else {
        thread.register_time = -1;
        thread.unregister_time = Some(-1);
        return thread;
    };
    thread.register_time = start - profile_start;
    thread.unregister_time = entry.range.end.map(|end| end - profile_start);

    let mut tasks: Vec<&TaskRecord> = group.tasks.iter().collect();
    tasks.sort_by_key(|t| t.runs().first().and_then(|r| r.started));

    let category = category_index("Task");
    for task in tasks {
        for run in task.runs() {
            let Some(started) = run.started else {
                continue;
            };
            let end = run
                .resolved
                .or_else(|| (run.state == RunState::Running).then_some(options.now_ms));
            thread.add_marker(
                task.display_name(),
                started - profile_start,
                end.map(|e| e - profile_start),
                category,
                run_payload(task, run, group, &options.server),
            );
        }
    }
    thread
}

fn run_payload(task: &TaskRecord, run: &Run, group: &TaskGroup, server: &str) -> serde_json::Value {
    let metadata = &task.task.metadata;
    serde_json::json!({
        "type": "Task",
        "name": task.display_name(),
        "startTime": run.started.and_then(format_timestamp),
        "state": run.state.as_str(),
        "retries": format!("{} / {}", run.run_id + 1, task.task.retries),
        "reason": run.reason(),
        "owner": metadata.owner,
        "description": metadata.description,
        "source": metadata.source,
        "url": format!("{server}/tasks/{}", task.task_id()),
        "taskGroup": format!("{server}/tasks/groups/{}", group.task_group_id),
    })
}
