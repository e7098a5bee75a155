//! Profiles built from a single task's live log.
//!
//! Lines look like `[taskcluster:warn 2024-05-20T14:40:11.353Z] message`.
//! Lines that do not match keep the whole text as their message.

use regex::Regex;
use serde::Serialize;

use std::borrow::Cow;
use std::sync::OnceLock;

use super::{MarkerSchema, Profile, SchemaField, Thread, category_index};
use crate::{Millis, TaskDefinition, format_timestamp, parse_timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRow {
    pub component: String,
    pub level: Option<String>,
    pub time: Option<Millis>,
    pub message: String,
}

/// Parses non-blank lines into rows.
pub fn parse_log_lines<'a, I>(lines: I) -> Vec<LogRow>
where
    I: IntoIterator<Item = &'a str>,
{
    lines
        .into_iter()
        .filter(|line| !line.trim().is_empty())
        .map(parse_log_line)
        .collect()
}

pub fn parse_log_line(line: &str) -> LogRow {
    static ROW_RE: OnceLock<Regex> = OnceLock::new();
    let re = ROW_RE.get_or_init(|| {
        Regex::new(
            r"^\s*\[(?<component>\w+)(:(?<level>\w+))?\s*(?<time>[\d\-T:.Z]+)\]\s*(?<message>.*)",
        )
        .expect("log row regex compiles")
    });
    let Some(caps) = re.captures(line) else {
        return LogRow {
            component: String::new(),
            level: None,
            time: None,
            message: line.to_string(),
        };
    };
    let message = caps.name("message").map_or("", |m| m.as_str());
    LogRow {
        component: caps["component"].to_string(),
        level: caps.name("level").map(|m| m.as_str().to_string()),
        time: parse_timestamp(&caps["time"]),
        message: strip_leading_datetime(message).to_string(),
    }
}

/// Drops an application timestamp such as `[2024-05-20 15:04:26] ` that some
/// tools print after the worker prefix.
fn strip_leading_datetime(message: &str) -> Cow<'_, str> {
    static DATETIME_RE: OnceLock<Regex> = OnceLock::new();
    let re = DATETIME_RE.get_or_init(|| {
        Regex::new(r"^\s*\[(?<datetime>[\d\-T:.Z ]+)\]\s*").expect("log datetime regex compiles")
    });
    re.replace(message, "")
}

fn live_log_schema() -> MarkerSchema {
    MarkerSchema {
        name: "LiveLogRow",
        tooltip_label: "{marker.data.message}",
        table_label: "{marker.data.message}",
        chart_label: "{marker.data.message}",
        display: vec!["marker-chart", "marker-table", "timeline-overview"],
        data: vec![
            SchemaField::new("startTime", "Start time", "string"),
            SchemaField::new("message", "Log Message", "string").searchable(),
            SchemaField::new("level", "Level", "string"),
            SchemaField::new("hour", "Hour", "string"),
            SchemaField::new("date", "Date", "string"),
        ],
    }
}

fn log_task_schema() -> MarkerSchema {
    MarkerSchema {
        name: "Task",
        tooltip_label: "{marker.data.taskName}",
        table_label: "{marker.data.taskName}",
        chart_label: "{marker.data.taskName}",
        display: vec!["marker-chart", "marker-table", "timeline-overview"],
        data: vec![
            SchemaField::new("taskName", "Task Name", "string").searchable(),
            SchemaField::new("taskURL", "Task", "url"),
            SchemaField::new("taskGroupURL", "Task Group", "url"),
            SchemaField::new("taskId", "Task ID", "string"),
            SchemaField::new("taskGroupId", "Task Group ID", "string"),
        ],
    }
}

/// One `Live Log` thread: a duration marker for the whole task followed by an
/// instant marker per timed log row.
pub fn build_log_profile(rows: &[LogRow], task: &TaskDefinition, task_id: &str, server: &str) -> Profile {
    let times = rows.iter().filter_map(|r| r.time);
    let start_time = times.clone().min().unwrap_or(0);
    let last_time = times.max().unwrap_or(start_time);

    let date = task
        .created
        .and_then(format_timestamp)
        .and_then(|ts| ts.get(..10).map(str::to_string))
        .unwrap_or_default();
    let product = format!("{} {task_id} - {date}", task.metadata.name);

    let mut profile = Profile::new(product, start_time, vec![live_log_schema(), log_task_schema()]);
    let mut thread = Thread::new("Live Log");
    thread.is_main_thread = true;

    thread.add_marker(
        &task.metadata.name,
        0,
        Some(last_time - start_time),
        category_index("Task"),
        serde_json::json!({
            "type": "Task",
            "name": "Task",
            "taskName": task.metadata.name,
            "taskId": task_id,
            "taskGroupId": task.task_group_id,
            "taskURL": format!("{server}/tasks/{task_id}"),
            "taskGroupURL": format!("{server}/tasks/groups/{}", task.task_group_id),
        }),
    );

    let log_category = category_index("Log");
    for row in rows {
        let Some(time) = row.time else {
            continue;
        };
        let stamp = format_timestamp(time).unwrap_or_default();
        thread.add_marker(
            &row.component,
            time - start_time,
            None,
            log_category,
            serde_json::json!({
                "type": "LiveLogRow",
                "name": "LiveLogRow",
                "message": row.message,
                "level": row.level,
                "startTime": stamp,
                "hour": stamp.get(11..19),
                "date": stamp.get(..10),
            }),
        );
    }

    profile.threads.push(thread);
    profile
}
