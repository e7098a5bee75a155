//! Task-execution records as delivered by the queue backend.
//!
//! Records are validated once at ingestion: timestamps are parsed into epoch
//! milliseconds, and anything unparseable becomes `None` instead of an error.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Milliseconds since the Unix epoch.
pub type Millis = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
    Exception,
    Unscheduled,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Exception => "exception",
            Self::Unscheduled => "unscheduled",
        }
    }
}

/// One execution attempt of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub run_id: u32,
    pub state: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_resolved: Option<String>,
    #[serde(default, with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub scheduled: Option<Millis>,
    #[serde(default, with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub started: Option<Millis>,
    #[serde(default, with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub resolved: Option<Millis>,
}

impl Run {
    /// Start of the run for accounting purposes: a run that resolved without
    /// ever starting (e.g. cancelled while pending) starts when it resolved.
    pub fn effective_start(&self) -> Option<Millis> {
        self.started.or(self.resolved)
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason_resolved
            .as_deref()
            .or(self.reason_created.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskTags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source: String,
}

/// The static definition of a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    #[serde(default)]
    pub task_group_id: String,
    /// Ids of prerequisite tasks. Treated as a set; order is kept stable for output.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub tags: TaskTags,
    #[serde(default)]
    pub metadata: TaskMetadata,
    #[serde(default)]
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_type: Option<String>,
    #[serde(default, with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub created: Option<Millis>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub task_id: String,
    pub state: RunState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runs: Vec<Run>,
}

/// A task together with its execution status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task: TaskDefinition,
    pub status: TaskStatus,
}

impl TaskRecord {
    pub fn task_id(&self) -> &str {
        &self.status.task_id
    }

    pub fn label(&self) -> Option<&str> {
        self.task.tags.label.as_deref()
    }

    /// Human-facing name: label, then metadata name, then the id.
    pub fn display_name(&self) -> &str {
        match self.label() {
            Some(label) if !label.is_empty() => label,
            _ if !self.task.metadata.name.is_empty() => &self.task.metadata.name,
            _ => self.task_id(),
        }
    }

    pub fn runs(&self) -> &[Run] {
        &self.status.runs
    }
}

/// A batch of tasks fetched together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskGroup {
    pub task_group_id: String,
    #[serde(default, with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub expires: Option<Millis>,
    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
}

pub fn parse_timestamp(text: &str) -> Option<Millis> {
    let parsed = OffsetDateTime::parse(text.trim(), &Rfc3339).ok()?;
    i64::try_from(parsed.unix_timestamp_nanos() / 1_000_000).ok()
}

pub fn format_timestamp(ms: Millis) -> Option<String> {
    let nanos = i128::from(ms) * 1_000_000;
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()?
        .format(&Rfc3339)
        .ok()
}

/// serde adapter between RFC 3339 strings and `Option<Millis>`.
pub(crate) mod timestamp {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Millis;

    pub fn serialize<S: Serializer>(value: &Option<Millis>, s: S) -> Result<S::Ok, S::Error> {
        match value.and_then(super::format_timestamp) {
            Some(text) => s.serialize_some(&text),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Millis>, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        Ok(raw.as_deref().and_then(super::parse_timestamp))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn run(run_id: u32, state: RunState, started: Option<Millis>, resolved: Option<Millis>) -> Run {
        Run {
            run_id,
            state,
            reason_created: Some("scheduled".to_string()),
            reason_resolved: resolved.map(|_| "completed".to_string()),
            scheduled: started,
            started,
            resolved,
        }
    }

    pub fn task(id: &str, label: &str, deps: &[&str], runs: Vec<Run>) -> TaskRecord {
        TaskRecord {
            task: TaskDefinition {
                task_group_id: "group".to_string(),
                dependencies: deps.iter().map(|d| d.to_string()).collect(),
                tags: TaskTags {
                    label: Some(label.to_string()),
                    kind: None,
                },
                metadata: TaskMetadata {
                    name: label.to_string(),
                    owner: "owner@example.com".to_string(),
                    description: format!("{label} description"),
                    source: "https://example.com/source".to_string(),
                },
                retries: 5,
                worker_type: None,
                created: None,
            },
            status: TaskStatus {
                task_id: id.to_string(),
                state: runs.last().map(|r| r.state).unwrap_or(RunState::Unscheduled),
                runs,
            },
        }
    }

    pub fn group(id: &str, tasks: Vec<TaskRecord>) -> TaskGroup {
        TaskGroup {
            task_group_id: id.to_string(),
            expires: None,
            tasks,
        }
    }

    /// A group whose single task ran over `[start, end]`.
    pub fn timed_group(id: &str, start: Millis, end: Millis) -> TaskGroup {
        group(
            id,
            vec![task(
                &format!("{id}-task"),
                &format!("{id}-step"),
                &[],
                vec![run(0, RunState::Completed, Some(start), Some(end))],
            )],
        )
    }
}
