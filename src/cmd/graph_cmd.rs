//! Consolidated task graphs and time reports (`taskprof graph`, `taskprof report`).

use clap::Args;
use serde::Serialize;

use std::path::PathBuf;

use crate::{
    Config, GraphOptions, RunState, TaskGroup, TaskRecord, TaskprofResult, TimeRange, TimeReport,
    consolidate, find_matching_files, load_task_groups, task_group_time_range, time_report,
    write_json,
};

#[derive(Debug, Args)]
pub struct GraphArgs {
    /// Task group JSON files, directories or globs
    #[arg(value_name = "INPUTS", required = true)]
    pub inputs: Vec<String>,
    /// Fold `name-<i>/<n>` chunks into one task
    #[arg(long)]
    pub merge_chunks: bool,
    /// Fold every task whose label starts with PREFIX (repeatable)
    #[arg(long = "merge-type", value_name = "PREFIX")]
    pub merge_types: Vec<String>,
    /// Collapse toolchain/build/fetch tasks and drop aggregate tasks
    #[arg(long)]
    pub simplify: bool,
    /// Write the consolidated task records here
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    #[arg(value_name = "INPUTS", required = true)]
    pub inputs: Vec<String>,
    /// Report on the consolidated graph (using the `[graph]` config) instead of raw tasks
    #[arg(long)]
    pub merged: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    #[serde(rename = "taskId")]
    pub task_id: String,
    pub name: String,
    pub state: RunState,
    pub runs: usize,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphOutput {
    #[serde(rename = "schemaVersion")]
    pub schema_version: &'static str,
    #[serde(rename = "taskGroups")]
    pub task_groups: Vec<String>,
    #[serde(rename = "inputTasks")]
    pub input_tasks: usize,
    pub tasks: Vec<GraphNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSpan {
    #[serde(rename = "taskGroupId")]
    pub task_group_id: String,
    pub range: TimeRange,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportOutput {
    #[serde(rename = "schemaVersion")]
    pub schema_version: &'static str,
    pub merged: bool,
    pub groups: Vec<GroupSpan>,
    pub report: TimeReport,
}

pub fn graph_command(config: &Config, args: &GraphArgs) -> TaskprofResult<serde_json::Value> {
    let groups = load_inputs(&args.inputs)?;
    let options = graph_options(&config.graph, args);
    let tasks = consolidate(&groups, &options);

    let out = match &args.out {
        Some(path) => {
            write_json(path, &tasks)?;
            Some(path.display().to_string())
        }
        None => None,
    };
    let payload = GraphOutput {
        schema_version: "taskprof.graph.v1",
        task_groups: groups.iter().map(|g| g.task_group_id.clone()).collect(),
        input_tasks: groups.iter().map(|g| g.tasks.len()).sum(),
        tasks: tasks.iter().map(graph_node).collect(),
        out,
    };
    Ok(serde_json::to_value(payload)?)
}

pub fn report_command(config: &Config, args: &ReportArgs) -> TaskprofResult<serde_json::Value> {
    let groups = load_inputs(&args.inputs)?;
    let tasks: Vec<TaskRecord> = if args.merged {
        consolidate(&groups, &config.graph)
    } else {
        groups.iter().flat_map(|g| g.tasks.iter().cloned()).collect()
    };
    let payload = ReportOutput {
        schema_version: "taskprof.report.v1",
        merged: args.merged,
        groups: groups
            .iter()
            .map(|g| GroupSpan {
                task_group_id: g.task_group_id.clone(),
                range: task_group_time_range(g),
            })
            .collect(),
        report: time_report(&tasks),
    };
    Ok(serde_json::to_value(payload)?)
}

pub(crate) fn load_inputs(inputs: &[String]) -> TaskprofResult<Vec<TaskGroup>> {
    let files = find_matching_files(inputs)?;
    load_task_groups(&files)
}

/// Command-line flags switch passes on; they never switch configured passes off.
fn graph_options(base: &GraphOptions, args: &GraphArgs) -> GraphOptions {
    let mut options = base.clone();
    options.merge_chunks |= args.merge_chunks;
    options.simplify |= args.simplify;
    if !args.merge_types.is_empty() {
        options.merge_task_types = args.merge_types.clone();
    }
    options
}

fn graph_node(task: &TaskRecord) -> GraphNode {
    GraphNode {
        task_id: task.task_id().to_string(),
        name: task.display_name().to_string(),
        state: task.status.state,
        runs: task.runs().len(),
        dependencies: task.task.dependencies.clone(),
    }
}
