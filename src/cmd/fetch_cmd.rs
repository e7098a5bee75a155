//! Downloading task groups to disk (`taskprof fetch`).

use clap::Args;
use serde::Serialize;

use std::path::PathBuf;

use crate::{Config, HttpQueue, QueueApi, TaskprofResult, collect_task_groups, write_json};

#[derive(Debug, Args)]
pub struct FetchArgs {
    #[arg(value_name = "GROUP_ID", required = true)]
    pub group_ids: Vec<String>,
    #[arg(long)]
    pub out_dir: PathBuf,
    /// Also fetch the groups that dependencies of these tasks live in
    #[arg(long)]
    pub dependents: bool,
    /// Override the configured queue server
    #[arg(long)]
    pub server: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchedGroup {
    #[serde(rename = "taskGroupId")]
    pub task_group_id: String,
    pub tasks: usize,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchOutput {
    #[serde(rename = "schemaVersion")]
    pub schema_version: &'static str,
    pub server: String,
    pub groups: Vec<FetchedGroup>,
}

pub fn fetch_command(config: &Config, args: &FetchArgs) -> TaskprofResult<serde_json::Value> {
    let server = args.server.clone().unwrap_or_else(|| config.server.clone());
    let api = HttpQueue::new(&server);
    let payload = fetch_to_dir(&api, &server, config, args)?;
    Ok(serde_json::to_value(payload)?)
}

fn fetch_to_dir<Q: QueueApi + ?Sized>(
    api: &Q,
    server: &str,
    config: &Config,
    args: &FetchArgs,
) -> TaskprofResult<FetchOutput> {
    let mut fetch = config.fetch.clone();
    fetch.fetch_dependent_tasks |= args.dependents;

    let groups = collect_task_groups(api, &args.group_ids, &fetch)?;
    let mut written = Vec::with_capacity(groups.len());
    for group in &groups {
        let path = args.out_dir.join(format!("{}.json", group.task_group_id));
        write_json(&path, group)?;
        written.push(FetchedGroup {
            task_group_id: group.task_group_id.clone(),
            tasks: group.tasks.len(),
            path: path.display().to_string(),
        });
    }
    tracing::info!(groups = written.len(), dir = %args.out_dir.display(), "fetched task groups");
    Ok(FetchOutput {
        schema_version: "taskprof.fetch.v1",
        server: server.to_string(),
        groups: written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::timed_group;
    use crate::{TaskDefinition, TaskGroup, TaskprofError, load_task_groups};

    struct OneGroup(TaskGroup);

    impl QueueApi for OneGroup {
        fn list_task_group(&self, id: &str) -> TaskprofResult<TaskGroup> {
            if id == self.0.task_group_id {
                Ok(self.0.clone())
            } else {
                Err(TaskprofError::Http(format!("404 {id}")))
            }
        }

        fn task(&self, id: &str) -> TaskprofResult<TaskDefinition> {
            Err(TaskprofError::Http(format!("404 {id}")))
        }
    }

    #[test]
    fn fetched_groups_round_trip_through_disk() {
        let out_dir = std::env::temp_dir().join(format!("taskprof-fetch-{}", uuid::Uuid::new_v4()));
        let group = timed_group("abc", 0, 100);
        let args = FetchArgs {
            group_ids: vec!["abc".to_string()],
            out_dir: out_dir.clone(),
            dependents: true,
            server: None,
        };
        let output = fetch_to_dir(&OneGroup(group.clone()), "https://tc.example", &Config::default(), &args)
            .expect("fetch");
        assert_eq!(output.groups.len(), 1);
        assert_eq!(output.groups[0].tasks, 1);

        let loaded = load_task_groups(&[out_dir.join("abc.json")]).expect("load");
        assert_eq!(loaded, vec![group]);
    }

    #[test]
    fn unknown_requested_group_fails() {
        let args = FetchArgs {
            group_ids: vec!["missing".to_string()],
            out_dir: std::env::temp_dir(),
            dependents: false,
            server: None,
        };
        let err = fetch_to_dir(&OneGroup(timed_group("abc", 0, 1)), "s", &Config::default(), &args)
            .expect_err("404");
        assert!(matches!(err, TaskprofError::Http(_)));
    }
}
