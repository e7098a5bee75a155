//! Pulling task groups from the queue backend.

use serde::Deserialize;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::{FetchConfig, Millis, TaskDefinition, TaskGroup, TaskRecord, TaskprofError, TaskprofResult};

/// The two queue endpoints the collector needs.
pub trait QueueApi {
    fn list_task_group(&self, task_group_id: &str) -> TaskprofResult<TaskGroup>;
    fn task(&self, task_id: &str) -> TaskprofResult<TaskDefinition>;
}

pub struct HttpQueue {
    server: String,
    agent: ureq::Agent,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskGroupPage {
    task_group_id: String,
    #[serde(default, with = "crate::model::timestamp")]
    expires: Option<Millis>,
    #[serde(default)]
    tasks: Vec<TaskRecord>,
    #[serde(default)]
    continuation_token: Option<String>,
}

impl HttpQueue {
    pub fn new(server: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(60))
            .build();
        Self {
            server: server.trim_end_matches('/').to_string(),
            agent,
        }
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, token: Option<&str>) -> TaskprofResult<T> {
        let mut request = self.agent.get(url);
        if let Some(token) = token {
            request = request.query("continuationToken", token);
        }
        let response = request.call()?;
        response
            .into_json::<T>()
            .map_err(|err| TaskprofError::Http(format!("{url}: {err}")))
    }
}

impl QueueApi for HttpQueue {
    fn list_task_group(&self, task_group_id: &str) -> TaskprofResult<TaskGroup> {
        let url = format!("{}/api/queue/v1/task-group/{task_group_id}/list", self.server);
        tracing::info!("fetching task group {url}");
        let mut page: TaskGroupPage = self.get_json(&url, None)?;
        let mut group = TaskGroup {
            task_group_id: page.task_group_id,
            expires: page.expires,
            tasks: std::mem::take(&mut page.tasks),
        };
        while let Some(token) = page.continuation_token.take() {
            tracing::debug!(group = %group.task_group_id, "following continuation token");
            page = self.get_json(&url, Some(&token))?;
            group.tasks.append(&mut page.tasks);
        }
        Ok(group)
    }

    fn task(&self, task_id: &str) -> TaskprofResult<TaskDefinition> {
        let url = format!("{}/api/queue/v1/task/{task_id}", self.server);
        tracing::debug!("fetching task {url}");
        self.get_json(&url, None)
    }
}

pub fn is_task_group_id_valid(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Fetches the requested groups and, when enabled, the groups their
/// dependencies live in. Groups come back ordered by `expires`, with groups
/// lacking one at the end.
pub fn collect_task_groups<Q: QueueApi + ?Sized>(
    api: &Q,
    task_group_ids: &[String],
    config: &FetchConfig,
) -> TaskprofResult<Vec<TaskGroup>> {
    if let Some(bad) = task_group_ids.iter().find(|id| !is_task_group_id_valid(id)) {
        return Err(TaskprofError::InvalidArgument(format!(
            "invalid task group id {bad:?}"
        )));
    }

    let mut groups = Vec::with_capacity(task_group_ids.len());
    for id in task_group_ids {
        groups.push(api.list_task_group(id)?);
    }

    let mut known_tasks: BTreeSet<String> = BTreeSet::new();
    let mut dependencies = DependencyQueue::default();
    for group in &groups {
        dependencies.absorb(group, &mut known_tasks);
    }

    let mut fetched: BTreeSet<String> = task_group_ids.iter().cloned().collect();
    groups.retain(|group| !config.ignored_task_groups.contains(&group.task_group_id));

    if config.fetch_dependent_tasks {
        let mut task_to_group: BTreeMap<String, String> = BTreeMap::new();
        let mut extra = 0usize;
        while extra < config.max_dependent_groups {
            let Some(task_id) = dependencies.next() else {
                break;
            };
            if !known_tasks.insert(task_id.clone()) {
                continue;
            }
            let group_id = match task_to_group.get(&task_id) {
                Some(id) => id.clone(),
                None => match api.task(&task_id) {
                    Ok(task) => {
                        task_to_group.insert(task_id.clone(), task.task_group_id.clone());
                        task.task_group_id
                    }
                    Err(err) => {
                        tracing::warn!("could not look up dependency {task_id}: {err}");
                        continue;
                    }
                },
            };
            if fetched.contains(&group_id) || config.ignored_task_groups.contains(&group_id) {
                continue;
            }
            fetched.insert(group_id.clone());
            match api.list_task_group(&group_id) {
                Ok(group) => {
                    for task in &group.tasks {
                        task_to_group.insert(task.task_id().to_string(), group_id.clone());
                    }
                    dependencies.absorb(&group, &mut known_tasks);
                    groups.push(group);
                    extra += 1;
                }
                Err(err) => tracing::warn!("could not fetch dependent group {group_id}: {err}"),
            }
        }
        tracing::debug!(extra, "fetched dependent task groups");
    }

    groups.sort_by_key(|group| (group.expires.is_none(), group.expires));
    Ok(groups)
}

/// Dependency ids in discovery order, each yielded once.
#[derive(Default)]
struct DependencyQueue {
    order: Vec<String>,
    seen: BTreeSet<String>,
    cursor: usize,
}

impl DependencyQueue {
    fn absorb(&mut self, group: &TaskGroup, known_tasks: &mut BTreeSet<String>) {
        for record in &group.tasks {
            known_tasks.insert(record.task_id().to_string());
            for dep in &record.task.dependencies {
                if self.seen.insert(dep.clone()) {
                    self.order.push(dep.clone());
                }
            }
        }
    }

    fn next(&mut self) -> Option<String> {
        let item = self.order.get(self.cursor).cloned();
        if item.is_some() {
            self.cursor += 1;
        }
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RunState;
    use crate::model::fixtures::{group, run, task};
    use std::cell::RefCell;

    #[derive(Default)]
    struct FakeQueue {
        groups: BTreeMap<String, TaskGroup>,
        group_calls: RefCell<Vec<String>>,
        task_calls: RefCell<Vec<String>>,
    }

    impl FakeQueue {
        fn with(mut self, mut g: TaskGroup, expires: Option<Millis>) -> Self {
            g.expires = expires;
            for record in &mut g.tasks {
                record.task.task_group_id = g.task_group_id.clone();
            }
            self.groups.insert(g.task_group_id.clone(), g);
            self
        }
    }

    impl QueueApi for FakeQueue {
        fn list_task_group(&self, id: &str) -> TaskprofResult<TaskGroup> {
            self.group_calls.borrow_mut().push(id.to_string());
            self.groups
                .get(id)
                .cloned()
                .ok_or_else(|| TaskprofError::Http(format!("404 {id}")))
        }

        fn task(&self, id: &str) -> TaskprofResult<TaskDefinition> {
            self.task_calls.borrow_mut().push(id.to_string());
            self.groups
                .values()
                .flat_map(|g| g.tasks.iter())
                .find(|t| t.task_id() == id)
                .map(|t| t.task.clone())
                .ok_or_else(|| TaskprofError::Http(format!("404 {id}")))
        }
    }

    fn done(id: &str, deps: &[&str]) -> TaskRecord {
        task(id, id, deps, vec![run(0, RunState::Completed, Some(0), Some(10))])
    }

    /// `c` depends on `b`, which depends on `a`, one task per group.
    fn chain() -> FakeQueue {
        FakeQueue::default()
            .with(group("ga", vec![done("a", &[])]), Some(100))
            .with(group("gb", vec![done("b", &["a"])]), Some(200))
            .with(group("gc", vec![done("c", &["b", "gone"])]), Some(50))
    }

    fn ids(groups: &[TaskGroup]) -> Vec<&str> {
        groups.iter().map(|g| g.task_group_id.as_str()).collect()
    }

    #[test]
    fn group_ids_are_validated() {
        assert!(is_task_group_id_valid("fZcYg_3QS-uWq1X9"));
        assert!(!is_task_group_id_valid(""));
        assert!(!is_task_group_id_valid("a/b"));
        let err = collect_task_groups(&chain(), &["ok".to_string(), "no pe".to_string()], &FetchConfig::default())
            .expect_err("invalid id");
        assert!(matches!(err, TaskprofError::InvalidArgument(_)));
    }

    #[test]
    fn requested_groups_sort_by_expiry() {
        let api = chain();
        let groups = collect_task_groups(&api, &["gb".to_string(), "gc".to_string()], &FetchConfig::default())
            .expect("collect");
        assert_eq!(ids(&groups), vec!["gc", "gb"]);
        assert!(api.task_calls.borrow().is_empty());
    }

    #[test]
    fn dependents_are_followed_transitively() {
        let api = chain();
        let config = FetchConfig {
            fetch_dependent_tasks: true,
            ..FetchConfig::default()
        };
        let groups = collect_task_groups(&api, &["gc".to_string()], &config).expect("collect");
        assert_eq!(ids(&groups), vec!["gc", "ga", "gb"]);
        // The unknown dependency was looked up once and skipped.
        assert_eq!(api.task_calls.borrow().iter().filter(|t| *t == "gone").count(), 1);
    }

    #[test]
    fn ignored_groups_are_dropped_but_still_followed() {
        let api = chain();
        let config = FetchConfig {
            fetch_dependent_tasks: true,
            ignored_task_groups: ["gc".to_string(), "ga".to_string()].into_iter().collect(),
            ..FetchConfig::default()
        };
        let groups = collect_task_groups(&api, &["gc".to_string()], &config).expect("collect");
        assert_eq!(ids(&groups), vec!["gb"]);
        assert!(!api.group_calls.borrow().contains(&"ga".to_string()));
    }

    #[test]
    fn dependent_fetches_stop_at_the_limit() {
        let api = chain();
        let config = FetchConfig {
            fetch_dependent_tasks: true,
            max_dependent_groups: 1,
            ..FetchConfig::default()
        };
        let groups = collect_task_groups(&api, &["gc".to_string()], &config).expect("collect");
        assert_eq!(ids(&groups), vec!["gc", "gb"]);
    }

    #[test]
    fn groups_without_expiry_go_last() {
        let api = FakeQueue::default()
            .with(group("x", vec![done("x1", &[])]), None)
            .with(group("y", vec![done("y1", &[])]), Some(5));
        let groups = collect_task_groups(&api, &["x".to_string(), "y".to_string()], &FetchConfig::default())
            .expect("collect");
        assert_eq!(ids(&groups), vec!["y", "x"]);
    }

    #[test]
    fn paged_listing_parses_continuation_token() {
        let page: TaskGroupPage = serde_json::from_str(
            r#"{"taskGroupId":"g","expires":"2024-01-01T00:00:00.000Z","tasks":[],"continuationToken":"abc"}"#,
        )
        .expect("page");
        assert_eq!(page.task_group_id, "g");
        assert_eq!(page.continuation_token.as_deref(), Some("abc"));
        assert_eq!(page.expires, Some(1_704_067_200_000));
        assert!(page.tasks.is_empty());
    }
}
