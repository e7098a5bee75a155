//! Task-graph contraction.
//!
//! Every pass consumes its input list and returns a new one. Tasks that fold
//! into a representative hand over their runs and dependencies, and edges that
//! pointed at them are rewritten once the whole pass has been folded.

use serde::{Deserialize, Serialize};

use std::collections::{HashMap, HashSet};

use crate::{RunState, TaskDefinition, TaskGroup, TaskMetadata, TaskRecord, TaskStatus, TaskTags};

pub const SIMPLIFIED_TASK_NAME: &str = "toolchain";
pub const SIMPLIFIED_TASK_ID: &str = "toolchain-simplified0";

const TOOLCHAIN_PREFIXES: [&str; 3] = ["build-", "fetch-", "toolchain-"];
const AGGREGATE_PREFIX: &str = "all-";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphOptions {
    pub merge_chunks: bool,
    pub merge_task_types: Vec<String>,
    pub simplify: bool,
}

/// Flattens `groups` in order and runs the configured passes.
pub fn consolidate(groups: &[TaskGroup], options: &GraphOptions) -> Vec<TaskRecord> {
    let mut tasks: Vec<TaskRecord> = groups.iter().flat_map(|g| g.tasks.iter().cloned()).collect();
    let input_count = tasks.len();

    tasks = prune_missing_dependencies(tasks);
    if options.simplify {
        tasks = simplify(tasks);
    }
    if options.merge_chunks {
        tasks = merge_chunks(tasks);
    }
    tasks = prune_missing_dependencies(tasks);

    for prefix in &options.merge_task_types {
        tasks = merge_task_type(tasks, prefix);
        tasks = prune_missing_dependencies(tasks);
    }

    tracing::debug!(
        groups = groups.len(),
        input = input_count,
        output = tasks.len(),
        "consolidated task graph"
    );
    tasks
}

/// Strips every trailing `-<n>/<m>` shard suffix. `None` when there is none.
///
/// `a-1/2-3/4` keys to `a`, not `a-1/2`, so a merged label has no suffix left
/// for a later pass to strip.
pub fn chunk_stem(label: &str) -> Option<&str> {
    let mut stem = strip_chunk_suffix(label)?;
    while let Some(shorter) = strip_chunk_suffix(stem) {
        stem = shorter;
    }
    Some(stem)
}

fn strip_chunk_suffix(label: &str) -> Option<&str> {
    let (head, total) = label.rsplit_once('/')?;
    let (stem, index) = head.rsplit_once('-')?;
    (is_digits(index) && is_digits(total)).then_some(stem)
}

fn is_digits(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())
}

/// Folds shards of one step into the first shard seen, relabelled to the stem.
pub fn merge_chunks(tasks: Vec<TaskRecord>) -> Vec<TaskRecord> {
    let mut pass = Contraction::default();
    for mut task in tasks {
        let Some(stem) = task.label().and_then(chunk_stem).map(str::to_string) else {
            pass.keep(task);
            continue;
        };
        let key = format!("(chunk)-{stem}");
        if !pass.fold(&key, &mut task) {
            task.task.tags.label = Some(stem);
            pass.start(key, task);
        }
    }
    pass.finish()
}

/// Folds every task labelled `<prefix>-...` into the first such task. The
/// representative is relabelled `<prefix> (merged)` once it absorbs anything.
pub fn merge_task_type(tasks: Vec<TaskRecord>, prefix: &str) -> Vec<TaskRecord> {
    let key = format!("(taskType)-{prefix}");
    let needle = format!("{prefix}-");
    let mut pass = Contraction::default();
    for mut task in tasks {
        if !task.label().is_some_and(|l| l.starts_with(&needle)) {
            pass.keep(task);
            continue;
        }
        if pass.fold(&key, &mut task) {
            if let Some(rep) = pass.representative_mut(&key) {
                rep.task.tags.label = Some(format!("{prefix} (merged)"));
            }
        } else {
            pass.start(key.clone(), task);
        }
    }
    pass.finish()
}

/// Drops dependency ids that name no task in the list.
pub fn prune_missing_dependencies(mut tasks: Vec<TaskRecord>) -> Vec<TaskRecord> {
    let present: HashSet<String> = tasks.iter().map(|t| t.task_id().to_string()).collect();
    for task in &mut tasks {
        task.task.dependencies.retain(|id| present.contains(id));
    }
    tasks
}

/// Collapses toolchain-style setup tasks into one synthetic node and removes
/// aggregate `all-*` tasks from the graph.
pub fn simplify(tasks: Vec<TaskRecord>) -> Vec<TaskRecord> {
    let key = SIMPLIFIED_TASK_ID.to_string();
    let mut pass = Contraction::default();
    for mut task in tasks {
        let name = &task.task.metadata.name;
        if !TOOLCHAIN_PREFIXES.iter().any(|p| name.starts_with(p)) {
            pass.keep(task);
            continue;
        }
        if pass.representative_mut(&key).is_none() {
            pass.start(key.clone(), synthetic_task(SIMPLIFIED_TASK_NAME, SIMPLIFIED_TASK_ID));
        }
        let state = task.status.state;
        if pass.fold(&key, &mut task) {
            if let Some(rep) = pass.representative_mut(&key) {
                rep.status.state = state;
            }
        }
    }
    let tasks = pass.finish();

    let removed: HashSet<String> = tasks
        .iter()
        .filter(|t| t.task.metadata.name.starts_with(AGGREGATE_PREFIX))
        .map(|t| t.task_id().to_string())
        .collect();
    if removed.is_empty() {
        return tasks;
    }
    tracing::debug!(removed = removed.len(), "removed aggregate tasks");
    tasks
        .into_iter()
        .filter(|t| !removed.contains(t.task_id()))
        .map(|mut t| {
            t.task.dependencies.retain(|id| !removed.contains(id));
            t
        })
        .collect()
}

fn synthetic_task(name: &str, task_id: &str) -> TaskRecord {
    TaskRecord {
        task: TaskDefinition {
            tags: TaskTags {
                label: Some(name.to_string()),
                kind: None,
            },
            metadata: TaskMetadata {
                name: name.to_string(),
                ..TaskMetadata::default()
            },
            ..TaskDefinition::default()
        },
        status: TaskStatus {
            task_id: task_id.to_string(),
            state: RunState::Unscheduled,
            runs: Vec::new(),
        },
    }
}

/// Bookkeeping for one contraction pass.
#[derive(Default)]
struct Contraction {
    out: Vec<TaskRecord>,
    representatives: HashMap<String, usize>,
    redirects: HashMap<String, String>,
}

impl Contraction {
    fn keep(&mut self, task: TaskRecord) {
        self.out.push(task);
    }

    fn start(&mut self, key: String, task: TaskRecord) {
        self.representatives.insert(key, self.out.len());
        self.out.push(task);
    }

    fn representative_mut(&mut self, key: &str) -> Option<&mut TaskRecord> {
        let index = *self.representatives.get(key)?;
        self.out.get_mut(index)
    }

    /// Moves runs and dependencies of `task` into the representative for
    /// `key`. Returns false when no representative exists yet.
    fn fold(&mut self, key: &str, task: &mut TaskRecord) -> bool {
        let Some(&index) = self.representatives.get(key) else {
            return false;
        };
        let rep = &mut self.out[index];
        self.redirects
            .insert(task.task_id().to_string(), rep.task_id().to_string());
        rep.status.runs.append(&mut task.status.runs);
        union_into(
            &mut rep.task.dependencies,
            std::mem::take(&mut task.task.dependencies),
        );
        true
    }

    fn finish(mut self) -> Vec<TaskRecord> {
        if !self.redirects.is_empty() {
            for task in &mut self.out {
                let own = task.task_id().to_string();
                let deps = std::mem::take(&mut task.task.dependencies);
                let redirected = deps
                    .into_iter()
                    .map(|id| self.redirects.get(&id).cloned().unwrap_or(id))
                    .filter(|id| *id != own);
                union_into(&mut task.task.dependencies, redirected);
            }
        }
        self.out
    }
}

/// Appends ids not already present, keeping first-seen order.
fn union_into(target: &mut Vec<String>, ids: impl IntoIterator<Item = String>) {
    let mut seen: HashSet<String> = target.iter().cloned().collect();
    for id in ids {
        if seen.insert(id.clone()) {
            target.push(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Run;
    use crate::model::fixtures::{group, run, task};
    use rand_chacha::ChaCha8Rng;
    use rand_core::{RngCore, SeedableRng};

    fn ids(tasks: &[TaskRecord]) -> Vec<&str> {
        tasks.iter().map(TaskRecord::task_id).collect()
    }

    fn named(mut record: TaskRecord, name: &str) -> TaskRecord {
        record.task.metadata.name = name.to_string();
        record
    }

    #[test]
    fn chunk_stem_requires_index_and_total() {
        assert_eq!(chunk_stem("test-linux-1/8"), Some("test-linux"));
        assert_eq!(chunk_stem("a-12/300"), Some("a"));
        assert_eq!(chunk_stem("a-1/2-3/4"), Some("a"));
        assert_eq!(chunk_stem("-1/2"), Some(""));
        assert_eq!(chunk_stem("a-1/"), None);
        assert_eq!(chunk_stem("a-x/2"), None);
        assert_eq!(chunk_stem("a-1/2/3"), None);
        assert_eq!(chunk_stem("train-backwards"), None);
    }

    #[test]
    fn chunks_merge_into_first_shard() {
        let tasks = vec![
            task("r1", "a-1/2", &["up"], vec![run(0, RunState::Completed, Some(0), Some(5))]),
            task("up", "upstream", &[], Vec::new()),
            task("r2", "a-2/2", &["up", "other"], vec![run(0, RunState::Failed, Some(1), Some(9))]),
            task("down", "downstream", &["r2", "r1"], Vec::new()),
        ];
        let merged = merge_chunks(tasks);
        assert_eq!(ids(&merged), vec!["r1", "up", "down"]);

        let rep = &merged[0];
        assert_eq!(rep.label(), Some("a"));
        assert_eq!(rep.runs().len(), 2);
        assert_eq!(rep.task.dependencies, vec!["up", "other"]);
        assert_eq!(merged[2].task.dependencies, vec!["r1"]);
    }

    #[test]
    fn nested_shard_suffixes_merge_into_one_stem() {
        let tasks = vec![
            task("x1", "a-1/2-3/4", &[], vec![run(0, RunState::Completed, Some(0), Some(5))]),
            task("x2", "a-2/2-1/4", &[], vec![run(0, RunState::Completed, Some(5), Some(9))]),
            task("x3", "a-2/2", &[], Vec::new()),
        ];
        let merged = merge_chunks(tasks);
        assert_eq!(ids(&merged), vec!["x1"]);
        assert_eq!(merged[0].label(), Some("a"));
        assert_eq!(merged[0].runs().len(), 2);
        assert_eq!(merge_chunks(merged.clone()), merged);
    }

    #[test]
    fn redirects_apply_to_tasks_seen_before_their_target() {
        let tasks = vec![
            task("early", "early", &["b2"], Vec::new()),
            task("b1", "b-1/2", &[], Vec::new()),
            task("b2", "b-2/2", &["b1"], Vec::new()),
        ];
        let merged = merge_chunks(tasks);
        assert_eq!(merged[0].task.dependencies, vec!["b1"]);
        assert!(merged[1].task.dependencies.is_empty(), "no self edges");
    }

    #[test]
    fn type_merge_relabels_only_when_something_folds() {
        let tasks = vec![
            task("t1", "train-backwards", &[], Vec::new()),
            task("t2", "train-student", &["t1"], Vec::new()),
            task("e1", "evaluate-x", &["t2"], Vec::new()),
        ];
        let merged = merge_task_type(tasks, "train");
        assert_eq!(ids(&merged), vec!["t1", "e1"]);
        assert_eq!(merged[0].label(), Some("train (merged)"));
        assert_eq!(merged[1].task.dependencies, vec!["t1"]);

        let single = merge_task_type(vec![task("e", "evaluate-x", &[], Vec::new())], "evaluate");
        assert_eq!(single[0].label(), Some("evaluate-x"));
    }

    #[test]
    fn prune_drops_cross_group_edges() {
        let pruned = prune_missing_dependencies(vec![
            task("a", "a", &["b", "elsewhere"], Vec::new()),
            task("b", "b", &["gone"], Vec::new()),
        ]);
        assert_eq!(pruned[0].task.dependencies, vec!["b"]);
        assert!(pruned[1].task.dependencies.is_empty());
    }

    #[test]
    fn simplify_folds_toolchains_and_removes_aggregates() {
        let tasks = vec![
            named(task("docker", "docker", &[], Vec::new()), "docker-image"),
            named(task("tc1", "tc1", &["docker"], Vec::new()), "toolchain-clang"),
            named(
                task("f1", "f1", &["tc1"], vec![run(0, RunState::Completed, Some(0), Some(1))]),
                "fetch-corpus",
            ),
            named(task("train", "train", &["tc1", "f1"], Vec::new()), "train-model"),
            named(task("all", "all", &["train"], Vec::new()), "all-done"),
            named(task("post", "post", &["all", "train"], Vec::new()), "publish"),
        ];
        let simplified = simplify(tasks);
        assert_eq!(ids(&simplified), vec!["docker", SIMPLIFIED_TASK_ID, "train", "post"]);

        let synthetic = &simplified[1];
        assert_eq!(synthetic.display_name(), SIMPLIFIED_TASK_NAME);
        assert_eq!(synthetic.task.dependencies, vec!["docker"]);
        assert_eq!(synthetic.runs().len(), 1);
        assert_eq!(synthetic.status.state, RunState::Completed);
        assert_eq!(simplified[2].task.dependencies, vec![SIMPLIFIED_TASK_ID]);
        assert_eq!(simplified[3].task.dependencies, vec!["train"]);
    }

    #[test]
    fn consolidate_runs_passes_in_order() {
        let groups = vec![
            group(
                "g1",
                vec![
                    task("s1", "shard-1/2", &["missing"], Vec::new()),
                    task("s2", "shard-2/2", &[], Vec::new()),
                ],
            ),
            group(
                "g2",
                vec![
                    task("e1", "eval-a", &["s2"], Vec::new()),
                    task("e2", "eval-b", &["s1"], Vec::new()),
                ],
            ),
        ];
        let options = GraphOptions {
            merge_chunks: true,
            merge_task_types: vec!["eval".to_string()],
            simplify: false,
        };
        let tasks = consolidate(&groups, &options);
        assert_eq!(ids(&tasks), vec!["s1", "e1"]);
        assert_eq!(tasks[0].label(), Some("shard"));
        assert!(tasks[0].task.dependencies.is_empty());
        assert_eq!(tasks[1].label(), Some("eval (merged)"));
        assert_eq!(tasks[1].task.dependencies, vec!["s1"]);

        let untouched = consolidate(&groups, &GraphOptions::default());
        assert_eq!(untouched.len(), 4);
        assert!(untouched[0].task.dependencies.is_empty());
    }

    fn random_tasks(rng: &mut ChaCha8Rng) -> Vec<TaskRecord> {
        let stems = ["a", "b", "c-d", "e"];
        let count = 1 + (rng.next_u32() % 14) as usize;
        (0..count)
            .map(|i| {
                let stem = stems[(rng.next_u32() % 4) as usize];
                let label = match rng.next_u32() % 3 {
                    0 => stem.to_string(),
                    _ => format!("{stem}-{}/{}", i + 1, count),
                };
                let deps: Vec<String> = (0..(rng.next_u32() % 4))
                    .map(|_| format!("t{}", rng.next_u32() % (count as u32 + 3)))
                    .collect();
                let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
                let runs = (0..(rng.next_u32() % 3))
                    .map(|r| run(r, RunState::Completed, Some(i as i64), Some(i as i64 + 1)))
                    .collect();
                task(&format!("t{i}"), &label, &deps, runs)
            })
            .collect()
    }

    fn run_keys(tasks: &[TaskRecord]) -> Vec<(u32, Option<i64>)> {
        let mut keys: Vec<(u32, Option<i64>)> = tasks
            .iter()
            .flat_map(|t| t.runs())
            .map(|r: &Run| (r.run_id, r.started))
            .collect();
        keys.sort();
        keys
    }

    #[test]
    fn chunk_merge_keeps_edges_valid_runs_complete_and_is_idempotent() {
        let mut rng = ChaCha8Rng::seed_from_u64(0xc0ffee);
        for _ in 0..150 {
            let input = random_tasks(&mut rng);
            let once = prune_missing_dependencies(merge_chunks(input.clone()));

            let present: HashSet<&str> = once.iter().map(TaskRecord::task_id).collect();
            for t in &once {
                assert!(t.task.dependencies.iter().all(|d| present.contains(d.as_str())));
            }
            assert_eq!(run_keys(&once), run_keys(&input));

            let twice = prune_missing_dependencies(merge_chunks(once.clone()));
            assert_eq!(twice, once);
        }
    }
}
