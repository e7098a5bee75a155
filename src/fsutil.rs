//! Input discovery and JSON file helpers.

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::{TaskGroup, TaskprofError, TaskprofResult};

/// Resolves plain paths and glob patterns to a sorted list of files.
pub fn find_matching_files(patterns: &[String]) -> TaskprofResult<Vec<PathBuf>> {
    let globbed: Vec<String> = patterns.iter().filter(|p| has_glob_meta(p)).cloned().collect();
    let mut out = BTreeSet::new();

    // Direct file paths are accepted even outside the working directory.
    for pattern in patterns.iter().filter(|p| !has_glob_meta(p)) {
        let candidate = PathBuf::from(pattern);
        if candidate.is_file() {
            out.insert(candidate);
        } else if candidate.is_dir() {
            out.extend(json_files_in(&candidate)?);
        } else {
            return Err(TaskprofError::InvalidArgument(format!(
                "input not found: {pattern}"
            )));
        }
    }

    if !globbed.is_empty() {
        let set = compile_globset(&globbed)?;
        let cwd = std::env::current_dir()?;
        for root in walk_roots(&globbed) {
            for entry in WalkDir::new(&root)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| !should_skip_dir(e.path()))
            {
                let entry = entry.map_err(walk_error)?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let p = entry.path();
                let rel = p.strip_prefix(".").unwrap_or(p);
                if set.is_match(rel) || set.is_match(cwd.join(rel)) {
                    out.insert(rel.to_path_buf());
                }
            }
        }
    }
    Ok(out.into_iter().collect())
}

fn json_files_in(dir: &Path) -> TaskprofResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(walk_error)?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "json") {
            out.push(path.to_path_buf());
        }
    }
    Ok(out)
}

fn walk_error(err: walkdir::Error) -> TaskprofError {
    let msg = err.to_string();
    TaskprofError::Io(err.into_io_error().unwrap_or_else(|| std::io::Error::other(msg)))
}

fn walk_roots(patterns: &[String]) -> BTreeSet<PathBuf> {
    let mut roots = BTreeSet::new();
    for pattern in patterns {
        let prefix = pattern
            .split(['*', '?', '[', ']', '{', '}'])
            .next()
            .unwrap_or_default();
        let trimmed = prefix.trim_end_matches('/');
        let p = PathBuf::from(trimmed);
        if trimmed.is_empty() {
            roots.insert(PathBuf::from("."));
        } else if p.is_dir() {
            roots.insert(p);
        } else {
            match p.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => roots.insert(parent.to_path_buf()),
                _ => roots.insert(PathBuf::from(".")),
            };
        }
    }
    roots
}

fn should_skip_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|s| s.to_str())
        .is_some_and(|name| matches!(name, ".git" | "target" | "node_modules"))
}

fn compile_globset(patterns: &[String]) -> TaskprofResult<GlobSet> {
    let mut b = GlobSetBuilder::new();
    for p in patterns {
        let g = Glob::new(p)
            .map_err(|e| TaskprofError::InvalidArgument(format!("invalid glob {p:?}: {e}")))?;
        b.add(g);
    }
    b.build()
        .map_err(|e| TaskprofError::InvalidArgument(format!("invalid globset: {e}")))
}

fn has_glob_meta(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', ']', '{', '}'])
}

/// Reads one task group per file, in path order.
pub fn load_task_groups(paths: &[PathBuf]) -> TaskprofResult<Vec<TaskGroup>> {
    paths
        .iter()
        .map(|path| {
            let bytes = std::fs::read(path)?;
            let group: TaskGroup = serde_json::from_slice(&bytes).map_err(|e| {
                TaskprofError::InvalidArgument(format!("{}: not a task group: {e}", path.display()))
            })?;
            tracing::debug!(
                path = %path.display(),
                group = %group.task_group_id,
                tasks = group.tasks.len(),
                "loaded task group"
            );
            Ok(group)
        })
        .collect()
}

pub fn write_json(path: &Path, value: &impl Serialize) -> TaskprofResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_vec_pretty(value)?)?;
    Ok(())
}
