//! Profile artifacts (`taskprof profile`, `taskprof log-profile`).

use clap::Args;
use serde::Serialize;
use time::OffsetDateTime;

use std::path::PathBuf;

use super::graph_cmd::load_inputs;
use crate::{
    Config, Millis, Profile, ProfileOptions, TaskDefinition, TaskprofError, TaskprofResult,
    build_log_profile, build_profile, decode_uint_array, encode_uint_set, parse_log_lines,
    write_profile,
};

#[derive(Debug, Args)]
pub struct ProfileArgs {
    #[arg(value_name = "INPUTS", required = true)]
    pub inputs: Vec<String>,
    /// Keep every group at its real wall-clock position
    #[arg(long)]
    pub no_stitch: bool,
    /// Thread selection token to print instead of selecting every thread
    #[arg(long, value_name = "TOKEN")]
    pub select: Option<String>,
    #[arg(long, default_value = "taskprof-profile.json")]
    pub out: PathBuf,
}

#[derive(Debug, Args)]
pub struct LogProfileArgs {
    /// Plain-text live log of the task
    #[arg(value_name = "LOG")]
    pub log: PathBuf,
    /// Task definition JSON the log belongs to
    #[arg(long = "task", value_name = "TASK_JSON")]
    pub task: PathBuf,
    #[arg(long)]
    pub task_id: String,
    #[arg(long, default_value = "taskprof-live-log.json")]
    pub out: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileOutput {
    #[serde(rename = "schemaVersion")]
    pub schema_version: &'static str,
    pub out: String,
    pub product: String,
    pub threads: usize,
    pub markers: usize,
    /// Viewer query string selecting the threads to show.
    pub query: String,
}

pub fn profile_command(config: &Config, args: &ProfileArgs) -> TaskprofResult<serde_json::Value> {
    let groups = load_inputs(&args.inputs)?;
    let options = ProfileOptions {
        server: config.server.clone(),
        stitch: config.profile.stitch && !args.no_stitch,
        now_ms: now_ms(),
    };
    let profile = build_profile(groups, &options);
    let query = thread_query(&profile, args.select.as_deref())?;
    write_profile(&profile, &args.out)?;
    Ok(serde_json::to_value(summary(&profile, &args.out, query))?)
}

pub fn log_profile_command(config: &Config, args: &LogProfileArgs) -> TaskprofResult<serde_json::Value> {
    let log = std::fs::read_to_string(&args.log)?;
    let task: TaskDefinition = serde_json::from_slice(&std::fs::read(&args.task)?)?;
    let rows = parse_log_lines(log.lines());
    tracing::debug!(rows = rows.len(), task = %args.task_id, "parsed live log");

    let profile = build_log_profile(&rows, &task, &args.task_id, &config.server);
    let query = thread_query(&profile, None)?;
    write_profile(&profile, &args.out)?;
    Ok(serde_json::to_value(summary(&profile, &args.out, query))?)
}

/// `?thread=<token>` for `select`, or for every thread when absent.
pub fn thread_query(profile: &Profile, select: Option<&str>) -> TaskprofResult<String> {
    let count = profile.threads.len();
    let token = match select {
        Some(token) => {
            let indexes = decode_uint_array(token)?;
            if let Some(bad) = indexes.iter().find(|&&i| i as usize >= count) {
                return Err(TaskprofError::InvalidArgument(format!(
                    "thread {bad} selected but the profile has {count} threads"
                )));
            }
            encode_uint_set(indexes)
        }
        None => encode_uint_set(0..count as u32),
    };
    Ok(format!("?thread={token}"))
}

fn summary(profile: &Profile, out: &std::path::Path, query: String) -> ProfileOutput {
    ProfileOutput {
        schema_version: "taskprof.profile.v1",
        out: out.display().to_string(),
        product: profile.meta.product.clone(),
        threads: profile.threads.len(),
        markers: profile.threads.iter().map(|t| t.markers.len()).sum(),
        query,
    }
}

fn now_ms() -> Millis {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    Millis::try_from(nanos).unwrap_or(Millis::MAX)
}
