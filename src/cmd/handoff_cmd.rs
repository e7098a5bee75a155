//! Handing a profile to a viewer process (`taskprof handoff`).

use clap::Args;
use serde::Serialize;
use tokio::sync::watch;

use std::path::PathBuf;

use crate::{Config, ProcessViewer, TaskprofError, TaskprofResult, deliver_profile};

#[derive(Debug, Args)]
pub struct HandoffArgs {
    /// Profile JSON to deliver
    #[arg(value_name = "PROFILE_JSON")]
    pub profile: PathBuf,
    /// Overall wait for the viewer, in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// Viewer command and its arguments
    #[arg(long, num_args = 1.., required = true, allow_hyphen_values = true)]
    pub viewer: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HandoffOutput {
    #[serde(rename = "schemaVersion")]
    pub schema_version: &'static str,
    pub viewer: String,
    pub probes: usize,
    #[serde(rename = "exitCode")]
    pub exit_code: Option<i32>,
}

pub async fn handoff_command(config: &Config, args: &HandoffArgs) -> TaskprofResult<serde_json::Value> {
    let profile: serde_json::Value = serde_json::from_slice(&std::fs::read(&args.profile)?)?;
    let Some((program, rest)) = args.viewer.split_first() else {
        return Err(TaskprofError::InvalidArgument("missing viewer command".to_string()));
    };

    let mut options = config.handoff.clone();
    if let Some(timeout_ms) = args.timeout_ms {
        options.timeout_ms = timeout_ms;
    }

    let (cancel_tx, mut cancel) = watch::channel(false);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let (mut viewer, mut replies) = ProcessViewer::spawn(program, rest)?;
    let delivered = deliver_profile(&mut viewer, &mut replies, &profile, &options, &mut cancel).await;
    interrupt.abort();
    let report = delivered?;
    let status = viewer.wait().await?;

    Ok(serde_json::to_value(HandoffOutput {
        schema_version: "taskprof.handoff.v1",
        viewer: program.clone(),
        probes: report.probes,
        exit_code: status.code(),
    })?)
}
