//! `taskprof.toml` config loading.

use serde::{Deserialize, Serialize};

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use crate::{DEFAULT_SERVER, GraphOptions};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Queue backend that task links and fetches point at.
    #[serde(default = "default_server")]
    pub server: String,

    #[serde(default)]
    pub graph: GraphOptions,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub profile: ProfileConfig,

    #[serde(default)]
    pub handoff: HandoffConfig,
}

fn default_server() -> String {
    DEFAULT_SERVER.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: default_server(),
            graph: GraphOptions::default(),
            fetch: FetchConfig::default(),
            profile: ProfileConfig::default(),
            handoff: HandoffConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Follow dependencies into task groups that were not asked for.
    pub fetch_dependent_tasks: bool,
    pub max_dependent_groups: usize,
    /// Groups dropped from the result. Their dependencies are still followed.
    pub ignored_task_groups: BTreeSet<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            fetch_dependent_tasks: false,
            max_dependent_groups: 15,
            ignored_task_groups: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub stitch: bool,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self { stitch: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    pub probe_interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 100,
            timeout_ms: 30_000,
        }
    }
}

impl HandoffConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    pub fn load_optional(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => match toml::from_str::<Config>(&s) {
                Ok(cfg) => cfg,
                Err(err) => {
                    tracing::warn!("failed to parse config {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
        }
    }
}
