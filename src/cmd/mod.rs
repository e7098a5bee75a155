//! Subcommand implementations. Each returns the JSON document the CLI prints.

mod fetch_cmd;
mod graph_cmd;
mod handoff_cmd;
mod pair_cmd;
mod profile_cmd;

pub use fetch_cmd::*;
pub use graph_cmd::*;
pub use handoff_cmd::*;
pub use pair_cmd::*;
pub use profile_cmd::*;
