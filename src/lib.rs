//! taskprof core library: task-graph consolidation, group timelines and
//! profile synthesis, shared by the CLI.

mod cmd;
mod config;
mod consolidate;
mod error;
mod fetch;
mod fsutil;
mod handoff;
mod model;
mod pairer;
mod profile;
mod stitch;
mod timerange;
mod urlenc;

pub use cmd::*;
pub use config::*;
pub use consolidate::*;
pub use error::*;
pub use fetch::*;
pub use fsutil::*;
pub use handoff::*;
pub use model::*;
pub use pairer::*;
pub use profile::*;
pub use stitch::*;
pub use timerange::*;
pub use urlenc::*;
