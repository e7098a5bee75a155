mod cli_logger;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use std::path::PathBuf;

use cli_logger::CliLogger;
use taskprof::{
    Config, FetchArgs, GraphArgs, HandoffArgs, LogProfileArgs, PairArgs, ProfileArgs, ReportArgs,
};

#[derive(Debug, Parser)]
#[command(name = "taskprof", version, about = "Task graph consolidation and timeline profiles")]
struct Cli {
    /// Config file; missing files fall back to defaults
    #[arg(long, global = true, default_value = "taskprof.toml")]
    config: PathBuf,
    /// Emit machine-readable JSON
    #[arg(long, global = true)]
    json: bool,
    #[arg(long, global = true)]
    no_color: bool,
    /// Debug logging on stderr (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Consolidate task groups into one task graph
    Graph(GraphArgs),
    /// Build a profile with one thread per task group
    Profile(ProfileArgs),
    /// Build a profile from a task's live log
    LogProfile(LogProfileArgs),
    /// Summed and wall-clock time of task runs
    Report(ReportArgs),
    /// Download task groups from the queue
    Fetch(FetchArgs),
    /// Pair the lines of two streams
    Pair(PairArgs),
    /// Deliver a profile to a viewer process
    Handoff(HandoffArgs),
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let logger = CliLogger::new(cli.json, cli.no_color);
    if let Err(err) = run(&cli, &logger) {
        logger.print_error(&format!("{err:#}"));
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "taskprof=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli, logger: &CliLogger) -> Result<()> {
    let config = Config::load_optional(&cli.config);
    let value = match &cli.command {
        Command::Graph(args) => taskprof::graph_command(&config, args)?,
        Command::Profile(args) => taskprof::profile_command(&config, args)?,
        Command::LogProfile(args) => taskprof::log_profile_command(&config, args)?,
        Command::Report(args) => taskprof::report_command(&config, args)?,
        Command::Fetch(args) => taskprof::fetch_command(&config, args)?,
        Command::Pair(args) => {
            let value = runtime()?.block_on(taskprof::pair_command(args))?;
            if let Some(mismatch) = value.get("mismatch").filter(|m| !m.is_null()) {
                logger.print_warning(&format!("streams differ in length: {mismatch}"));
            }
            value
        }
        Command::Handoff(args) => runtime()?.block_on(taskprof::handoff_command(&config, args))?,
    };
    logger.print_output(&value)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread().enable_all().build()?)
}
