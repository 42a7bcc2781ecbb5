use clap::Parser;
use std::path::PathBuf;

/// tabhost: a browser window whose tabs run in separate processes.
#[derive(Parser, Debug)]
#[command(name = "tabhost", version, about)]
pub struct Args {
    /// Pages to open in new tabs.
    pub uris: Vec<String>,

    /// Config file path override.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log filter override (e.g. debug, tabhost_ipc=trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Session file override.
    #[arg(long)]
    pub session: Option<PathBuf>,

    /// Start without restoring the saved session.
    #[arg(long)]
    pub no_restore: bool,

    /// Give every restored tab its own process.
    #[arg(long)]
    pub separate_processes: bool,

    /// Run tab engines as tasks in this process instead of spawning
    /// tabhost-plug.
    #[arg(long)]
    pub in_process: bool,
}

pub fn parse() -> Args {
    Args::parse()
}
