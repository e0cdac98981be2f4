use clap::Parser;
use std::path::PathBuf;

/// Startup options. Every flag can also come from the environment.
#[derive(Debug, Parser, Clone)]
#[command(name = "gradebookd", version, about = "Gradebook grade computation sidecar (JSON lines over stdio)")]
pub struct Config {
    /// Workspace directory to open before reading requests.
    #[arg(long, env = "GRADEBOOKD_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Log level or filter directive for stderr logging.
    #[arg(long, env = "GRADEBOOKD_LOG", default_value = "info")]
    pub log_level: String,
}
