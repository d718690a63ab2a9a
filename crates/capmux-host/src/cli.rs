use std::path::PathBuf;
use std::time::Duration;

use capmux_core::config::absolute_path;
use capmux_core::HostConfig;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Base directory for config, logs, browser profile and data
    #[arg(long, env = "CAPMUX_BASE_PATH")]
    pub base_path: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, env = "CAPMUX_DEBUG")]
    pub debug: bool,

    /// Serve HTTP+SSE on this address instead of stdio
    #[arg(short, long, env = "CAPMUX_LISTEN_ADDR", default_value = "")]
    pub listen_addr: String,

    /// Providers to start: comma separated names or `all`
    #[arg(short, long, env = "CAPMUX_MODULE", default_value = "all")]
    pub module: String,

    /// URL prefix announced to SSE clients, defaults to http://<listen-addr>
    #[arg(long, env = "CAPMUX_BASE_URL")]
    pub base_url: Option<String>,

    /// Seconds to wait for providers to close
    #[arg(long, env = "CAPMUX_SHUTDOWN_TIMEOUT_SECS", default_value_t = 5)]
    pub shutdown_timeout_secs: u64,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start the selected providers and serve them (default)
    Serve,
    /// Print the merged config document, writing it if none exists
    Config,
    /// List registered providers
    List,
}

impl Cli {
    pub fn action(&self) -> Command {
        self.command.unwrap_or(Command::Serve)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Defaults overlaid with the flags of this run.
    pub fn host_config(&self) -> HostConfig {
        let mut host = HostConfig::default();
        if let Some(base_path) = &self.base_path {
            host.base_path = absolute_path(base_path.clone());
        }
        host.debug = self.debug;
        host.listen_addr = self.listen_addr.trim().to_string();
        host.module = self.module.clone();
        host.args = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
        host.base_url = match &self.base_url {
            Some(url) => url.clone(),
            None if host.is_sse() => format!("http://{}", host.listen_addr),
            None => String::new(),
        };
        host
    }
}
