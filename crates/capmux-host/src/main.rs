use capmux_host::cli::{Cli, Command};
use capmux_host::registry::default_registry;
use capmux_host::{telemetry, Host};
use clap::Parser;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(error) = telemetry::init_tracing(cli.debug) {
        eprintln!("failed to initialise logging: {error}");
        std::process::exit(1);
    }

    let host = Host::new(cli.host_config(), default_registry(), cli.shutdown_timeout());
    let code = match run(&host, cli.action()).await {
        Ok(()) => 0,
        Err(error) => {
            error!(error = %error, "capmux exited with an error");
            1
        }
    };

    // The blocking stdin reader would otherwise keep the runtime alive.
    std::process::exit(code);
}

async fn run(host: &Host, action: Command) -> capmux_host::Result<()> {
    match action {
        Command::List => {
            for name in host.list() {
                println!("{name}");
            }
        }
        Command::Config => {
            let merged = host.merged_config()?;
            let pretty = serde_json::to_string_pretty(&merged)
                .map_err(capmux_core::CoreError::from)?;
            println!("{pretty}");
        }
        Command::Serve => {
            let config = host.config();
            info!(
                version = %config.version,
                module = %config.module,
                transport = if config.is_sse() { "sse" } else { "stdio" },
                base_path = %config.base_path.display(),
                "starting capmux"
            );
            let report = host.serve().await?;
            if report.graceful {
                info!(closed = ?report.closed, failed = ?report.failed, "capmux stopped");
            } else {
                warn!(pending = ?report.pending, "capmux stopped before every provider closed");
            }
        }
    }
    Ok(())
}
