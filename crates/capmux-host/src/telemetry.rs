use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub fn default_filter(debug: bool) -> &'static str {
    if debug {
        "capmux=debug,info"
    } else {
        "capmux=info,info"
    }
}

/// Installs the global subscriber. Output goes to stderr because stdout
/// carries the stdio transport.
pub fn init_tracing(debug: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = if debug {
        EnvFilter::new(default_filter(true))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(false)))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
