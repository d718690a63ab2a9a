pub mod cli;
pub mod config_doc;
pub mod features;
pub mod pidfile;
pub mod registry;
pub mod server;
pub mod telemetry;

pub use features::lifecycle::service::{Orchestrator, ShutdownReport};
pub use server::Host;

use capmux_core::CoreError;
use capmux_endpoint::EndpointError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Provider '{provider}' failed to start: {source}")]
    Startup { provider: String, source: CoreError },

    #[error("Another capmux instance (pid {pid}) is running, see {}", path.display())]
    AlreadyRunning { pid: u32, path: PathBuf },

    #[error("Config document {}: {reason}", path.display())]
    ConfigDocument { path: PathBuf, reason: String },

    #[error("Invalid listen address '{addr}': {reason}")]
    ListenAddr { addr: String, reason: String },

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_startup_error_keeps_provider_error_as_source() {
        let err = HostError::Startup {
            provider: "Browser".to_string(),
            source: CoreError::ProviderInit("no chromium".to_string()),
        };

        assert_eq!(
            err.to_string(),
            "Provider 'Browser' failed to start: Provider initialization failed: no chromium"
        );
        let source = err.source().and_then(|s| s.downcast_ref::<CoreError>());
        assert_eq!(
            source,
            Some(&CoreError::ProviderInit("no chromium".to_string()))
        );
    }

    #[test]
    fn test_already_running_mentions_pid_file() {
        let err = HostError::AlreadyRunning {
            pid: 42,
            path: PathBuf::from("/tmp/capmux.pid"),
        };
        assert!(err.to_string().contains("pid 42"));
        assert!(err.to_string().contains("/tmp/capmux.pid"));
    }
}
