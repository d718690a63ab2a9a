pub mod dispatch;
pub mod endpoint;
pub mod transport;

pub use dispatch::McpService;
pub use endpoint::{McpEndpoint, MetricsRenderer, ToolObserver, ToolOutcome};
pub use transport::sse::{router as sse_router, serve_sse};
pub use transport::stdio::serve_stdio;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<tokio_util::codec::LinesCodecError> for EndpointError {
    fn from(err: tokio_util::codec::LinesCodecError) -> Self {
        match err {
            tokio_util::codec::LinesCodecError::Io(io) => EndpointError::Io(io),
            other => EndpointError::Transport(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, EndpointError>;
