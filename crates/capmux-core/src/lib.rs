pub mod adapter;
pub mod capability;
pub mod config;
pub mod lifecycle;
pub mod merge;
pub mod provider;
pub mod registry;

pub use adapter::{load_service, AdaptedCounts};
pub use capability::CapabilitySet;
pub use config::{ConfigCheck, HostConfig};
pub use lifecycle::{LifecycleEvent, ProviderState};
pub use merge::{merge_and_check, merge_json_into};
pub use provider::{config_snapshot, CapabilityProvider, ProviderContext, ProviderFactory};
pub use registry::{ModuleSelection, ProviderRegistry, RegistryEntry, Selection};

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoreError {
    #[error("Config field '{field}' is invalid: {reason}")]
    Config { field: String, reason: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Capabilities of provider '{0}' are frozen")]
    CapabilitiesFrozen(String),
    #[error("Provider '{provider}' cannot move from {from} to {to}")]
    InvalidTransition {
        provider: String,
        from: ProviderState,
        to: ProviderState,
    },
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
    #[error("Provider initialization failed: {0}")]
    ProviderInit(String),
    #[error("Provider close failed: {0}")]
    ProviderClose(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Cancelled: {0}")]
    Cancelled(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Io(err.to_string())
    }
}

impl From<CoreError> for capmux_proto::HandlerError {
    fn from(err: CoreError) -> Self {
        use capmux_proto::HandlerError;
        match err {
            CoreError::InvalidArgument(msg) => HandlerError::InvalidParams(msg),
            CoreError::NotFound(msg) => HandlerError::NotFound(msg),
            CoreError::Cancelled(_) => HandlerError::Cancelled,
            other => HandlerError::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
