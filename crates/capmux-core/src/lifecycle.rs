use crate::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderState {
    Created,
    Configured,
    Initialized,
    Serving,
    Closing,
    Closed,
}

impl ProviderState {
    /// Forward-only transitions. `Configured` may be skipped when the config
    /// document has no section for the provider, and any live state may move
    /// to `Closing` so a provider that failed mid-startup can still be closed.
    pub fn can_transition_to(self, next: ProviderState) -> bool {
        use ProviderState::*;
        matches!(
            (self, next),
            (Created, Configured)
                | (Created, Initialized)
                | (Configured, Initialized)
                | (Initialized, Serving)
                | (Created | Configured | Initialized | Serving, Closing)
                | (Closing, Closed)
        )
    }

    pub fn transition(self, provider: &str, next: ProviderState) -> Result<ProviderState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                provider: provider.to_string(),
                from: self,
                to: next,
            })
        }
    }

    pub fn is_terminal(self) -> bool {
        self == ProviderState::Closed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderState::Created => "created",
            ProviderState::Configured => "configured",
            ProviderState::Initialized => "initialized",
            ProviderState::Serving => "serving",
            ProviderState::Closing => "closing",
            ProviderState::Closed => "closed",
        }
    }
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub event_id: String,
    pub provider: String,
    pub from: Option<ProviderState>,
    pub to: ProviderState,
    pub timestamp: DateTime<Utc>,
    pub details: Option<HashMap<String, String>>,
}

impl LifecycleEvent {
    pub fn new(provider: impl Into<String>, from: Option<ProviderState>, to: ProviderState) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            provider: provider.into(),
            from,
            to,
            timestamp: Utc::now(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: HashMap<String, String>) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_error(self, error: &str) -> Self {
        let mut details = HashMap::new();
        details.insert("error".to_string(), error.to_string());
        self.with_details(details)
    }
}
