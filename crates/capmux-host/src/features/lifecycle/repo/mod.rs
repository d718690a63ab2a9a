use async_trait::async_trait;
use capmux_core::{CoreError, LifecycleEvent, ProviderState, Result};
use std::sync::{Arc, RwLock};

/// Storage for provider lifecycle transitions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LifecycleRepository: Send + Sync {
    /// Append a transition
    async fn record(&self, event: LifecycleEvent) -> Result<()>;

    /// Transitions of one provider, oldest first
    async fn events_for(&self, provider: String) -> Result<Vec<LifecycleEvent>>;

    /// Every transition, oldest first
    async fn events(&self) -> Result<Vec<LifecycleEvent>>;

    /// Latest state of a provider, if it was ever seen
    async fn current_state(&self, provider: String) -> Result<Option<ProviderState>>;
}

#[derive(Clone, Default)]
pub struct InMemoryLifecycleRepository {
    storage: Arc<RwLock<Vec<LifecycleEvent>>>,
}

impl InMemoryLifecycleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LifecycleRepository for InMemoryLifecycleRepository {
    async fn record(&self, event: LifecycleEvent) -> Result<()> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| CoreError::LockPoisoned("lifecycle events".to_string()))?;
        storage.push(event);
        Ok(())
    }

    async fn events_for(&self, provider: String) -> Result<Vec<LifecycleEvent>> {
        let storage = self
            .storage
            .read()
            .map_err(|_| CoreError::LockPoisoned("lifecycle events".to_string()))?;
        Ok(storage
            .iter()
            .filter(|event| event.provider == provider)
            .cloned()
            .collect())
    }

    async fn events(&self) -> Result<Vec<LifecycleEvent>> {
        let storage = self
            .storage
            .read()
            .map_err(|_| CoreError::LockPoisoned("lifecycle events".to_string()))?;
        Ok(storage.clone())
    }

    async fn current_state(&self, provider: String) -> Result<Option<ProviderState>> {
        let storage = self
            .storage
            .read()
            .map_err(|_| CoreError::LockPoisoned("lifecycle events".to_string()))?;
        Ok(storage
            .iter()
            .rev()
            .find(|event| event.provider == provider)
            .map(|event| event.to))
    }
}
