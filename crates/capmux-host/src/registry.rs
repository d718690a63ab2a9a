use capmux_core::ProviderRegistry;
use capmux_providers::{
    BrowserProvider, CommandProvider, FileSystemProvider, BROWSER_PROVIDER_NAME,
    COMMAND_PROVIDER_NAME, FILESYSTEM_PROVIDER_NAME,
};

/// Every provider this binary ships with.
pub fn default_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(BROWSER_PROVIDER_NAME, BrowserProvider::factory());
    registry.register(COMMAND_PROVIDER_NAME, CommandProvider::factory());
    registry.register(FILESYSTEM_PROVIDER_NAME, FileSystemProvider::factory());
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use capmux_core::{HostConfig, ProviderContext};
    use serde_json::{Map, Value};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_default_registry_names() {
        let registry = default_registry();
        assert_eq!(registry.names(), vec!["Browser", "Command", "FileSystem"]);
    }

    fn assert_defaults_round_trip(host: HostConfig) {
        let host = Arc::new(host);
        for entry in default_registry().list() {
            let ctx = ProviderContext::new(
                entry.name.clone(),
                Arc::clone(&host),
                CancellationToken::new(),
            );
            let mut provider = entry.instantiate(ctx).unwrap();
            assert_eq!(provider.name(), entry.name);

            let snapshot: Map<String, Value> = serde_json::from_str(&provider.config()).unwrap();
            provider
                .load_config(&snapshot)
                .unwrap_or_else(|e| panic!("{} rejected its own defaults: {e}", entry.name));
            assert_eq!(
                serde_json::from_str::<Map<String, Value>>(&provider.config()).unwrap(),
                snapshot
            );
        }
    }

    #[test]
    fn test_default_configs_survive_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        assert_defaults_round_trip(HostConfig::default().with_base_path(dir.path()));
    }

    #[test]
    fn test_relative_base_path_defaults_survive_a_round_trip() {
        assert_defaults_round_trip(HostConfig::default().with_base_path("rel-capmux"));
    }
}
