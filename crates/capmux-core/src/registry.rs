use crate::config::MODULE_ALL;
use crate::provider::{CapabilityProvider, ProviderContext, ProviderFactory};
use crate::Result;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct RegistryEntry {
    pub name: String,
    pub factory: ProviderFactory,
}

impl RegistryEntry {
    pub fn instantiate(&self, ctx: ProviderContext) -> Result<Box<dyn CapabilityProvider>> {
        (self.factory)(ctx)
    }
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Name to factory mapping, filled once at the composition root.
///
/// Iteration order is registration order. Re-registering a name replaces the
/// factory but keeps the original slot.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    entries: Vec<RegistryEntry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, factory: ProviderFactory) {
        let name = name.into();
        match self.entries.iter_mut().find(|entry| entry.name == name) {
            Some(entry) => entry.factory = factory,
            None => self.entries.push(RegistryEntry { name, factory }),
        }
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(ProviderContext) -> Result<Box<dyn CapabilityProvider>> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(factory));
    }

    pub fn list(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Which providers a run should start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSelection {
    All,
    Named(Vec<String>),
}

#[derive(Debug)]
pub struct Selection<'a> {
    pub selected: Vec<&'a RegistryEntry>,
    /// Requested names with no registered provider.
    pub unknown: Vec<String>,
}

impl ModuleSelection {
    /// Parses `all` (any case, or an empty string) or a comma list of names.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(MODULE_ALL) {
            return ModuleSelection::All;
        }

        let mut names: Vec<String> = Vec::new();
        for name in trimmed.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if name.eq_ignore_ascii_case(MODULE_ALL) {
                return ModuleSelection::All;
            }
            if !names.iter().any(|existing| existing == name) {
                names.push(name.to_string());
            }
        }

        if names.is_empty() {
            ModuleSelection::All
        } else {
            ModuleSelection::Named(names)
        }
    }

    pub fn includes(&self, name: &str) -> bool {
        match self {
            ModuleSelection::All => true,
            ModuleSelection::Named(names) => names.iter().any(|n| n == name),
        }
    }

    /// Selected entries in registry order.
    pub fn select<'a>(&self, registry: &'a ProviderRegistry) -> Selection<'a> {
        let selected = registry
            .list()
            .iter()
            .filter(|entry| self.includes(&entry.name))
            .collect();

        let unknown = match self {
            ModuleSelection::All => Vec::new(),
            ModuleSelection::Named(names) => names
                .iter()
                .filter(|name| !registry.contains(name))
                .cloned()
                .collect(),
        };

        Selection { selected, unknown }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CoreError;
    use proptest::prelude::*;

    fn failing_factory(tag: &'static str) -> ProviderFactory {
        Arc::new(move |_ctx: ProviderContext| -> Result<Box<dyn CapabilityProvider>> {
            Err(CoreError::ProviderInit(tag.to_string()))
        })
    }

    fn factory_tag(entry: &RegistryEntry) -> String {
        let ctx = ProviderContext::new(
            entry.name.clone(),
            Arc::new(crate::HostConfig::default()),
            tokio_util::sync::CancellationToken::new(),
        );
        match entry.instantiate(ctx) {
            Err(CoreError::ProviderInit(tag)) => tag,
            _ => String::new(),
        }
    }

    #[test]
    fn test_register_twice_keeps_single_latest_entry() {
        let mut registry = ProviderRegistry::new();
        registry.register("Alpha", failing_factory("first"));
        registry.register("Beta", failing_factory("beta"));
        registry.register("Alpha", failing_factory("second"));

        assert_eq!(registry.names(), vec!["Alpha", "Beta"]);
        let alpha = registry.get("Alpha").unwrap();
        assert_eq!(factory_tag(alpha), "second");
    }

    #[test]
    fn test_parse_all_variants() {
        assert_eq!(ModuleSelection::parse("all"), ModuleSelection::All);
        assert_eq!(ModuleSelection::parse("ALL"), ModuleSelection::All);
        assert_eq!(ModuleSelection::parse(""), ModuleSelection::All);
        assert_eq!(ModuleSelection::parse(" , "), ModuleSelection::All);
        assert_eq!(ModuleSelection::parse("Browser,all"), ModuleSelection::All);
    }

    #[test]
    fn test_parse_named_trims_and_dedupes() {
        assert_eq!(
            ModuleSelection::parse(" Browser , Command,Browser "),
            ModuleSelection::Named(vec!["Browser".to_string(), "Command".to_string()])
        );
    }

    #[test]
    fn test_select_follows_registry_order_and_reports_unknown() {
        let mut registry = ProviderRegistry::new();
        registry.register("Alpha", failing_factory("a"));
        registry.register("Beta", failing_factory("b"));
        registry.register("Gamma", failing_factory("c"));

        let selection = ModuleSelection::parse("Gamma,Missing,Alpha").select(&registry);
        let names: Vec<&str> = selection.selected.iter().map(|e| e.name.as_str()).collect();

        assert_eq!(names, vec!["Alpha", "Gamma"]);
        assert_eq!(selection.unknown, vec!["Missing".to_string()]);
    }

    #[test]
    fn test_select_is_case_sensitive() {
        let mut registry = ProviderRegistry::new();
        registry.register("Browser", failing_factory("b"));

        let selection = ModuleSelection::parse("browser").select(&registry);
        assert!(selection.selected.is_empty());
        assert_eq!(selection.unknown, vec!["browser".to_string()]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn property_registry_holds_one_entry_per_name(
            names in proptest::collection::vec("[A-D]", 0..20)
        ) {
            let mut registry = ProviderRegistry::new();
            for name in &names {
                registry.register(name.clone(), failing_factory("x"));
            }

            let mut unique: Vec<&String> = Vec::new();
            for name in &names {
                if !unique.contains(&name) {
                    unique.push(name);
                }
            }

            prop_assert_eq!(registry.len(), unique.len());
            let listed: Vec<&str> = registry.names();
            let expected: Vec<&str> = unique.iter().map(|s| s.as_str()).collect();
            prop_assert_eq!(listed, expected);
        }

        #[test]
        fn property_all_selection_selects_every_entry(
            names in proptest::collection::vec("[a-z]{1,6}", 0..10)
        ) {
            let mut registry = ProviderRegistry::new();
            for name in &names {
                registry.register(name.clone(), failing_factory("x"));
            }

            let selection = ModuleSelection::All.select(&registry);
            prop_assert_eq!(selection.selected.len(), registry.len());
            prop_assert!(selection.unknown.is_empty());
        }
    }
}
