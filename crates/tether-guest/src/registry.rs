//! Name -> factory-factory registry.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::filter::HttpFilterFactoryFactory;

/// Guest filters available to the runtime, by name.
#[derive(Default)]
pub struct FilterRegistry {
    factories: DashMap<String, Arc<dyn HttpFilterFactoryFactory>>,
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl FilterRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`. A second registration under the
    /// same name replaces the first; the replaced entry is returned.
    pub fn register(
        &self,
        name: impl Into<String>,
        factory: Arc<dyn HttpFilterFactoryFactory>,
    ) -> Option<Arc<dyn HttpFilterFactoryFactory>> {
        let name = name.into();
        let previous = self.factories.insert(name.clone(), factory);
        if previous.is_some() {
            warn!(filter = %name, "guest filter registered twice, replacing the earlier entry");
        } else {
            info!(filter = %name, "registered guest filter");
        }
        previous
    }

    /// Look up `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn HttpFilterFactoryFactory>> {
        self.factories.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of registered filters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use tether_bridge::host::StatsScope;

    use super::*;
    use crate::error::{GuestError, GuestResult};
    use crate::filter::{GuestConfig, HttpFilterFactory};

    struct Named(&'static str);

    impl HttpFilterFactoryFactory for Named {
        fn create_factory(
            &self,
            _config: &GuestConfig,
            _scope: Arc<dyn StatsScope>,
        ) -> GuestResult<Arc<dyn HttpFilterFactory>> {
            Err(GuestError::Rejected {
                filter: self.0.into(),
                reason: "test".into(),
            })
        }
    }

    #[test]
    fn lookup_by_name() {
        let registry = FilterRegistry::new();
        assert!(registry.register("security", Arc::new(Named("a"))).is_none());
        assert!(registry.get("security").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn second_registration_replaces_the_first() {
        let registry = FilterRegistry::new();
        registry.register("security", Arc::new(Named("first")));
        let previous = registry.register("security", Arc::new(Named("second")));
        assert!(previous.is_some());
        assert_eq!(registry.len(), 1);

        let scope = tether_test::InMemoryStats::new("p.");
        let err = registry
            .get("security")
            .unwrap()
            .create_factory(&GuestConfig::new("security", Vec::new()), scope)
            .err()
            .unwrap();
        assert!(matches!(err, GuestError::Rejected { ref filter, .. } if filter == "second"));
    }

    #[test]
    fn names_are_sorted() {
        let registry = FilterRegistry::new();
        registry.register("zeta", Arc::new(Named("z")));
        registry.register("alpha", Arc::new(Named("a")));
        assert_eq!(registry.names(), vec!["alpha".to_owned(), "zeta".to_owned()]);
    }
}
