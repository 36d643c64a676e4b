//! Filter factory registration.
//!
//! One [`FilterFactory`] exists per configuration load. It owns the guest's
//! factory object and everything per-request instances share: the filter
//! name, the stats scope, the secret provider and the two proxies.

use std::fmt;
use std::sync::Arc;

use tether_config::FilterSection;
use tracing::{debug, error, info};

use crate::epoch::{Epoch, SlotKind};
use crate::error::{BridgeError, BridgeResult};
use crate::filter::FilterInstance;
use crate::host::{SecretProvider, StatsScope};
use crate::proxy::{ConfigProxy, FilterProxy};

/// Name the bridge registers under in the host filter chain and route
/// configuration.
pub const HOST_FILTER_NAME: &str = "tether_http";

/// The guest's handle on a factory, stamped with the epoch it was created
/// under. `id == 0` marks a factory the guest failed to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactoryTag {
    /// Factory-slot epoch at creation.
    pub epoch: Epoch,
    /// Guest tag, `0` if creation failed.
    pub id: u64,
}

/// What the host needs to register a guest filter.
#[derive(Clone)]
pub struct FactorySettings {
    /// Guest filter name.
    pub filter_name: String,
    /// Opaque guest settings.
    pub settings: Vec<u8>,
    /// Fail the load instead of running a dead factory.
    pub crash_on_errors: bool,
    /// Generic secret made available to instances.
    pub secret_provider: Option<Arc<dyn SecretProvider>>,
}

impl fmt::Debug for FactorySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactorySettings")
            .field("filter_name", &self.filter_name)
            .field("settings_len", &self.settings.len())
            .field("crash_on_errors", &self.crash_on_errors)
            .field("has_secret", &self.secret_provider.is_some())
            .finish()
    }
}

impl FactorySettings {
    /// Settings for `filter_name` with the given opaque payload.
    #[must_use]
    pub fn new(filter_name: impl Into<String>, settings: impl Into<Vec<u8>>) -> Self {
        Self {
            filter_name: filter_name.into(),
            settings: settings.into(),
            crash_on_errors: false,
            secret_provider: None,
        }
    }

    /// Settings from the `[filter]` section of a loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the guest settings cannot be encoded.
    pub fn from_section(section: &FilterSection) -> BridgeResult<Self> {
        Ok(Self {
            filter_name: section.name.clone(),
            settings: section.settings_bytes()?,
            crash_on_errors: section.crash_on_errors,
            secret_provider: None,
        })
    }

    /// Fail the configuration load if the guest cannot build the factory.
    #[must_use]
    pub fn with_crash_on_errors(mut self, crash: bool) -> Self {
        self.crash_on_errors = crash;
        self
    }

    /// Attach a secret provider.
    #[must_use]
    pub fn with_secret_provider(mut self, provider: Arc<dyn SecretProvider>) -> Self {
        self.secret_provider = Some(provider);
        self
    }
}

/// A registered guest filter.
pub struct FilterFactory {
    tag: FactoryTag,
    filter_name: String,
    scope: Arc<dyn StatsScope>,
    secret_provider: Option<Arc<dyn SecretProvider>>,
    config_proxy: Arc<dyn ConfigProxy>,
    filter_proxy: Arc<dyn FilterProxy>,
}

impl fmt::Debug for FilterFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterFactory")
            .field("tag", &self.tag)
            .field("filter_name", &self.filter_name)
            .field("scope", &self.scope.prefix())
            .finish_non_exhaustive()
    }
}

impl FilterFactory {
    /// Ask the guest to build its factory. The guest is called exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::FactoryCreation`] if the guest fails and
    /// `crash_on_errors` is set. Without it, the failure is logged and a
    /// dead factory is returned; every instance it creates answers with a
    /// local `500`.
    pub fn create(
        settings: FactorySettings,
        scope: Arc<dyn StatsScope>,
        config_proxy: Arc<dyn ConfigProxy>,
        filter_proxy: Arc<dyn FilterProxy>,
    ) -> BridgeResult<Arc<Self>> {
        let epoch = SlotKind::Factory.slot().current();
        let id = config_proxy.create_factory(
            epoch,
            &settings.filter_name,
            &settings.settings,
            Arc::clone(&scope),
        );

        if id == 0 {
            if settings.crash_on_errors {
                return Err(BridgeError::FactoryCreation {
                    filter: settings.filter_name,
                });
            }
            error!(
                filter = %settings.filter_name,
                "guest could not create filter factory, check the guest's error for detail"
            );
        } else {
            info!(filter = %settings.filter_name, %epoch, tag = id, "created filter factory");
        }

        Ok(Arc::new(Self {
            tag: FactoryTag { epoch, id },
            filter_name: settings.filter_name,
            scope,
            secret_provider: settings.secret_provider,
            config_proxy,
            filter_proxy,
        }))
    }

    /// Stats prefix for a guest filter under the host's `stats_prefix`,
    /// e.g. `http.ingress.tether_http.security.`.
    #[must_use]
    pub fn stats_prefix(stats_prefix: &str, filter_name: &str) -> String {
        format!("{stats_prefix}{HOST_FILTER_NAME}.{filter_name}.")
    }

    /// Build the per-request instance for a new stream.
    #[must_use]
    pub fn create_filter(self: &Arc<Self>) -> Arc<FilterInstance> {
        FilterInstance::new(Arc::clone(self))
    }

    /// The guest tag and its epoch.
    #[must_use]
    pub fn tag(&self) -> FactoryTag {
        self.tag
    }

    /// Whether the guest failed to build this factory.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.tag.id == 0
    }

    /// Guest filter name.
    #[must_use]
    pub fn filter_name(&self) -> &str {
        &self.filter_name
    }

    /// Stats scope shared by all instances.
    #[must_use]
    pub fn scope(&self) -> Arc<dyn StatsScope> {
        Arc::clone(&self.scope)
    }

    /// Configured secret provider, if any.
    #[must_use]
    pub fn secret_provider(&self) -> Option<Arc<dyn SecretProvider>> {
        self.secret_provider.clone()
    }

    /// Proxy for per-request guest calls.
    #[must_use]
    pub fn filter_proxy(&self) -> Arc<dyn FilterProxy> {
        Arc::clone(&self.filter_proxy)
    }
}

impl Drop for FilterFactory {
    fn drop(&mut self) {
        assert!(
            self.tag.epoch.is_current(),
            "filter factory {} for '{}' released outside its epoch",
            self.tag.epoch,
            self.filter_name
        );
        if self.tag.id != 0 {
            self.config_proxy.destroy_factory(self.tag.id);
        }
        debug!(filter = %self.filter_name, tag = self.tag.id, "released filter factory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{StubProxy, StubScope};

    fn create(proxy: &Arc<StubProxy>, crash: bool) -> BridgeResult<Arc<FilterFactory>> {
        FilterFactory::create(
            FactorySettings::new("security", b"{}".to_vec()).with_crash_on_errors(crash),
            StubScope::new("http.tether_http.security."),
            proxy.clone(),
            proxy.clone(),
        )
    }

    #[test]
    fn creates_guest_factory_once() {
        let proxy = StubProxy::new();
        let factory = create(&proxy, false).unwrap();
        assert!(!factory.is_dead());
        assert!(factory.tag().epoch.is_current());
        assert_eq!(factory.filter_name(), "security");
        assert_eq!(proxy.created_factories(), vec!["security".to_owned()]);
    }

    #[test]
    fn drop_destroys_guest_factory() {
        let proxy = StubProxy::new();
        let factory = create(&proxy, false).unwrap();
        let id = factory.tag().id;
        drop(factory);
        assert_eq!(proxy.destroyed_factories(), vec![id]);
    }

    #[test]
    fn failure_with_crash_on_errors_is_fatal() {
        let proxy = StubProxy::new();
        proxy.fail_factories();
        let err = create(&proxy, true).unwrap_err();
        assert!(matches!(err, BridgeError::FactoryCreation { ref filter } if filter == "security"));
        assert!(proxy.destroyed_factories().is_empty());
    }

    #[test]
    fn failure_without_crash_on_errors_yields_dead_factory() {
        let proxy = StubProxy::new();
        proxy.fail_factories();
        let factory = create(&proxy, false).unwrap();
        assert!(factory.is_dead());
        drop(factory);
        // Nothing was built on the guest side, so nothing is released.
        assert!(proxy.destroyed_factories().is_empty());
    }

    #[test]
    #[should_panic(expected = "released outside its epoch")]
    fn drop_after_renew_panics() {
        let proxy = StubProxy::new();
        let factory = create(&proxy, false).unwrap();
        let _ = SlotKind::Factory.slot().renew();
        drop(factory);
    }

    #[test]
    #[should_panic(expected = "released outside its epoch")]
    fn drop_on_another_thread_panics() {
        let proxy = StubProxy::new();
        let factory = create(&proxy, false).unwrap();
        let result = std::thread::spawn(move || drop(factory)).join();
        if let Err(panic) = result {
            std::panic::resume_unwind(panic);
        }
    }

    #[test]
    fn stats_prefix_layout() {
        assert_eq!(
            FilterFactory::stats_prefix("http.ingress.", "security"),
            "http.ingress.tether_http.security."
        );
    }

    #[test]
    fn settings_from_config_section() {
        let mut section = FilterSection::default();
        section.name = "security".to_owned();
        section.crash_on_errors = true;
        section.settings = serde_json::json!({ "provider": "hmac" });
        let settings = FactorySettings::from_section(&section).unwrap();
        assert_eq!(settings.filter_name, "security");
        assert!(settings.crash_on_errors);
        assert_eq!(settings.settings, br#"{"provider":"hmac"}"#);
    }
}
