//! Feature manager.
//!
//! The [`FeatureManager`] owns the feature definitions, the event channel and
//! one [`FeatureStore`] per configured store name. Stores are created on first
//! use and reused afterwards.

use crate::config::{FeaturesConfig, StoreConfig};
use crate::decorator::{DefaultScopeResolver, FeatureStore, SharedScopeResolver};
use crate::drivers::{ArrayDriver, Driver, DriverContext};
use crate::error::{FeatureError, FeatureResult};
use crate::events::{EventDispatcher, FeatureEvent};
use crate::interaction::IntoFeatureNames;
use crate::registry::{FeatureClass, FeatureRegistry, Resolved};
use crate::scope::Scope;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

#[cfg(feature = "database")]
use crate::drivers::DatabaseDriver;
#[cfg(feature = "redis")]
use crate::drivers::RedisDriver;

/// Builds a driver from its context and the store's options.
pub type DriverCreator = Arc<
    dyn Fn(DriverContext, Value) -> BoxFuture<'static, FeatureResult<Arc<dyn Driver>>>
        + Send
        + Sync,
>;

/// Entry point for defining and checking features.
///
/// # Examples
///
/// ```
/// use flagstaff_features::prelude::*;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), FeatureError> {
/// let manager = FeatureManager::new(FeaturesConfig::default())?;
/// manager.define_value("dark-mode", true);
///
/// assert!(manager.active("dark-mode").await?);
/// assert!(!manager.active("unknown").await?);
/// # Ok(())
/// # }
/// ```
pub struct FeatureManager {
    config: RwLock<FeaturesConfig>,
    registry: Arc<FeatureRegistry>,
    events: EventDispatcher,
    stores: Mutex<HashMap<String, Arc<FeatureStore>>>,
    creators: RwLock<HashMap<String, DriverCreator>>,
    default_scope: SharedScopeResolver,
}

impl FeatureManager {
    /// Create a manager.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the default store is not configured.
    pub fn new(config: FeaturesConfig) -> FeatureResult<Self> {
        config.validate()?;

        debug!(
            default = %config.default,
            stores = config.stores.len(),
            "Creating feature manager"
        );

        Ok(Self {
            config: RwLock::new(config),
            registry: Arc::new(FeatureRegistry::new()),
            events: EventDispatcher::default(),
            stores: Mutex::new(HashMap::new()),
            creators: RwLock::new(HashMap::new()),
            default_scope: SharedScopeResolver::default(),
        })
    }

    /// Current configuration.
    pub fn config(&self) -> FeaturesConfig {
        self.config.read().clone()
    }

    pub fn registry(&self) -> &Arc<FeatureRegistry> {
        &self.registry
    }

    /// Receive feature events.
    pub fn subscribe(&self) -> broadcast::Receiver<FeatureEvent> {
        self.events.subscribe()
    }

    /// Name of the default store.
    pub fn default_store_name(&self) -> String {
        self.config.read().default.clone()
    }

    /// Change the default store.
    pub fn set_default_store(&self, name: impl Into<String>) -> FeatureResult<()> {
        let name = name.into();
        let mut config = self.config.write();

        if !config.stores.contains_key(&name) {
            return Err(FeatureError::StoreNotDefined(name));
        }

        debug!(store = %name, "Changing default feature store");
        config.default = name;
        Ok(())
    }

    /// Get a store by name, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::StoreNotDefined`] for an unconfigured name and
    /// [`FeatureError::UnsupportedDriver`] when its driver is unavailable.
    pub async fn store(&self, name: &str) -> FeatureResult<Arc<FeatureStore>> {
        let existing = self.stores.lock().get(name).cloned();
        if let Some(store) = existing {
            return Ok(store);
        }

        let config = self
            .config
            .read()
            .store(name)
            .cloned()
            .ok_or_else(|| FeatureError::StoreNotDefined(name.to_string()))?;

        let driver = self.create_driver(name, &config).await?;
        let store = Arc::new(FeatureStore::with_scope_resolver(
            name,
            driver,
            self.registry.clone(),
            self.events.clone(),
            self.default_scope.clone(),
        ));

        // Another caller may have created it while we were connecting
        let store = self
            .stores
            .lock()
            .entry(name.to_string())
            .or_insert(store)
            .clone();

        Ok(store)
    }

    /// The default store.
    pub async fn driver(&self) -> FeatureResult<Arc<FeatureStore>> {
        let name = self.default_store_name();
        self.store(&name).await
    }

    async fn create_driver(
        &self,
        name: &str,
        config: &StoreConfig,
    ) -> FeatureResult<Arc<dyn Driver>> {
        let context = DriverContext::new(name, self.registry.clone(), self.events.clone());

        let creator = self.creators.read().get(config.driver_name()).cloned();
        if let Some(creator) = creator {
            debug!(store = %name, driver = %config.driver_name(), "Creating custom feature driver");
            let options = match config {
                StoreConfig::Custom { options, .. } => options.clone(),
                other => serde_json::to_value(other)?,
            };
            return creator(context, options).await;
        }

        match config {
            StoreConfig::Array => Ok(Arc::new(ArrayDriver::new(context))),

            #[cfg(feature = "redis")]
            StoreConfig::Redis { url, prefix } => {
                Ok(Arc::new(RedisDriver::connect(context, url, prefix.clone()).await?))
            }

            #[cfg(feature = "database")]
            StoreConfig::Database {
                url,
                table,
                max_connections,
                create_table,
            } => {
                let driver =
                    DatabaseDriver::connect(context, url, table.clone(), *max_connections).await?;
                if *create_table {
                    driver.create_table().await?;
                }
                Ok(Arc::new(driver))
            }

            other => Err(FeatureError::UnsupportedDriver(
                other.driver_name().to_string(),
            )),
        }
    }

    /// Register a driver creator.
    ///
    /// Stores whose driver name matches use it. Custom stores receive their
    /// `options`; built-in stores receive their own settings as JSON.
    pub fn extend<F, Fut, D>(&self, driver: impl Into<String>, creator: F)
    where
        F: Fn(DriverContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FeatureResult<D>> + Send + 'static,
        D: Driver + 'static,
    {
        let boxed: DriverCreator = Arc::new(
            move |context: DriverContext,
                  options: Value|
                  -> BoxFuture<'static, FeatureResult<Arc<dyn Driver>>> {
                let driver = creator(context, options);
                Box::pin(async move {
                    let driver: Arc<dyn Driver> = Arc::new(driver.await?);
                    Ok(driver)
                })
            },
        );

        self.creators.write().insert(driver.into(), boxed);
    }

    /// Set the function that computes the default scope for each store.
    pub fn resolve_scope_using<F>(&self, resolver: F)
    where
        F: Fn(&str) -> Scope + Send + Sync + 'static,
    {
        let resolver: DefaultScopeResolver = Arc::new(resolver);
        *self.default_scope.write() = Some(resolver);
    }

    /// Drop every created store. They are recreated on next use.
    pub fn forget_stores(&self) {
        debug!("Forgetting feature stores");
        self.stores.lock().clear();
    }

    /// Flush the cache of every created store.
    ///
    /// Call between independent units of work in long-running processes.
    pub fn flush_cache(&self) {
        for store in self.stores.lock().values() {
            store.flush_cache();
        }
    }

    fn evict(&self, feature: &str) {
        for store in self.stores.lock().values() {
            store.evict(feature);
        }
    }

    /// Define a feature for every store.
    pub fn define<F, R>(&self, feature: impl Into<String>, resolver: F)
    where
        F: Fn(&Scope) -> R + Send + Sync + 'static,
        R: Into<Resolved>,
    {
        let feature = feature.into();
        self.registry.define(feature.clone(), resolver);
        self.evict(&feature);
    }

    /// Define a feature with a constant value or lottery.
    pub fn define_value(&self, feature: impl Into<String>, value: impl Into<Resolved>) {
        let feature = feature.into();
        self.registry.define_value(feature.clone(), value);
        self.evict(&feature);
    }

    /// Define a feature type and return its feature name.
    pub fn define_class<T: FeatureClass + Default>(&self) -> String {
        let feature = self.registry.define_class::<T>();
        self.evict(&feature);
        feature
    }

    /// Make a feature type usable by its class key without defining it.
    pub fn discover<T: FeatureClass + Default>(&self) {
        self.registry.discover::<T>();
    }

    /// Defined feature names, in definition order.
    pub fn defined(&self) -> Vec<String> {
        self.registry.defined_names()
    }

    /// Purge features from the default store, or every feature if `None`.
    pub async fn purge<N: IntoFeatureNames>(&self, features: Option<N>) -> FeatureResult<()> {
        self.driver().await?.purge(features).await
    }

    /// Whether a feature is active for the default scope of the default store.
    pub async fn active(&self, feature: &str) -> FeatureResult<bool> {
        self.driver().await?.active(feature).await
    }

    /// Whether a feature is inactive for the default scope of the default store.
    pub async fn inactive(&self, feature: &str) -> FeatureResult<bool> {
        self.driver().await?.inactive(feature).await
    }

    /// A feature's value for the default scope of the default store.
    pub async fn value(&self, feature: &str) -> FeatureResult<Value> {
        self.driver().await?.value(feature).await
    }
}

impl std::fmt::Debug for FeatureManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureManager")
            .field("default", &self.default_store_name())
            .field("stores", &self.stores.lock().keys().cloned().collect::<Vec<_>>())
            .field("registry", &self.registry)
            .finish()
    }
}
