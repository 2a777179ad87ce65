//! Caching feature store.
//!
//! [`FeatureStore`] wraps a [`Driver`] with an in-process cache keyed by
//! (feature, scope key). Reads go through the cache, writes go through to the
//! driver and then update the cache, so a process never reads its own stale
//! writes. A read that overlaps a write never caches the value it read
//! before the write. The cache lives as long as the store and must be flushed between
//! independent units of work with [`FeatureStore::flush_cache`].

use crate::drivers::{Driver, FeatureScopes, ResolvedValues};
use crate::error::FeatureResult;
use crate::events::{EventDispatcher, FeatureEvent};
use crate::interaction::{IntoFeatureNames, ScopedInteraction};
use crate::registry::{FeatureClass, FeatureRegistry, Resolved};
use crate::scope::Scope;
use parking_lot::{RwLock, RwLockWriteGuard};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Computes the default scope for a store, given the store name.
pub type DefaultScopeResolver = Arc<dyn Fn(&str) -> Scope + Send + Sync>;

/// Default scope resolver slot shared between a manager and its stores.
pub(crate) type SharedScopeResolver = Arc<RwLock<Option<DefaultScopeResolver>>>;

type CacheKey = (String, String);

/// A request to eagerly load a feature.
#[derive(Debug, Clone)]
pub enum LoadRequest {
    /// Load the feature for the default scope
    Feature(String),
    /// Load the feature for each of the given scopes
    Scoped(String, Vec<Scope>),
}

impl LoadRequest {
    pub fn feature(&self) -> &str {
        match self {
            LoadRequest::Feature(feature) | LoadRequest::Scoped(feature, _) => feature,
        }
    }
}

impl From<&str> for LoadRequest {
    fn from(feature: &str) -> Self {
        LoadRequest::Feature(feature.to_string())
    }
}

impl From<String> for LoadRequest {
    fn from(feature: String) -> Self {
        LoadRequest::Feature(feature)
    }
}

impl From<&String> for LoadRequest {
    fn from(feature: &String) -> Self {
        LoadRequest::Feature(feature.clone())
    }
}

impl<F, S> From<(F, Vec<S>)> for LoadRequest
where
    F: Into<String>,
    S: Into<Scope>,
{
    fn from((feature, scopes): (F, Vec<S>)) -> Self {
        LoadRequest::Scoped(feature.into(), scopes.into_iter().map(Into::into).collect())
    }
}

/// A driver with a resolution cache in front of it.
pub struct FeatureStore {
    name: String,
    driver: Arc<dyn Driver>,
    registry: Arc<FeatureRegistry>,
    events: EventDispatcher,
    default_scope: SharedScopeResolver,
    cache: RwLock<HashMap<CacheKey, Value>>,
    /// Bumped by every cache mutation other than read fills
    generation: AtomicU64,
}

impl FeatureStore {
    /// Wrap a driver.
    ///
    /// The store shares the driver's registry and event channel.
    pub fn new(name: impl Into<String>, driver: Arc<dyn Driver>) -> Self {
        let context = driver.context();
        let registry = context.registry().clone();
        let events = context.events().clone();

        Self::with_scope_resolver(name, driver, registry, events, SharedScopeResolver::default())
    }

    pub(crate) fn with_scope_resolver(
        name: impl Into<String>,
        driver: Arc<dyn Driver>,
        registry: Arc<FeatureRegistry>,
        events: EventDispatcher,
        default_scope: SharedScopeResolver,
    ) -> Self {
        let name = name.into();
        debug!(store = %name, driver = driver.driver_name(), "Creating feature store");

        Self {
            name,
            driver,
            registry,
            events,
            default_scope,
            cache: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The wrapped driver.
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn registry(&self) -> &Arc<FeatureRegistry> {
        &self.registry
    }

    /// Define a feature.
    ///
    /// Cached values of a redefined feature are dropped.
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

    /// Defined feature names, in definition order.
    pub fn defined(&self) -> Vec<String> {
        self.driver.defined()
    }

    /// Names of features with stored values.
    pub async fn stored(&self) -> FeatureResult<Vec<String>> {
        self.driver.stored().await
    }

    /// The default scope for this store.
    pub fn default_scope(&self) -> Scope {
        let resolver = self.default_scope.read().clone();
        match resolver {
            Some(resolver) => resolver(&self.name),
            None => Scope::Null,
        }
    }

    /// Start an interaction for the default scope.
    pub fn interaction(&self) -> ScopedInteraction<'_> {
        ScopedInteraction::new(self)
    }

    /// Start an interaction for a scope.
    pub fn for_scope(&self, scope: impl Into<Scope>) -> ScopedInteraction<'_> {
        ScopedInteraction::new(self).for_scope(scope)
    }

    /// Start an interaction for several scopes.
    pub fn for_scopes<S: Into<Scope>>(
        &self,
        scopes: impl IntoIterator<Item = S>,
    ) -> ScopedInteraction<'_> {
        ScopedInteraction::new(self).for_scopes(scopes)
    }

    /// Feature name to use for a requested name.
    ///
    /// A discoverable feature type referenced by its class key is defined on
    /// first use.
    pub(crate) fn resolve_feature(&self, feature: &str) -> String {
        if self.registry.is_defined(feature) {
            return feature.to_string();
        }

        match self.registry.register_discovered(feature) {
            Some(discovered) => {
                if discovered.registered {
                    debug!(class = %feature, feature = %discovered.name, "Dynamically registering feature");
                    self.events
                        .dispatch(FeatureEvent::DynamicallyRegisteringFeature {
                            class: feature.to_string(),
                        });
                }
                discovered.name
            }
            None => feature.to_string(),
        }
    }

    fn cache_key(&self, feature: &str, scope: &Scope) -> CacheKey {
        (feature.to_string(), scope.serialize(&self.name))
    }

    fn cached(&self, key: &CacheKey) -> Option<Value> {
        self.cache.read().get(key).cloned()
    }

    pub(crate) fn evict(&self, feature: &str) {
        self.cache_mut().retain(|(name, _), _| name != feature);
    }

    /// Write access for mutations, invalidating reads already in flight.
    fn cache_mut(&self) -> RwLockWriteGuard<'_, HashMap<CacheKey, Value>> {
        let cache = self.cache.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        cache
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Cache a value read from the driver and return the value to report.
    ///
    /// If the cache was mutated since `generation`, the read may predate a
    /// write: the cached value wins and the read is not cached.
    fn fill(
        cache: &mut HashMap<CacheKey, Value>,
        current: u64,
        generation: u64,
        key: CacheKey,
        value: Value,
    ) -> Value {
        if current == generation {
            cache.entry(key).or_insert(value).clone()
        } else {
            cache.get(&key).cloned().unwrap_or(value)
        }
    }

    fn retrieved(&self, key: &CacheKey, value: &Value) {
        self.events.dispatch(FeatureEvent::FeatureRetrieved {
            feature: key.0.clone(),
            scope: key.1.clone(),
            value: value.clone(),
        });
    }

    /// Get a feature's value for a scope.
    pub async fn get(&self, feature: &str, scope: impl Into<Scope>) -> FeatureResult<Value> {
        self.get_scoped(feature, &scope.into()).await
    }

    pub(crate) async fn get_scoped(&self, feature: &str, scope: &Scope) -> FeatureResult<Value> {
        let feature = self.resolve_feature(feature);
        let scope = scope.resolve(&self.name);
        let key = self.cache_key(&feature, &scope);

        if let Some(value) = self.cached(&key) {
            trace!(feature = %feature, scope = %key.1, "Feature cache hit");
            self.retrieved(&key, &value);
            return Ok(value);
        }

        let generation = self.generation();
        let mut value = self.driver.get(&feature, &scope).await?;
        // Unknown features stay uncached so a later definition resolves fresh
        if self.registry.is_defined(&feature) {
            let mut cache = self.cache.write();
            let current = self.generation();
            value = Self::fill(&mut cache, current, generation, key.clone(), value);
        }
        self.retrieved(&key, &value);

        Ok(value)
    }

    /// Store a feature's value for a scope.
    pub async fn set(
        &self,
        feature: &str,
        scope: impl Into<Scope>,
        value: impl Into<Value>,
    ) -> FeatureResult<()> {
        self.set_scoped(feature, &scope.into(), value.into()).await
    }

    pub(crate) async fn set_scoped(
        &self,
        feature: &str,
        scope: &Scope,
        value: Value,
    ) -> FeatureResult<()> {
        let feature = self.resolve_feature(feature);
        let scope = scope.resolve(&self.name);
        let key = self.cache_key(&feature, &scope);

        self.driver.set(&feature, &scope, value.clone()).await?;
        self.cache_mut().insert(key.clone(), value.clone());

        self.events.dispatch(FeatureEvent::FeatureUpdated {
            feature,
            scope: key.1,
            value,
        });

        Ok(())
    }

    /// Overwrite a feature's value for every stored scope.
    ///
    /// Cached values for the feature are dropped, since they may belong to
    /// scopes that were never stored.
    pub async fn set_for_all_scopes(
        &self,
        feature: &str,
        value: impl Into<Value>,
    ) -> FeatureResult<()> {
        let feature = self.resolve_feature(feature);
        let value = value.into();

        self.driver.set_for_all_scopes(&feature, value.clone()).await?;
        self.evict(&feature);

        self.events
            .dispatch(FeatureEvent::FeatureUpdatedForAllScopes { feature, value });

        Ok(())
    }

    /// Remove a feature's stored value for a scope.
    pub async fn delete(&self, feature: &str, scope: impl Into<Scope>) -> FeatureResult<()> {
        self.delete_scoped(feature, &scope.into()).await
    }

    pub(crate) async fn delete_scoped(&self, feature: &str, scope: &Scope) -> FeatureResult<()> {
        let feature = self.resolve_feature(feature);
        let scope = scope.resolve(&self.name);
        let key = self.cache_key(&feature, &scope);

        self.driver.delete(&feature, &scope).await?;
        self.cache_mut().remove(&key);

        self.events.dispatch(FeatureEvent::FeatureDeleted {
            feature,
            scope: key.1,
        });

        Ok(())
    }

    /// Remove stored values for the given features, or for every feature.
    pub async fn purge<N: IntoFeatureNames>(&self, features: Option<N>) -> FeatureResult<()> {
        match features {
            None => {
                self.driver.purge(None).await?;
                self.cache_mut().clear();
                self.events.dispatch(FeatureEvent::AllFeaturesPurged);
            }
            Some(features) => {
                let features: Vec<String> = features
                    .into_feature_names()
                    .iter()
                    .map(|feature| self.resolve_feature(feature))
                    .collect();

                self.driver.purge(Some(&features)).await?;
                self.cache_mut()
                    .retain(|(name, _), _| !features.contains(name));
                self.events.dispatch(FeatureEvent::FeaturesPurged { features });
            }
        }

        Ok(())
    }

    /// Purge every stored feature.
    pub async fn purge_all(&self) -> FeatureResult<()> {
        self.purge(None::<Vec<String>>).await
    }

    /// Forget every cached value.
    pub fn flush_cache(&self) {
        debug!(store = %self.name, "Flushing feature cache");
        self.cache_mut().clear();
    }

    /// Number of cached (feature, scope) values.
    pub fn cached_count(&self) -> usize {
        self.cache.read().len()
    }

    /// Resolve features into driver requests.
    ///
    /// A bare feature uses the default scope. A feature requested more than
    /// once accumulates the scopes of every request.
    fn normalize<I, R>(&self, requests: I) -> FeatureScopes
    where
        I: IntoIterator<Item = R>,
        R: Into<LoadRequest>,
    {
        let mut normalized: FeatureScopes = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for request in requests {
            let (feature, scopes) = match request.into() {
                LoadRequest::Feature(feature) => (feature, vec![self.default_scope()]),
                LoadRequest::Scoped(feature, scopes) => (feature, scopes),
            };

            let feature = self.resolve_feature(&feature);
            let scopes = scopes.iter().map(|scope| scope.resolve(&self.name));

            match positions.get(&feature) {
                Some(&index) => normalized[index].1.extend(scopes),
                None => {
                    positions.insert(feature.clone(), normalized.len());
                    normalized.push((feature, scopes.collect()));
                }
            }
        }

        normalized
    }

    /// Eagerly load feature values, caching every loaded value.
    pub async fn load<I, R>(&self, requests: I) -> FeatureResult<ResolvedValues>
    where
        I: IntoIterator<Item = R>,
        R: Into<LoadRequest>,
    {
        let requests = self.normalize(requests);
        self.load_normalized(&requests).await
    }

    /// Like [`load`](Self::load), but skips values that are already cached.
    ///
    /// Returns only the values that had to be loaded.
    pub async fn load_missing<I, R>(&self, requests: I) -> FeatureResult<ResolvedValues>
    where
        I: IntoIterator<Item = R>,
        R: Into<LoadRequest>,
    {
        let requests = self.normalize(requests);

        let missing: FeatureScopes = {
            let cache = self.cache.read();
            requests
                .into_iter()
                .filter_map(|(feature, scopes)| {
                    let scopes: Vec<Scope> = scopes
                        .into_iter()
                        .filter(|scope| {
                            !cache.contains_key(&(feature.clone(), scope.serialize(&self.name)))
                        })
                        .collect();
                    (!scopes.is_empty()).then_some((feature, scopes))
                })
                .collect()
        };

        if missing.is_empty() {
            trace!(store = %self.name, "All requested features already cached");
            return Ok(ResolvedValues::new());
        }

        self.load_normalized(&missing).await
    }

    /// Load every defined feature for the default scope.
    pub async fn load_all(&self) -> FeatureResult<ResolvedValues> {
        self.load(self.defined()).await
    }

    async fn load_normalized(&self, requests: &FeatureScopes) -> FeatureResult<ResolvedValues> {
        debug!(
            store = %self.name,
            features = requests.len(),
            scopes = requests.iter().map(|(_, scopes)| scopes.len()).sum::<usize>(),
            "Loading features"
        );

        let generation = self.generation();
        let mut results = self.driver.get_all(requests).await?;

        let mut cache = self.cache.write();
        let current = self.generation();
        for (feature, scopes) in requests {
            if !self.registry.is_defined(feature) {
                continue;
            }
            let Some(values) = results.get_mut(feature) else {
                continue;
            };
            for (scope, value) in scopes.iter().zip(values.iter_mut()) {
                let key = self.cache_key(feature, scope);
                *value = Self::fill(&mut cache, current, generation, key, value.clone());
            }
        }

        Ok(results)
    }

    /// Values of every feature for every scope, rows following `features`
    /// and columns following `scopes`.
    ///
    /// Cached values are used as is. Everything else is fetched with a single
    /// batched driver call.
    pub(crate) async fn matrix(
        &self,
        features: &[String],
        scopes: &[Scope],
    ) -> FeatureResult<Vec<Vec<Value>>> {
        let features: Vec<String> = features
            .iter()
            .map(|feature| self.resolve_feature(feature))
            .collect();
        let scopes: Vec<Scope> = scopes.iter().map(|scope| scope.resolve(&self.name)).collect();
        let keys: Vec<String> = scopes.iter().map(|scope| scope.serialize(&self.name)).collect();

        let mut found: HashMap<CacheKey, Value> = HashMap::new();
        let mut missing: FeatureScopes = Vec::new();
        {
            let cache = self.cache.read();
            let mut seen: HashSet<&String> = HashSet::new();
            for feature in &features {
                if !seen.insert(feature) {
                    continue;
                }
                let mut uncached = Vec::new();
                let mut requested: HashSet<&String> = HashSet::new();
                for (scope, key) in scopes.iter().zip(&keys) {
                    if !requested.insert(key) {
                        continue;
                    }
                    let cache_key = (feature.clone(), key.clone());
                    match cache.get(&cache_key) {
                        Some(value) => {
                            found.insert(cache_key, value.clone());
                        }
                        None => uncached.push(scope.clone()),
                    }
                }
                if !uncached.is_empty() {
                    missing.push((feature.clone(), uncached));
                }
            }
        }

        if !missing.is_empty() {
            let loaded = self.load_normalized(&missing).await?;
            for (feature, scopes) in &missing {
                let Some(values) = loaded.get(feature) else {
                    continue;
                };
                for (scope, value) in scopes.iter().zip(values) {
                    found.insert(self.cache_key(feature, scope), value.clone());
                }
            }
        }

        let mut rows = Vec::with_capacity(features.len());
        for feature in &features {
            let mut row = Vec::with_capacity(keys.len());
            for key in &keys {
                let cache_key = (feature.clone(), key.clone());
                let value = found.get(&cache_key).cloned().unwrap_or(Value::Bool(false));
                self.retrieved(&cache_key, &value);
                row.push(value);
            }
            rows.push(row);
        }

        Ok(rows)
    }

    /// Whether a feature is active for the default scope.
    pub async fn active(&self, feature: &str) -> FeatureResult<bool> {
        self.interaction().active(feature).await
    }

    /// Whether a feature is inactive for the default scope.
    pub async fn inactive(&self, feature: &str) -> FeatureResult<bool> {
        self.interaction().inactive(feature).await
    }

    /// A feature's value for the default scope.
    pub async fn value(&self, feature: &str) -> FeatureResult<Value> {
        self.interaction().value(feature).await
    }

    /// Several features' values for the default scope.
    pub async fn values<N: IntoFeatureNames>(
        &self,
        features: N,
    ) -> FeatureResult<HashMap<String, Value>> {
        self.interaction().values(features).await
    }

    /// Every defined feature's value for the default scope.
    pub async fn all(&self) -> FeatureResult<HashMap<String, Value>> {
        self.interaction().all().await
    }

    /// Activate features for the default scope.
    pub async fn activate<N: IntoFeatureNames>(&self, features: N) -> FeatureResult<()> {
        self.interaction().activate(features).await
    }

    /// Deactivate features for the default scope.
    pub async fn deactivate<N: IntoFeatureNames>(&self, features: N) -> FeatureResult<()> {
        self.interaction().deactivate(features).await
    }

    /// Forget the stored values of features for the default scope.
    pub async fn forget<N: IntoFeatureNames>(&self, features: N) -> FeatureResult<()> {
        self.interaction().forget(features).await
    }

    /// Activate features for every stored scope.
    pub async fn activate_for_everyone<N: IntoFeatureNames>(
        &self,
        features: N,
        value: impl Into<Value>,
    ) -> FeatureResult<()> {
        let value = value.into();
        for feature in features.into_feature_names() {
            self.set_for_all_scopes(&feature, value.clone()).await?;
        }
        Ok(())
    }

    /// Deactivate features for every stored scope.
    pub async fn deactivate_for_everyone<N: IntoFeatureNames>(
        &self,
        features: N,
    ) -> FeatureResult<()> {
        self.activate_for_everyone(features, false).await
    }
}

impl std::fmt::Debug for FeatureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureStore")
            .field("name", &self.name)
            .field("driver", &self.driver.driver_name())
            .field("cached", &self.cached_count())
            .finish()
    }
}
