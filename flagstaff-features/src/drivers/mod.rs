//! Feature storage drivers
//!
//! This module provides the storage backends for resolved feature values:
//!
//! - **Array**: process-local storage, lost when the process exits (default)
//! - **Redis**: persistent key-value storage (`redis` feature)
//! - **Database**: relational storage through sqlx (`database` feature)
//!
//! Every driver stores values keyed by (feature name, serialized scope) and
//! falls back to the feature's resolver when nothing is stored yet.

mod array;
#[cfg(feature = "database")]
mod database;
#[cfg(feature = "redis")]
mod redis;

pub use array::ArrayDriver;
#[cfg(feature = "database")]
pub use database::DatabaseDriver;
#[cfg(feature = "redis")]
pub use redis::RedisDriver;

use crate::error::{FeatureError, FeatureResult};
use crate::events::{EventDispatcher, FeatureEvent};
use crate::registry::{FeatureRegistry, ResolverFn};
use crate::scope::Scope;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Features paired with the scopes to resolve them for, in request order.
pub type FeatureScopes = Vec<(String, Vec<Scope>)>;

/// Resolved values per feature, positionally aligned with the requested scopes.
pub type ResolvedValues = HashMap<String, Vec<Value>>;

/// Trait for feature storage backends
#[async_trait]
pub trait Driver: Send + Sync {
    /// Shared resolution state of the driver.
    fn context(&self) -> &DriverContext;

    /// Driver type name for debugging
    fn driver_name(&self) -> &'static str;

    /// Define a feature resolver.
    fn define(&self, feature: &str, resolver: ResolverFn) {
        self.context().registry().define_resolver(feature, resolver);
    }

    /// Defined feature names.
    fn defined(&self) -> Vec<String> {
        self.context().registry().defined_names()
    }

    /// Get many feature values at once.
    ///
    /// Stored values are read in one batch and missing values are resolved
    /// and written in one batch.
    async fn get_all(&self, features: &FeatureScopes) -> FeatureResult<ResolvedValues>;

    /// Get a feature's value for a scope, resolving and storing it if needed.
    async fn get(&self, feature: &str, scope: &Scope) -> FeatureResult<Value>;

    /// Store a feature's value for a scope.
    async fn set(&self, feature: &str, scope: &Scope, value: Value) -> FeatureResult<()>;

    /// Overwrite the value of every stored scope of a feature.
    async fn set_for_all_scopes(&self, feature: &str, value: Value) -> FeatureResult<()>;

    /// Remove a feature's stored value for a scope.
    async fn delete(&self, feature: &str, scope: &Scope) -> FeatureResult<()>;

    /// Remove stored values for the given features, or for all features.
    async fn purge(&self, features: Option<&[String]>) -> FeatureResult<()>;

    /// Names of features with at least one stored value.
    async fn stored(&self) -> FeatureResult<Vec<String>> {
        Err(FeatureError::Unsupported("stored".to_string()))
    }
}

/// State every driver needs to resolve values: its store name, the feature
/// definitions and the event channel.
#[derive(Debug, Clone)]
pub struct DriverContext {
    store: String,
    registry: Arc<FeatureRegistry>,
    events: EventDispatcher,
}

impl DriverContext {
    pub fn new(
        store: impl Into<String>,
        registry: Arc<FeatureRegistry>,
        events: EventDispatcher,
    ) -> Self {
        Self {
            store: store.into(),
            registry,
            events,
        }
    }

    /// Name of the store the driver backs.
    pub fn store(&self) -> &str {
        &self.store
    }

    pub fn registry(&self) -> &Arc<FeatureRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Storage key of a scope for this store.
    pub fn key(&self, scope: &Scope) -> String {
        scope.serialize(&self.store)
    }

    /// Run the resolver for a feature.
    ///
    /// Unknown features dispatch [`FeatureEvent::UnknownFeatureResolved`] and
    /// return `None`; callers return `false` without storing anything.
    pub fn resolve(&self, feature: &str, scope: &Scope) -> Option<Value> {
        match self.registry.resolve(feature, scope) {
            Some(value) => Some(value),
            None => {
                let scope = self.key(scope);
                warn!(feature = %feature, scope = %scope, "Resolving unknown feature");
                self.events.dispatch(FeatureEvent::UnknownFeatureResolved {
                    feature: feature.to_string(),
                    scope,
                });
                None
            }
        }
    }

    /// Record that a resolved value was stored.
    pub fn resolved(&self, feature: &str, scope_key: &str, value: &Value) {
        self.events.dispatch(FeatureEvent::FeatureResolved {
            feature: feature.to_string(),
            scope: scope_key.to_string(),
            value: value.clone(),
        });
    }
}

/// Whether a value counts as active. Only `false` is inactive.
pub fn is_active(value: &Value) -> bool {
    !matches!(value, Value::Bool(false))
}
