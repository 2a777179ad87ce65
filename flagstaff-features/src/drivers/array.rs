//! In-memory feature driver
//!
//! Stores resolved values in the process. Suitable for tests and
//! single-process deployments where feature state does not need to survive a
//! restart.

use crate::drivers::{Driver, DriverContext, FeatureScopes, ResolvedValues};
use crate::error::FeatureResult;
use crate::scope::Scope;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, trace};

/// In-memory feature driver
pub struct ArrayDriver {
    context: DriverContext,
    /// Feature name -> scope key -> value
    resolved: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl ArrayDriver {
    pub fn new(context: DriverContext) -> Self {
        debug!(store = %context.store(), "Creating in-memory feature driver");
        Self {
            context,
            resolved: RwLock::new(HashMap::new()),
        }
    }

    fn lookup(&self, feature: &str, key: &str) -> Option<Value> {
        self.resolved
            .read()
            .get(feature)
            .and_then(|scopes| scopes.get(key))
            .cloned()
    }

    /// Resolve a missing value and store it, unless another caller got there
    /// first. The lock is not held while the resolver runs.
    fn resolve_and_store(&self, feature: &str, scope: &Scope, key: String) -> Value {
        let Some(value) = self.context.resolve(feature, scope) else {
            return Value::Bool(false);
        };

        let mut resolved = self.resolved.write();
        let stored = resolved
            .entry(feature.to_string())
            .or_default()
            .entry(key.clone())
            .or_insert_with(|| {
                self.context.resolved(feature, &key, &value);
                value
            });

        stored.clone()
    }
}

#[async_trait]
impl Driver for ArrayDriver {
    fn context(&self) -> &DriverContext {
        &self.context
    }

    fn driver_name(&self) -> &'static str {
        "array"
    }

    async fn get_all(&self, features: &FeatureScopes) -> FeatureResult<ResolvedValues> {
        let mut results = ResolvedValues::with_capacity(features.len());

        for (feature, scopes) in features {
            let mut values = Vec::with_capacity(scopes.len());
            for scope in scopes {
                values.push(self.get(feature, scope).await?);
            }
            results.entry(feature.clone()).or_default().extend(values);
        }

        Ok(results)
    }

    async fn get(&self, feature: &str, scope: &Scope) -> FeatureResult<Value> {
        let key = self.context.key(scope);
        trace!(feature = %feature, scope = %key, "Array get");

        if let Some(value) = self.lookup(feature, &key) {
            return Ok(value);
        }

        Ok(self.resolve_and_store(feature, scope, key))
    }

    async fn set(&self, feature: &str, scope: &Scope, value: Value) -> FeatureResult<()> {
        let key = self.context.key(scope);
        trace!(feature = %feature, scope = %key, "Array set");

        self.resolved
            .write()
            .entry(feature.to_string())
            .or_default()
            .insert(key, value);

        Ok(())
    }

    async fn set_for_all_scopes(&self, feature: &str, value: Value) -> FeatureResult<()> {
        trace!(feature = %feature, "Array set for all scopes");

        if let Some(scopes) = self.resolved.write().get_mut(feature) {
            for stored in scopes.values_mut() {
                *stored = value.clone();
            }
        }

        Ok(())
    }

    async fn delete(&self, feature: &str, scope: &Scope) -> FeatureResult<()> {
        let key = self.context.key(scope);
        trace!(feature = %feature, scope = %key, "Array delete");

        let mut resolved = self.resolved.write();
        if let Some(scopes) = resolved.get_mut(feature) {
            scopes.remove(&key);
            if scopes.is_empty() {
                resolved.remove(feature);
            }
        }

        Ok(())
    }

    async fn purge(&self, features: Option<&[String]>) -> FeatureResult<()> {
        let mut resolved = self.resolved.write();

        match features {
            Some(features) => {
                info!(features = ?features, "Purging features from array store");
                for feature in features {
                    resolved.remove(feature);
                }
            }
            None => {
                info!("Purging all features from array store");
                resolved.clear();
            }
        }

        Ok(())
    }

    async fn stored(&self) -> FeatureResult<Vec<String>> {
        let mut names: Vec<String> = self.resolved.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventDispatcher;
    use crate::registry::FeatureRegistry;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn driver() -> (ArrayDriver, Arc<FeatureRegistry>) {
        let registry = Arc::new(FeatureRegistry::new());
        let context = DriverContext::new("array", registry.clone(), EventDispatcher::default());
        (ArrayDriver::new(context), registry)
    }

    #[tokio::test]
    async fn test_resolves_once() {
        let (driver, registry) = driver();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registry.define("foo", move |_: &Scope| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        assert_eq!(driver.get("foo", &Scope::Null).await.unwrap(), Value::Bool(true));
        assert_eq!(driver.get("foo", &Scope::Null).await.unwrap(), Value::Bool(true));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_feature_is_not_stored() {
        let (driver, registry) = driver();

        assert_eq!(driver.get("foo", &Scope::Null).await.unwrap(), Value::Bool(false));
        assert!(driver.stored().await.unwrap().is_empty());

        registry.define_value("foo", "later");
        assert_eq!(driver.get("foo", &Scope::Null).await.unwrap(), Value::from("later"));
    }

    #[tokio::test]
    async fn test_set_for_all_scopes_keeps_scope_set() {
        let (driver, _) = driver();
        driver.set("foo", &Scope::from("a"), Value::Bool(true)).await.unwrap();
        driver.set("foo", &Scope::from("b"), Value::Bool(true)).await.unwrap();

        driver.set_for_all_scopes("foo", Value::from(7)).await.unwrap();

        assert_eq!(driver.get("foo", &Scope::from("a")).await.unwrap(), Value::from(7));
        assert_eq!(driver.get("foo", &Scope::from("b")).await.unwrap(), Value::from(7));
        // Not previously stored, so resolves as unknown
        assert_eq!(driver.get("foo", &Scope::from("c")).await.unwrap(), Value::Bool(false));
    }

    #[tokio::test]
    async fn test_delete_and_purge() {
        let (driver, registry) = driver();
        registry.define_value("foo", true);
        driver.set("foo", &Scope::Null, Value::Bool(false)).await.unwrap();
        driver.set("bar", &Scope::Null, Value::Bool(true)).await.unwrap();

        driver.delete("foo", &Scope::Null).await.unwrap();
        assert_eq!(driver.stored().await.unwrap(), vec!["bar"]);
        assert_eq!(driver.get("foo", &Scope::Null).await.unwrap(), Value::Bool(true));

        driver.purge(Some(&["foo".to_string()])).await.unwrap();
        assert_eq!(driver.stored().await.unwrap(), vec!["bar"]);

        driver.purge(None).await.unwrap();
        assert!(driver.stored().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_all_is_positional() {
        let (driver, registry) = driver();
        registry.define("echo", |scope: &Scope| scope.as_str().unwrap_or("none").to_string());

        let values = driver
            .get_all(&vec![(
                "echo".to_string(),
                vec![Scope::from("a"), Scope::Null, Scope::from("b")],
            )])
            .await
            .unwrap();

        assert_eq!(
            values["echo"],
            vec![Value::from("a"), Value::from("none"), Value::from("b")]
        );
    }
}
