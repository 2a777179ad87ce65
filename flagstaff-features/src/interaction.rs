//! Scoped feature checks.
//!
//! A [`ScopedInteraction`] accumulates scopes and applies each operation to
//! every (feature, scope) pair of the requested features and the accumulated
//! scopes. Reads load everything they need in one batch before evaluating.
//!
//! # Examples
//!
//! ```
//! use flagstaff_features::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), FeatureError> {
//! let manager = FeatureManager::new(FeaturesConfig::default())?;
//! manager.define("new-api", |scope: &Scope| scope.as_str() == Some("taylor"));
//!
//! let store = manager.driver().await?;
//! assert!(store.for_scope("taylor").active("new-api").await?);
//! assert!(!store.for_scopes(["taylor", "tim"]).all_are_active(["new-api"]).await?);
//! # Ok(())
//! # }
//! ```

use crate::decorator::{FeatureStore, LoadRequest};
use crate::drivers::{ResolvedValues, is_active};
use crate::error::{FeatureError, FeatureResult};
use crate::scope::Scope;
use serde_json::Value;
use std::collections::HashMap;

/// One or more feature names.
pub trait IntoFeatureNames {
    fn into_feature_names(self) -> Vec<String>;
}

impl IntoFeatureNames for &str {
    fn into_feature_names(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoFeatureNames for String {
    fn into_feature_names(self) -> Vec<String> {
        vec![self]
    }
}

impl IntoFeatureNames for &String {
    fn into_feature_names(self) -> Vec<String> {
        vec![self.clone()]
    }
}

impl<S: AsRef<str>> IntoFeatureNames for Vec<S> {
    fn into_feature_names(self) -> Vec<String> {
        self.iter().map(|name| name.as_ref().to_string()).collect()
    }
}

impl<S: AsRef<str>> IntoFeatureNames for &[S] {
    fn into_feature_names(self) -> Vec<String> {
        self.iter().map(|name| name.as_ref().to_string()).collect()
    }
}

impl<S: AsRef<str>, const N: usize> IntoFeatureNames for [S; N] {
    fn into_feature_names(self) -> Vec<String> {
        self.iter().map(|name| name.as_ref().to_string()).collect()
    }
}

/// Feature operations over a set of scopes.
#[derive(Debug, Clone)]
pub struct ScopedInteraction<'a> {
    store: &'a FeatureStore,
    scopes: Vec<Scope>,
}

impl<'a> ScopedInteraction<'a> {
    pub(crate) fn new(store: &'a FeatureStore) -> Self {
        Self {
            store,
            scopes: Vec::new(),
        }
    }

    /// Add a scope.
    pub fn for_scope(mut self, scope: impl Into<Scope>) -> Self {
        self.scopes.push(scope.into());
        self
    }

    /// Add several scopes. Duplicates are kept.
    pub fn for_scopes<S: Into<Scope>>(mut self, scopes: impl IntoIterator<Item = S>) -> Self {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    /// Accumulated scopes, or the store's default scope if none were added.
    pub fn scopes(&self) -> Vec<Scope> {
        if self.scopes.is_empty() {
            vec![self.store.default_scope()]
        } else {
            self.scopes.clone()
        }
    }

    fn requests(features: &[String], scopes: &[Scope]) -> Vec<LoadRequest> {
        features
            .iter()
            .map(|feature| LoadRequest::Scoped(feature.clone(), scopes.to_vec()))
            .collect()
    }

    /// Eagerly load features for every scope.
    pub async fn load<N: IntoFeatureNames>(&self, features: N) -> FeatureResult<ResolvedValues> {
        let features = features.into_feature_names();
        self.store.load(Self::requests(&features, &self.scopes())).await
    }

    /// Eagerly load the features that are not cached yet.
    pub async fn load_missing<N: IntoFeatureNames>(
        &self,
        features: N,
    ) -> FeatureResult<ResolvedValues> {
        let features = features.into_feature_names();
        self.store
            .load_missing(Self::requests(&features, &self.scopes()))
            .await
    }

    /// Every (feature, scope) value, loading missing values in one batch.
    ///
    /// Rows follow `features`, columns follow `scopes`.
    async fn matrix(
        &self,
        features: &[String],
        scopes: &[Scope],
    ) -> FeatureResult<Vec<Vec<Value>>> {
        self.store.matrix(features, scopes).await
    }

    fn ensure_single_scope(&self) -> FeatureResult<()> {
        if self.scopes.len() > 1 {
            return Err(FeatureError::AmbiguousScope {
                scopes: self.scopes.len(),
            });
        }
        Ok(())
    }

    /// A feature's value.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::AmbiguousScope`] if more than one scope was
    /// added.
    pub async fn value(&self, feature: &str) -> FeatureResult<Value> {
        let mut values = self.values(feature).await?;
        Ok(values.remove(feature).unwrap_or(Value::Bool(false)))
    }

    /// Several features' values, keyed by the names given.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::AmbiguousScope`] if more than one scope was
    /// added.
    pub async fn values<N: IntoFeatureNames>(
        &self,
        features: N,
    ) -> FeatureResult<HashMap<String, Value>> {
        self.ensure_single_scope()?;

        let features = features.into_feature_names();
        let matrix = self.matrix(&features, &self.scopes()).await?;

        Ok(features
            .into_iter()
            .zip(matrix)
            .map(|(feature, mut row)| (feature, row.pop().unwrap_or(Value::Bool(false))))
            .collect())
    }

    /// Every defined feature's value.
    pub async fn all(&self) -> FeatureResult<HashMap<String, Value>> {
        self.values(self.store.defined()).await
    }

    /// Whether the feature is active for every scope.
    pub async fn active(&self, feature: &str) -> FeatureResult<bool> {
        self.all_are_active(feature).await
    }

    /// Whether every feature is active for every scope.
    pub async fn all_are_active<N: IntoFeatureNames>(&self, features: N) -> FeatureResult<bool> {
        let matrix = self
            .matrix(&features.into_feature_names(), &self.scopes())
            .await?;
        Ok(matrix.iter().flatten().all(is_active))
    }

    /// Whether, for every scope, at least one feature is active.
    pub async fn some_are_active<N: IntoFeatureNames>(&self, features: N) -> FeatureResult<bool> {
        let scopes = self.scopes();
        let matrix = self.matrix(&features.into_feature_names(), &scopes).await?;
        Ok(every_scope_has(&matrix, scopes.len(), is_active))
    }

    /// Whether the feature is inactive for every scope.
    pub async fn inactive(&self, feature: &str) -> FeatureResult<bool> {
        self.all_are_inactive(feature).await
    }

    /// Whether every feature is inactive for every scope.
    pub async fn all_are_inactive<N: IntoFeatureNames>(&self, features: N) -> FeatureResult<bool> {
        let matrix = self
            .matrix(&features.into_feature_names(), &self.scopes())
            .await?;
        Ok(matrix.iter().flatten().all(|value| !is_active(value)))
    }

    /// Whether, for every scope, at least one feature is inactive.
    pub async fn some_are_inactive<N: IntoFeatureNames>(
        &self,
        features: N,
    ) -> FeatureResult<bool> {
        let scopes = self.scopes();
        let matrix = self.matrix(&features.into_feature_names(), &scopes).await?;
        Ok(every_scope_has(&matrix, scopes.len(), |value| {
            !is_active(value)
        }))
    }

    /// Run `on_active` with the feature's value if it is active, otherwise
    /// run `on_inactive`.
    pub async fn when<R>(
        &self,
        feature: &str,
        on_active: impl FnOnce(Value) -> R,
        on_inactive: impl FnOnce() -> R,
    ) -> FeatureResult<R> {
        let value = self.value(feature).await?;
        if is_active(&value) {
            Ok(on_active(value))
        } else {
            Ok(on_inactive())
        }
    }

    /// Run `on_inactive` if the feature is inactive, otherwise run
    /// `on_active` with its value.
    pub async fn unless<R>(
        &self,
        feature: &str,
        on_inactive: impl FnOnce() -> R,
        on_active: impl FnOnce(Value) -> R,
    ) -> FeatureResult<R> {
        self.when(feature, on_active, on_inactive).await
    }

    /// Activate features for every scope.
    pub async fn activate<N: IntoFeatureNames>(&self, features: N) -> FeatureResult<()> {
        self.activate_with(features, true).await
    }

    /// Set features to `value` for every scope.
    pub async fn activate_with<N: IntoFeatureNames>(
        &self,
        features: N,
        value: impl Into<Value>,
    ) -> FeatureResult<()> {
        let value = value.into();
        let scopes = self.scopes();

        for feature in features.into_feature_names() {
            for scope in &scopes {
                self.store.set_scoped(&feature, scope, value.clone()).await?;
            }
        }

        Ok(())
    }

    /// Deactivate features for every scope.
    pub async fn deactivate<N: IntoFeatureNames>(&self, features: N) -> FeatureResult<()> {
        self.activate_with(features, false).await
    }

    /// Forget features' stored values for every scope.
    pub async fn forget<N: IntoFeatureNames>(&self, features: N) -> FeatureResult<()> {
        let scopes = self.scopes();

        for feature in features.into_feature_names() {
            for scope in &scopes {
                self.store.delete_scoped(&feature, scope).await?;
            }
        }

        Ok(())
    }
}

/// For each scope column, whether any feature row satisfies `predicate`.
fn every_scope_has(matrix: &[Vec<Value>], scopes: usize, predicate: impl Fn(&Value) -> bool) -> bool {
    (0..scopes).all(|column| {
        matrix
            .iter()
            .any(|row| row.get(column).is_some_and(&predicate))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{ArrayDriver, DriverContext};
    use crate::events::EventDispatcher;
    use crate::registry::FeatureRegistry;
    use serde_json::json;
    use std::sync::Arc;

    fn store() -> FeatureStore {
        let context = DriverContext::new(
            "array",
            Arc::new(FeatureRegistry::new()),
            EventDispatcher::default(),
        );
        FeatureStore::new("array", Arc::new(ArrayDriver::new(context)))
    }

    #[test]
    fn test_feature_names() {
        assert_eq!("foo".into_feature_names(), vec!["foo"]);
        assert_eq!(["foo", "bar"].into_feature_names(), vec!["foo", "bar"]);
        assert_eq!(
            vec!["a".to_string()].as_slice().into_feature_names(),
            vec!["a"]
        );
    }

    #[test]
    fn test_every_scope_has() {
        let matrix = vec![
            vec![json!(true), json!(false)],
            vec![json!(false), json!(false)],
        ];
        assert!(!every_scope_has(&matrix, 2, is_active));
        assert!(every_scope_has(&matrix, 2, |value| !is_active(value)));
        assert!(!every_scope_has(&[], 1, is_active));
    }

    #[tokio::test]
    async fn test_scopes_default_and_accumulate() {
        let store = store();

        assert!(store.interaction().scopes()[0].is_null());

        let interaction = store.for_scope("a").for_scopes(["b", "a"]);
        assert_eq!(interaction.scopes().len(), 3);
    }

    #[tokio::test]
    async fn test_value_requires_single_scope() {
        let store = store();
        store.define_value("foo", true);

        let result = store.for_scopes(["a", "b"]).value("foo").await;
        assert!(matches!(
            result,
            Err(FeatureError::AmbiguousScope { scopes: 2 })
        ));

        // Nothing was loaded
        assert_eq!(store.cached_count(), 0);
    }

    #[tokio::test]
    async fn test_values_keep_concrete_values() {
        let store = store();
        store.define_value("zero", 0);
        store.define_value("empty", "");
        store.define_value("off", false);

        let values = store.values(["zero", "empty", "off"]).await.unwrap();
        assert_eq!(values["zero"], json!(0));
        assert_eq!(values["empty"], json!(""));
        assert_eq!(values["off"], json!(false));

        assert!(store.active("zero").await.unwrap());
        assert!(store.active("empty").await.unwrap());
        assert!(store.inactive("off").await.unwrap());
    }

    #[tokio::test]
    async fn test_when_and_unless() {
        let store = store();
        store.define_value("color", "blue");
        store.define_value("off", false);

        let interaction = store.interaction();
        let picked = interaction
            .when("color", |value| format!("active {value}"), || "inactive".to_string())
            .await
            .unwrap();
        assert_eq!(picked, "active \"blue\"");

        let picked = interaction
            .unless("off", || "inactive", |_| "active")
            .await
            .unwrap();
        assert_eq!(picked, "inactive");
    }

    #[tokio::test]
    async fn test_some_are_inactive_per_scope() {
        let store = store();
        store.define("a", |scope: &Scope| scope.as_str() == Some("x"));
        store.define("b", |_: &Scope| true);

        // x: a on, b on. y: a off, b on.
        let interaction = store.for_scopes(["x", "y"]);
        assert!(!interaction.some_are_inactive(["a", "b"]).await.unwrap());
        assert!(interaction.some_are_active(["a", "b"]).await.unwrap());
        assert!(!interaction.all_are_inactive(["a"]).await.unwrap());
    }
}
