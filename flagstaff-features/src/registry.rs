//! Feature definitions.
//!
//! The registry maps feature names to the resolvers that compute a feature's
//! initial value for a scope. Resolvers only run when a driver has nothing
//! stored for the (feature, scope) pair; their result is what gets stored.

use crate::lottery::Lottery;
use crate::scope::Scope;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Output of a resolver.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// Concrete value
    Value(Value),
    /// Lottery, drawn at resolution time
    Lottery(Lottery),
}

impl Resolved {
    /// Collapse into the value that gets stored.
    pub fn into_value(self) -> Value {
        match self {
            Resolved::Value(value) => value,
            Resolved::Lottery(lottery) => lottery.draw(),
        }
    }
}

impl From<Value> for Resolved {
    fn from(value: Value) -> Self {
        Resolved::Value(value)
    }
}

impl From<Lottery> for Resolved {
    fn from(lottery: Lottery) -> Self {
        Resolved::Lottery(lottery)
    }
}

impl From<bool> for Resolved {
    fn from(value: bool) -> Self {
        Resolved::Value(Value::Bool(value))
    }
}

impl From<&str> for Resolved {
    fn from(value: &str) -> Self {
        Resolved::Value(Value::from(value))
    }
}

impl From<String> for Resolved {
    fn from(value: String) -> Self {
        Resolved::Value(Value::String(value))
    }
}

impl From<i32> for Resolved {
    fn from(value: i32) -> Self {
        Resolved::Value(Value::from(value))
    }
}

impl From<i64> for Resolved {
    fn from(value: i64) -> Self {
        Resolved::Value(Value::from(value))
    }
}

impl From<f64> for Resolved {
    fn from(value: f64) -> Self {
        Resolved::Value(Value::from(value))
    }
}

/// Resolver function shared between stores.
pub type ResolverFn = Arc<dyn Fn(&Scope) -> Resolved + Send + Sync>;

/// A feature defined by its own type.
///
/// One instance is constructed per resolution. The feature name defaults to
/// the type path and can be overridden.
///
/// # Examples
///
/// ```
/// use flagstaff_features::{FeatureClass, Resolved, Scope};
///
/// #[derive(Default)]
/// struct NewCheckout;
///
/// impl FeatureClass for NewCheckout {
///     fn name(&self) -> String {
///         "new-checkout".to_string()
///     }
///
///     fn resolve(&self, scope: &Scope) -> Resolved {
///         (scope.as_str() == Some("beta")).into()
///     }
/// }
/// ```
pub trait FeatureClass: Send + Sync + 'static {
    /// Feature name.
    fn name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }

    /// Initial value for the scope.
    fn resolve(&self, scope: &Scope) -> Resolved;
}

/// Key under which a feature type can be referenced before it is defined.
pub fn class_key<T: FeatureClass>() -> &'static str {
    std::any::type_name::<T>()
}

#[derive(Clone)]
struct ClassEntry {
    name: Arc<dyn Fn() -> String + Send + Sync>,
    define: Arc<dyn Fn(&FeatureRegistry) -> String + Send + Sync>,
}

#[derive(Default)]
struct Definitions {
    order: Vec<String>,
    resolvers: HashMap<String, ResolverFn>,
}

/// Outcome of looking up a feature type by its class key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFeature {
    /// Feature name the type defines
    pub name: String,
    /// Whether this lookup defined the feature
    pub registered: bool,
}

/// Registry of feature resolvers.
#[derive(Default)]
pub struct FeatureRegistry {
    definitions: RwLock<Definitions>,
    classes: RwLock<HashMap<String, ClassEntry>>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a feature with a resolver.
    ///
    /// Defining an existing name replaces its resolver and keeps its position.
    pub fn define<F, R>(&self, name: impl Into<String>, resolver: F)
    where
        F: Fn(&Scope) -> R + Send + Sync + 'static,
        R: Into<Resolved>,
    {
        self.define_resolver(
            name,
            Arc::new(move |scope: &Scope| -> Resolved { resolver(scope).into() }),
        );
    }

    /// Define a feature that resolves to the same value for every scope.
    ///
    /// A constant [`Lottery`] is still drawn separately for each scope.
    pub fn define_value(&self, name: impl Into<String>, value: impl Into<Resolved>) {
        let value = value.into();
        self.define(name, move |_: &Scope| value.clone());
    }

    pub fn define_resolver(&self, name: impl Into<String>, resolver: ResolverFn) {
        let name = name.into();
        trace!(feature = %name, "Defining feature");

        let mut definitions = self.definitions.write();
        if definitions.resolvers.insert(name.clone(), resolver).is_none() {
            definitions.order.push(name);
        }
    }

    /// Define a feature type and return the name it was defined under.
    pub fn define_class<T: FeatureClass + Default>(&self) -> String {
        self.discover::<T>();

        let name = T::default().name();
        self.define(name.clone(), |scope: &Scope| T::default().resolve(scope));
        name
    }

    /// Make a feature type resolvable by its [`class_key`] without defining it.
    ///
    /// The feature is defined the first time the key is used.
    pub fn discover<T: FeatureClass + Default>(&self) {
        let entry = ClassEntry {
            name: Arc::new(|| T::default().name()),
            define: Arc::new(|registry: &FeatureRegistry| registry.define_class::<T>()),
        };

        self.classes.write().insert(class_key::<T>().to_string(), entry);
    }

    pub fn is_discoverable(&self, key: &str) -> bool {
        self.classes.read().contains_key(key)
    }

    /// Resolve a class key to its feature name, defining it if necessary.
    pub fn register_discovered(&self, key: &str) -> Option<DiscoveredFeature> {
        let entry = self.classes.read().get(key).cloned()?;
        let name = (entry.name)();

        if self.is_defined(&name) {
            return Some(DiscoveredFeature {
                name,
                registered: false,
            });
        }

        let name = (entry.define)(self);
        Some(DiscoveredFeature {
            name,
            registered: true,
        })
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.definitions.read().resolvers.contains_key(name)
    }

    /// All defined feature names, in definition order.
    pub fn defined_names(&self) -> Vec<String> {
        self.definitions.read().order.clone()
    }

    pub fn resolver(&self, name: &str) -> Option<ResolverFn> {
        self.definitions.read().resolvers.get(name).cloned()
    }

    /// Run the feature's resolver for a scope, drawing any lottery.
    ///
    /// Returns `None` when the feature is not defined.
    pub fn resolve(&self, name: &str, scope: &Scope) -> Option<Value> {
        let resolver = self.resolver(name)?;
        Some(resolver(scope).into_value())
    }
}

impl std::fmt::Debug for FeatureRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureRegistry")
            .field("defined", &self.defined_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static CONSTRUCTED: AtomicUsize = AtomicUsize::new(0);

    struct Counted;

    impl Default for Counted {
        fn default() -> Self {
            CONSTRUCTED.fetch_add(1, Ordering::SeqCst);
            Self
        }
    }

    impl FeatureClass for Counted {
        fn resolve(&self, _scope: &Scope) -> Resolved {
            "counted".into()
        }
    }

    #[derive(Default)]
    struct Renamed;

    impl FeatureClass for Renamed {
        fn name(&self) -> String {
            "renamed-feature".to_string()
        }

        fn resolve(&self, scope: &Scope) -> Resolved {
            (scope.as_str() == Some("tim")).into()
        }
    }

    #[test]
    fn test_defined_names_keep_insertion_order() {
        let registry = FeatureRegistry::new();
        registry.define_value("b", true);
        registry.define_value("a", true);
        registry.define_value("c", true);
        registry.define_value("a", false);

        assert_eq!(registry.defined_names(), vec!["b", "a", "c"]);
        assert_eq!(
            registry.resolve("a", &Scope::Null),
            Some(Value::Bool(false))
        );
    }

    #[test]
    fn test_unknown_feature_has_no_resolution() {
        let registry = FeatureRegistry::new();
        assert!(registry.resolve("missing", &Scope::Null).is_none());
        assert!(!registry.is_defined("missing"));
    }

    #[test]
    fn test_resolver_receives_scope() {
        let registry = FeatureRegistry::new();
        registry.define("greeting", |scope: &Scope| {
            format!("hello {}", scope.as_str().unwrap_or("world"))
        });

        assert_eq!(
            registry.resolve("greeting", &Scope::from("tim")),
            Some(Value::from("hello tim"))
        );
        assert_eq!(
            registry.resolve("greeting", &Scope::Null),
            Some(Value::from("hello world"))
        );
    }

    #[test]
    fn test_lottery_is_drawn() {
        let registry = FeatureRegistry::new();
        registry.define_value("always", Lottery::always_win().winner("won"));

        assert_eq!(
            registry.resolve("always", &Scope::Null),
            Some(Value::from("won"))
        );
    }

    #[test]
    fn test_class_constructed_per_resolution() {
        let registry = FeatureRegistry::new();
        let name = registry.define_class::<Counted>();
        assert_eq!(name, class_key::<Counted>());

        let before = CONSTRUCTED.load(Ordering::SeqCst);
        registry.resolve(&name, &Scope::Null);
        registry.resolve(&name, &Scope::Null);

        assert_eq!(CONSTRUCTED.load(Ordering::SeqCst) - before, 2);
    }

    #[test]
    fn test_class_with_custom_name() {
        let registry = FeatureRegistry::new();
        let name = registry.define_class::<Renamed>();

        assert_eq!(name, "renamed-feature");
        assert!(registry.is_defined("renamed-feature"));
        assert!(!registry.is_defined(class_key::<Renamed>()));
        assert_eq!(
            registry.resolve("renamed-feature", &Scope::from("tim")),
            Some(Value::Bool(true))
        );
    }

    #[test]
    fn test_discovered_class_registers_once() {
        let registry = FeatureRegistry::new();
        registry.discover::<Renamed>();

        assert!(registry.is_discoverable(class_key::<Renamed>()));
        assert!(!registry.is_defined("renamed-feature"));

        let first = registry.register_discovered(class_key::<Renamed>()).unwrap();
        assert_eq!(first.name, "renamed-feature");
        assert!(first.registered);

        let second = registry.register_discovered(class_key::<Renamed>()).unwrap();
        assert!(!second.registered);

        assert!(registry.register_discovered("not-a-class").is_none());
    }
}
