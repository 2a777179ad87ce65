//! Feature scopes and their storage keys.
//!
//! A scope is whatever a feature is evaluated against: a user, a team, a
//! plain string, or nothing at all ([`Scope::Null`], the global scope).
//! Drivers never store scopes directly, only the key produced by
//! [`Scope::serialize`]. Two scopes are the same scope exactly when their keys
//! are equal.
//!
//! Key derivation, in priority order:
//!
//! 1. [`FeatureScopeable`] scopes return their own identifier, used verbatim.
//! 2. Entity scopes produce `"{type}:{key}"`.
//! 3. Everything else is encoded as canonical JSON (object keys sorted), so
//!    `null` becomes `null` and the empty string becomes `""`.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Types that provide their own storage identifier, per store.
///
/// The store name is passed so a type can vary its identifier between
/// stores, e.g. a numeric id for a database store and a slug for Redis.
pub trait FeatureScopeable: Send + Sync {
    /// Identifier used as the scope key for the given store.
    fn to_feature_identifier(&self, store: &str) -> String;
}

/// Persisted entities identified by a type name and a primary key.
pub trait ScopeEntity {
    /// Stable type identifier, e.g. `"users"` or `"App\\Team"`.
    fn entity_type(&self) -> String;

    /// Primary key, rendered as a string.
    fn entity_key(&self) -> String;
}

/// Reference to a persisted entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityScope {
    /// Entity type identifier
    pub kind: String,
    /// Primary key
    pub key: String,
}

impl EntityScope {
    pub fn new(kind: impl Into<String>, key: impl ToString) -> Self {
        Self {
            kind: kind.into(),
            key: key.to_string(),
        }
    }
}

/// The value a feature is evaluated against.
#[derive(Clone, Default)]
pub enum Scope {
    /// Global scope
    #[default]
    Null,
    /// Primitive or structured JSON value
    Value(Value),
    /// Persisted entity
    Entity(EntityScope),
    /// Pre-computed identifier, used verbatim as the key
    Identifier(String),
    /// Scope that computes its identifier per store
    Scopeable(Arc<dyn FeatureScopeable>),
}

impl Scope {
    /// Scope for a persisted entity.
    pub fn entity(entity: &impl ScopeEntity) -> Self {
        Scope::Entity(EntityScope::new(entity.entity_type(), entity.entity_key()))
    }

    /// Scope for a type implementing [`FeatureScopeable`].
    pub fn scopeable(scopeable: impl FeatureScopeable + 'static) -> Self {
        Scope::Scopeable(Arc::new(scopeable))
    }

    /// Scope used verbatim as its storage key.
    pub fn identifier(identifier: impl Into<String>) -> Self {
        Scope::Identifier(identifier.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scope::Null | Scope::Value(Value::Null))
    }

    /// Replace a [`FeatureScopeable`] scope with the identifier it reports for
    /// `store`. Other scopes are returned unchanged.
    pub fn resolve(&self, store: &str) -> Scope {
        match self {
            Scope::Scopeable(scopeable) => {
                Scope::Identifier(scopeable.to_feature_identifier(store))
            }
            other => other.clone(),
        }
    }

    /// Storage key of this scope for the given store.
    pub fn serialize(&self, store: &str) -> String {
        match self {
            Scope::Scopeable(scopeable) => scopeable.to_feature_identifier(store),
            Scope::Identifier(identifier) => identifier.clone(),
            Scope::Entity(entity) => format!("{}:{}", entity.kind, entity.key),
            Scope::Null => "null".to_string(),
            Scope::Value(value) => canonical_json(value),
        }
    }

    /// Borrow the JSON value, if this is a value scope.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Scope::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Borrow the string, if this is a string value scope.
    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Null => f.write_str("Null"),
            Scope::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Scope::Entity(entity) => f.debug_tuple("Entity").field(entity).finish(),
            Scope::Identifier(id) => f.debug_tuple("Identifier").field(id).finish(),
            Scope::Scopeable(_) => f.write_str("Scopeable(..)"),
        }
    }
}

impl From<Value> for Scope {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Scope::Null,
            value => Scope::Value(value),
        }
    }
}

impl From<&str> for Scope {
    fn from(value: &str) -> Self {
        Scope::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Scope {
    fn from(value: String) -> Self {
        Scope::Value(Value::String(value))
    }
}

impl From<&String> for Scope {
    fn from(value: &String) -> Self {
        Scope::Value(Value::String(value.clone()))
    }
}

impl From<bool> for Scope {
    fn from(value: bool) -> Self {
        Scope::Value(Value::Bool(value))
    }
}

impl From<i32> for Scope {
    fn from(value: i32) -> Self {
        Scope::Value(value.into())
    }
}

impl From<i64> for Scope {
    fn from(value: i64) -> Self {
        Scope::Value(value.into())
    }
}

impl From<u64> for Scope {
    fn from(value: u64) -> Self {
        Scope::Value(value.into())
    }
}

impl From<EntityScope> for Scope {
    fn from(entity: EntityScope) -> Self {
        Scope::Entity(entity)
    }
}

impl<T: Into<Scope>> From<Option<T>> for Scope {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Scope::Null)
    }
}

impl From<&Scope> for Scope {
    fn from(scope: &Scope) -> Self {
        scope.clone()
    }
}

/// Encode a JSON value with object keys in sorted order.
///
/// Structurally equal values always produce the same string, regardless of
/// how the map was built.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
