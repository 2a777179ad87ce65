//! Store configuration.
//!
//! A [`FeaturesConfig`] names the default store and maps store names to their
//! driver settings. It can be built in code, read from TOML or taken from the
//! environment:
//!
//! ```toml
//! default = "database"
//!
//! [stores.array]
//! driver = "array"
//!
//! [stores.database]
//! driver = "database"
//! url = "sqlite://features.db"
//! table = "features"
//! create_table = true
//! ```

use crate::error::{FeatureError, FeatureResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Default store name.
pub const DEFAULT_STORE: &str = "array";

/// Default Redis key prefix.
pub const DEFAULT_REDIS_PREFIX: &str = "features";

/// Default features table.
pub const DEFAULT_TABLE: &str = "features";

/// Default database pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

fn default_store() -> String {
    DEFAULT_STORE.to_string()
}

fn default_stores() -> BTreeMap<String, StoreConfig> {
    BTreeMap::from([(DEFAULT_STORE.to_string(), StoreConfig::Array)])
}

fn default_prefix() -> String {
    DEFAULT_REDIS_PREFIX.to_string()
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

/// Driver settings for one store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "snake_case")]
pub enum StoreConfig {
    /// In-memory storage
    Array,

    /// Redis storage
    Redis {
        url: String,
        #[serde(default = "default_prefix")]
        prefix: String,
    },

    /// Relational storage
    Database {
        url: String,
        #[serde(default = "default_table")]
        table: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Create the table on first use if it is missing
        #[serde(default)]
        create_table: bool,
    },

    /// A driver registered with `FeatureManager::extend`
    Custom {
        creator: String,
        #[serde(default)]
        options: Value,
    },
}

impl StoreConfig {
    /// Redis store with the default prefix.
    pub fn redis(url: impl Into<String>) -> Self {
        StoreConfig::Redis {
            url: url.into(),
            prefix: default_prefix(),
        }
    }

    /// Database store with the default table and pool size.
    pub fn database(url: impl Into<String>) -> Self {
        StoreConfig::Database {
            url: url.into(),
            table: default_table(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            create_table: false,
        }
    }

    /// Store backed by a custom driver creator.
    pub fn custom(creator: impl Into<String>, options: Value) -> Self {
        StoreConfig::Custom {
            creator: creator.into(),
            options,
        }
    }

    /// Name of the driver this store uses.
    pub fn driver_name(&self) -> &str {
        match self {
            StoreConfig::Array => "array",
            StoreConfig::Redis { .. } => "redis",
            StoreConfig::Database { .. } => "database",
            StoreConfig::Custom { creator, .. } => creator,
        }
    }
}

/// Feature store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturesConfig {
    /// Store used when none is named
    #[serde(default = "default_store")]
    pub default: String,

    /// Stores by name
    #[serde(default = "default_stores")]
    pub stores: BTreeMap<String, StoreConfig>,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            default: default_store(),
            stores: default_stores(),
        }
    }
}

impl FeaturesConfig {
    /// Create a configuration with no stores and the given default store name.
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            stores: BTreeMap::new(),
        }
    }

    /// Add or replace a store.
    pub fn with_store(mut self, name: impl Into<String>, store: StoreConfig) -> Self {
        self.stores.insert(name.into(), store);
        self
    }

    /// Settings of a named store.
    pub fn store(&self, name: &str) -> Option<&StoreConfig> {
        self.stores.get(name)
    }

    /// Check that the default store is configured.
    pub fn validate(&self) -> FeatureResult<()> {
        if !self.stores.contains_key(&self.default) {
            return Err(FeatureError::config(format!(
                "default store [{}] is not configured",
                self.default
            )));
        }

        for (name, store) in &self.stores {
            match store {
                StoreConfig::Redis { url, .. } | StoreConfig::Database { url, .. }
                    if url.trim().is_empty() =>
                {
                    return Err(FeatureError::config(format!(
                        "store [{}] has an empty url",
                        name
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> FeatureResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| FeatureError::config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> FeatureResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            FeatureError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Build a configuration from environment variables.
    ///
    /// The `array` store is always configured. A `redis` store is added when
    /// `FEATURE_FLAGS_REDIS_URL` is set and a `database` store when
    /// `FEATURE_FLAGS_DATABASE_URL` is set. `FEATURE_FLAGS_STORE` picks the
    /// default store, `FEATURE_FLAGS_PREFIX` the Redis prefix and
    /// `FEATURE_FLAGS_TABLE` the database table.
    pub fn from_env() -> FeatureResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> FeatureResult<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("FEATURE_FLAGS_REDIS_URL") {
            let prefix = lookup("FEATURE_FLAGS_PREFIX").unwrap_or_else(default_prefix);
            config = config.with_store("redis", StoreConfig::Redis { url, prefix });
        }

        if let Some(url) = lookup("FEATURE_FLAGS_DATABASE_URL") {
            let table = lookup("FEATURE_FLAGS_TABLE").unwrap_or_else(default_table);
            config = config.with_store(
                "database",
                StoreConfig::Database {
                    url,
                    table,
                    max_connections: DEFAULT_MAX_CONNECTIONS,
                    create_table: false,
                },
            );
        }

        if let Some(store) = lookup("FEATURE_FLAGS_STORE") {
            config.default = store;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = FeaturesConfig::default();
        assert_eq!(config.default, "array");
        assert_eq!(config.store("array"), Some(&StoreConfig::Array));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_default_store() {
        let config = FeaturesConfig::new("redis").with_store("array", StoreConfig::Array);
        assert!(matches!(config.validate(), Err(FeatureError::Config(_))));
    }

    #[test]
    fn test_parse_toml() {
        let config = FeaturesConfig::from_toml_str(
            r#"
            default = "database"

            [stores.array]
            driver = "array"

            [stores.database]
            driver = "database"
            url = "sqlite::memory:"
            create_table = true

            [stores.cache]
            driver = "redis"
            url = "redis://localhost:6379"
            prefix = "flags"

            [stores.remote]
            driver = "custom"
            creator = "http"
            options = { endpoint = "https://flags.internal" }
            "#,
        )
        .unwrap();

        assert_eq!(config.default, "database");
        assert_eq!(
            config.store("database"),
            Some(&StoreConfig::Database {
                url: "sqlite::memory:".to_string(),
                table: "features".to_string(),
                max_connections: DEFAULT_MAX_CONNECTIONS,
                create_table: true,
            })
        );
        assert_eq!(
            config.store("cache"),
            Some(&StoreConfig::Redis {
                url: "redis://localhost:6379".to_string(),
                prefix: "flags".to_string(),
            })
        );
        assert_eq!(config.store("remote").unwrap().driver_name(), "http");
    }

    #[test]
    fn test_toml_defaults_to_array_store() {
        let config = FeaturesConfig::from_toml_str("").unwrap();
        assert_eq!(config, FeaturesConfig::default());
    }

    #[test]
    fn test_unknown_driver_is_rejected() {
        let result = FeaturesConfig::from_toml_str(
            r#"
            [stores.array]
            driver = "memcached"
            "#,
        );
        assert!(matches!(result, Err(FeatureError::Config(_))));
    }

    #[test]
    fn test_empty_url_is_rejected() {
        let config = FeaturesConfig::default().with_store("redis", StoreConfig::redis(" "));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_lookup() {
        let config = FeaturesConfig::from_lookup(lookup(&[
            ("FEATURE_FLAGS_STORE", "database"),
            ("FEATURE_FLAGS_DATABASE_URL", "sqlite://flags.db"),
            ("FEATURE_FLAGS_TABLE", "feature_flags"),
        ]))
        .unwrap();

        assert_eq!(config.default, "database");
        assert!(config.store("array").is_some());
        assert!(config.store("redis").is_none());
        match config.store("database") {
            Some(StoreConfig::Database { table, .. }) => assert_eq!(table, "feature_flags"),
            other => panic!("unexpected store: {:?}", other),
        }
    }

    #[test]
    fn test_from_lookup_unknown_default() {
        let result = FeaturesConfig::from_lookup(lookup(&[("FEATURE_FLAGS_STORE", "redis")]));
        assert!(result.is_err());
    }
}
