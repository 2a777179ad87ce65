//! Error types for feature resolution.

use thiserror::Error;

/// Result type for feature operations.
pub type FeatureResult<T> = Result<T, FeatureError>;

/// Feature flag errors.
///
/// Resolving a feature that was never defined is not an error: it resolves
/// to `false`. Everything else surfaces here and is returned to the caller
/// unmodified.
#[derive(Debug, Error)]
pub enum FeatureError {
    /// A single value was requested while several scopes were accumulated.
    #[error("Unable to retrieve a single feature value for {scopes} scopes")]
    AmbiguousScope {
        /// Number of scopes accumulated on the interaction
        scopes: usize,
    },

    /// The requested store has no configuration entry.
    #[error("Feature store [{0}] is not defined")]
    StoreNotDefined(String),

    /// The configured driver has no creator, or its cargo feature is disabled.
    #[error("Feature driver [{0}] is not supported")]
    UnsupportedDriver(String),

    /// The driver does not offer this operation.
    #[error("Operation [{0}] is not supported by this driver")]
    Unsupported(String),

    /// A value could not be encoded, or a stored value could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connecting to the backing store failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Redis error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Database error
    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl FeatureError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new serialization error
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        Self::Serialization(msg.into())
    }

    /// Check if this error was raised by the backing store.
    pub fn is_backend_failure(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Serialization(_) => true,
            #[cfg(feature = "redis")]
            Self::Redis(_) => true,
            #[cfg(feature = "database")]
            Self::Database(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for FeatureError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguous_scope_message() {
        let error = FeatureError::AmbiguousScope { scopes: 3 };
        assert!(error.to_string().contains("3 scopes"));
        assert!(!error.is_backend_failure());
    }

    #[test]
    fn test_json_error_is_backend_failure() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: FeatureError = err.into();

        assert!(matches!(error, FeatureError::Serialization(_)));
        assert!(error.is_backend_failure());
    }

    #[test]
    fn test_store_not_defined() {
        let error = FeatureError::StoreNotDefined("missing".to_string());
        assert_eq!(error.to_string(), "Feature store [missing] is not defined");
    }
}
