//! Error types for the Flagstaff CLI.

use flagstaff_features::FeatureError;
use thiserror::Error;

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types.
#[derive(Debug, Error)]
pub enum CliError {
    /// Failure reported by the feature engine or one of its stores
    #[error(transparent)]
    Feature(#[from] FeatureError),

    /// Writing command output failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_errors_display_unchanged() {
        let error = CliError::from(FeatureError::StoreNotDefined("redis".to_string()));
        assert_eq!(
            error.to_string(),
            FeatureError::StoreNotDefined("redis".to_string()).to_string()
        );
    }

    #[test]
    fn io_errors_are_labelled() {
        let error = CliError::from(std::io::Error::other("broken pipe"));
        assert_eq!(error.to_string(), "IO error: broken pipe");
    }
}
